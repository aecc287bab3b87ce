//! Request/response shapes that aren't already covered by `domain` or
//! `service` types: query parameters and small HTTP-only request bodies.

use crate::domain::BidId;
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize)]
pub struct ListOpenRfpsQuery {
    #[serde(rename = "type")]
    pub service_type: Option<String>,
    pub limit: Option<i64>,
}

impl ListOpenRfpsQuery {
    /// `?limit` defaults to 50, capped at 200 (§6).
    pub fn limit(&self) -> i64 {
        self.limit.unwrap_or(50).clamp(1, 200)
    }
}

#[derive(Debug, Deserialize)]
pub struct AgentRfpsQuery {
    pub role: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectWinnerBody {
    /// Single-winner convenience form; for multi-winner RFPs supply `winnerIds` instead.
    pub winner_id: Option<BidId>,
    #[serde(default)]
    pub winner_ids: Vec<BidId>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelRfpBody {
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTemplateBody {
    pub name: String,
    pub payload: serde_json::Value,
}

/// Per-field overrides applied on top of a template's stored payload when
/// publishing from it; every field optional, same shape as `PublishRfpRequest`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PublishFromTemplateBody {
    pub min_budget: Option<String>,
    pub max_budget: Option<String>,
    pub bid_deadline: Option<String>,
    pub service_type: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub components: Vec<crate::health::ComponentHealth>,
}
