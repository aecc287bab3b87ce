//! HTTP handlers for the `/v1` negotiation surface (§6).
//!
//! All handlers return `Result<impl IntoResponse, NegotiationError>` — errors
//! are converted to the `{"error", "message"}` body via `NegotiationError`'s
//! own `IntoResponse` impl, so handlers never format an error response by hand.

use axum::extract::{Path, Query, State};
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;

use super::auth::AuthAgentAddr;
use super::dto::{
    AgentRfpsQuery, CancelRfpBody, CreateTemplateBody, HealthResponse, ListOpenRfpsQuery,
    PublishFromTemplateBody, SelectWinnerBody,
};
use super::AppState;
use crate::domain::{BidId, RfpId, TemplateId};
use crate::error::{NegotiationError, Result};
use crate::service::{CounterRequest, PlaceBidRequest, PublishRfpRequest, SelectWinnersRequest};

// ---- health / metrics ----

pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let report = state.health.check_health().await;
    let status = if report.is_operational() {
        axum::http::StatusCode::OK
    } else {
        axum::http::StatusCode::SERVICE_UNAVAILABLE
    };
    (
        status,
        Json(HealthResponse {
            status: if report.is_operational() { "ok" } else { "unhealthy" },
            components: report.components,
        }),
    )
}

pub async fn prometheus_metrics(State(state): State<AppState>) -> impl IntoResponse {
    state.metrics_handle.render()
}

// ---- RFPs ----

pub async fn publish_rfp(
    State(state): State<AppState>,
    AuthAgentAddr(caller): AuthAgentAddr,
    Json(mut req): Json<PublishRfpRequest>,
) -> Result<impl IntoResponse> {
    req.buyer_addr = caller;
    let rfp = state.service.publish_rfp(req).await?;
    Ok(Json(rfp))
}

pub async fn list_open_rfps(
    State(state): State<AppState>,
    Query(query): Query<ListOpenRfpsQuery>,
) -> Result<impl IntoResponse> {
    let rfps = state
        .service
        .list_open_rfps(query.service_type.as_deref(), query.limit())
        .await?;
    Ok(Json(rfps))
}

pub async fn get_rfp(State(state): State<AppState>, Path(id): Path<RfpId>) -> Result<impl IntoResponse> {
    let rfp = state.service.get_rfp(id).await?;
    Ok(Json(rfp))
}

pub async fn cancel_rfp(
    State(state): State<AppState>,
    Path(id): Path<RfpId>,
    AuthAgentAddr(caller): AuthAgentAddr,
    Json(body): Json<CancelRfpBody>,
) -> Result<impl IntoResponse> {
    let rfp = state.service.cancel_rfp(id, &caller, body.reason).await?;
    Ok(Json(rfp))
}

pub async fn select_winners(
    State(state): State<AppState>,
    Path(id): Path<RfpId>,
    AuthAgentAddr(caller): AuthAgentAddr,
    Json(body): Json<SelectWinnerBody>,
) -> Result<impl IntoResponse> {
    let winner_ids = if !body.winner_ids.is_empty() {
        body.winner_ids
    } else if let Some(winner_id) = body.winner_id {
        vec![winner_id]
    } else {
        return Err(NegotiationError::validation(
            "either winnerId or winnerIds must be supplied",
        ));
    };
    let outcome = state
        .service
        .select_winners(id, SelectWinnersRequest { caller, winner_ids })
        .await?;
    Ok(Json(outcome.rfp))
}

// ---- Bids ----

pub async fn list_bids(State(state): State<AppState>, Path(id): Path<RfpId>) -> Result<impl IntoResponse> {
    let bids = state.service.list_bids(id).await?;
    Ok(Json(bids))
}

pub async fn place_bid(
    State(state): State<AppState>,
    Path(id): Path<RfpId>,
    AuthAgentAddr(caller): AuthAgentAddr,
    Json(mut req): Json<PlaceBidRequest>,
) -> Result<impl IntoResponse> {
    req.seller_addr = caller;
    let bid = state.service.place_bid(id, req).await?;
    Ok(Json(bid))
}

#[derive(Debug, Deserialize)]
pub struct BidPath {
    pub id: RfpId,
    pub bid_id: BidId,
}

pub async fn counter(
    State(state): State<AppState>,
    Path(path): Path<BidPath>,
    AuthAgentAddr(caller): AuthAgentAddr,
    Json(mut req): Json<CounterRequest>,
) -> Result<impl IntoResponse> {
    req.caller = caller;
    let bid = state.service.counter(path.id, path.bid_id, req).await?;
    Ok(Json(bid))
}

pub async fn withdraw_bid(
    State(state): State<AppState>,
    Path(path): Path<BidPath>,
    AuthAgentAddr(caller): AuthAgentAddr,
) -> Result<impl IntoResponse> {
    let bid = state.service.withdraw_bid(path.id, path.bid_id, &caller).await?;
    Ok(Json(bid))
}

// ---- Templates ----

pub async fn list_templates(
    State(state): State<AppState>,
    AuthAgentAddr(caller): AuthAgentAddr,
) -> Result<impl IntoResponse> {
    let templates = state.service.list_templates(&caller).await?;
    Ok(Json(templates))
}

pub async fn create_template(
    State(state): State<AppState>,
    AuthAgentAddr(caller): AuthAgentAddr,
    Json(body): Json<CreateTemplateBody>,
) -> Result<impl IntoResponse> {
    let template = state.service.create_template(&caller, body.name, body.payload).await?;
    Ok(Json(template))
}

pub async fn get_template(
    State(state): State<AppState>,
    Path(id): Path<TemplateId>,
) -> Result<impl IntoResponse> {
    let template = state.service.get_template(id).await?;
    Ok(Json(template))
}

pub async fn delete_template(
    State(state): State<AppState>,
    Path(id): Path<TemplateId>,
    AuthAgentAddr(caller): AuthAgentAddr,
) -> Result<impl IntoResponse> {
    state.service.delete_template(&caller, id).await?;
    Ok(axum::http::StatusCode::NO_CONTENT)
}

/// Publishes a new RFP seeded from a template's stored payload, with any
/// fields in the request body overriding the template's values (§4.3
/// PublishFromTemplate — not a distinct Service entry point, just a
/// PublishRFP whose request is assembled from two sources).
pub async fn publish_from_template(
    State(state): State<AppState>,
    Path(template_id): Path<TemplateId>,
    AuthAgentAddr(caller): AuthAgentAddr,
    Json(overrides): Json<PublishFromTemplateBody>,
) -> Result<impl IntoResponse> {
    let template = state.service.get_template(template_id).await?;
    let mut req: PublishRfpRequest = serde_json::from_value(template.payload.clone())
        .map_err(|e| NegotiationError::validation(format!("template payload is not a valid RFP: {e}")))?;

    if let Some(v) = overrides.min_budget {
        req.min_budget = v;
    }
    if let Some(v) = overrides.max_budget {
        req.max_budget = v;
    }
    if let Some(v) = overrides.bid_deadline {
        req.bid_deadline = v;
    }
    if let Some(v) = overrides.service_type {
        req.service_type = v;
    }
    req.buyer_addr = caller;

    let rfp = state.service.publish_rfp(req).await?;
    Ok(Json(rfp))
}

// ---- Per-agent listings ----

pub async fn agent_rfps(
    State(state): State<AppState>,
    Path(address): Path<String>,
    Query(query): Query<AgentRfpsQuery>,
) -> Result<impl IntoResponse> {
    let rfps = match query.role.as_deref() {
        Some("seller") => state.service.list_rfps_by_seller(&address).await?,
        _ => state.service.list_rfps_by_buyer(&address).await?,
    };
    Ok(Json(rfps))
}

// ---- Admin ----

pub async fn analytics(State(state): State<AppState>) -> Result<impl IntoResponse> {
    let summary = state.service.analytics().await?;
    Ok(Json(summary))
}
