//! Store contract (§4.1): durable CRUD for RFPs, bids, and templates, plus
//! the specialised queries the Sweep needs. The Store is not the arbiter of
//! state transitions — it enforces primary-key uniqueness and not-null on
//! persisted fields, nothing more.

pub mod memory;
pub mod postgres;

use crate::domain::{Bid, BidId, Rfp, RfpId, Template, TemplateId};
use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

pub use memory::InMemoryStore;
pub use postgres::PostgresStore;

#[derive(Debug, Clone, serde::Serialize)]
pub struct AnalyticsSummary {
    pub total_rfps: i64,
    pub open_rfps: i64,
    pub awarded_rfps: i64,
    pub expired_rfps: i64,
    pub cancelled_rfps: i64,
    pub total_bids: i64,
    pub pending_bids: i64,
    pub average_bid_score: f64,
}

#[async_trait]
pub trait Store: Send + Sync {
    // ---- RFPs ----
    async fn create_rfp(&self, rfp: &Rfp) -> Result<()>;
    async fn get_rfp(&self, id: RfpId) -> Result<Option<Rfp>>;
    /// Fails with `NotFound` if no RFP with `rfp.id` exists.
    async fn update_rfp(&self, rfp: &Rfp) -> Result<()>;
    async fn list_open_rfps(&self, service_type: Option<&str>, limit: i64) -> Result<Vec<Rfp>>;
    async fn list_rfps_by_buyer(&self, buyer_addr: &str) -> Result<Vec<Rfp>>;
    /// `status=open`, `autoSelect=false`, `bidDeadline < before`.
    async fn list_expired_non_auto_rfps(
        &self,
        before: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Rfp>>;
    /// `status=open`, `autoSelect=true`, `bidDeadline < before`.
    async fn list_auto_select_ready_rfps(
        &self,
        before: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Rfp>>;
    /// `status=selecting`, entered selecting before `before` (i.e. `before = now - 24h`).
    async fn list_stale_selecting_rfps(
        &self,
        before: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Rfp>>;

    // ---- Bids ----
    async fn create_bid(&self, bid: &Bid) -> Result<()>;
    async fn get_bid(&self, id: BidId) -> Result<Option<Bid>>;
    /// Fails with `NotFound` if no bid with `bid.id` exists.
    async fn update_bid(&self, bid: &Bid) -> Result<()>;
    async fn list_bids_by_rfp(&self, rfp_id: RfpId) -> Result<Vec<Bid>>;
    /// Pending bids on `rfp_id`, ordered by score descending.
    async fn list_pending_bids_by_rfp(&self, rfp_id: RfpId) -> Result<Vec<Bid>>;
    async fn get_pending_bid_by_seller(
        &self,
        rfp_id: RfpId,
        seller_addr: &str,
    ) -> Result<Option<Bid>>;
    async fn list_bids_by_seller(&self, seller_addr: &str) -> Result<Vec<Bid>>;

    // ---- Analytics ----
    async fn analytics(&self) -> Result<AnalyticsSummary>;

    // ---- Templates ----
    async fn create_template(&self, template: &Template) -> Result<()>;
    async fn get_template(&self, id: TemplateId) -> Result<Option<Template>>;
    /// Templates visible to `owner_addr`: its own plus all system-wide (`owner_addr=""`) templates.
    async fn list_templates(&self, owner_addr: &str) -> Result<Vec<Template>>;
    async fn delete_template(&self, id: TemplateId) -> Result<()>;
}
