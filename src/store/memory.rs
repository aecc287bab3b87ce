//! In-memory Store backend. Used by tests and as a durability-free deployment
//! option (§9 "polymorphism over capability sets... multiple backends").

use super::{AnalyticsSummary, Store};
use crate::domain::{Bid, BidId, BidStatus, Rfp, RfpId, RfpStatus, Template, TemplateId};
use crate::error::{NegotiationError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;

#[derive(Default)]
pub struct InMemoryStore {
    rfps: DashMap<RfpId, Rfp>,
    bids: DashMap<BidId, Bid>,
    templates: DashMap<TemplateId, Template>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn create_rfp(&self, rfp: &Rfp) -> Result<()> {
        self.rfps.insert(rfp.id, rfp.clone());
        Ok(())
    }

    async fn get_rfp(&self, id: RfpId) -> Result<Option<Rfp>> {
        Ok(self.rfps.get(&id).map(|r| r.clone()))
    }

    async fn update_rfp(&self, rfp: &Rfp) -> Result<()> {
        if !self.rfps.contains_key(&rfp.id) {
            return Err(NegotiationError::not_found("RFP", rfp.id));
        }
        self.rfps.insert(rfp.id, rfp.clone());
        Ok(())
    }

    async fn list_open_rfps(&self, service_type: Option<&str>, limit: i64) -> Result<Vec<Rfp>> {
        let mut out: Vec<Rfp> = self
            .rfps
            .iter()
            .filter(|r| r.status == RfpStatus::Open)
            .filter(|r| service_type.map(|t| r.service_type == t).unwrap_or(true))
            .map(|r| r.clone())
            .collect();
        out.sort_by_key(|r| std::cmp::Reverse(r.created_at));
        out.truncate(limit.max(0) as usize);
        Ok(out)
    }

    async fn list_rfps_by_buyer(&self, buyer_addr: &str) -> Result<Vec<Rfp>> {
        Ok(self
            .rfps
            .iter()
            .filter(|r| r.buyer_addr == buyer_addr)
            .map(|r| r.clone())
            .collect())
    }

    async fn list_expired_non_auto_rfps(
        &self,
        before: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Rfp>> {
        let mut out: Vec<Rfp> = self
            .rfps
            .iter()
            .filter(|r| {
                r.status == RfpStatus::Open && !r.auto_select && r.bid_deadline < before
            })
            .map(|r| r.clone())
            .collect();
        out.truncate(limit.max(0) as usize);
        Ok(out)
    }

    async fn list_auto_select_ready_rfps(
        &self,
        before: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Rfp>> {
        let mut out: Vec<Rfp> = self
            .rfps
            .iter()
            .filter(|r| r.status == RfpStatus::Open && r.auto_select && r.bid_deadline < before)
            .map(|r| r.clone())
            .collect();
        out.truncate(limit.max(0) as usize);
        Ok(out)
    }

    async fn list_stale_selecting_rfps(
        &self,
        before: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Rfp>> {
        let mut out: Vec<Rfp> = self
            .rfps
            .iter()
            .filter(|r| r.status == RfpStatus::Selecting && r.updated_at < before)
            .map(|r| r.clone())
            .collect();
        out.truncate(limit.max(0) as usize);
        Ok(out)
    }

    async fn create_bid(&self, bid: &Bid) -> Result<()> {
        self.bids.insert(bid.id, bid.clone());
        Ok(())
    }

    async fn get_bid(&self, id: BidId) -> Result<Option<Bid>> {
        Ok(self.bids.get(&id).map(|b| b.clone()))
    }

    async fn update_bid(&self, bid: &Bid) -> Result<()> {
        if !self.bids.contains_key(&bid.id) {
            return Err(NegotiationError::not_found("Bid", bid.id));
        }
        self.bids.insert(bid.id, bid.clone());
        Ok(())
    }

    async fn list_bids_by_rfp(&self, rfp_id: RfpId) -> Result<Vec<Bid>> {
        Ok(self
            .bids
            .iter()
            .filter(|b| b.rfp_id == rfp_id)
            .map(|b| b.clone())
            .collect())
    }

    async fn list_pending_bids_by_rfp(&self, rfp_id: RfpId) -> Result<Vec<Bid>> {
        let mut out: Vec<Bid> = self
            .bids
            .iter()
            .filter(|b| b.rfp_id == rfp_id && b.status == BidStatus::Pending)
            .map(|b| b.clone())
            .collect();
        out.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        Ok(out)
    }

    async fn get_pending_bid_by_seller(
        &self,
        rfp_id: RfpId,
        seller_addr: &str,
    ) -> Result<Option<Bid>> {
        Ok(self
            .bids
            .iter()
            .find(|b| {
                b.rfp_id == rfp_id
                    && b.seller_addr == seller_addr
                    && b.status == BidStatus::Pending
            })
            .map(|b| b.clone()))
    }

    async fn list_bids_by_seller(&self, seller_addr: &str) -> Result<Vec<Bid>> {
        Ok(self
            .bids
            .iter()
            .filter(|b| b.seller_addr == seller_addr)
            .map(|b| b.clone())
            .collect())
    }

    async fn analytics(&self) -> Result<AnalyticsSummary> {
        let total_rfps = self.rfps.len() as i64;
        let open_rfps = self
            .rfps
            .iter()
            .filter(|r| r.status == RfpStatus::Open)
            .count() as i64;
        let awarded_rfps = self
            .rfps
            .iter()
            .filter(|r| r.status == RfpStatus::Awarded)
            .count() as i64;
        let expired_rfps = self
            .rfps
            .iter()
            .filter(|r| r.status == RfpStatus::Expired)
            .count() as i64;
        let cancelled_rfps = self
            .rfps
            .iter()
            .filter(|r| r.status == RfpStatus::Cancelled)
            .count() as i64;
        let total_bids = self.bids.len() as i64;
        let pending_bids = self
            .bids
            .iter()
            .filter(|b| b.status == BidStatus::Pending)
            .count() as i64;
        let scores: Vec<f64> = self.bids.iter().map(|b| b.score).collect();
        let average_bid_score = if scores.is_empty() {
            0.0
        } else {
            scores.iter().sum::<f64>() / scores.len() as f64
        };

        Ok(AnalyticsSummary {
            total_rfps,
            open_rfps,
            awarded_rfps,
            expired_rfps,
            cancelled_rfps,
            total_bids,
            pending_bids,
            average_bid_score,
        })
    }

    async fn create_template(&self, template: &Template) -> Result<()> {
        self.templates.insert(template.id, template.clone());
        Ok(())
    }

    async fn get_template(&self, id: TemplateId) -> Result<Option<Template>> {
        Ok(self.templates.get(&id).map(|t| t.clone()))
    }

    async fn list_templates(&self, owner_addr: &str) -> Result<Vec<Template>> {
        Ok(self
            .templates
            .iter()
            .filter(|t| t.owner_addr == owner_addr || t.is_system_wide())
            .map(|t| t.clone())
            .collect())
    }

    async fn delete_template(&self, id: TemplateId) -> Result<()> {
        self.templates
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| NegotiationError::not_found("Template", id))
    }
}
