//! Service: the orchestrator that guards RFP/Bid state transitions, drives
//! the scoring/bond protocol, and emits observation events (§4.3).
//!
//! Every mutating entry point acquires `LockTable[rfp.id]` for the entire
//! operation and re-reads the RFP from the Store inside the lock — callers
//! must never trust a pre-lock snapshot (§5 "check-and-act").

mod award;

pub use award::{AwardOutcome, SelectWinnersRequest};

use crate::contract_former::ContractFormer;
use crate::domain::{
    clamp, format_decimal6, parse_bid_deadline, parse_decimal, parse_no_withdraw_window, Bid,
    BidId, BidStatus, BondStatus, Rfp, RfpId, RfpStatus, ScoringWeights, Template, TemplateId,
};
use crate::error::{ErrorCode, NegotiationError, Result};
use crate::ledger::{bid_bond_forfeit_ref, bid_bond_ref, Ledger};
use crate::locktable::LockTable;
use crate::observability::NegotiationEvent;
use crate::realtime::{Event, EventData, EventType, RealtimeHub};
use crate::reputation::{reputation_or_zero, ReputationOracle};
use crate::scorer::score_bid;
use crate::store::Store;
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// Everything PublishRFP needs beyond the buyer's explicit choices; mirrors
/// the PublishRFP defaults in §4.3. Sourced from `NegotiationConfig` at
/// startup, not hardcoded, so deployments can retune defaults without a
/// code change.
#[derive(Debug, Clone)]
pub struct ServiceDefaults {
    pub max_latency_ms: i64,
    pub min_success_rate: f64,
    pub min_volume: i64,
    pub max_counter_rounds: i32,
    pub max_winners: i32,
    pub scoring_weights: ScoringWeights,
    pub selecting_grace: chrono::Duration,
}

impl Default for ServiceDefaults {
    fn default() -> Self {
        Self {
            max_latency_ms: 10_000,
            min_success_rate: 95.0,
            min_volume: 1,
            max_counter_rounds: 3,
            max_winners: 1,
            scoring_weights: ScoringWeights::default(),
            selecting_grace: chrono::Duration::hours(24),
        }
    }
}

pub struct Service {
    store: Arc<dyn Store>,
    reputation: Arc<dyn ReputationOracle>,
    ledger: Arc<dyn Ledger>,
    contract_former: Option<Arc<dyn ContractFormer>>,
    locks: Arc<LockTable>,
    hub: Option<RealtimeHub>,
    defaults: ServiceDefaults,
}

impl Service {
    pub fn new(
        store: Arc<dyn Store>,
        reputation: Arc<dyn ReputationOracle>,
        ledger: Arc<dyn Ledger>,
        contract_former: Option<Arc<dyn ContractFormer>>,
        locks: Arc<LockTable>,
    ) -> Self {
        Self {
            store,
            reputation,
            ledger,
            contract_former,
            locks,
            hub: None,
            defaults: ServiceDefaults::default(),
        }
    }

    pub fn with_hub(mut self, hub: RealtimeHub) -> Self {
        self.hub = Some(hub);
        self
    }

    pub fn with_defaults(mut self, defaults: ServiceDefaults) -> Self {
        self.defaults = defaults;
        self
    }

    fn broadcast(&self, event_type: EventType, data: EventData) {
        if let Some(hub) = &self.hub {
            hub.broadcast(Event {
                event_type,
                timestamp: Utc::now(),
                data,
            });
        }
    }

    async fn require_rfp(&self, id: RfpId) -> Result<Rfp> {
        self.store
            .get_rfp(id)
            .await?
            .ok_or_else(|| NegotiationError::not_found("RFP", id))
    }

    async fn require_bid(&self, id: BidId) -> Result<Bid> {
        self.store
            .get_bid(id)
            .await?
            .ok_or_else(|| NegotiationError::not_found("Bid", id))
    }

    // ---- read-only entry points (no lock) ----

    pub async fn get_rfp(&self, id: RfpId) -> Result<Rfp> {
        self.require_rfp(id).await
    }

    pub async fn list_open_rfps(&self, service_type: Option<&str>, limit: i64) -> Result<Vec<Rfp>> {
        self.store.list_open_rfps(service_type, limit).await
    }

    pub async fn list_rfps_by_buyer(&self, buyer_addr: &str) -> Result<Vec<Rfp>> {
        self.store.list_rfps_by_buyer(&buyer_addr.to_lowercase()).await
    }

    pub async fn list_rfps_by_seller(&self, seller_addr: &str) -> Result<Vec<Rfp>> {
        let bids = self.store.list_bids_by_seller(&seller_addr.to_lowercase()).await?;
        let mut rfps = Vec::new();
        let mut seen = std::collections::HashSet::new();
        for bid in bids {
            if seen.insert(bid.rfp_id) {
                if let Some(rfp) = self.store.get_rfp(bid.rfp_id).await? {
                    rfps.push(rfp);
                }
            }
        }
        Ok(rfps)
    }

    /// Lists bids on `rfp_id`. Sealed, still-open RFPs have seller-economics
    /// fields redacted from every bid (§6).
    pub async fn list_bids(&self, rfp_id: RfpId) -> Result<Vec<Bid>> {
        let rfp = self.require_rfp(rfp_id).await?;
        let bids = self.store.list_bids_by_rfp(rfp_id).await?;
        if rfp.sealed_bids && rfp.status == RfpStatus::Open {
            Ok(bids.into_iter().map(Bid::redacted).collect())
        } else {
            Ok(bids)
        }
    }

    pub async fn analytics(&self) -> Result<crate::store::AnalyticsSummary> {
        self.store.analytics().await
    }

    pub async fn list_templates(&self, owner_addr: &str) -> Result<Vec<Template>> {
        self.store.list_templates(owner_addr).await
    }

    pub async fn get_template(&self, id: TemplateId) -> Result<Template> {
        self.store
            .get_template(id)
            .await?
            .ok_or_else(|| NegotiationError::not_found("Template", id))
    }

    pub async fn create_template(
        &self,
        owner_addr: &str,
        name: String,
        payload: serde_json::Value,
    ) -> Result<Template> {
        let now = Utc::now();
        let template = Template {
            id: TemplateId::new(),
            owner_addr: owner_addr.to_lowercase(),
            name,
            payload,
            created_at: now,
            updated_at: now,
        };
        self.store.create_template(&template).await?;
        Ok(template)
    }

    pub async fn delete_template(&self, caller: &str, id: TemplateId) -> Result<()> {
        let template = self.get_template(id).await?;
        if !template.is_system_wide() && template.owner_addr != caller.to_lowercase() {
            return Err(NegotiationError::unauthorized(
                "only the template owner may delete it",
            ));
        }
        self.store.delete_template(id).await
    }

    // ---- PublishRFP ----

    #[allow(clippy::too_many_arguments)]
    pub async fn publish_rfp(&self, req: PublishRfpRequest) -> Result<Rfp> {
        let now = Utc::now();
        let buyer_addr = req.buyer_addr.to_lowercase();

        let min_budget = parse_decimal(&req.min_budget);
        let max_budget = parse_decimal(&req.max_budget);
        if min_budget <= 0.0 {
            return Err(NegotiationError::validation("minBudget must be greater than 0"));
        }
        if max_budget < min_budget {
            return Err(NegotiationError::validation("maxBudget must be >= minBudget"));
        }

        let bid_deadline = parse_bid_deadline(&req.bid_deadline, now)
            .map_err(NegotiationError::validation)?;

        let required_bond_pct = req.required_bond_pct.unwrap_or(0.0);
        if !(0.0..=100.0).contains(&required_bond_pct) {
            return Err(NegotiationError::validation(
                "requiredBondPct must be between 0 and 100",
            ));
        }

        let no_withdraw_window_secs = match &req.no_withdraw_window {
            Some(s) if !s.is_empty() => Some(
                parse_no_withdraw_window(s)
                    .map_err(NegotiationError::validation)?
                    .num_seconds(),
            ),
            _ => None,
        };

        let sealed_bids = req.sealed_bids.unwrap_or(false);
        let max_counter_rounds = if sealed_bids {
            0
        } else {
            req.max_counter_rounds.unwrap_or(self.defaults.max_counter_rounds)
        };

        let rfp = Rfp {
            id: RfpId::new(),
            buyer_addr,
            service_type: req.service_type,
            min_budget: req.min_budget,
            max_budget: req.max_budget,
            max_latency_ms: req.max_latency_ms.unwrap_or(self.defaults.max_latency_ms),
            min_success_rate: req.min_success_rate.unwrap_or(self.defaults.min_success_rate),
            duration_secs: req.duration_secs.unwrap_or(0),
            min_volume: req.min_volume.unwrap_or(self.defaults.min_volume),
            bid_deadline,
            auto_select: req.auto_select.unwrap_or(false),
            min_reputation: req.min_reputation.unwrap_or(0.0),
            max_counter_rounds,
            required_bond_pct,
            no_withdraw_window_secs,
            max_winners: req.max_winners.unwrap_or(self.defaults.max_winners).max(1),
            sealed_bids,
            scoring_weights: req.scoring_weights.unwrap_or(self.defaults.scoring_weights),
            status: RfpStatus::Open,
            winning_bid_ids: vec![],
            contract_ids: vec![],
            bid_count: 0,
            cancel_reason: None,
            awarded_at: None,
            created_at: now,
            updated_at: now,
        };

        self.store.create_rfp(&rfp).await?;
        NegotiationEvent::RfpPublished {
            rfp_id: rfp.id.to_string(),
            buyer_addr: rfp.buyer_addr.clone(),
        }
        .log();
        self.broadcast(
            EventType::AgentJoined,
            EventData {
                from: Some(rfp.buyer_addr.clone()),
                to: None,
                author_addr: Some(rfp.buyer_addr.clone()),
                amount: None,
                service_type: Some(rfp.service_type.clone()),
                payload: serde_json::json!({ "rfpId": rfp.id.to_string() }),
            },
        );
        Ok(rfp)
    }

    // ---- PlaceBid ----

    pub async fn place_bid(&self, rfp_id: RfpId, req: PlaceBidRequest) -> Result<Bid> {
        let _guard = self.locks.lock(rfp_id).await;
        let rfp = self.require_rfp(rfp_id).await?;

        let seller_addr = req.seller_addr.to_lowercase();
        if rfp.status != RfpStatus::Open {
            return Err(NegotiationError::new(ErrorCode::InvalidStatus, "RFP is not open"));
        }
        if rfp.bid_deadline <= Utc::now() {
            return Err(NegotiationError::new(
                ErrorCode::BidDeadlinePast,
                "the bid deadline has passed",
            ));
        }
        if seller_addr == rfp.buyer_addr {
            return Err(NegotiationError::new(
                ErrorCode::SelfBid,
                "a buyer may not bid on its own RFP",
            ));
        }
        if self
            .store
            .get_pending_bid_by_seller(rfp_id, &seller_addr)
            .await?
            .is_some()
        {
            return Err(NegotiationError::new(
                ErrorCode::DuplicateBid,
                "seller already has a pending bid on this RFP",
            ));
        }

        let total_budget = parse_decimal(&req.total_budget);
        let (min_budget, max_budget) = (rfp.min_budget_f64(), rfp.max_budget_f64());
        if total_budget < min_budget || total_budget > max_budget {
            return Err(NegotiationError::new(
                ErrorCode::BudgetOutOfRange,
                "totalBudget is outside the RFP's [minBudget, maxBudget] range",
            ));
        }

        if rfp.min_reputation > 0.0 {
            let score = reputation_or_zero(self.reputation.as_ref(), &seller_addr).await;
            if score < rfp.min_reputation {
                return Err(NegotiationError::new(
                    ErrorCode::LowReputation,
                    "seller reputation is below the RFP's minimum",
                ));
            }
        }

        let now = Utc::now();
        let mut bid = Bid {
            id: BidId::new(),
            rfp_id,
            seller_addr: seller_addr.clone(),
            price_per_call: req.price_per_call,
            total_budget: req.total_budget,
            latency_ms: req.latency_ms.unwrap_or(rfp.max_latency_ms),
            success_rate: req.success_rate.unwrap_or(rfp.min_success_rate),
            duration_secs: req.duration_secs.unwrap_or(rfp.duration_secs),
            seller_penalty: req.seller_penalty.unwrap_or_else(|| "0".to_string()),
            status: BidStatus::Pending,
            score: 0.0,
            counter_round: 0,
            parent_bid_id: None,
            countered_by_id: None,
            bond_amount: "0".to_string(),
            bond_status: BondStatus::None,
            message: req.message,
            created_at: now,
            updated_at: now,
        };

        if rfp.required_bond_pct > 0.0 {
            let bond_amount = total_budget * rfp.required_bond_pct / 100.0;
            let bond_amount_str = format_decimal6(bond_amount);
            self.ledger
                .hold(&seller_addr, bond_amount, &bid_bond_ref(bid.id))
                .await
                .map_err(|e| {
                    NegotiationError::new(
                        ErrorCode::InsufficientBond,
                        format!("failed to place bid bond: {e}"),
                    )
                })?;
            bid.bond_amount = bond_amount_str;
            bid.bond_status = BondStatus::Held;
        }

        let reputation = reputation_or_zero(self.reputation.as_ref(), &seller_addr).await;
        bid.score = score_bid(&bid, &rfp, reputation);

        if let Err(err) = self.store.create_bid(&bid).await {
            if bid.bond_status == BondStatus::Held {
                let _ = self
                    .ledger
                    .release_hold(&seller_addr, bid.bond_amount_f64(), &bid_bond_ref(bid.id))
                    .await;
            }
            return Err(err);
        }

        let mut rfp = rfp;
        rfp.bid_count += 1;
        rfp.updated_at = Utc::now();
        if let Err(err) = self.store.update_rfp(&rfp).await {
            tracing::warn!(rfp_id = %rfp_id, error = %err, "failed to persist incremented bid_count; sweep will reconstruct from live bids");
        }

        NegotiationEvent::BidPlaced {
            rfp_id: rfp_id.to_string(),
            bid_id: bid.id.to_string(),
            score: bid.score,
        }
        .log();
        self.broadcast(
            EventType::Transaction,
            EventData {
                from: Some(seller_addr.clone()),
                to: Some(rfp.buyer_addr.clone()),
                author_addr: Some(seller_addr),
                amount: Some(bid.total_budget_f64()),
                service_type: Some(rfp.service_type.clone()),
                payload: serde_json::json!({ "rfpId": rfp_id.to_string(), "bidId": bid.id.to_string() }),
            },
        );

        Ok(bid)
    }

    // ---- Counter ----

    pub async fn counter(&self, rfp_id: RfpId, bid_id: BidId, req: CounterRequest) -> Result<Bid> {
        let _guard = self.locks.lock(rfp_id).await;
        let rfp = self.require_rfp(rfp_id).await?;

        if !matches!(rfp.status, RfpStatus::Open | RfpStatus::Selecting) {
            return Err(NegotiationError::new(ErrorCode::InvalidStatus, "RFP is not accepting counters"));
        }
        if rfp.sealed_bids {
            return Err(NegotiationError::new(
                ErrorCode::InvalidStatus,
                "sealed-bid RFPs do not allow counters",
            ));
        }

        let parent = self.require_bid(bid_id).await?;
        if parent.rfp_id != rfp_id {
            return Err(NegotiationError::not_found("Bid", bid_id));
        }
        if parent.status != BidStatus::Pending {
            return Err(NegotiationError::new(
                ErrorCode::InvalidStatus,
                "only a pending bid may be countered",
            ));
        }

        let caller = req.caller.to_lowercase();
        if caller != rfp.buyer_addr && caller != parent.seller_addr {
            return Err(NegotiationError::unauthorized(
                "only the RFP buyer or the bid's seller may counter",
            ));
        }

        if parent.counter_round >= rfp.max_counter_rounds {
            return Err(NegotiationError::new(
                ErrorCode::MaxCounterRounds,
                "the maximum number of counter rounds has been reached",
            ));
        }

        let now = Utc::now();
        let mut counter_bid = Bid {
            id: BidId::new(),
            rfp_id,
            seller_addr: parent.seller_addr.clone(),
            price_per_call: non_empty_or(req.price_per_call, &parent.price_per_call),
            total_budget: non_empty_or(req.total_budget, &parent.total_budget),
            latency_ms: non_zero_or(req.latency_ms, parent.latency_ms),
            success_rate: non_zero_or_f64(req.success_rate, parent.success_rate),
            duration_secs: non_zero_or(req.duration_secs, parent.duration_secs),
            seller_penalty: non_empty_or(req.seller_penalty, &parent.seller_penalty),
            status: BidStatus::Pending,
            score: 0.0,
            counter_round: parent.counter_round + 1,
            parent_bid_id: Some(parent.id),
            countered_by_id: None,
            bond_amount: parent.bond_amount.clone(),
            bond_status: parent.bond_status,
            message: req.message.or_else(|| parent.message.clone()),
            created_at: now,
            updated_at: now,
        };

        let reputation = reputation_or_zero(self.reputation.as_ref(), &counter_bid.seller_addr).await;
        counter_bid.score = score_bid(&counter_bid, &rfp, reputation);

        // Bond transfer ordering (§4.3): create the counter first, carrying
        // the bond fields, and only then flip the parent's bond away. If the
        // parent write fails below, the counter already owns the bond and no
        // funds are lost.
        self.store.create_bid(&counter_bid).await?;

        let mut parent = parent;
        parent.status = BidStatus::Countered;
        parent.countered_by_id = Some(counter_bid.id);
        parent.bond_amount = "0".to_string();
        parent.bond_status = BondStatus::None;
        parent.updated_at = now;
        if let Err(err) = self.store.update_bid(&parent).await {
            tracing::warn!(
                rfp_id = %rfp_id,
                parent_bid_id = %parent.id,
                counter_bid_id = %counter_bid.id,
                error = %err,
                "failed to flip parent bid to countered; counter bid already owns the bond"
            );
        }

        NegotiationEvent::BidCountered {
            rfp_id: rfp_id.to_string(),
            parent_bid_id: parent.id.to_string(),
            counter_bid_id: counter_bid.id.to_string(),
        }
        .log();

        Ok(counter_bid)
    }

    // ---- CancelRFP ----

    pub async fn cancel_rfp(&self, rfp_id: RfpId, caller: &str, reason: Option<String>) -> Result<Rfp> {
        let _guard = self.locks.lock(rfp_id).await;
        let mut rfp = self.require_rfp(rfp_id).await?;

        if caller.to_lowercase() != rfp.buyer_addr {
            return Err(NegotiationError::unauthorized("only the RFP buyer may cancel it"));
        }
        if rfp.status.is_terminal() {
            return Err(NegotiationError::new(ErrorCode::AlreadyAwarded, "RFP is already terminal"));
        }

        let pending = self.store.list_pending_bids_by_rfp(rfp_id).await?;
        for bid in pending {
            self.reject_bid(bid).await?;
        }

        rfp.status = RfpStatus::Cancelled;
        rfp.cancel_reason = reason;
        rfp.updated_at = Utc::now();
        self.store.update_rfp(&rfp).await?;

        NegotiationEvent::RfpCancelled {
            rfp_id: rfp_id.to_string(),
            reason: rfp.cancel_reason.clone(),
        }
        .log();

        Ok(rfp)
    }

    // ---- WithdrawBid ----

    pub async fn withdraw_bid(&self, rfp_id: RfpId, bid_id: BidId, caller: &str) -> Result<Bid> {
        let _guard = self.locks.lock(rfp_id).await;
        let rfp = self.require_rfp(rfp_id).await?;
        if rfp.status.is_terminal() {
            return Err(NegotiationError::new(ErrorCode::AlreadyAwarded, "RFP is already terminal"));
        }

        let mut bid = self.require_bid(bid_id).await?;
        if bid.rfp_id != rfp_id {
            return Err(NegotiationError::not_found("Bid", bid_id));
        }
        if caller.to_lowercase() != bid.seller_addr {
            return Err(NegotiationError::unauthorized("only the bid's seller may withdraw it"));
        }
        if bid.status != BidStatus::Pending {
            return Err(NegotiationError::new(
                ErrorCode::BidAlreadyWithdrawn,
                "bid is not pending and cannot be withdrawn",
            ));
        }

        let now = Utc::now();
        if let Some(window_secs) = rfp.no_withdraw_window_secs {
            let window = chrono::Duration::seconds(window_secs);
            if now >= rfp.bid_deadline - window && now < rfp.bid_deadline {
                return Err(NegotiationError::new(
                    ErrorCode::WithdrawalBlocked,
                    "withdrawal is blocked during the no-withdraw window",
                ));
            }
        }

        let elapsed = now - bid.created_at;
        let total = rfp.bid_deadline - bid.created_at;
        let last_quarter = total.num_milliseconds() > 0
            && elapsed.num_milliseconds() as f64 > 0.75 * total.num_milliseconds() as f64;

        if bid.bond_status == BondStatus::Held && bid.bond_amount_f64() > 0.0 {
            if last_quarter {
                self.forfeit_bond(&rfp, &mut bid, 0.5).await;
            } else {
                let amount = bid.bond_amount_f64();
                if let Err(err) = self
                    .ledger
                    .release_hold(&bid.seller_addr, amount, &bid_bond_ref(bid.id))
                    .await
                {
                    tracing::warn!(bid_id = %bid.id, error = %err, "failed to release bond on withdraw");
                } else {
                    bid.bond_status = BondStatus::Released;
                }
            }
        }

        bid.status = BidStatus::Withdrawn;
        bid.updated_at = now;
        self.store.update_bid(&bid).await?;

        NegotiationEvent::BidWithdrawn {
            rfp_id: rfp_id.to_string(),
            bid_id: bid.id.to_string(),
        }
        .log();

        Ok(bid)
    }

    // ---- Sweep support (§4.3 CheckExpired) ----
    //
    // The Sweep is a plain caller of these two entry points; it never
    // mutates an RFP directly, keeping the state machine's transition
    // logic in one place (§9).

    /// Reject every live pending bid and expire the RFP. Used for both the
    /// non-auto-select expiry path (when no pending bids remain) and for
    /// stale `selecting` RFPs past the 24h grace window.
    pub async fn expire_rfp(&self, rfp_id: RfpId) -> Result<Rfp> {
        let _guard = self.locks.lock(rfp_id).await;
        let mut rfp = self.require_rfp(rfp_id).await?;
        if rfp.status.is_terminal() {
            return Ok(rfp);
        }

        let pending = self.store.list_pending_bids_by_rfp(rfp_id).await?;
        for bid in pending {
            self.reject_bid(bid).await?;
        }

        rfp.status = RfpStatus::Expired;
        rfp.updated_at = Utc::now();
        self.store.update_rfp(&rfp).await?;

        NegotiationEvent::RfpExpired { rfp_id: rfp_id.to_string() }.log();
        Ok(rfp)
    }

    /// Transition a non-auto-select RFP past its deadline into the
    /// `selecting` grace window, re-reading under the lock first: a bid may
    /// have been withdrawn between the Sweep's list query and this call.
    pub async fn enter_selecting(&self, rfp_id: RfpId) -> Result<Rfp> {
        let _guard = self.locks.lock(rfp_id).await;
        let mut rfp = self.require_rfp(rfp_id).await?;
        if rfp.status != RfpStatus::Open {
            return Ok(rfp);
        }
        rfp.status = RfpStatus::Selecting;
        rfp.updated_at = Utc::now();
        self.store.update_rfp(&rfp).await?;
        Ok(rfp)
    }

    /// Live pending-bid count for `rfp_id`, used by the Sweep instead of the
    /// possibly-desynced `BidCount` field (§9 Open Question).
    pub async fn has_live_pending_bids(&self, rfp_id: RfpId) -> Result<bool> {
        Ok(!self.store.list_pending_bids_by_rfp(rfp_id).await?.is_empty())
    }

    /// Reject a pending bid: mark it `rejected` and release any held bond.
    /// Used by CancelRFP, the award algorithm's loser pass, and expiry.
    async fn reject_bid(&self, mut bid: Bid) -> Result<()> {
        if bid.bond_status == BondStatus::Held {
            let amount = bid.bond_amount_f64();
            if let Err(err) = self
                .ledger
                .release_hold(&bid.seller_addr, amount, &bid_bond_ref(bid.id))
                .await
            {
                tracing::warn!(bid_id = %bid.id, error = %err, "failed to release bond on reject; bond stays held, needs manual reconciliation");
            } else {
                bid.bond_status = BondStatus::Released;
            }
        }
        bid.status = BidStatus::Rejected;
        bid.updated_at = Utc::now();
        self.store.update_bid(&bid).await
    }

    /// Forfeit protocol (§4.3): three explicit ledger steps, never splitting
    /// the original hold. `fraction` is the portion of the bond forfeited
    /// (0.5 for a last-quarter withdrawal).
    async fn forfeit_bond(&self, rfp: &Rfp, bid: &mut Bid, fraction: f64) {
        let full_bond = bid.bond_amount_f64();
        let forfeit_part = full_bond * fraction;
        let bond_ref = bid_bond_ref(bid.id);
        let forfeit_ref = bid_bond_forfeit_ref(bid.id);

        if let Err(err) = self.ledger.release_hold(&bid.seller_addr, full_bond, &bond_ref).await {
            tracing::warn!(bid_id = %bid.id, error = %err, "forfeit step (a) ReleaseHold failed; bond stays held");
            return;
        }

        if let Err(err) = self.ledger.hold(&bid.seller_addr, forfeit_part, &forfeit_ref).await {
            tracing::warn!(bid_id = %bid.id, error = %err, "forfeit step (b) Hold failed; seller keeps funds");
            bid.bond_status = BondStatus::Released;
            return;
        }

        if let Err(err) = self.ledger.confirm_hold(&forfeit_ref).await {
            tracing::warn!(bid_id = %bid.id, error = %err, "forfeit step (b) ConfirmHold failed; releasing forfeit hold");
            let _ = self.ledger.release_hold(&bid.seller_addr, forfeit_part, &forfeit_ref).await;
            bid.bond_status = BondStatus::Released;
            return;
        }

        if let Err(err) = self.ledger.deposit(&rfp.buyer_addr, forfeit_part, &forfeit_ref).await {
            tracing::error!(
                bid_id = %bid.id,
                error = %err,
                "forfeit step (c) Deposit to buyer failed after confirm; funds are in flight, needs manual reconciliation"
            );
        }

        bid.bond_status = BondStatus::Forfeited;
        NegotiationEvent::BondForfeited {
            rfp_id: bid.rfp_id.to_string(),
            bid_id: bid.id.to_string(),
            amount: forfeit_part,
        }
        .log();
    }
}

fn non_empty_or(value: Option<String>, fallback: &str) -> String {
    match value {
        Some(v) if !v.is_empty() => v,
        _ => fallback.to_string(),
    }
}

fn non_zero_or(value: Option<i64>, fallback: i64) -> i64 {
    match value {
        Some(v) if v != 0 => v,
        _ => fallback,
    }
}

fn non_zero_or_f64(value: Option<f64>, fallback: f64) -> f64 {
    match value {
        Some(v) if v != 0.0 => v,
        _ => fallback,
    }
}

#[derive(Debug, Clone, Default, serde::Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PublishRfpRequest {
    pub buyer_addr: String,
    pub service_type: String,
    pub min_budget: String,
    pub max_budget: String,
    pub bid_deadline: String,
    pub max_latency_ms: Option<i64>,
    pub min_success_rate: Option<f64>,
    pub duration_secs: Option<i64>,
    pub min_volume: Option<i64>,
    pub auto_select: Option<bool>,
    pub min_reputation: Option<f64>,
    pub max_counter_rounds: Option<i32>,
    pub required_bond_pct: Option<f64>,
    pub no_withdraw_window: Option<String>,
    pub max_winners: Option<i32>,
    pub sealed_bids: Option<bool>,
    pub scoring_weights: Option<ScoringWeights>,
}

#[derive(Debug, Clone, Default, serde::Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PlaceBidRequest {
    pub seller_addr: String,
    pub price_per_call: String,
    pub total_budget: String,
    pub latency_ms: Option<i64>,
    pub success_rate: Option<f64>,
    pub duration_secs: Option<i64>,
    pub seller_penalty: Option<String>,
    pub message: Option<String>,
}

#[derive(Debug, Clone, Default, serde::Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CounterRequest {
    #[serde(skip_deserializing)]
    pub caller: String,
    pub price_per_call: Option<String>,
    pub total_budget: Option<String>,
    pub latency_ms: Option<i64>,
    pub success_rate: Option<f64>,
    pub duration_secs: Option<i64>,
    pub seller_penalty: Option<String>,
    pub message: Option<String>,
}

/// Timestamp helper: seconds between two instants, clamped to `>= 0`.
pub(crate) fn seconds_between(earlier: DateTime<Utc>, later: DateTime<Utc>) -> f64 {
    (later - earlier).num_milliseconds().max(0) as f64 / 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contract_former::MockContractFormer;
    use crate::ledger::InMemoryLedger;
    use crate::reputation::StaticReputationOracle;
    use crate::store::InMemoryStore;

    fn service() -> Service {
        Service::new(
            Arc::new(InMemoryStore::new()),
            Arc::new(StaticReputationOracle::new(50.0)),
            Arc::new(InMemoryLedger::default()),
            Some(Arc::new(MockContractFormer)),
            Arc::new(LockTable::new()),
        )
    }

    fn publish_req() -> PublishRfpRequest {
        PublishRfpRequest {
            buyer_addr: "0xBuyer".into(),
            service_type: "inference".into(),
            min_budget: "0.10".into(),
            max_budget: "1.00".into(),
            bid_deadline: "24h".into(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn publish_normalises_buyer_and_applies_defaults() {
        let svc = service();
        let rfp = svc.publish_rfp(publish_req()).await.unwrap();
        assert_eq!(rfp.buyer_addr, "0xbuyer");
        assert_eq!(rfp.max_latency_ms, 10_000);
        assert_eq!(rfp.min_success_rate, 95.0);
        assert_eq!(rfp.max_counter_rounds, 3);
        assert_eq!(rfp.max_winners, 1);
        assert_eq!(rfp.status, RfpStatus::Open);
    }

    #[tokio::test]
    async fn publish_rejects_past_deadline() {
        let svc = service();
        let mut req = publish_req();
        req.bid_deadline = (Utc::now() - chrono::Duration::hours(1)).to_rfc3339();
        let err = svc.publish_rfp(req).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::Validation);
    }

    #[tokio::test]
    async fn sealed_bids_force_zero_counter_rounds() {
        let svc = service();
        let mut req = publish_req();
        req.sealed_bids = Some(true);
        req.max_counter_rounds = Some(5);
        let rfp = svc.publish_rfp(req).await.unwrap();
        assert_eq!(rfp.max_counter_rounds, 0);
    }

    #[tokio::test]
    async fn place_bid_rejects_self_bid() {
        let svc = service();
        let rfp = svc.publish_rfp(publish_req()).await.unwrap();
        let err = svc
            .place_bid(
                rfp.id,
                PlaceBidRequest {
                    seller_addr: "0xbuyer".into(),
                    price_per_call: "0.01".into(),
                    total_budget: "0.50".into(),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::SelfBid);
    }

    #[tokio::test]
    async fn place_bid_rejects_budget_out_of_range() {
        let svc = service();
        let rfp = svc.publish_rfp(publish_req()).await.unwrap();
        let err = svc
            .place_bid(
                rfp.id,
                PlaceBidRequest {
                    seller_addr: "0xseller".into(),
                    price_per_call: "0.01".into(),
                    total_budget: "0.05".into(),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::BudgetOutOfRange);
    }

    #[tokio::test]
    async fn place_bid_boundary_exactly_min_budget_accepted() {
        let svc = service();
        let rfp = svc.publish_rfp(publish_req()).await.unwrap();
        let bid = svc
            .place_bid(
                rfp.id,
                PlaceBidRequest {
                    seller_addr: "0xseller".into(),
                    price_per_call: "0.01".into(),
                    total_budget: "0.10".into(),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(bid.status, BidStatus::Pending);
    }

    #[tokio::test]
    async fn place_bid_duplicate_pending_rejected() {
        let svc = service();
        let rfp = svc.publish_rfp(publish_req()).await.unwrap();
        let req = PlaceBidRequest {
            seller_addr: "0xseller".into(),
            price_per_call: "0.01".into(),
            total_budget: "0.50".into(),
            ..Default::default()
        };
        svc.place_bid(rfp.id, req.clone()).await.unwrap();
        let err = svc.place_bid(rfp.id, req).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::DuplicateBid);
    }

    #[tokio::test]
    async fn place_bid_with_bond_holds_six_fractional_digits() {
        let svc = service();
        let mut req = publish_req();
        req.required_bond_pct = Some(10.0);
        let rfp = svc.publish_rfp(req).await.unwrap();

        let bid = svc
            .place_bid(
                rfp.id,
                PlaceBidRequest {
                    seller_addr: "0xseller".into(),
                    price_per_call: "0.005".into(),
                    total_budget: "0.75".into(),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(bid.bond_status, BondStatus::Held);
        assert_eq!(bid.bond_amount, "0.075000");
    }

    #[tokio::test]
    async fn counter_carries_parent_fields_and_transfers_bond() {
        // S3: RequiredBondPct=10, totalBudget=0.75 -> bond 0.075000 held.
        let svc = service();
        let mut req = publish_req();
        req.required_bond_pct = Some(10.0);
        let rfp = svc.publish_rfp(req).await.unwrap();

        let parent = svc
            .place_bid(
                rfp.id,
                PlaceBidRequest {
                    seller_addr: "0xseller".into(),
                    price_per_call: "0.005".into(),
                    total_budget: "0.75".into(),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let counter = svc
            .counter(
                rfp.id,
                parent.id,
                CounterRequest {
                    caller: "0xbuyer".into(),
                    price_per_call: Some("0.004".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        assert_eq!(counter.price_per_call, "0.004");
        assert_eq!(counter.total_budget, "0.75");
        assert_eq!(counter.counter_round, 1);
        assert_eq!(counter.parent_bid_id, Some(parent.id));
        assert_eq!(counter.bond_amount, "0.075000");
        assert_eq!(counter.bond_status, BondStatus::Held);

        let parent_after = svc.require_bid(parent.id).await.unwrap();
        assert_eq!(parent_after.status, BidStatus::Countered);
        assert_eq!(parent_after.countered_by_id, Some(counter.id));
        assert_eq!(parent_after.bond_amount, "0");
        assert_eq!(parent_after.bond_status, BondStatus::None);
    }

    #[tokio::test]
    async fn counter_respects_max_rounds() {
        // S6: MaxCounterRounds=2; Counter1, Counter2 succeed, Counter3 fails.
        let svc = service();
        let mut req = publish_req();
        req.max_counter_rounds = Some(2);
        let rfp = svc.publish_rfp(req).await.unwrap();

        let bid = svc
            .place_bid(
                rfp.id,
                PlaceBidRequest {
                    seller_addr: "0xseller".into(),
                    price_per_call: "0.005".into(),
                    total_budget: "0.50".into(),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let c1 = svc
            .counter(rfp.id, bid.id, CounterRequest { caller: "0xbuyer".into(), ..Default::default() })
            .await
            .unwrap();
        let c2 = svc
            .counter(rfp.id, c1.id, CounterRequest { caller: "0xbuyer".into(), ..Default::default() })
            .await
            .unwrap();
        let err = svc
            .counter(rfp.id, c2.id, CounterRequest { caller: "0xbuyer".into(), ..Default::default() })
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::MaxCounterRounds);
    }

    #[tokio::test]
    async fn cancel_releases_bonds_and_rejects_pending_bids() {
        // S5
        let svc = service();
        let mut req = publish_req();
        req.required_bond_pct = Some(10.0);
        let rfp = svc.publish_rfp(req).await.unwrap();

        svc.place_bid(
            rfp.id,
            PlaceBidRequest {
                seller_addr: "0xseller".into(),
                price_per_call: "0.005".into(),
                total_budget: "0.50".into(),
                ..Default::default()
            },
        )
        .await
        .unwrap();

        let cancelled = svc.cancel_rfp(rfp.id, "0xbuyer", Some("no longer needed".into())).await.unwrap();
        assert_eq!(cancelled.status, RfpStatus::Cancelled);

        let bids = svc.list_bids(rfp.id).await.unwrap();
        assert_eq!(bids[0].status, BidStatus::Rejected);
        assert_eq!(svc.ledger.total_held().await, 0.0);
    }

    #[tokio::test]
    async fn cancel_twice_fails_already_awarded() {
        let svc = service();
        let rfp = svc.publish_rfp(publish_req()).await.unwrap();
        svc.cancel_rfp(rfp.id, "0xbuyer", None).await.unwrap();
        let err = svc.cancel_rfp(rfp.id, "0xbuyer", None).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::AlreadyAwarded);
    }

    #[tokio::test]
    async fn withdraw_already_withdrawn_fails() {
        let svc = service();
        let rfp = svc.publish_rfp(publish_req()).await.unwrap();
        let bid = svc
            .place_bid(
                rfp.id,
                PlaceBidRequest {
                    seller_addr: "0xseller".into(),
                    price_per_call: "0.005".into(),
                    total_budget: "0.50".into(),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        svc.withdraw_bid(rfp.id, bid.id, "0xseller").await.unwrap();
        let err = svc.withdraw_bid(rfp.id, bid.id, "0xseller").await.unwrap_err();
        assert_eq!(err.code, ErrorCode::BidAlreadyWithdrawn);
    }

    #[tokio::test]
    async fn withdraw_blocked_inside_no_withdraw_window() {
        let svc = service();
        let mut req = publish_req();
        req.bid_deadline = (Utc::now() + chrono::Duration::hours(1)).to_rfc3339();
        req.no_withdraw_window = Some("2h".into());
        let rfp = svc.publish_rfp(req).await.unwrap();

        let bid = svc
            .place_bid(
                rfp.id,
                PlaceBidRequest {
                    seller_addr: "0xseller".into(),
                    price_per_call: "0.005".into(),
                    total_budget: "0.50".into(),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let err = svc.withdraw_bid(rfp.id, bid.id, "0xseller").await.unwrap_err();
        assert_eq!(err.code, ErrorCode::WithdrawalBlocked);
    }

    #[tokio::test]
    async fn withdraw_in_last_quarter_forfeits_half_the_bond() {
        // S4: createdAt 23h ago, deadline in 1h, RequiredBondPct=10.
        let svc = service();
        let mut req = publish_req();
        req.required_bond_pct = Some(10.0);
        req.bid_deadline = (Utc::now() + chrono::Duration::hours(1)).to_rfc3339();
        let rfp = svc.publish_rfp(req).await.unwrap();

        let mut bid = svc
            .place_bid(
                rfp.id,
                PlaceBidRequest {
                    seller_addr: "0xseller".into(),
                    price_per_call: "0.005".into(),
                    total_budget: "0.50".into(),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        // Backdate createdAt to simulate 23h elapsed out of a 24h window.
        bid.created_at = Utc::now() - chrono::Duration::hours(23);
        svc.store.update_bid(&bid).await.unwrap();

        let withdrawn = svc.withdraw_bid(rfp.id, bid.id, "0xseller").await.unwrap();
        assert_eq!(withdrawn.status, BidStatus::Withdrawn);
        assert_eq!(withdrawn.bond_status, BondStatus::Forfeited);
        assert_eq!(svc.ledger.total_held().await, 0.0);
        assert_eq!(svc.ledger.balance_of("0xbuyer"), 1_000_000.0 + 0.025);
    }

    #[tokio::test]
    async fn withdraw_before_last_quarter_releases_full_bond() {
        let svc = service();
        let mut req = publish_req();
        req.required_bond_pct = Some(10.0);
        let rfp = svc.publish_rfp(req).await.unwrap();

        let bid = svc
            .place_bid(
                rfp.id,
                PlaceBidRequest {
                    seller_addr: "0xseller".into(),
                    price_per_call: "0.005".into(),
                    total_budget: "0.50".into(),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let withdrawn = svc.withdraw_bid(rfp.id, bid.id, "0xseller").await.unwrap();
        assert_eq!(withdrawn.bond_status, BondStatus::Released);
        assert_eq!(svc.ledger.total_held().await, 0.0);
    }
}
