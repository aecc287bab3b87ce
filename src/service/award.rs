//! SelectWinner / SelectWinners / AutoSelect, all funneling into one award
//! algorithm (§4.3). The RFP flip to `awarded` is the commit point: winners
//! are accepted, contracts formed, and losers rejected *before* the RFP
//! itself is written, so a crash mid-award never leaves `awarded` paired
//! with winning bids that are still `pending` (§5 Cancellation).

use super::{seconds_between, Service};
use crate::domain::{BidId, BidStatus, Rfp, RfpId, RfpStatus};
use crate::error::{ErrorCode, NegotiationError, Result};
use crate::ledger::bid_bond_ref;
use crate::observability::NegotiationEvent;
use crate::realtime::{EventData, EventType};
use crate::reputation::reputation_or_zero;
use crate::scorer::score_bid;
use chrono::Utc;
use std::collections::HashSet;

/// Returned by every award path: the updated RFP plus the ids actually
/// awarded (after duplicate collapse and pending-bid validation).
#[derive(Debug, Clone)]
pub struct AwardOutcome {
    pub rfp: Rfp,
    pub winner_ids: Vec<BidId>,
}

/// A multi-winner manual selection request; `winner_ids` duplicates are
/// collapsed, and the count is checked against `rfp.max_winners` (§4.3).
#[derive(Debug, Clone)]
pub struct SelectWinnersRequest {
    pub caller: String,
    pub winner_ids: Vec<BidId>,
}

impl Service {
    /// Manual single-winner selection. Thin wrapper over `select_winners`.
    pub async fn select_winner(&self, rfp_id: RfpId, caller: &str, winner_id: BidId) -> Result<AwardOutcome> {
        self.select_winners(
            rfp_id,
            SelectWinnersRequest {
                caller: caller.to_string(),
                winner_ids: vec![winner_id],
            },
        )
        .await
    }

    /// Manual multi-winner selection (§4.3 SelectWinners).
    pub async fn select_winners(&self, rfp_id: RfpId, req: SelectWinnersRequest) -> Result<AwardOutcome> {
        let _guard = self.locks.lock(rfp_id).await;
        let rfp = self.require_rfp(rfp_id).await?;

        if rfp.status.is_terminal() {
            return Err(NegotiationError::new(ErrorCode::AlreadyAwarded, "RFP is already terminal"));
        }
        if !matches!(rfp.status, RfpStatus::Open | RfpStatus::Selecting) {
            return Err(NegotiationError::new(ErrorCode::InvalidStatus, "RFP is not selectable"));
        }
        if req.caller.to_lowercase() != rfp.buyer_addr {
            return Err(NegotiationError::unauthorized("only the RFP buyer may select winners"));
        }

        let mut winner_ids: Vec<BidId> = Vec::new();
        let mut seen = HashSet::new();
        for id in &req.winner_ids {
            if seen.insert(*id) {
                winner_ids.push(*id);
            }
        }
        if winner_ids.len() as i32 > rfp.max_winners {
            return Err(NegotiationError::new(
                ErrorCode::TooManyWinners,
                "more winners were selected than the RFP's maxWinners permits",
            ));
        }

        let mut winners = Vec::with_capacity(winner_ids.len());
        for id in &winner_ids {
            let bid = self.require_bid(*id).await?;
            if bid.rfp_id != rfp_id {
                return Err(NegotiationError::not_found("Bid", *id));
            }
            if bid.status != BidStatus::Pending {
                return Err(NegotiationError::new(
                    ErrorCode::InvalidStatus,
                    "a selected bid is not pending",
                ));
            }
            winners.push(bid);
        }

        self.award(rfp, winners).await
    }

    /// AutoSelect (§4.3): re-reads pending bids, recomputes scores with
    /// fresh reputation, sorts descending, and awards the top
    /// `min(maxWinners, |pending|)`. Empty pending bids yield `NoBids`.
    pub async fn auto_select(&self, rfp_id: RfpId) -> Result<AwardOutcome> {
        let _guard = self.locks.lock(rfp_id).await;
        let rfp = self.require_rfp(rfp_id).await?;

        if rfp.status.is_terminal() {
            return Err(NegotiationError::new(ErrorCode::AlreadyAwarded, "RFP is already terminal"));
        }
        if !matches!(rfp.status, RfpStatus::Open | RfpStatus::Selecting) {
            return Err(NegotiationError::new(ErrorCode::InvalidStatus, "RFP is not selectable"));
        }

        let mut pending = self.store.list_pending_bids_by_rfp(rfp_id).await?;
        if pending.is_empty() {
            return Err(NegotiationError::new(ErrorCode::NoBids, "no pending bids to select from"));
        }

        for bid in pending.iter_mut() {
            let reputation = reputation_or_zero(self.reputation.as_ref(), &bid.seller_addr).await;
            bid.score = score_bid(bid, &rfp, reputation);
        }
        pending.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));

        let take = (rfp.max_winners as usize).min(pending.len());
        let winners = pending.into_iter().take(take).collect();

        self.award(rfp, winners).await
    }

    /// The award algorithm shared by every winner-selection path. `winners`
    /// must already be validated as `pending` bids on `rfp`.
    async fn award(&self, rfp: Rfp, winners: Vec<crate::domain::Bid>) -> Result<AwardOutcome> {
        let mut winner_ids = Vec::with_capacity(winners.len());
        let mut accepted = Vec::with_capacity(winners.len());

        // Step 1: accept winners and release their bonds, before the RFP
        // itself is touched — this is the crash-safety property from §5.
        for mut bid in winners {
            if bid.bond_status == crate::domain::BondStatus::Held {
                let amount = bid.bond_amount_f64();
                if let Err(err) = self
                    .ledger
                    .release_hold(&bid.seller_addr, amount, &bid_bond_ref(bid.id))
                    .await
                {
                    tracing::warn!(bid_id = %bid.id, error = %err, "failed to release winner bond on award");
                } else {
                    bid.bond_status = crate::domain::BondStatus::Released;
                }
            }
            bid.status = BidStatus::Accepted;
            bid.updated_at = Utc::now();
            self.store.update_bid(&bid).await?;
            winner_ids.push(bid.id);
            accepted.push(bid);
        }

        // Step 2: form contracts. Non-fatal: a failure is logged and the
        // slot in `contract_ids` is simply skipped.
        let mut contract_ids = Vec::new();
        if let Some(former) = &self.contract_former {
            for bid in &accepted {
                match former.form_contract(&rfp, bid).await {
                    Ok(contract_id) => contract_ids.push(contract_id),
                    Err(err) => {
                        tracing::warn!(rfp_id = %rfp.id, bid_id = %bid.id, error = %err, "contract former failed; award proceeds without a contract for this winner");
                    }
                }
            }
        }

        // Step 3: reject everyone else still pending.
        let winner_set: HashSet<BidId> = winner_ids.iter().copied().collect();
        let remaining = self.store.list_pending_bids_by_rfp(rfp.id).await?;
        for bid in remaining {
            if !winner_set.contains(&bid.id) {
                self.reject_bid(bid).await?;
            }
        }

        // Step 4: commit — flip the RFP to `awarded`.
        let mut rfp = rfp;
        rfp.status = RfpStatus::Awarded;
        rfp.winning_bid_ids = winner_ids.clone();
        rfp.contract_ids = contract_ids;
        rfp.awarded_at = Some(Utc::now());
        rfp.updated_at = rfp.awarded_at.unwrap();
        self.store.update_rfp(&rfp).await?;

        NegotiationEvent::RfpAwarded {
            rfp_id: rfp.id.to_string(),
            winner_count: winner_ids.len(),
            seconds_since_publish: seconds_between(rfp.created_at, rfp.awarded_at.unwrap()),
        }
        .log();
        self.broadcast(
            EventType::Milestone,
            EventData {
                from: Some(rfp.buyer_addr.clone()),
                to: None,
                author_addr: None,
                amount: None,
                service_type: Some(rfp.service_type.clone()),
                payload: serde_json::json!({
                    "rfpId": rfp.id.to_string(),
                    "winnerIds": winner_ids.iter().map(|b| b.to_string()).collect::<Vec<_>>(),
                }),
            },
        );

        Ok(AwardOutcome { rfp, winner_ids })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contract_former::{FailingContractFormer, MockContractFormer};
    use crate::domain::BondStatus;
    use crate::ledger::InMemoryLedger;
    use crate::locktable::LockTable;
    use crate::reputation::StaticReputationOracle;
    use crate::service::{PlaceBidRequest, PublishRfpRequest};
    use crate::store::InMemoryStore;
    use std::sync::Arc;

    fn service_with_reputations(reputations: &[(&str, f64)]) -> Service {
        let oracle = StaticReputationOracle::new(50.0);
        for (addr, score) in reputations {
            oracle.set(*addr, *score);
        }
        Service::new(
            Arc::new(InMemoryStore::new()),
            Arc::new(oracle),
            Arc::new(InMemoryLedger::default()),
            Some(Arc::new(MockContractFormer)),
            Arc::new(LockTable::new()),
        )
    }

    fn publish_req() -> PublishRfpRequest {
        PublishRfpRequest {
            buyer_addr: "0xbuyer".into(),
            service_type: "inference".into(),
            min_budget: "0.50".into(),
            max_budget: "1.00".into(),
            bid_deadline: "24h".into(),
            auto_select: Some(true),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn scenario_s1_auto_select_reputation_tiebreak() {
        let svc = service_with_reputations(&[("0xseller1", 80.0), ("0xseller2", 60.0)]);
        let rfp = svc.publish_rfp(publish_req()).await.unwrap();

        svc.place_bid(
            rfp.id,
            PlaceBidRequest {
                seller_addr: "0xseller1".into(),
                price_per_call: "0.005".into(),
                total_budget: "0.75".into(),
                success_rate: Some(98.0),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        svc.place_bid(
            rfp.id,
            PlaceBidRequest {
                seller_addr: "0xseller2".into(),
                price_per_call: "0.004".into(),
                total_budget: "0.70".into(),
                success_rate: Some(95.0),
                ..Default::default()
            },
        )
        .await
        .unwrap();

        let outcome = svc.auto_select(rfp.id).await.unwrap();
        assert_eq!(outcome.rfp.status, RfpStatus::Awarded);
        let winner = svc.require_bid(outcome.winner_ids[0]).await.unwrap();
        assert_eq!(winner.seller_addr, "0xseller1");
    }

    #[tokio::test]
    async fn auto_select_no_bids_fails() {
        let svc = service_with_reputations(&[]);
        let rfp = svc.publish_rfp(publish_req()).await.unwrap();
        let err = svc.auto_select(rfp.id).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::NoBids);
    }

    #[tokio::test]
    async fn manual_select_rejects_too_many_winners() {
        let svc = service_with_reputations(&[]);
        let mut req = publish_req();
        req.auto_select = Some(false);
        req.max_winners = Some(1);
        let rfp = svc.publish_rfp(req).await.unwrap();

        let b1 = svc
            .place_bid(
                rfp.id,
                PlaceBidRequest {
                    seller_addr: "0xseller1".into(),
                    price_per_call: "0.005".into(),
                    total_budget: "0.75".into(),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        let b2 = svc
            .place_bid(
                rfp.id,
                PlaceBidRequest {
                    seller_addr: "0xseller2".into(),
                    price_per_call: "0.004".into(),
                    total_budget: "0.70".into(),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let err = svc
            .select_winners(
                rfp.id,
                SelectWinnersRequest { caller: "0xbuyer".into(), winner_ids: vec![b1.id, b2.id] },
            )
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::TooManyWinners);
    }

    #[tokio::test]
    async fn award_accepts_winner_and_rejects_losers_releasing_bonds() {
        let svc = service_with_reputations(&[]);
        let mut req = publish_req();
        req.auto_select = Some(false);
        req.required_bond_pct = Some(10.0);
        let rfp = svc.publish_rfp(req).await.unwrap();

        let winner = svc
            .place_bid(
                rfp.id,
                PlaceBidRequest {
                    seller_addr: "0xseller1".into(),
                    price_per_call: "0.005".into(),
                    total_budget: "0.75".into(),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        let loser = svc
            .place_bid(
                rfp.id,
                PlaceBidRequest {
                    seller_addr: "0xseller2".into(),
                    price_per_call: "0.004".into(),
                    total_budget: "0.70".into(),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let outcome = svc.select_winner(rfp.id, "0xbuyer", winner.id).await.unwrap();
        assert_eq!(outcome.rfp.status, RfpStatus::Awarded);
        assert_eq!(outcome.rfp.winning_bid_ids, vec![winner.id]);
        assert_eq!(outcome.rfp.winning_bid_id(), Some(winner.id));
        assert_eq!(outcome.rfp.contract_id().unwrap(), format!("contract:{}:{}", rfp.id, winner.id));

        let winner_after = svc.require_bid(winner.id).await.unwrap();
        assert_eq!(winner_after.status, BidStatus::Accepted);
        assert_eq!(winner_after.bond_status, BondStatus::Released);

        let loser_after = svc.require_bid(loser.id).await.unwrap();
        assert_eq!(loser_after.status, BidStatus::Rejected);
        assert_eq!(loser_after.bond_status, BondStatus::Released);

        assert_eq!(svc.ledger.total_held().await, 0.0);
    }

    #[tokio::test]
    async fn contract_former_failure_is_non_fatal() {
        let store = Arc::new(InMemoryStore::new());
        let svc = Service::new(
            store,
            Arc::new(StaticReputationOracle::new(50.0)),
            Arc::new(InMemoryLedger::default()),
            Some(Arc::new(FailingContractFormer)),
            Arc::new(LockTable::new()),
        );
        let mut req = publish_req();
        req.auto_select = Some(false);
        let rfp = svc.publish_rfp(req).await.unwrap();
        let bid = svc
            .place_bid(
                rfp.id,
                PlaceBidRequest {
                    seller_addr: "0xseller1".into(),
                    price_per_call: "0.005".into(),
                    total_budget: "0.75".into(),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let outcome = svc.select_winner(rfp.id, "0xbuyer", bid.id).await.unwrap();
        assert_eq!(outcome.rfp.status, RfpStatus::Awarded);
        assert!(outcome.rfp.contract_ids.is_empty());
        assert!(outcome.rfp.contract_id().is_none());
    }
}
