//! ContractFormer: converts (RFP, winning bid) into a contract identifier.
//! Optional, and never fatal — a failure is logged and the award slot is
//! skipped, but the RFP still transitions to `awarded` (§4.3, §7).

use crate::domain::{Bid, Rfp};
use async_trait::async_trait;

#[async_trait]
pub trait ContractFormer: Send + Sync {
    async fn form_contract(&self, rfp: &Rfp, winning_bid: &Bid) -> anyhow::Result<String>;
}

/// Deterministic mock former: mints a contract id from the RFP and bid ids.
/// Suitable for tests and deployments with no external contracting system.
pub struct MockContractFormer;

#[async_trait]
impl ContractFormer for MockContractFormer {
    async fn form_contract(&self, rfp: &Rfp, winning_bid: &Bid) -> anyhow::Result<String> {
        Ok(format!("contract:{}:{}", rfp.id, winning_bid.id))
    }
}

/// A former that always fails, for exercising the non-fatal award path in tests.
pub struct FailingContractFormer;

#[async_trait]
impl ContractFormer for FailingContractFormer {
    async fn form_contract(&self, _rfp: &Rfp, _winning_bid: &Bid) -> anyhow::Result<String> {
        anyhow::bail!("contracting system unreachable")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{BidStatus, BondStatus, RfpStatus, ScoringWeights};
    use chrono::Utc;
    use uuid::Uuid;

    fn rfp() -> Rfp {
        Rfp {
            id: Uuid::new_v4().into(),
            buyer_addr: "0xbuyer".into(),
            service_type: "inference".into(),
            min_budget: "0.10".into(),
            max_budget: "1.00".into(),
            max_latency_ms: 10_000,
            min_success_rate: 95.0,
            duration_secs: 3600,
            min_volume: 1,
            bid_deadline: Utc::now() + chrono::Duration::hours(24),
            auto_select: true,
            min_reputation: 0.0,
            max_counter_rounds: 3,
            required_bond_pct: 0.0,
            no_withdraw_window_secs: None,
            max_winners: 1,
            sealed_bids: false,
            scoring_weights: ScoringWeights::default(),
            status: RfpStatus::Open,
            winning_bid_ids: vec![],
            contract_ids: vec![],
            bid_count: 0,
            cancel_reason: None,
            awarded_at: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn bid(rfp_id: crate::domain::RfpId) -> Bid {
        Bid {
            id: Uuid::new_v4().into(),
            rfp_id,
            seller_addr: "0xseller".into(),
            price_per_call: "0.005".into(),
            total_budget: "0.50".into(),
            latency_ms: 500,
            success_rate: 95.0,
            duration_secs: 3600,
            seller_penalty: "0".into(),
            status: BidStatus::Pending,
            score: 0.0,
            counter_round: 0,
            parent_bid_id: None,
            countered_by_id: None,
            bond_amount: "0".into(),
            bond_status: BondStatus::None,
            message: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn mock_former_is_deterministic_given_same_ids() {
        let former = MockContractFormer;
        let r = rfp();
        let b = bid(r.id);
        let c1 = former.form_contract(&r, &b).await.unwrap();
        let c2 = former.form_contract(&r, &b).await.unwrap();
        assert_eq!(c1, c2);
    }

    #[tokio::test]
    async fn failing_former_returns_err_for_award_to_swallow() {
        let former = FailingContractFormer;
        let r = rfp();
        let b = bid(r.id);
        assert!(former.form_contract(&r, &b).await.is_err());
    }
}
