//! ReputationOracle: a read-only external collaborator returning a seller's
//! current reputation score and tier. Errors degrade to a score of `0` and
//! are never fatal (§7) — they only matter when the RFP sets `MinReputation > 0`.

use async_trait::async_trait;
use dashmap::DashMap;

#[async_trait]
pub trait ReputationOracle: Send + Sync {
    /// Returns a score in `[0, 100]` for the given seller address.
    async fn reputation(&self, seller_addr: &str) -> anyhow::Result<f64>;
}

/// Fetch a seller's reputation, degrading any oracle error to `0.0`.
pub async fn reputation_or_zero(oracle: &dyn ReputationOracle, seller_addr: &str) -> f64 {
    match oracle.reputation(seller_addr).await {
        Ok(score) => score.clamp(0.0, 100.0),
        Err(err) => {
            tracing::warn!(seller = seller_addr, error = %err, "reputation oracle failed, degrading to 0");
            0.0
        }
    }
}

/// In-memory oracle backed by a concurrent map, for tests and small deployments.
pub struct StaticReputationOracle {
    scores: DashMap<String, f64>,
    default_score: f64,
}

impl StaticReputationOracle {
    pub fn new(default_score: f64) -> Self {
        Self {
            scores: DashMap::new(),
            default_score,
        }
    }

    pub fn set(&self, seller_addr: impl Into<String>, score: f64) {
        self.scores.insert(seller_addr.into(), score);
    }
}

impl Default for StaticReputationOracle {
    fn default() -> Self {
        Self::new(50.0)
    }
}

#[async_trait]
impl ReputationOracle for StaticReputationOracle {
    async fn reputation(&self, seller_addr: &str) -> anyhow::Result<f64> {
        Ok(self
            .scores
            .get(seller_addr)
            .map(|v| *v)
            .unwrap_or(self.default_score))
    }
}

/// An oracle that always fails, for exercising the degrade-to-zero path in tests.
pub struct FailingReputationOracle;

#[async_trait]
impl ReputationOracle for FailingReputationOracle {
    async fn reputation(&self, _seller_addr: &str) -> anyhow::Result<f64> {
        anyhow::bail!("reputation service unreachable")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn static_oracle_returns_configured_score() {
        let oracle = StaticReputationOracle::new(50.0);
        oracle.set("0xseller1", 80.0);
        assert_eq!(reputation_or_zero(&oracle, "0xseller1").await, 80.0);
        assert_eq!(reputation_or_zero(&oracle, "0xunknown").await, 50.0);
    }

    #[tokio::test]
    async fn failing_oracle_degrades_to_zero() {
        let oracle = FailingReputationOracle;
        assert_eq!(reputation_or_zero(&oracle, "0xseller1").await, 0.0);
    }
}
