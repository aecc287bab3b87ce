//! Liveness/readiness checks. Readiness probes the Store and Ledger are
//! reachable; liveness only confirms the process is scheduling tasks.

use crate::ledger::Ledger;
use crate::store::Store;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

impl HealthStatus {
    fn combine(self, other: HealthStatus) -> HealthStatus {
        use HealthStatus::*;
        match (self, other) {
            (Unhealthy, _) | (_, Unhealthy) => Unhealthy,
            (Degraded, _) | (_, Degraded) => Degraded,
            _ => Healthy,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ComponentHealth {
    pub name: &'static str,
    pub status: HealthStatus,
    pub message: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub components: Vec<ComponentHealth>,
}

impl HealthReport {
    pub fn is_operational(&self) -> bool {
        self.status != HealthStatus::Unhealthy
    }
}

pub struct HealthService {
    store: Arc<dyn Store>,
    ledger: Arc<dyn Ledger>,
    check_timeout: Duration,
}

impl HealthService {
    pub fn new(store: Arc<dyn Store>, ledger: Arc<dyn Ledger>) -> Self {
        Self {
            store,
            ledger,
            check_timeout: Duration::from_secs(5),
        }
    }

    async fn check_store(&self) -> ComponentHealth {
        match tokio::time::timeout(self.check_timeout, self.store.analytics()).await {
            Ok(Ok(_)) => ComponentHealth { name: "store", status: HealthStatus::Healthy, message: None },
            Ok(Err(e)) => ComponentHealth {
                name: "store",
                status: HealthStatus::Unhealthy,
                message: Some(e.to_string()),
            },
            Err(_) => ComponentHealth {
                name: "store",
                status: HealthStatus::Unhealthy,
                message: Some("timed out".into()),
            },
        }
    }

    async fn check_ledger(&self) -> ComponentHealth {
        match tokio::time::timeout(self.check_timeout, self.ledger.total_held()).await {
            Ok(_) => ComponentHealth { name: "ledger", status: HealthStatus::Healthy, message: None },
            Err(_) => ComponentHealth {
                name: "ledger",
                status: HealthStatus::Unhealthy,
                message: Some("timed out".into()),
            },
        }
    }

    pub async fn check_health(&self) -> HealthReport {
        let components = vec![self.check_store().await, self.check_ledger().await];
        let status = components
            .iter()
            .fold(HealthStatus::Healthy, |acc, c| acc.combine(c.status));
        HealthReport { status, components }
    }

    pub async fn is_ready(&self) -> bool {
        self.check_health().await.is_operational()
    }

    pub async fn is_live(&self) -> bool {
        true
    }
}
