//! Per-RFP mutual exclusion (§5). Every state transition on an RFP — placing
//! a bid, countering, selecting winners, cancelling, sweeping — takes the
//! lock for that RFP id before re-reading the RFP from the Store and acting
//! on what it re-read, never on a value read before the lock was taken.
//!
//! Locks are materialised lazily on first use and never removed; the table
//! grows with the number of distinct RFP ids ever touched, mirroring the
//! teacher's `active_dags` map but holding a bare `Mutex<()>` since the
//! Service keeps the lock, not the domain object, behind it.

use crate::domain::RfpId;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

#[derive(Default)]
pub struct LockTable {
    locks: DashMap<RfpId, Arc<Mutex<()>>>,
}

pub type RfpGuard = OwnedMutexGuard<()>;

impl LockTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn entry(&self, id: RfpId) -> Arc<Mutex<()>> {
        self.locks
            .entry(id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Acquire the lock for `id`. Held across Store re-read plus mutation so
    /// concurrent callers always act on a freshly re-read RFP (§5).
    pub async fn lock(&self, id: RfpId) -> RfpGuard {
        self.entry(id).lock_owned().await
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn same_id_serialises_concurrent_holders() {
        let table = Arc::new(LockTable::new());
        let id = RfpId::new();
        let order = Arc::new(tokio::sync::Mutex::new(Vec::new()));

        let t1 = {
            let table = table.clone();
            let order = order.clone();
            tokio::spawn(async move {
                let _guard = table.lock(id).await;
                tokio::time::sleep(Duration::from_millis(20)).await;
                order.lock().await.push(1);
            })
        };
        tokio::time::sleep(Duration::from_millis(5)).await;
        let t2 = {
            let table = table.clone();
            let order = order.clone();
            tokio::spawn(async move {
                let _guard = table.lock(id).await;
                order.lock().await.push(2);
            })
        };

        t1.await.unwrap();
        t2.await.unwrap();
        assert_eq!(*order.lock().await, vec![1, 2]);
    }

    #[tokio::test]
    async fn distinct_ids_do_not_materialise_shared_lock() {
        let table = LockTable::new();
        let a = table.lock(RfpId::new()).await;
        let b = table.lock(RfpId::new()).await;
        drop(a);
        drop(b);
        assert_eq!(table.len(), 2);
    }
}
