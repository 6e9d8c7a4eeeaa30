//! Per-pool mutual exclusion.
//!
//! A job owns its pool for its whole duration. Jobs for different pools may
//! run concurrently on independent workers; jobs for the same pool queue up.

use crate::domain::PoolName;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// Token held while a job mutates a pool. Dropping it releases the pool.
pub type PoolGuard = OwnedMutexGuard<()>;

#[derive(Debug, Default, Clone)]
pub struct PoolLocks {
    locks: Arc<Mutex<HashMap<PoolName, Arc<AsyncMutex<()>>>>>,
}

impl PoolLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, pool: &PoolName) -> PoolGuard {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
            // An entry only the map references is neither held nor awaited.
            locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            locks
                .entry(pool.clone())
                .or_insert_with(|| Arc::new(AsyncMutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }

    /// Number of pools with a lock entry.
    pub fn tracked(&self) -> usize {
        self.locks.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn same_pool_is_exclusive() {
        let locks = PoolLocks::new();
        let pool = PoolName::new("alpha");

        let guard = locks.acquire(&pool).await;
        let contender = {
            let locks = locks.clone();
            let pool = pool.clone();
            tokio::spawn(async move {
                let _g = locks.acquire(&pool).await;
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!contender.is_finished());
        drop(guard);
        tokio::time::timeout(Duration::from_secs(1), contender)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn different_pools_do_not_block() {
        let locks = PoolLocks::new();
        let _a = locks.acquire(&PoolName::new("alpha")).await;
        let b = tokio::time::timeout(
            Duration::from_millis(100),
            locks.acquire(&PoolName::new("beta")),
        )
        .await;
        assert!(b.is_ok());
    }

    #[tokio::test]
    async fn released_pools_are_forgotten() {
        let locks = PoolLocks::new();
        for i in 0..50 {
            let _guard = locks.acquire(&PoolName::new(format!("pool-{}", i))).await;
        }
        assert_eq!(locks.tracked(), 1);

        let held = locks.acquire(&PoolName::new("alpha")).await;
        let other = locks.acquire(&PoolName::new("beta")).await;
        assert_eq!(locks.tracked(), 2);
        drop(held);
        drop(other);

        let gamma = PoolName::new("gamma");
        let _guard = locks.acquire(&gamma).await;
        assert_eq!(locks.tracked(), 1);
    }
}
