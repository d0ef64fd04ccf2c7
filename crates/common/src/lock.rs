//! Per-interface serialization
//!
//! Address allocation reads the set of used addresses and then installs a
//! peer; two concurrent creations on one interface would otherwise pick the
//! same address. Every mutation that allocates or rewrites the peers of an
//! interface holds that interface's lock for its whole duration.

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

#[derive(Clone, Default)]
pub struct InterfaceLocks {
    locks: Arc<DashMap<String, Arc<Mutex<()>>>>,
}

impl InterfaceLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `interface_id`.
    pub async fn lock(&self, interface_id: &str) -> OwnedMutexGuard<()> {
        let lock = self
            .locks
            .entry(interface_id.to_string())
            .or_default()
            .clone();
        lock.lock_owned().await
    }

    /// Drop the lock entry of a deleted interface.
    pub fn forget(&self, interface_id: &str) {
        self.locks.remove(interface_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_same_interface_is_exclusive() {
        let locks = InterfaceLocks::new();
        let guard = locks.lock("wg0").await;

        let contender = locks.clone();
        let waiting = tokio::spawn(async move {
            let _guard = contender.lock("wg0").await;
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!waiting.is_finished());

        drop(guard);
        tokio::time::timeout(Duration::from_secs(1), waiting)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_interfaces_are_independent() {
        let locks = InterfaceLocks::new();
        let _wg0 = locks.lock("wg0").await;
        tokio::time::timeout(Duration::from_secs(1), locks.lock("wg1"))
            .await
            .unwrap();
    }
}
