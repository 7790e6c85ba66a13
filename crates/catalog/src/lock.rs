//! Reconfiguration lock.
//!
//! Load, unload and reload operations hold the exclusive
//! [`ReconfigurationGuard`] for their whole duration, usage checks included.
//! Composite operations pass the guard they hold to their inner steps
//! instead of acquiring it again. Experiment admission holds a shared
//! [`AdmissionGuard`], so nothing is admitted between a usage check and the
//! mutation it protects.

use std::sync::Arc;

use tokio::sync::{OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock};
use tracing::trace;

/// Process-wide lock serializing reconfiguration.
#[derive(Debug, Clone, Default)]
pub struct ReconfigurationLock {
    inner: Arc<RwLock<()>>,
}

/// Proof that the reconfiguration lock is held exclusively.
#[derive(Debug)]
pub struct ReconfigurationGuard {
    _guard: OwnedRwLockWriteGuard<()>,
}

/// Shared hold that keeps reconfiguration out while an experiment is admitted.
#[derive(Debug)]
pub struct AdmissionGuard {
    _guard: OwnedRwLockReadGuard<()>,
}

impl ReconfigurationLock {
    /// Create an unlocked lock.
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access.
    pub async fn acquire(&self) -> ReconfigurationGuard {
        let guard = self.inner.clone().write_owned().await;
        trace!("Reconfiguration lock acquired");
        ReconfigurationGuard { _guard: guard }
    }

    #[cfg(test)]
    fn try_acquire(&self) -> Option<ReconfigurationGuard> {
        self.inner
            .clone()
            .try_write_owned()
            .ok()
            .map(|guard| ReconfigurationGuard { _guard: guard })
    }

    /// Wait until no reconfiguration is running and keep it out.
    pub async fn admit(&self) -> AdmissionGuard {
        AdmissionGuard {
            _guard: self.inner.clone().read_owned().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_reconfiguration_is_exclusive() {
        let lock = ReconfigurationLock::new();
        let guard = lock.acquire().await;
        assert!(lock.try_acquire().is_none());

        let waiting = {
            let lock = lock.clone();
            tokio::spawn(async move {
                let _guard = lock.acquire().await;
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiting.is_finished());

        drop(guard);
        waiting.await.unwrap();
        assert!(lock.try_acquire().is_some());
    }

    #[tokio::test]
    async fn test_admission_blocks_reconfiguration() {
        let lock = ReconfigurationLock::new();
        let first = lock.admit().await;
        let second = lock.admit().await;
        assert!(lock.try_acquire().is_none());

        drop(first);
        drop(second);
        assert!(lock.try_acquire().is_some());
    }
}
