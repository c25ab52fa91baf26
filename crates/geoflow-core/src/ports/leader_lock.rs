//! LeaderLock port - at most one active consumer per queue.
//!
//! Implementations are lease based: a holder that stops renewing loses the
//! lock after the lease expires, so a crashed replica never blocks the queue.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LockError {
    #[error("lock backend unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait LeaderLock: Send + Sync {
    /// Lease length granted by `acquire` and `renew`.
    fn lease_ttl(&self) -> Duration;

    /// Try to become the consumer of `queue`. `Ok(false)` means someone else
    /// holds it.
    async fn acquire(&self, queue: &str, holder: &str) -> Result<bool, LockError>;

    /// Extend the lease. `Ok(false)` means the lease was lost.
    async fn renew(&self, queue: &str, holder: &str) -> Result<bool, LockError>;

    /// Give up the lock. Releasing a lock not held by `holder` is a no-op.
    async fn release(&self, queue: &str, holder: &str) -> Result<(), LockError>;
}
