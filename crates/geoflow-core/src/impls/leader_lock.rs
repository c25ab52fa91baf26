//! InMemoryLeaderLock - 単一プロセス内のリース管理
//!
//! queue -> (holder, expires_at)。期限切れのリースは誰でも取得できる。

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::ports::{LeaderLock, LockError};

#[derive(Debug, Clone)]
struct Lease {
    holder: String,
    expires_at: Instant,
}

pub struct InMemoryLeaderLock {
    ttl: Duration,
    leases: Mutex<HashMap<String, Lease>>,
}

impl InMemoryLeaderLock {
    /// Leases granted by this lock last `ttl`.
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            leases: Mutex::new(HashMap::new()),
        }
    }

    /// Current live holder of `queue`, if any.
    pub async fn holder(&self, queue: &str) -> Option<String> {
        let leases = self.leases.lock().await;
        leases
            .get(queue)
            .filter(|l| l.expires_at > Instant::now())
            .map(|l| l.holder.clone())
    }
}

#[async_trait]
impl LeaderLock for InMemoryLeaderLock {
    fn lease_ttl(&self) -> Duration {
        self.ttl
    }

    async fn acquire(&self, queue: &str, holder: &str) -> Result<bool, LockError> {
        let now = Instant::now();
        let mut leases = self.leases.lock().await;
        if let Some(lease) = leases.get(queue)
            && lease.holder != holder
            && lease.expires_at > now
        {
            return Ok(false);
        }
        leases.insert(
            queue.to_string(),
            Lease {
                holder: holder.to_string(),
                expires_at: now + self.ttl,
            },
        );
        Ok(true)
    }

    async fn renew(&self, queue: &str, holder: &str) -> Result<bool, LockError> {
        let now = Instant::now();
        let mut leases = self.leases.lock().await;
        match leases.get_mut(queue) {
            Some(lease) if lease.holder == holder && lease.expires_at > now => {
                lease.expires_at = now + self.ttl;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn release(&self, queue: &str, holder: &str) -> Result<(), LockError> {
        let mut leases = self.leases.lock().await;
        if leases.get(queue).is_some_and(|l| l.holder == holder) {
            leases.remove(queue);
        }
        Ok(())
    }
}
