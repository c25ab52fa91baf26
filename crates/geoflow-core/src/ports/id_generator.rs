//! IdGenerator port - correlation and batch id generation.
//!
//! # 実装
//! - **UlidGenerator**: ULID ベース（本番用）

use ulid::Ulid;

use crate::domain::{BatchId, CorrelationId};
use crate::ports::Clock;

pub trait IdGenerator: Send + Sync {
    fn generate_correlation_id(&self) -> CorrelationId;

    fn generate_batch_id(&self) -> BatchId;
}

/// ULID generator whose timestamp part comes from `C`.
///
/// With a `FixedClock` the timestamp part is deterministic; the random part
/// still keeps ids unique.
pub struct UlidGenerator<C> {
    clock: C,
}

impl<C: Clock> UlidGenerator<C> {
    pub fn new(clock: C) -> Self {
        Self { clock }
    }

    fn next_ulid(&self) -> Ulid {
        let timestamp_ms = self.clock.now().timestamp_millis().max(0) as u64;
        Ulid::from_parts(timestamp_ms, rand::random())
    }
}

impl<C: Clock> IdGenerator for UlidGenerator<C> {
    fn generate_correlation_id(&self) -> CorrelationId {
        CorrelationId::from_ulid(self.next_ulid())
    }

    fn generate_batch_id(&self) -> BatchId {
        BatchId::from_ulid(self.next_ulid())
    }
}
