//! EventEmitter - fire-and-forget JobEvent delivery
//!
//! Sink failures are logged and swallowed; they never affect the run.

use std::sync::Arc;

use crate::domain::{CorrelationId, JobEvent, JobState};
use crate::ports::{Clock, EventSink};

pub struct EventEmitter {
    sink: Arc<dyn EventSink>,
    clock: Arc<dyn Clock>,
    domain: String,
}

impl EventEmitter {
    /// Emitter stamping `domain` and the time from `clock` on every event.
    pub fn new(sink: Arc<dyn EventSink>, clock: Arc<dyn Clock>, domain: impl Into<String>) -> Self {
        Self {
            sink,
            clock,
            domain: domain.into(),
        }
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }

    /// Report `state` for `correlation_id`. Sink failures are logged, never returned.
    pub async fn emit(
        &self,
        correlation_id: &CorrelationId,
        action: &str,
        state: JobState,
        detail: Option<String>,
    ) {
        let mut event = JobEvent::new(
            correlation_id.clone(),
            self.domain.as_str(),
            action,
            state,
            self.clock.now(),
        );
        if let Some(detail) = detail {
            event = event.with_detail(detail);
        }

        if let Err(e) = self.sink.emit(event).await {
            tracing::warn!(
                correlation_id = %correlation_id,
                state = ?state,
                error = %e,
                "failed to emit job event"
            );
        }
    }
}
