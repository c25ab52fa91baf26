//! EventSink implementations.
//!
//! - **TracingEventSink**: logs every event (default when no sink is wired)
//! - **RecordingEventSink**: keeps events in memory for tests and the CLI summary

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::domain::{JobEvent, JobState};
use crate::ports::{EventSink, SinkError};

#[derive(Debug, Default, Clone, Copy)]
pub struct TracingEventSink;

#[async_trait]
impl EventSink for TracingEventSink {
    async fn emit(&self, event: JobEvent) -> Result<(), SinkError> {
        tracing::info!(
            correlation_id = %event.correlation_id,
            domain = %event.domain,
            action = %event.action,
            state = ?event.state,
            event_time = %event.event_time.to_rfc3339(),
            detail = event.detail.as_deref(),
            terminal = event.state.is_terminal(),
            "job event"
        );
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingEventSink {
    events: Mutex<Vec<JobEvent>>,
}

impl RecordingEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Events received so far, oldest first.
    pub async fn events(&self) -> Vec<JobEvent> {
        self.events.lock().await.clone()
    }

    pub async fn states(&self) -> Vec<JobState> {
        self.events.lock().await.iter().map(|e| e.state).collect()
    }

    /// Events received in `state`.
    pub async fn count(&self, state: JobState) -> usize {
        self.events
            .lock()
            .await
            .iter()
            .filter(|e| e.state == state)
            .count()
    }
}

#[async_trait]
impl EventSink for RecordingEventSink {
    async fn emit(&self, event: JobEvent) -> Result<(), SinkError> {
        self.events.lock().await.push(event);
        Ok(())
    }
}
