//! JobEvent - audit records sent to the status sink.
//!
//! The engine emits:
//! - `PENDING` when a run is triggered
//! - `STARTED` on the first invocation of a not-yet-started task
//! - `TIMEOUT` when a task exhausts its retries
//! - `FAILED` when a step errors (the run aborts)
//! - `OK` once, when the task list drains

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::CorrelationId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobState {
    Pending,
    Started,
    Timeout,
    Failed,
    Ok,
    Duplicate,
    Cancelled,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobState::Timeout | JobState::Failed | JobState::Ok | JobState::Cancelled
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobEvent {
    pub correlation_id: CorrelationId,
    pub domain: String,
    pub action: String,
    pub state: JobState,
    pub event_time: DateTime<Utc>,

    /// Human-readable detail (error message, timeout summary).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl JobEvent {
    pub fn new(
        correlation_id: CorrelationId,
        domain: impl Into<String>,
        action: impl Into<String>,
        state: JobState,
        event_time: DateTime<Utc>,
    ) -> Self {
        Self {
            correlation_id,
            domain: domain.into(),
            action: action.into(),
            state,
            event_time,
            detail: None,
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}
