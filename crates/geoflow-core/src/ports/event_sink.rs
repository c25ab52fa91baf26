//! EventSink port - status event stream.
//!
//! Fire-and-forget: callers log a failed emit and carry on.

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::JobEvent;

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("status sink unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait EventSink: Send + Sync {
    async fn emit(&self, event: JobEvent) -> Result<(), SinkError>;
}
