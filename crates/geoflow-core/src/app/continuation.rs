//! ContinuationDriver - decides what follows a finished or timed-out task
//!
//! 1. follow-up があれば TaskList に追加
//! 2. TaskList が空なら OK を発行して終了（publish しない）
//! 3. それ以外は TaskList を即座に publish（delay は channel 側で待つ）
//!
//! Every iteration ends in a complete hand-off: nothing about the run lives in
//! memory after `advance` returns, including while a retry delay runs.
//!
//! # 学習ポイント
//! - 非ブロッキングな timer: iteration は delay を待たずに終わる
//! - 次の iteration は、delay 明けに channel から TaskList を受け取った consumer が行う

use std::sync::Arc;
use std::time::Duration;

use crate::domain::{CorrelationId, Headers, JobState, Task, TaskList};
use crate::error::FlowError;
use crate::ports::{Message, TaskChannel};

use super::emitter::EventEmitter;

/// How an iteration ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Continuation {
    /// The list drained; `OK` was emitted and nothing was published.
    Complete,

    /// The remaining list was published back onto the topic, deliverable
    /// after `delay`.
    Requeued { remaining: usize, delay: Duration },

    /// A step failed; the run stopped and nothing was published.
    Aborted,
}

impl Continuation {
    /// The run ended here: nothing of it is left on the channel.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Continuation::Requeued { .. })
    }
}

/// Hands the rest of a run back to the channel.
pub struct ContinuationDriver {
    channel: Arc<dyn TaskChannel>,
    topic: String,
    action: String,
}

impl ContinuationDriver {
    /// `action` is reported on the `OK` event of a completed run.
    pub fn new(channel: Arc<dyn TaskChannel>, topic: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            channel,
            topic: topic.into(),
            action: action.into(),
        }
    }

    /// Topic the continuation is published on.
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Add `follow_up`, then either finish the run with `OK` or publish the
    /// remaining list with `attributes`, deliverable after `delay`.
    ///
    /// Publish failures are logged and returned as `FlowError::Channel`.
    pub async fn advance(
        &self,
        emitter: &EventEmitter,
        mut list: TaskList,
        follow_up: Option<Task>,
        attributes: Headers,
        delay: Duration,
        correlation_id: &CorrelationId,
    ) -> Result<Continuation, FlowError> {
        if let Some(next) = follow_up {
            let key = next.to_string();
            if !list.add(next) {
                tracing::debug!(follow_up = %key, "follow-up already queued");
            }
        }

        if list.is_complete() {
            tracing::info!(correlation_id = %correlation_id, "run complete");
            emitter
                .emit(correlation_id, &self.action, JobState::Ok, None)
                .await;
            return Ok(Continuation::Complete);
        }

        let payload = list.to_json()?;
        let remaining = list.len();
        let message = Message::new(payload).with_attributes(attributes);
        let published = if delay.is_zero() {
            self.channel.publish(&self.topic, message).await
        } else {
            self.channel.publish_delayed(&self.topic, message, delay).await
        };
        published.inspect_err(|e| {
            tracing::error!(topic = %self.topic, error = %e, "failed to publish continuation");
        })?;

        tracing::info!(
            topic = %self.topic,
            remaining,
            delay_ms = delay.as_millis() as u64,
            "requeued task list"
        );
        Ok(Continuation::Requeued { remaining, delay })
    }
}
