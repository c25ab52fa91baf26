//! TaskChannel port - the queue/topic that task lists travel on.
//!
//! Delivery is at-least-once. A message is a serialized `TaskList` plus
//! transport attributes (carried headers, correlation id); the attributes are
//! not part of the task list wire format.
//!
//! # 学習ポイント
//! - retry の待ち時間は channel 側で持つ（`publish_delayed`）
//! - publish した時点で run は channel 上にあり、プロセスの停止で失われない

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::Headers;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub attributes: Headers,
    pub payload: String,
}

impl Message {
    /// Message without attributes.
    pub fn new(payload: impl Into<String>) -> Self {
        Self {
            attributes: Headers::new(),
            payload: payload.into(),
        }
    }

    /// Replace the attributes.
    pub fn with_attributes(mut self, attributes: Headers) -> Self {
        self.attributes = attributes;
        self
    }
}

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("channel closed: {0}")]
    Closed(String),

    #[error("channel operation failed: {0}")]
    OperationFailed(String),
}

#[async_trait]
pub trait TaskChannel: Send + Sync {
    /// Publish `message`; it is deliverable at once.
    async fn publish(&self, topic: &str, message: Message) -> Result<(), ChannelError>;

    /// Publish `message` now but deliver it no earlier than `delay` from now.
    ///
    /// Once this returns the message is owned by the channel, so a consumer
    /// that stops during `delay` does not lose it.
    async fn publish_delayed(&self, topic: &str, message: Message, delay: Duration) -> Result<(), ChannelError>;

    /// Wait up to `timeout` for the next message on `topic`.
    async fn receive(&self, topic: &str, timeout: Duration) -> Result<Option<Message>, ChannelError>;
}
