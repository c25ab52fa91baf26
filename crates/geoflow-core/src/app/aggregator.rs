//! Aggregator - 受信メッセージを 1 つの TaskList にまとめる
//!
//! A batch opens with the first message and closes when `max_messages`
//! messages arrived or `window` elapsed since the first one, whichever comes
//! first. Triggers that fire close together become one run.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use crate::domain::{BatchId, Headers, TaskList};
use crate::ports::{ChannelError, IdGenerator, Message, TaskChannel};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AggregatorSettings {
    pub max_messages: usize,
    pub window: Duration,

    /// How long to wait for the first message of a batch.
    pub idle_poll: Duration,
}

impl Default for AggregatorSettings {
    fn default() -> Self {
        Self {
            max_messages: 100,
            window: Duration::from_millis(1000),
            idle_poll: Duration::from_millis(1000),
        }
    }
}

/// Merged result of one aggregation window.
#[derive(Debug, Clone)]
pub struct Batch {
    pub batch_id: BatchId,
    pub task_list: TaskList,

    /// Union of message attributes; the earliest message wins on conflicts.
    pub attributes: Headers,

    /// Messages merged into `task_list`.
    pub messages: usize,

    /// Messages dropped because they were not task lists.
    pub rejected: usize,
}

impl Batch {
    /// Empty batch with no messages.
    pub fn new(batch_id: BatchId) -> Self {
        Self {
            batch_id,
            task_list: TaskList::new(),
            attributes: Headers::new(),
            messages: 0,
            rejected: 0,
        }
    }

    /// Merge `message` in. Unparsable messages are logged and counted.
    pub fn absorb(&mut self, message: Message) {
        match self.task_list.merge_json(&message.payload) {
            Ok((added, skipped)) => {
                for (k, v) in message.attributes {
                    self.attributes.entry(k).or_insert(v);
                }
                self.messages += 1;
                tracing::debug!(
                    batch_id = %self.batch_id,
                    added,
                    skipped_entries = skipped,
                    "merged message into batch"
                );
            }
            Err(e) => {
                self.rejected += 1;
                tracing::warn!(batch_id = %self.batch_id, error = %e, "dropping unparsable message");
            }
        }
    }

    /// No message in this batch was a task list.
    pub fn is_rejected_only(&self) -> bool {
        self.messages == 0
    }
}

/// Turns the messages of one topic into batches.
pub struct Aggregator {
    channel: Arc<dyn TaskChannel>,
    topic: String,
    settings: AggregatorSettings,
    ids: Arc<dyn IdGenerator>,
}

impl Aggregator {
    /// Aggregator over `topic`; `ids` names each batch.
    pub fn new(
        channel: Arc<dyn TaskChannel>,
        topic: impl Into<String>,
        settings: AggregatorSettings,
        ids: Arc<dyn IdGenerator>,
    ) -> Self {
        Self {
            channel,
            topic: topic.into(),
            settings,
            ids,
        }
    }

    /// Topic this aggregator consumes.
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Window, size and idle poll in use.
    pub fn settings(&self) -> &AggregatorSettings {
        &self.settings
    }

    /// Collect the next batch. `Ok(None)` when nothing arrived within
    /// `idle_poll`.
    pub async fn next_batch(&self) -> Result<Option<Batch>, ChannelError> {
        self.next_batch_within(self.settings.idle_poll).await
    }

    /// Like `next_batch`, waiting up to `wait` for the first message.
    pub async fn next_batch_within(&self, wait: Duration) -> Result<Option<Batch>, ChannelError> {
        let Some(first) = self.channel.receive(&self.topic, wait).await? else {
            return Ok(None);
        };

        let deadline = Instant::now() + self.settings.window;
        let mut batch = Batch::new(self.ids.generate_batch_id());
        batch.absorb(first);
        let mut received = 1;

        while received < self.settings.max_messages {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            match self.channel.receive(&self.topic, remaining).await? {
                Some(message) => {
                    batch.absorb(message);
                    received += 1;
                }
                None => break,
            }
        }

        tracing::debug!(
            topic = %self.topic,
            batch_id = %batch.batch_id,
            messages = batch.messages,
            rejected = batch.rejected,
            tasks = batch.task_list.len(),
            "batch closed"
        );
        Ok(Some(batch))
    }
}
