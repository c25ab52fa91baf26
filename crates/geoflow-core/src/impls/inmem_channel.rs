//! InMemoryChannel - 開発・テスト用の TaskChannel
//!
//! - HashMap<String, VecDeque<Queued>> で topic ごとにキューを管理
//! - tokio Mutex で排他制御（ロックを跨いだ await はしない）
//! - Notify で publish 時に待機中の receive を起こす
//! - publish_delayed のメッセージは due になるまで受信されない
//!
//! # 実装
//! receive は due 済みのうち最も古いメッセージを返す。due 前のメッセージしか
//! なければ、最も早い due 時刻か timeout まで待つ。

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;

use crate::ports::{ChannelError, Message, TaskChannel};

#[derive(Debug)]
struct Queued {
    message: Message,
    due: Instant,
}

#[derive(Default)]
struct Topics {
    queues: HashMap<String, VecDeque<Queued>>,

    /// Messages ever published per topic.
    published: HashMap<String, usize>,
}

impl Topics {
    /// Pop the oldest due message, or report when the next one becomes due.
    fn take_due(&mut self, topic: &str, now: Instant) -> Result<Message, Option<Instant>> {
        let Some(queue) = self.queues.get_mut(topic) else {
            return Err(None);
        };
        match queue.iter().position(|q| q.due <= now) {
            Some(idx) => queue.remove(idx).map(|q| q.message).ok_or(None),
            None => Err(queue.iter().map(|q| q.due).min()),
        }
    }
}

pub struct InMemoryChannel {
    topics: Mutex<Topics>,
    notify: Notify,
}

impl InMemoryChannel {
    pub fn new() -> Self {
        Self {
            topics: Mutex::new(Topics::default()),
            notify: Notify::new(),
        }
    }

    /// Messages held on `topic`, due or not.
    pub async fn pending(&self, topic: &str) -> usize {
        let topics = self.topics.lock().await;
        topics.queues.get(topic).map_or(0, VecDeque::len)
    }

    /// Messages on `topic` that are not deliverable yet.
    pub async fn scheduled(&self, topic: &str) -> usize {
        let now = Instant::now();
        let topics = self.topics.lock().await;
        topics
            .queues
            .get(topic)
            .map_or(0, |q| q.iter().filter(|m| m.due > now).count())
    }

    /// Messages ever published on `topic`.
    pub async fn published(&self, topic: &str) -> usize {
        let topics = self.topics.lock().await;
        topics.published.get(topic).copied().unwrap_or(0)
    }

    /// Copy of the messages held on `topic`, oldest first.
    pub async fn peek_all(&self, topic: &str) -> Vec<Message> {
        let topics = self.topics.lock().await;
        topics
            .queues
            .get(topic)
            .map(|q| q.iter().map(|m| m.message.clone()).collect())
            .unwrap_or_default()
    }

    async fn enqueue(&self, topic: &str, message: Message, due: Instant) {
        {
            let mut topics = self.topics.lock().await;
            topics
                .queues
                .entry(topic.to_string())
                .or_default()
                .push_back(Queued { message, due });
            *topics.published.entry(topic.to_string()).or_default() += 1;
        }
        // ロック解放後に通知する
        self.notify.notify_waiters();
    }
}

impl Default for InMemoryChannel {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TaskChannel for InMemoryChannel {
    async fn publish(&self, topic: &str, message: Message) -> Result<(), ChannelError> {
        self.enqueue(topic, message, Instant::now()).await;
        Ok(())
    }

    async fn publish_delayed(&self, topic: &str, message: Message, delay: Duration) -> Result<(), ChannelError> {
        self.enqueue(topic, message, Instant::now() + delay).await;
        Ok(())
    }

    async fn receive(&self, topic: &str, timeout: Duration) -> Result<Option<Message>, ChannelError> {
        let deadline = Instant::now() + timeout;
        loop {
            // 先に notified を登録してからキューを確認する（取りこぼし防止）
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let next_due = {
                let mut topics = self.topics.lock().await;
                match topics.take_due(topic, Instant::now()) {
                    Ok(message) => return Ok(Some(message)),
                    Err(next_due) => next_due,
                }
            };
            if Instant::now() >= deadline {
                return Ok(None);
            }

            let wake = next_due.map_or(deadline, |due| due.min(deadline));
            tokio::select! {
                _ = &mut notified => {}
                _ = tokio::time::sleep_until(wake) => {}
            }
        }
    }
}
