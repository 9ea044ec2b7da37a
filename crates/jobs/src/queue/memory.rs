//! In-memory visibility-timeout queue
//!
//! Uses `tokio::time` so tests running with a paused clock can step over
//! visibility timeouts and long-poll waits instantly.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::time::Instant;
use uuid::Uuid;

use super::transport::*;

const LONG_POLL_STEP: Duration = Duration::from_millis(50);

struct Entry {
    id: Uuid,
    body: String,
    visible_at: Instant,
    receipt_handle: Option<String>,
    receive_count: u32,
}

/// In-memory implementation of QueueTransport
///
/// Messages are delivered in send order; a redelivered message keeps its
/// original position.
pub struct InMemoryQueue {
    queues: Mutex<HashMap<String, VecDeque<Entry>>>,
    unavailable: AtomicBool,
}

impl InMemoryQueue {
    pub fn new() -> Self {
        Self {
            queues: Mutex::new(HashMap::new()),
            unavailable: AtomicBool::new(false),
        }
    }

    /// Messages not yet deleted, visible or not
    pub fn len(&self, queue: &str) -> usize {
        self.queues.lock().get(queue).map_or(0, VecDeque::len)
    }

    /// Messages currently receivable
    pub fn visible_len(&self, queue: &str) -> usize {
        let now = Instant::now();
        self.queues
            .lock()
            .get(queue)
            .map_or(0, |q| q.iter().filter(|e| e.visible_at <= now).count())
    }

    /// Whether a message is still present (not deleted)
    pub fn contains(&self, queue: &str, message_id: Uuid) -> bool {
        self.queues
            .lock()
            .get(queue)
            .is_some_and(|q| q.iter().any(|e| e.id == message_id))
    }

    /// Simulate a transport outage: every operation fails until restored
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::Relaxed);
    }

    fn check_available(&self) -> Result<(), QueueError> {
        if self.unavailable.load(Ordering::Relaxed) {
            return Err(QueueError::Transport("queue unavailable".to_string()));
        }
        Ok(())
    }

    fn take_visible(
        &self,
        queue: &str,
        max_messages: usize,
        visibility_timeout: Duration,
    ) -> Vec<RawMessage> {
        let now = Instant::now();
        let mut queues = self.queues.lock();
        let Some(entries) = queues.get_mut(queue) else {
            return vec![];
        };

        entries
            .iter_mut()
            .filter(|e| e.visible_at <= now)
            .take(max_messages)
            .map(|entry| {
                let handle = Uuid::now_v7().to_string();
                entry.visible_at = now + visibility_timeout;
                entry.receipt_handle = Some(handle.clone());
                entry.receive_count += 1;
                RawMessage {
                    message_id: entry.id,
                    receipt_handle: handle,
                    body: entry.body.clone(),
                    receive_count: entry.receive_count,
                }
            })
            .collect()
    }
}

impl Default for InMemoryQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl QueueTransport for InMemoryQueue {
    async fn send(&self, queue: &str, body: String) -> Result<Uuid, QueueError> {
        self.check_available()?;
        let id = Uuid::now_v7();
        self.queues
            .lock()
            .entry(queue.to_string())
            .or_default()
            .push_back(Entry {
                id,
                body,
                visible_at: Instant::now(),
                receipt_handle: None,
                receive_count: 0,
            });
        Ok(id)
    }

    async fn receive(
        &self,
        queue: &str,
        max_messages: usize,
        wait: Duration,
        visibility_timeout: Duration,
    ) -> Result<Vec<RawMessage>, QueueError> {
        self.check_available()?;
        if max_messages == 0 {
            return Ok(vec![]);
        }

        let deadline = Instant::now() + wait;
        loop {
            let messages = self.take_visible(queue, max_messages, visibility_timeout);
            let now = Instant::now();
            if !messages.is_empty() || now >= deadline {
                return Ok(messages);
            }
            tokio::time::sleep(LONG_POLL_STEP.min(deadline - now)).await;
        }
    }

    async fn delete(&self, queue: &str, message: &RawMessage) -> Result<(), QueueError> {
        self.check_available()?;
        let mut queues = self.queues.lock();
        let entries = queues
            .get_mut(queue)
            .ok_or(QueueError::ReceiptExpired(message.message_id))?;

        let position = entries
            .iter()
            .position(|e| {
                e.id == message.message_id
                    && e.receipt_handle.as_deref() == Some(message.receipt_handle.as_str())
            })
            .ok_or(QueueError::ReceiptExpired(message.message_id))?;
        entries.remove(position);
        Ok(())
    }

    async fn extend_visibility(
        &self,
        queue: &str,
        message: &RawMessage,
        timeout: Duration,
    ) -> Result<(), QueueError> {
        self.check_available()?;
        let mut queues = self.queues.lock();
        let entry = queues
            .get_mut(queue)
            .and_then(|q| {
                q.iter_mut().find(|e| {
                    e.id == message.message_id
                        && e.receipt_handle.as_deref() == Some(message.receipt_handle.as_str())
                })
            })
            .ok_or(QueueError::ReceiptExpired(message.message_id))?;
        entry.visible_at = Instant::now() + timeout;
        Ok(())
    }
}
