//! QueueTransport trait definition

use std::time::Duration;

use async_trait::async_trait;
use uuid::Uuid;

/// Error type for queue operations
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    /// The receipt handle no longer owns the message (visibility expired and
    /// the message was received again, or it was already deleted)
    #[error("receipt handle expired for message {0}")]
    ReceiptExpired(Uuid),

    /// Transport failure (connection, database, broker)
    #[error("queue transport error: {0}")]
    Transport(String),
}

/// A message as handed out by `receive`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawMessage {
    pub message_id: Uuid,

    /// Opaque handle proving ownership of this delivery
    pub receipt_handle: String,

    pub body: String,

    /// How many times this message has been received, this delivery included
    pub receive_count: u32,
}

/// At-least-once, visibility-timeout based message transport
///
/// A received message is invisible to other consumers until it is deleted
/// or `visibility_timeout` elapses, after which it is delivered again.
/// Leaving a message undeleted is the only retry mechanism.
#[async_trait]
pub trait QueueTransport: Send + Sync + 'static {
    /// Publish a message body, returning its id
    async fn send(&self, queue: &str, body: String) -> Result<Uuid, QueueError>;

    /// Receive up to `max_messages`, waiting up to `wait` for at least one
    async fn receive(
        &self,
        queue: &str,
        max_messages: usize,
        wait: Duration,
        visibility_timeout: Duration,
    ) -> Result<Vec<RawMessage>, QueueError>;

    /// Acknowledge a message so it is never delivered again
    async fn delete(&self, queue: &str, message: &RawMessage) -> Result<(), QueueError>;

    /// Push the message's visibility deadline out to `now + timeout`
    async fn extend_visibility(
        &self,
        queue: &str,
        message: &RawMessage,
        timeout: Duration,
    ) -> Result<(), QueueError>;
}
