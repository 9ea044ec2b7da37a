//! Queue message body

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::model::{Job, JobKind};
use super::payload::GenerationRequest;

/// Why a message body could not be turned into a [`QueueMessage`]
#[derive(Debug, thiserror::Error)]
pub enum MessageError {
    /// Body is not valid JSON or does not match the message shape
    #[error("malformed message body: {0}")]
    Malformed(#[from] serde_json::Error),

    /// Message arrived on the queue of a different kind
    #[error("message kind {actual} does not match queue kind {expected}")]
    KindMismatch { expected: JobKind, actual: JobKind },
}

/// Body of a generation queue message: `{ jobId, ownerId, kind, payload }`
///
/// The payload is a copy taken at enqueue time. The job store record is
/// authoritative whenever the two disagree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueMessage {
    pub job_id: Uuid,
    pub owner_id: String,
    #[serde(flatten)]
    pub request: GenerationRequest,
}

impl QueueMessage {
    /// Build the message announcing a freshly created job
    pub fn for_job(job: &Job) -> Self {
        Self {
            job_id: job.id,
            owner_id: job.owner_id.clone(),
            request: job.request.clone(),
        }
    }

    pub fn kind(&self) -> JobKind {
        self.request.kind()
    }

    /// Parse a body received on the queue bound to `expected`
    pub fn parse(body: &str, expected: JobKind) -> Result<Self, MessageError> {
        let message: QueueMessage = serde_json::from_str(body)?;
        if message.kind() != expected {
            return Err(MessageError::KindMismatch {
                expected,
                actual: message.kind(),
            });
        }
        Ok(message)
    }

    pub fn to_body(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
