//! GenerationClient trait definition

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::job::{GenerationRequest, JobKind, PayloadError};

/// Error type for generation calls
#[derive(Debug, thiserror::Error)]
pub enum GenerationError {
    /// The cancel token fired and the in-flight call was dropped
    #[error("generation aborted")]
    Aborted,

    /// Payload rejected before any call was made
    #[error("invalid generation request: {0}")]
    InvalidRequest(#[from] PayloadError),

    /// No backend endpoint configured for this kind
    #[error("no generation endpoint configured for {0} jobs")]
    NotConfigured(JobKind),

    /// Backend answered with an error status or `"success": false`
    #[error("generation backend returned {status}: {message}")]
    Backend { status: u16, message: String },

    /// Transport-level failure (connect, reset, TLS)
    #[error("generation request failed: {0}")]
    Http(String),

    /// Backend answered 2xx with a body that is not JSON
    #[error("invalid generation response: {0}")]
    Decode(String),
}

impl GenerationError {
    pub fn is_aborted(&self) -> bool {
        matches!(self, Self::Aborted)
    }
}

/// Successful backend response
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationOutput {
    pub body: serde_json::Value,
}

impl GenerationOutput {
    pub fn new(body: serde_json::Value) -> Self {
        Self { body }
    }

    /// Generated text for article jobs
    pub fn content(&self) -> Option<&str> {
        self.body.get("content").and_then(|v| v.as_str())
    }

    /// Asset location for image and video jobs
    pub fn asset_url(&self) -> Option<&str> {
        ["image_url", "video_url", "download_url", "url"]
            .iter()
            .find_map(|key| self.body.get(*key).and_then(|v| v.as_str()))
    }
}

/// Client for the external generation backend
///
/// One call per job, no internal retries and no overall timeout: the only
/// early exit is `cancel`. Implementations must return
/// [`GenerationError::Aborted`] promptly once `cancel` fires.
#[async_trait]
pub trait GenerationClient: Send + Sync + 'static {
    async fn generate(
        &self,
        request: &GenerationRequest,
        job_id: Uuid,
        owner_id: &str,
        cancel: &CancellationToken,
    ) -> Result<GenerationOutput, GenerationError>;
}
