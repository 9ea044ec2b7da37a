//! Job record and its status machine

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::payload::GenerationRequest;

/// Kind of generation work; selects the queue and the request shape
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    Article,
    Image,
    Video,
}

impl JobKind {
    /// All kinds, in polling order
    pub const ALL: [JobKind; 3] = [JobKind::Article, JobKind::Image, JobKind::Video];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Article => "article",
            Self::Image => "image",
            Self::Video => "video",
        }
    }
}

impl std::fmt::Display for JobKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for JobKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "article" => Ok(Self::Article),
            "image" => Ok(Self::Image),
            "video" => Ok(Self::Video),
            other => Err(format!("unknown job kind: {other}")),
        }
    }
}

/// Job status
///
/// ```text
/// queued ──► processing ──► completed
///    │           ├────────► failed
///    │           └────────► cancelled
///    └────────────────────► cancelled
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Created by the enqueuer, waiting for admission
    Queued,

    /// Claimed by a worker, generation in flight
    Processing,

    /// Result durably recorded
    Completed,

    /// Generation or validation failed
    Failed,

    /// Cancelled by an external actor
    Cancelled,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    /// No further transitions occur from a terminal status
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Statuses that count against admission ceilings
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Processing)
    }

    /// Whether moving from `self` to `next` is a forward transition
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        match (self, next) {
            (Self::Queued, Self::Processing | Self::Cancelled) => true,
            (
                Self::Processing,
                Self::Processing | Self::Completed | Self::Failed | Self::Cancelled,
            ) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(Self::Queued),
            "processing" => Ok(Self::Processing),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(format!("unknown job status: {other}")),
        }
    }
}

/// One unit of generation work as persisted in the job store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: Uuid,
    pub owner_id: String,

    /// Kind and kind-specific payload, immutable after creation
    #[serde(flatten)]
    pub request: GenerationRequest,

    pub status: JobStatus,
    pub progress: u8,
    pub message: Option<String>,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub failed_at: Option<DateTime<Utc>>,
}

impl Job {
    /// Create a queued job with a fresh v7 id
    pub fn new(owner_id: impl Into<String>, request: GenerationRequest) -> Self {
        Self::with_id(Uuid::now_v7(), owner_id, request)
    }

    /// Create a queued job with a caller-chosen id
    pub fn with_id(id: Uuid, owner_id: impl Into<String>, request: GenerationRequest) -> Self {
        let now = Utc::now();
        Self {
            id,
            owner_id: owner_id.into(),
            request,
            status: JobStatus::Queued,
            progress: 0,
            message: Some("Queued".to_string()),
            result: None,
            error: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
            failed_at: None,
        }
    }

    pub fn kind(&self) -> JobKind {
        self.request.kind()
    }
}
