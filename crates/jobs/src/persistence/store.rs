//! JobStore trait definition

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use crate::job::{Job, JobKind, JobStatus};

/// Error type for store operations
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Job not found
    #[error("job not found: {0}")]
    JobNotFound(Uuid),

    /// Job already exists
    #[error("job already exists: {0}")]
    AlreadyExists(Uuid),

    /// Conditional update failed (status changed underneath us)
    #[error("conflict on job {job_id}: expected status {expected}, found {actual}")]
    Conflict {
        job_id: Uuid,
        expected: JobStatus,
        actual: JobStatus,
    },

    /// Update would move the job backwards or out of a terminal status
    #[error("invalid transition from {from} to {to}")]
    InvalidTransition { from: JobStatus, to: JobStatus },

    /// Database error
    #[error("database error: {0}")]
    Database(String),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Fields to change in a single atomic update
///
/// `None` leaves a field untouched. `updated_at` is always bumped, and
/// `completed_at` / `failed_at` are stamped on the matching transition.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JobUpdate {
    pub status: Option<JobStatus>,
    pub progress: Option<u8>,
    pub message: Option<String>,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
}

impl JobUpdate {
    /// Claim a queued job
    pub fn processing(progress: u8, message: impl Into<String>) -> Self {
        Self {
            status: Some(JobStatus::Processing),
            progress: Some(progress),
            message: Some(message.into()),
            ..Default::default()
        }
    }

    /// Heartbeat progress while processing
    pub fn progress(progress: u8, message: impl Into<String>) -> Self {
        Self {
            progress: Some(progress),
            message: Some(message.into()),
            ..Default::default()
        }
    }

    pub fn completed(result: serde_json::Value) -> Self {
        Self {
            status: Some(JobStatus::Completed),
            progress: Some(100),
            message: Some("Completed".to_string()),
            result: Some(result),
            ..Default::default()
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            status: Some(JobStatus::Failed),
            progress: Some(0),
            message: Some("Failed".to_string()),
            error: Some(error.into()),
            ..Default::default()
        }
    }

    pub fn cancelled() -> Self {
        Self {
            status: Some(JobStatus::Cancelled),
            message: Some("Cancelled".to_string()),
            ..Default::default()
        }
    }

    /// Apply this update to a job record in place
    ///
    /// Shared by every store implementation so conditional checks, transition
    /// rules and timestamp handling behave identically.
    pub fn apply(&self, job: &mut Job, expected: Option<JobStatus>) -> Result<(), StoreError> {
        if let Some(expected) = expected {
            if job.status != expected {
                return Err(StoreError::Conflict {
                    job_id: job.id,
                    expected,
                    actual: job.status,
                });
            }
        }

        let next = self.status.unwrap_or(job.status);
        if self.status.is_some() && !job.status.can_transition_to(next) {
            return Err(StoreError::InvalidTransition {
                from: job.status,
                to: next,
            });
        }

        let now = Utc::now();
        if let Some(progress) = self.progress {
            let progress = progress.min(100);
            // Progress never moves backwards while the job stays in processing
            job.progress = if job.status == JobStatus::Processing && next == JobStatus::Processing {
                job.progress.max(progress)
            } else {
                progress
            };
        }
        if let Some(message) = &self.message {
            job.message = Some(message.clone());
        }
        if let Some(result) = &self.result {
            job.result = Some(result.clone());
        }
        if let Some(error) = &self.error {
            job.error = Some(error.clone());
        }
        if next != job.status {
            match next {
                JobStatus::Completed => job.completed_at = Some(now),
                JobStatus::Failed => job.failed_at = Some(now),
                _ => {}
            }
        }
        job.status = next;
        job.updated_at = now;
        Ok(())
    }
}

/// Filter for counting jobs
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JobFilter {
    pub owner_id: Option<String>,
    pub kind: Option<JobKind>,
    /// Empty means any status
    pub statuses: Vec<JobStatus>,
}

impl JobFilter {
    /// Jobs currently holding an admission slot
    pub fn active() -> Self {
        Self {
            statuses: vec![JobStatus::Processing],
            ..Default::default()
        }
    }

    pub fn with_owner(mut self, owner_id: impl Into<String>) -> Self {
        self.owner_id = Some(owner_id.into());
        self
    }

    pub fn with_kind(mut self, kind: JobKind) -> Self {
        self.kind = Some(kind);
        self
    }

    pub fn with_statuses(mut self, statuses: Vec<JobStatus>) -> Self {
        self.statuses = statuses;
        self
    }

    pub fn matches(&self, job: &Job) -> bool {
        self.owner_id.as_deref().map_or(true, |o| o == job.owner_id)
            && self.kind.map_or(true, |k| k == job.kind())
            && (self.statuses.is_empty() || self.statuses.contains(&job.status))
    }
}

/// Store for generation job records
///
/// One document per job, keyed by job id. Every update is a single atomic
/// document write; there are no multi-job transactions. Implementations
/// must be thread-safe and provide read-after-write consistency per job.
#[async_trait]
pub trait JobStore: Send + Sync + 'static {
    /// Insert a new job record (enqueuer side)
    async fn insert(&self, job: Job) -> Result<(), StoreError>;

    /// Point read
    async fn get(&self, job_id: Uuid) -> Result<Job, StoreError>;

    /// Atomic update, optionally conditional on the current status
    ///
    /// Returns the job as written.
    async fn update(
        &self,
        job_id: Uuid,
        update: JobUpdate,
        expected_status: Option<JobStatus>,
    ) -> Result<Job, StoreError>;

    /// Count jobs matching the filter
    async fn count(&self, filter: &JobFilter) -> Result<u64, StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{GenerationRequest, ImagePayload};

    fn queued_job() -> Job {
        Job::new(
            "owner-1",
            GenerationRequest::Image(ImagePayload::new("a red fox")),
        )
    }

    #[test]
    fn test_apply_conditional_conflict() {
        let mut job = queued_job();
        let err = JobUpdate::processing(25, "starting")
            .apply(&mut job, Some(JobStatus::Processing))
            .unwrap_err();

        assert!(matches!(
            err,
            StoreError::Conflict {
                expected: JobStatus::Processing,
                actual: JobStatus::Queued,
                ..
            }
        ));
        assert_eq!(job.status, JobStatus::Queued);
    }

    #[test]
    fn test_apply_rejects_backward_transition() {
        let mut job = queued_job();
        JobUpdate::processing(25, "starting")
            .apply(&mut job, Some(JobStatus::Queued))
            .unwrap();

        let back = JobUpdate {
            status: Some(JobStatus::Queued),
            ..Default::default()
        };
        assert!(matches!(
            back.apply(&mut job, None),
            Err(StoreError::InvalidTransition { .. })
        ));
    }

    #[test]
    fn test_apply_keeps_progress_monotonic_while_processing() {
        let mut job = queued_job();
        JobUpdate::processing(25, "starting")
            .apply(&mut job, None)
            .unwrap();
        JobUpdate::progress(40, "tick").apply(&mut job, None).unwrap();
        JobUpdate::progress(30, "late tick")
            .apply(&mut job, None)
            .unwrap();

        assert_eq!(job.progress, 40);
        assert_eq!(job.message.as_deref(), Some("late tick"));
    }

    #[test]
    fn test_apply_terminal_timestamps() {
        let mut job = queued_job();
        JobUpdate::processing(25, "starting")
            .apply(&mut job, None)
            .unwrap();
        JobUpdate::failed("backend exploded")
            .apply(&mut job, Some(JobStatus::Processing))
            .unwrap();

        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.progress, 0);
        assert!(job.failed_at.is_some());
        assert!(job.completed_at.is_none());
        assert_eq!(job.error.as_deref(), Some("backend exploded"));
    }

    #[test]
    fn test_filter_matches() {
        let mut job = queued_job();
        let filter = JobFilter::active()
            .with_owner("owner-1")
            .with_kind(JobKind::Image);
        assert!(!filter.matches(&job));

        JobUpdate::processing(25, "starting")
            .apply(&mut job, None)
            .unwrap();
        assert!(filter.matches(&job));
        assert!(!filter.clone().with_owner("owner-2").matches(&job));
        assert!(!filter.with_kind(JobKind::Video).matches(&job));
    }
}
