//! Admission control
//!
//! Decides, per received message, whether the job may start now. Counts come
//! from live store queries so every worker instance sees the same numbers.

use std::sync::Arc;

use tracing::{debug, instrument, warn};
use uuid::Uuid;

use super::config::ConcurrencyLimits;
use crate::job::{Job, JobKind, JobStatus};
use crate::persistence::{JobFilter, JobStore, StoreError};

/// Why a job has to wait
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeferReason {
    /// The owner already has `active` jobs of this kind processing
    OwnerLimit { active: u64, limit: usize },

    /// The kind as a whole is at its ceiling
    WorkerLimit { active: u64, limit: usize },
}

impl std::fmt::Display for DeferReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::OwnerLimit { active, limit } => {
                write!(f, "owner has {active} active jobs (limit {limit})")
            }
            Self::WorkerLimit { active, limit } => {
                write!(f, "{active} active jobs of this kind (limit {limit})")
            }
        }
    }
}

/// Result of an admission check
#[derive(Debug, Clone, PartialEq)]
pub enum AdmissionDecision {
    /// Start now; carries the record as read from the store
    Admitted(Job),

    /// Leave the message for a later cycle
    Deferred(DeferReason),

    /// Cancelled before it ever ran; delete the message
    AlreadyCancelled,

    /// Already processing or finished elsewhere; delete the message
    AlreadyHandled(JobStatus),

    /// No record for this id; delete the message
    Missing,

    /// The record is of another kind than the queue it arrived on; delete the message
    WrongKind(JobKind),
}

impl AdmissionDecision {
    /// Whether the message should be deleted without processing
    pub fn discards_message(&self) -> bool {
        matches!(
            self,
            Self::AlreadyCancelled | Self::AlreadyHandled(_) | Self::Missing | Self::WrongKind(_)
        )
    }
}

/// Per-owner and per-kind admission control
pub struct AdmissionController {
    store: Arc<dyn JobStore>,
    limits: ConcurrencyLimits,
}

impl AdmissionController {
    pub fn new(store: Arc<dyn JobStore>, limits: ConcurrencyLimits) -> Self {
        Self { store, limits }
    }

    pub fn limits(&self) -> &ConcurrencyLimits {
        &self.limits
    }

    /// Check whether the job may start now
    ///
    /// Limits and counts follow the stored kind. Store errors are returned
    /// as-is for the caller to classify.
    #[instrument(skip_all, fields(%job_id, %owner_id, %kind))]
    pub async fn try_admit(
        &self,
        job_id: Uuid,
        owner_id: &str,
        kind: JobKind,
    ) -> Result<AdmissionDecision, StoreError> {
        let job = match self.store.get(job_id).await {
            Ok(job) => job,
            Err(StoreError::JobNotFound(_)) => {
                warn!("Job record not found");
                return Ok(AdmissionDecision::Missing);
            }
            Err(e) => return Err(e),
        };

        if job.kind() != kind {
            warn!(stored_kind = %job.kind(), "Job record kind differs from its queue");
            return Ok(AdmissionDecision::WrongKind(job.kind()));
        }

        match job.status {
            JobStatus::Queued => {}
            JobStatus::Cancelled => return Ok(AdmissionDecision::AlreadyCancelled),
            status => return Ok(AdmissionDecision::AlreadyHandled(status)),
        }

        if job.owner_id != owner_id {
            warn!(stored_owner = %job.owner_id, "Message owner differs from job record");
        }

        let limits = self.limits.for_kind(kind);
        let filter = JobFilter::active().with_kind(kind);

        let owner_active = self
            .store
            .count(&filter.clone().with_owner(job.owner_id.as_str()))
            .await?;
        if owner_active >= limits.max_per_owner as u64 {
            let reason = DeferReason::OwnerLimit {
                active: owner_active,
                limit: limits.max_per_owner,
            };
            debug!(%reason, "Deferring job");
            return Ok(AdmissionDecision::Deferred(reason));
        }

        let kind_active = self.store.count(&filter).await?;
        if kind_active >= limits.max_concurrent as u64 {
            let reason = DeferReason::WorkerLimit {
                active: kind_active,
                limit: limits.max_concurrent,
            };
            debug!(%reason, "Deferring job");
            return Ok(AdmissionDecision::Deferred(reason));
        }

        Ok(AdmissionDecision::Admitted(job))
    }
}
