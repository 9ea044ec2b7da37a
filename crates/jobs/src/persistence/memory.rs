//! In-memory implementation of JobStore for testing

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use parking_lot::RwLock;
use uuid::Uuid;

use super::store::*;
use crate::job::{Job, JobStatus};

/// In-memory implementation of JobStore
///
/// Provides the same semantics as the PostgreSQL implementation. Every
/// successful write is appended to a per-job history so tests can assert on
/// the exact sequence of statuses and progress values a job went through.
///
/// # Example
///
/// ```
/// use contentgen_jobs::InMemoryJobStore;
///
/// let store = InMemoryJobStore::new();
/// assert_eq!(store.len(), 0);
/// ```
pub struct InMemoryJobStore {
    jobs: RwLock<HashMap<Uuid, Job>>,
    history: RwLock<HashMap<Uuid, Vec<(JobStatus, u8)>>>,
    failing_transitions: RwLock<HashSet<JobStatus>>,
}

impl InMemoryJobStore {
    /// Create a new in-memory store
    pub fn new() -> Self {
        Self {
            jobs: RwLock::new(HashMap::new()),
            history: RwLock::new(HashMap::new()),
            failing_transitions: RwLock::new(HashSet::new()),
        }
    }

    /// Get the number of jobs
    pub fn len(&self) -> usize {
        self.jobs.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.read().is_empty()
    }

    /// Current record, if any
    pub fn snapshot(&self, job_id: Uuid) -> Option<Job> {
        self.jobs.read().get(&job_id).cloned()
    }

    /// Every `(status, progress)` pair written for a job, oldest first
    pub fn history(&self, job_id: Uuid) -> Vec<(JobStatus, u8)> {
        self.history
            .read()
            .get(&job_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Distinct statuses a job went through, in order
    pub fn status_path(&self, job_id: Uuid) -> Vec<JobStatus> {
        let mut path: Vec<JobStatus> = Vec::new();
        for (status, _) in self.history(job_id) {
            if path.last() != Some(&status) {
                path.push(status);
            }
        }
        path
    }

    /// Make every update that moves a job into `status` fail with a database error
    pub fn fail_updates_to(&self, status: JobStatus) {
        self.failing_transitions.write().insert(status);
    }

    /// Stop injecting failures
    pub fn heal(&self) {
        self.failing_transitions.write().clear();
    }

    fn record(&self, job: &Job) {
        self.history
            .write()
            .entry(job.id)
            .or_default()
            .push((job.status, job.progress));
    }
}

impl Default for InMemoryJobStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn insert(&self, job: Job) -> Result<(), StoreError> {
        let mut jobs = self.jobs.write();
        if jobs.contains_key(&job.id) {
            return Err(StoreError::AlreadyExists(job.id));
        }
        self.record(&job);
        jobs.insert(job.id, job);
        Ok(())
    }

    async fn get(&self, job_id: Uuid) -> Result<Job, StoreError> {
        self.jobs
            .read()
            .get(&job_id)
            .cloned()
            .ok_or(StoreError::JobNotFound(job_id))
    }

    async fn update(
        &self,
        job_id: Uuid,
        update: JobUpdate,
        expected_status: Option<JobStatus>,
    ) -> Result<Job, StoreError> {
        if let Some(status) = update.status {
            if self.failing_transitions.read().contains(&status) {
                return Err(StoreError::Database(format!(
                    "injected failure writing status {status}"
                )));
            }
        }

        let mut jobs = self.jobs.write();
        let job = jobs
            .get_mut(&job_id)
            .ok_or(StoreError::JobNotFound(job_id))?;

        // Apply to a copy so a rejected update leaves the record untouched
        let mut next = job.clone();
        update.apply(&mut next, expected_status)?;
        *job = next.clone();
        self.record(&next);
        Ok(next)
    }

    async fn count(&self, filter: &JobFilter) -> Result<u64, StoreError> {
        Ok(self
            .jobs
            .read()
            .values()
            .filter(|job| filter.matches(job))
            .count() as u64)
    }
}
