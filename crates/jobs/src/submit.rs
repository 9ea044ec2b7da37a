//! Enqueuer side: create the job record, then announce it on the queue

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{error, info, instrument};

use crate::job::{GenerationRequest, Job, JobKind, PayloadError, QueueMessage};
use crate::persistence::{JobStore, JobUpdate, StoreError};
use crate::queue::{QueueError, QueueTransport};

#[derive(Debug, thiserror::Error)]
pub enum SubmitError {
    #[error("invalid request: {0}")]
    Invalid(#[from] PayloadError),

    #[error("no queue configured for {0} jobs")]
    NoQueue(JobKind),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("failed to encode message: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Creates queued jobs
///
/// The record is written before the message is sent, so a worker never
/// receives a message for a job it cannot read.
pub struct JobSubmitter {
    store: Arc<dyn JobStore>,
    queue: Arc<dyn QueueTransport>,
    queues: HashMap<JobKind, String>,
}

impl JobSubmitter {
    pub fn new(
        store: Arc<dyn JobStore>,
        queue: Arc<dyn QueueTransport>,
        queues: HashMap<JobKind, String>,
    ) -> Self {
        Self {
            store,
            queue,
            queues,
        }
    }

    /// Validate, insert and enqueue a new job
    #[instrument(skip_all, fields(%owner_id, kind = %request.kind()))]
    pub async fn submit(
        &self,
        owner_id: &str,
        request: GenerationRequest,
    ) -> Result<Job, SubmitError> {
        request.validate()?;
        let queue_name = self
            .queues
            .get(&request.kind())
            .ok_or(SubmitError::NoQueue(request.kind()))?;

        let job = Job::new(owner_id, request);
        let body = QueueMessage::for_job(&job).to_body()?;
        self.store.insert(job.clone()).await?;

        if let Err(e) = self.queue.send(queue_name, body).await {
            error!(job_id = %job.id, "Failed to enqueue job: {}", e);
            // Nothing will ever pick it up; settle it rather than leave it queued
            let mut update = JobUpdate::cancelled();
            update.message = Some("Enqueue failed".to_string());
            if let Err(e) = self.store.update(job.id, update, None).await {
                error!(job_id = %job.id, "Failed to cancel unqueued job: {}", e);
            }
            return Err(e.into());
        }

        info!(job_id = %job.id, queue = %queue_name, "Job submitted");
        Ok(job)
    }
}
