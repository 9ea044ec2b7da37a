//! Job processor: drives one admitted job to a terminal status
//!
//! ```text
//! queued ──begin──▶ processing ──▶ completed
//!    │                  │
//!    │                  ├────────▶ failed
//!    └──────────────────┴────────▶ cancelled (written externally)
//! ```
//!
//! The processor only reports an outcome once the terminal status is durably
//! written. The caller deletes the queue message on `Ok` and leaves it on
//! `Err`.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use super::config::ProcessorConfig;
use super::heartbeat::{Heartbeat, HeartbeatExit};
use crate::generation::{GenerationClient, GenerationError, GenerationOutput, ResultSink};
use crate::job::{Job, JobStatus};
use crate::persistence::{JobStore, JobUpdate, StoreError};
use crate::queue::{QueueTransport, RawMessage};

/// How a job attempt ended; every variant permits deleting the message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    Completed,
    Failed,
    Cancelled,

    /// Another writer moved the job to this terminal status first
    Superseded(JobStatus),
}

/// Result of trying to move a job into `processing`
#[derive(Debug, Clone, PartialEq)]
pub enum BeginOutcome {
    /// This worker owns the job now
    Started(Job),

    /// The job was no longer queued (another worker or an external cancel won)
    Lost(JobStatus),
}

/// Processing errors; the queue message must be left for redelivery
#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Generation succeeded but the result could not be recorded durably
    #[error("result for job {job_id} not recorded: {reason}")]
    ResultNotRecorded { job_id: Uuid, reason: String },
}

/// Drives jobs through their state machine
pub struct JobProcessor {
    store: Arc<dyn JobStore>,
    queue: Arc<dyn QueueTransport>,
    generator: Arc<dyn GenerationClient>,
    sink: Arc<dyn ResultSink>,
    config: ProcessorConfig,
}

impl JobProcessor {
    pub fn new(
        store: Arc<dyn JobStore>,
        queue: Arc<dyn QueueTransport>,
        generator: Arc<dyn GenerationClient>,
        sink: Arc<dyn ResultSink>,
        config: ProcessorConfig,
    ) -> Self {
        Self {
            store,
            queue,
            generator,
            sink,
            config,
        }
    }

    pub fn config(&self) -> &ProcessorConfig {
        &self.config
    }

    /// Conditionally move a queued job into `processing`
    #[instrument(skip(self, job), fields(job_id = %job.id, kind = %job.kind()))]
    pub async fn begin(&self, job: &Job) -> Result<BeginOutcome, ProcessError> {
        let update = JobUpdate::processing(
            self.config.progress.start,
            format!("Starting {} generation", job.kind()),
        );

        match self
            .store
            .update(job.id, update, Some(JobStatus::Queued))
            .await
        {
            Ok(job) => Ok(BeginOutcome::Started(job)),
            Err(StoreError::Conflict { actual, .. }) => {
                info!(status = %actual, "Job no longer queued, skipping");
                Ok(BeginOutcome::Lost(actual))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Run a started job to a terminal status
    ///
    /// `message` is the delivery that triggered the job; its visibility is
    /// extended on every heartbeat.
    #[instrument(
        skip(self, job, message),
        fields(job_id = %job.id, owner_id = %job.owner_id, kind = %job.kind())
    )]
    pub async fn run(
        &self,
        job: Job,
        queue_name: &str,
        message: &RawMessage,
    ) -> Result<JobOutcome, ProcessError> {
        if let Err(e) = job.request.validate() {
            warn!("Rejecting invalid payload: {}", e);
            return self.fail(&job, &GenerationError::InvalidRequest(e)).await;
        }

        let abort = CancellationToken::new();
        let done = CancellationToken::new();
        let heartbeat = Heartbeat {
            store: Arc::clone(&self.store),
            queue: Arc::clone(&self.queue),
            queue_name: queue_name.to_string(),
            message: message.clone(),
            job_id: job.id,
            kind: job.kind(),
            config: self.config.clone(),
        };

        let generate = async {
            let result = self
                .generator
                .generate(&job.request, job.id, &job.owner_id, &abort)
                .await;
            done.cancel();
            result
        };
        let (result, heartbeat_exit) = tokio::join!(generate, heartbeat.run(&abort, &done));

        if heartbeat_exit == HeartbeatExit::CancelDetected
            || matches!(result, Err(GenerationError::Aborted))
        {
            info!("Job cancelled during generation");
            return Ok(JobOutcome::Cancelled);
        }

        // The store wins over whatever the backend returned
        match self.store.get(job.id).await {
            Ok(current) if current.status == JobStatus::Cancelled => {
                info!("Job cancelled while generation was finishing");
                return Ok(JobOutcome::Cancelled);
            }
            Ok(_) => {}
            Err(e) => warn!("Post-generation read failed: {}", e),
        }

        match result {
            Ok(output) => self.complete(&job, &output).await,
            Err(e) => self.fail(&job, &e).await,
        }
    }

    async fn fail(&self, job: &Job, cause: &GenerationError) -> Result<JobOutcome, ProcessError> {
        warn!(job_id = %job.id, "Generation failed: {}", cause);
        match self
            .store
            .update(
                job.id,
                JobUpdate::failed(cause.to_string()),
                Some(JobStatus::Processing),
            )
            .await
        {
            Ok(_) => Ok(JobOutcome::Failed),
            Err(StoreError::Conflict { actual, .. }) => Ok(settled(actual)),
            Err(e) => {
                error!(job_id = %job.id, "Failed to record job failure: {}", e);
                Err(e.into())
            }
        }
    }

    async fn complete(
        &self,
        job: &Job,
        output: &GenerationOutput,
    ) -> Result<JobOutcome, ProcessError> {
        let reference = match self.sink.persist(job, output).await {
            Ok(reference) => reference,
            Err(e) => return self.not_recorded(job, format!("result sink write failed: {e}")).await,
        };

        match self
            .store
            .update(
                job.id,
                JobUpdate::completed(reference),
                Some(JobStatus::Processing),
            )
            .await
        {
            Ok(_) => {
                info!(job_id = %job.id, "Job completed");
                Ok(JobOutcome::Completed)
            }
            Err(StoreError::Conflict { actual, .. }) => Ok(settled(actual)),
            Err(e) => self.not_recorded(job, format!("completion write failed: {e}")).await,
        }
    }

    /// Best-effort `failed` write after the result could not be recorded
    async fn not_recorded(&self, job: &Job, reason: String) -> Result<JobOutcome, ProcessError> {
        error!(job_id = %job.id, %reason, "Generated result not recorded, leaving message for redelivery");
        if let Err(e) = self
            .store
            .update(
                job.id,
                JobUpdate::failed(format!("Generated content could not be saved: {reason}")),
                Some(JobStatus::Processing),
            )
            .await
        {
            error!(job_id = %job.id, "Failed to mark job failed: {}", e);
        }
        Err(ProcessError::ResultNotRecorded {
            job_id: job.id,
            reason,
        })
    }
}

/// Outcome when a conditional terminal write finds the job already moved on
fn settled(actual: JobStatus) -> JobOutcome {
    match actual {
        JobStatus::Cancelled => JobOutcome::Cancelled,
        status => {
            warn!(%status, "Job already settled by another writer");
            JobOutcome::Superseded(status)
        }
    }
}
