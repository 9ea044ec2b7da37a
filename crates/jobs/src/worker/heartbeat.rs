//! Per-job heartbeat
//!
//! Runs next to the generation call. Every tick it re-reads the job, aborts
//! the call when the job was cancelled externally, advances progress and
//! keeps the queue message invisible.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::config::{ProcessorConfig, MIN_HEARTBEAT_INTERVAL};
use crate::job::{JobKind, JobStatus};
use crate::persistence::{JobStore, JobUpdate, StoreError};
use crate::queue::{QueueTransport, RawMessage};

/// Why the heartbeat stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatExit {
    /// The generation call finished first
    Stopped,

    /// Saw `cancelled` in the store and fired the abort token
    CancelDetected,
}

pub(crate) struct Heartbeat {
    pub store: Arc<dyn JobStore>,
    pub queue: Arc<dyn QueueTransport>,
    pub queue_name: String,
    pub message: RawMessage,
    pub job_id: Uuid,
    pub kind: JobKind,
    pub config: ProcessorConfig,
}

impl Heartbeat {
    /// Tick until `done` fires or a cancellation is detected
    ///
    /// `abort` is fired on cancellation so the in-flight call is dropped.
    pub async fn run(self, abort: &CancellationToken, done: &CancellationToken) -> HeartbeatExit {
        let started = Instant::now();
        let interval = self.config.heartbeat_interval.max(MIN_HEARTBEAT_INTERVAL);
        let mut ticker = tokio::time::interval_at(started + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut progress = self.config.progress.start;

        loop {
            tokio::select! {
                biased;
                _ = done.cancelled() => return HeartbeatExit::Stopped,
                _ = ticker.tick() => {}
            }

            match self.store.get(self.job_id).await {
                Ok(job) if job.status == JobStatus::Cancelled => {
                    info!(job_id = %self.job_id, "Cancellation detected, aborting generation");
                    abort.cancel();
                    return HeartbeatExit::CancelDetected;
                }
                Ok(job) if job.status != JobStatus::Processing => {
                    // Somebody else finished the job; the post-call write sorts it out
                    warn!(job_id = %self.job_id, status = %job.status, "Job left processing during heartbeat");
                }
                Ok(job) => {
                    progress = self.config.progress.next(progress.max(job.progress));
                    let message = progress_message(self.kind, started.elapsed());
                    match self
                        .store
                        .update(
                            self.job_id,
                            JobUpdate::progress(progress, message),
                            Some(JobStatus::Processing),
                        )
                        .await
                    {
                        Ok(_) => debug!(job_id = %self.job_id, progress, "Heartbeat"),
                        // Picked up by the next read
                        Err(StoreError::Conflict { actual, .. }) => {
                            debug!(job_id = %self.job_id, %actual, "Heartbeat write lost a race")
                        }
                        Err(e) => warn!(job_id = %self.job_id, "Heartbeat write failed: {}", e),
                    }
                }
                Err(e) => warn!(job_id = %self.job_id, "Heartbeat read failed: {}", e),
            }

            if let Err(e) = self
                .queue
                .extend_visibility(&self.queue_name, &self.message, self.config.visibility_timeout)
                .await
            {
                warn!(job_id = %self.job_id, "Failed to extend message visibility: {}", e);
            }
        }
    }
}

/// `"Generating image... 1m 30s elapsed"`
pub fn progress_message(kind: JobKind, elapsed: Duration) -> String {
    format!("Generating {kind}... {} elapsed", format_elapsed(elapsed))
}

fn format_elapsed(elapsed: Duration) -> String {
    let secs = elapsed.as_secs();
    let (hours, minutes, seconds) = (secs / 3600, (secs % 3600) / 60, secs % 60);
    match (hours, minutes) {
        (0, 0) => format!("{seconds}s"),
        (0, _) => format!("{minutes}m {seconds}s"),
        _ => format!("{hours}h {minutes}m {seconds}s"),
    }
}
