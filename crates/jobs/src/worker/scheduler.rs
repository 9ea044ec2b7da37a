//! Poll loop
//!
//! One cycle polls every enabled kind concurrently. Within a kind, messages
//! are handled strictly in receive order: parse, admit, `begin` (awaited so
//! the next admission sees it), then the rest of the job runs on a tracked
//! task. Cycles for the same kind never overlap.

use std::collections::HashSet;
use std::sync::Arc;

use dashmap::DashMap;
use futures::future::join_all;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use super::admission::{AdmissionController, AdmissionDecision};
use super::config::{SchedulerConfig, MIN_POLL_INTERVAL};
use super::processor::{BeginOutcome, JobOutcome, JobProcessor};
use crate::generation::{GenerationClient, ResultSink};
use crate::job::{Job, JobKind, QueueMessage};
use crate::persistence::{JobStore, StoreError};
use crate::queue::{QueueError, QueueTransport, RawMessage};

/// What one poll of one kind did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollSummary {
    pub received: usize,
    pub started: usize,

    /// Left on the queue for a later cycle
    pub deferred: usize,

    /// Deleted without processing (malformed, undecodable, cancelled or handled elsewhere)
    pub discarded: usize,
}

/// Jobs running on this worker, per kind
#[derive(Debug, Default)]
pub struct ActiveJobs {
    by_kind: DashMap<JobKind, HashSet<Uuid>>,
}

impl ActiveJobs {
    pub fn count(&self, kind: JobKind) -> usize {
        self.by_kind.get(&kind).map_or(0, |jobs| jobs.len())
    }

    pub fn total(&self) -> usize {
        self.by_kind.iter().map(|entry| entry.value().len()).sum()
    }

    pub fn contains(&self, kind: JobKind, job_id: Uuid) -> bool {
        self.by_kind
            .get(&kind)
            .is_some_and(|jobs| jobs.contains(&job_id))
    }

    fn insert(self: &Arc<Self>, kind: JobKind, job_id: Uuid) -> ActiveGuard {
        self.by_kind.entry(kind).or_default().insert(job_id);
        ActiveGuard {
            jobs: Arc::clone(self),
            kind,
            job_id,
        }
    }
}

/// Removes a job from the active set when its task ends, panics included
struct ActiveGuard {
    jobs: Arc<ActiveJobs>,
    kind: JobKind,
    job_id: Uuid,
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        if let Some(mut jobs) = self.jobs.by_kind.get_mut(&self.kind) {
            jobs.remove(&self.job_id);
        }
    }
}

/// Queue-driven job scheduler
///
/// # Example
///
/// ```ignore
/// use contentgen_jobs::worker::{Scheduler, SchedulerConfig};
///
/// let config = SchedulerConfig::new().with_queue(JobKind::Image, "image-jobs");
/// let scheduler = Scheduler::new(queue, store, generator, sink, config);
///
/// let shutdown = scheduler.shutdown_token();
/// tokio::spawn(async move {
///     tokio::signal::ctrl_c().await.ok();
///     shutdown.cancel();
/// });
///
/// scheduler.run().await;
/// ```
pub struct Scheduler {
    queue: Arc<dyn QueueTransport>,
    admission: AdmissionController,
    processor: Arc<JobProcessor>,
    config: SchedulerConfig,
    active: Arc<ActiveJobs>,
    tracker: TaskTracker,
    shutdown: CancellationToken,
}

impl Scheduler {
    pub fn new(
        queue: Arc<dyn QueueTransport>,
        store: Arc<dyn JobStore>,
        generator: Arc<dyn GenerationClient>,
        sink: Arc<dyn ResultSink>,
        config: SchedulerConfig,
    ) -> Self {
        let processor = JobProcessor::new(
            Arc::clone(&store),
            Arc::clone(&queue),
            generator,
            sink,
            config.processor.clone(),
        );

        Self {
            queue,
            admission: AdmissionController::new(store, config.limits),
            processor: Arc::new(processor),
            config,
            active: Arc::new(ActiveJobs::default()),
            tracker: TaskTracker::new(),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn active_jobs(&self) -> &ActiveJobs {
        &self.active
    }

    /// Token that stops the loop when cancelled
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Stop polling; `run` drains in-flight jobs and returns
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Poll until shutdown, then wait up to `shutdown_timeout` for in-flight jobs
    #[instrument(skip(self), fields(worker_id = %self.config.worker_id))]
    pub async fn run(&self) {
        info!(
            kinds = ?self.config.enabled_kinds(),
            poll_interval_ms = self.config.poll_interval.as_millis() as u64,
            "Starting scheduler"
        );

        while !self.shutdown.is_cancelled() {
            for (kind, summary) in self.poll_once().await {
                if summary.received > 0 {
                    info!(
                        %kind,
                        received = summary.received,
                        started = summary.started,
                        deferred = summary.deferred,
                        discarded = summary.discarded,
                        "Poll cycle"
                    );
                }
            }

            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = tokio::time::sleep(self.config.poll_interval.max(MIN_POLL_INTERVAL)) => {}
            }
        }

        info!(in_flight = self.active.total(), "Shutdown requested, draining jobs");
        self.tracker.close();
        if tokio::time::timeout(self.config.shutdown_timeout, self.tracker.wait())
            .await
            .is_err()
        {
            // Their messages reappear after the visibility timeout
            warn!(
                in_flight = self.active.total(),
                "Shutdown timeout reached with jobs still processing"
            );
        }
        info!("Scheduler stopped");
    }

    /// One poll cycle over every enabled kind
    pub async fn poll_once(&self) -> Vec<(JobKind, PollSummary)> {
        let polls = self
            .config
            .enabled_kinds()
            .into_iter()
            .map(|(kind, queue)| async move { (kind, self.poll_kind(kind, queue).await) });
        join_all(polls).await
    }

    /// Wait until every spawned job has finished
    pub async fn wait_idle(&self) {
        self.tracker.close();
        self.tracker.wait().await;
        self.tracker.reopen();
    }

    #[instrument(skip_all, fields(%kind, queue = queue_name))]
    async fn poll_kind(&self, kind: JobKind, queue_name: &str) -> PollSummary {
        let mut summary = PollSummary::default();

        let ceiling = self.admission.limits().for_kind(kind).max_concurrent;
        let capacity = ceiling.saturating_sub(self.active.count(kind));
        if capacity == 0 {
            debug!("At capacity, skipping poll");
            return summary;
        }

        let messages = match self
            .queue
            .receive(
                queue_name,
                capacity.min(self.config.max_messages_per_poll),
                self.config.long_poll_wait,
                self.config.visibility_timeout(),
            )
            .await
        {
            Ok(messages) => messages,
            Err(e) => {
                warn!("Receive failed: {}", e);
                return summary;
            }
        };
        summary.received = messages.len();

        for message in messages {
            self.handle_message(kind, queue_name, message, &mut summary)
                .await;
        }
        summary
    }

    #[instrument(skip_all, fields(message_id = %message.message_id))]
    async fn handle_message(
        &self,
        kind: JobKind,
        queue_name: &str,
        message: RawMessage,
        summary: &mut PollSummary,
    ) {
        let parsed = match QueueMessage::parse(&message.body, kind) {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!(receive_count = message.receive_count, "Discarding poison message: {}", e);
                self.discard(queue_name, &message, summary).await;
                return;
            }
        };

        let decision = match self
            .admission
            .try_admit(parsed.job_id, &parsed.owner_id, kind)
            .await
        {
            Ok(decision) => decision,
            Err(StoreError::Serialization(e)) => {
                // The record can never be admitted, so redelivery would loop forever
                error!(job_id = %parsed.job_id, "Discarding message for undecodable job record: {}", e);
                self.discard(queue_name, &message, summary).await;
                return;
            }
            Err(e) => {
                warn!(job_id = %parsed.job_id, "Admission check failed: {}", e);
                summary.deferred += 1;
                return;
            }
        };

        match decision {
            AdmissionDecision::Admitted(job) => self.start(job, queue_name, message, summary).await,
            AdmissionDecision::Deferred(reason) => {
                debug!(job_id = %parsed.job_id, %reason, "Job deferred");
                summary.deferred += 1;
            }
            other => {
                info!(job_id = %parsed.job_id, decision = ?other, "Dropping message without processing");
                self.discard(queue_name, &message, summary).await;
            }
        }
    }

    async fn start(&self, job: Job, queue_name: &str, message: RawMessage, summary: &mut PollSummary) {
        let job = match self.processor.begin(&job).await {
            Ok(BeginOutcome::Started(job)) => job,
            Ok(BeginOutcome::Lost(_)) => {
                self.discard(queue_name, &message, summary).await;
                return;
            }
            Err(e) => {
                warn!(job_id = %job.id, "Failed to start job: {}", e);
                summary.deferred += 1;
                return;
            }
        };

        let kind = job.kind();
        let guard = self.active.insert(kind, job.id);
        summary.started += 1;

        let processor = Arc::clone(&self.processor);
        let queue = Arc::clone(&self.queue);
        let queue_name = queue_name.to_string();

        self.tracker.spawn(async move {
            let _guard = guard;
            let job_id = job.id;
            match processor.run(job, &queue_name, &message).await {
                Ok(outcome) => {
                    debug!(%job_id, ?outcome, "Job finished");
                    delete_message(queue.as_ref(), &queue_name, &message, outcome).await;
                }
                Err(e) => {
                    // Leave the message; redelivery settles the job
                    error!(%job_id, "Job not settled, message left for redelivery: {}", e);
                }
            }
        });
    }

    async fn discard(&self, queue_name: &str, message: &RawMessage, summary: &mut PollSummary) {
        summary.discarded += 1;
        if let Err(e) = self.queue.delete(queue_name, message).await {
            warn!(message_id = %message.message_id, "Failed to delete message: {}", e);
        }
    }
}

async fn delete_message(
    queue: &dyn QueueTransport,
    queue_name: &str,
    message: &RawMessage,
    outcome: JobOutcome,
) {
    match queue.delete(queue_name, message).await {
        Ok(()) => {}
        Err(QueueError::ReceiptExpired(id)) => {
            // Redelivered meanwhile; that delivery sees a terminal job and drops it
            warn!(message_id = %id, ?outcome, "Receipt expired before delete");
        }
        Err(e) => warn!(?outcome, "Failed to delete message: {}", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_active_guard_releases_slot() {
        let active = Arc::new(ActiveJobs::default());
        let id = Uuid::now_v7();

        let guard = active.insert(JobKind::Image, id);
        assert_eq!(active.count(JobKind::Image), 1);
        assert!(active.contains(JobKind::Image, id));
        assert_eq!(active.count(JobKind::Video), 0);

        drop(guard);
        assert_eq!(active.count(JobKind::Image), 0);
        assert_eq!(active.total(), 0);
    }
}
