//! Shared fixtures for scheduler integration tests

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use contentgen_jobs::generation::InMemoryResultSink;
use contentgen_jobs::prelude::*;
use parking_lot::Mutex;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

pub const IMAGES: &str = "image-jobs";
pub const VIDEOS: &str = "video-jobs";
pub const ARTICLES: &str = "article-jobs";
pub const VISIBILITY: Duration = Duration::from_secs(60);
pub const HEARTBEAT: Duration = Duration::from_secs(10);

/// Backend stand-in: sleeps for `delay`, fails prompts containing "fail",
/// and tracks concurrency per owner
pub struct FakeBackend {
    delay: Duration,
    calls: AtomicUsize,
    in_flight: Mutex<HashMap<String, usize>>,
    peak: Mutex<HashMap<String, usize>>,
    peak_total: AtomicUsize,
    total: AtomicUsize,
}

impl FakeBackend {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            calls: AtomicUsize::new(0),
            in_flight: Mutex::new(HashMap::new()),
            peak: Mutex::new(HashMap::new()),
            peak_total: AtomicUsize::new(0),
            total: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Highest number of concurrent calls seen for one owner
    pub fn peak_for(&self, owner_id: &str) -> usize {
        self.peak.lock().get(owner_id).copied().unwrap_or(0)
    }

    pub fn peak_total(&self) -> usize {
        self.peak_total.load(Ordering::SeqCst)
    }

    fn enter(&self, owner_id: &str) {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let total = self.total.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_total.fetch_max(total, Ordering::SeqCst);

        let mut in_flight = self.in_flight.lock();
        let current = in_flight.entry(owner_id.to_string()).or_default();
        *current += 1;
        let mut peak = self.peak.lock();
        let best = peak.entry(owner_id.to_string()).or_default();
        *best = (*best).max(*current);
    }

    fn exit(&self, owner_id: &str) {
        self.total.fetch_sub(1, Ordering::SeqCst);
        if let Some(current) = self.in_flight.lock().get_mut(owner_id) {
            *current -= 1;
        }
    }
}

fn prompt_of(request: &GenerationRequest) -> String {
    match request {
        GenerationRequest::Article(a) => a.topic.clone().unwrap_or_default(),
        GenerationRequest::Image(i) => i.prompt.clone(),
        GenerationRequest::Video(v) => v.prompt.clone(),
    }
}

#[async_trait]
impl GenerationClient for FakeBackend {
    async fn generate(
        &self,
        request: &GenerationRequest,
        job_id: Uuid,
        owner_id: &str,
        cancel: &CancellationToken,
    ) -> Result<GenerationOutput, GenerationError> {
        self.enter(owner_id);
        let result = tokio::select! {
            _ = cancel.cancelled() => Err(GenerationError::Aborted),
            _ = tokio::time::sleep(self.delay) => {
                if prompt_of(request).contains("fail") {
                    Err(GenerationError::Backend {
                        status: 500,
                        message: "CUDA out of memory".to_string(),
                    })
                } else {
                    Ok(GenerationOutput::new(match request.kind() {
                        JobKind::Article => json!({"success": true, "content": "# Generated"}),
                        JobKind::Image => json!({"success": true, "image_url": format!("https://cdn.test/{job_id}.png")}),
                        JobKind::Video => json!({"success": true, "video_url": format!("https://cdn.test/{job_id}.mp4")}),
                    }))
                }
            }
        };
        self.exit(owner_id);
        result
    }
}

pub struct Harness {
    pub store: Arc<InMemoryJobStore>,
    pub queue: Arc<InMemoryQueue>,
    pub sink: Arc<InMemoryResultSink>,
    pub backend: Arc<FakeBackend>,
    pub scheduler: Arc<Scheduler>,
    pub submitter: JobSubmitter,
}

pub fn config() -> SchedulerConfig {
    SchedulerConfig::new()
        .with_worker_id("test-worker")
        .with_queue(JobKind::Article, ARTICLES)
        .with_queue(JobKind::Image, IMAGES)
        .with_queue(JobKind::Video, VIDEOS)
        .with_poll_interval(Duration::from_secs(1))
        .with_long_poll_wait(Duration::ZERO)
        .with_visibility_timeout(VISIBILITY)
        .with_heartbeat_interval(HEARTBEAT)
}

impl Harness {
    pub fn new(config: SchedulerConfig, backend: FakeBackend) -> Self {
        let store = Arc::new(InMemoryJobStore::new());
        let queue = Arc::new(InMemoryQueue::new());
        let sink = Arc::new(InMemoryResultSink::new());
        let backend = Arc::new(backend);

        let submitter = JobSubmitter::new(store.clone(), queue.clone(), config.queues.clone());
        let scheduler = Arc::new(Scheduler::new(
            queue.clone(),
            store.clone(),
            backend.clone(),
            sink.clone(),
            config,
        ));

        Self {
            store,
            queue,
            sink,
            backend,
            scheduler,
            submitter,
        }
    }

    pub async fn submit_image(&self, owner_id: &str, prompt: &str) -> Job {
        self.submitter
            .submit(owner_id, GenerationRequest::Image(ImagePayload::new(prompt)))
            .await
            .unwrap()
    }

    pub async fn submit_video(&self, owner_id: &str, prompt: &str) -> Job {
        self.submitter
            .submit(owner_id, GenerationRequest::Video(VideoPayload::new(prompt)))
            .await
            .unwrap()
    }

    /// Poll once and return the summary for `kind`
    pub async fn poll(&self, kind: JobKind) -> PollSummary {
        self.scheduler
            .poll_once()
            .await
            .into_iter()
            .find(|(k, _)| *k == kind)
            .map(|(_, summary)| summary)
            .unwrap_or_default()
    }

    pub fn status(&self, job_id: Uuid) -> JobStatus {
        self.store.snapshot(job_id).unwrap().status
    }

    pub fn count_status(&self, jobs: &[Job], status: JobStatus) -> usize {
        jobs.iter().filter(|j| self.status(j.id) == status).count()
    }
}
