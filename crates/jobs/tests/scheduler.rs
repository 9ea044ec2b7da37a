//! End-to-end scheduling behaviour against in-memory adapters

mod common;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use common::*;
use contentgen_jobs::prelude::*;
use tokio::time::Instant;
use uuid::Uuid;

#[test_log::test(tokio::test(start_paused = true))]
async fn test_owner_ceiling_defers_excess_jobs() {
    let h = Harness::new(
        config().with_limits(JobKind::Image, KindLimits::new(4, 2)),
        FakeBackend::new(Duration::from_secs(30)),
    );

    let mut jobs = Vec::new();
    for i in 0..4 {
        jobs.push(h.submit_image("u1", &format!("fox {i}")).await);
    }

    let summary = h.poll(JobKind::Image).await;
    assert_eq!(summary.received, 4);
    assert_eq!(summary.started, 2);
    assert_eq!(summary.deferred, 2);
    assert_eq!(h.count_status(&jobs, JobStatus::Processing), 2);
    assert_eq!(h.count_status(&jobs, JobStatus::Queued), 2);

    // Receive order decides who starts
    assert_eq!(h.status(jobs[0].id), JobStatus::Processing);
    assert_eq!(h.status(jobs[1].id), JobStatus::Processing);

    h.scheduler.wait_idle().await;
    assert_eq!(h.count_status(&jobs, JobStatus::Completed), 2);
    assert_eq!(h.count_status(&jobs, JobStatus::Queued), 2);

    // Deferred messages come back once their visibility lapses
    tokio::time::advance(VISIBILITY).await;
    let summary = h.poll(JobKind::Image).await;
    assert_eq!(summary.started, 2);

    h.scheduler.wait_idle().await;
    assert_eq!(h.count_status(&jobs, JobStatus::Completed), 4);
    assert_eq!(h.backend.peak_for("u1"), 2);
    assert_eq!(h.queue.len(IMAGES), 0);

    for job in &jobs {
        assert_eq!(
            h.store.status_path(job.id),
            vec![JobStatus::Queued, JobStatus::Processing, JobStatus::Completed]
        );
        assert!(h.sink.get(job.id).is_some());
    }
}

#[test_log::test(tokio::test(start_paused = true))]
async fn test_worker_ceiling_limits_receive_batch() {
    let h = Harness::new(
        config().with_limits(JobKind::Image, KindLimits::new(2, 2)),
        FakeBackend::new(Duration::from_secs(30)),
    );
    for owner in ["u1", "u2", "u3"] {
        h.submit_image(owner, "a lighthouse").await;
    }

    let summary = h.poll(JobKind::Image).await;
    assert_eq!(summary.received, 2);
    assert_eq!(summary.started, 2);
    assert_eq!(h.scheduler.active_jobs().count(JobKind::Image), 2);

    // No capacity left, so nothing is even received
    let summary = h.poll(JobKind::Image).await;
    assert_eq!(summary, PollSummary::default());
    assert_eq!(h.queue.visible_len(IMAGES), 1);

    h.scheduler.wait_idle().await;
    assert_eq!(h.scheduler.active_jobs().count(JobKind::Image), 0);

    let summary = h.poll(JobKind::Image).await;
    assert_eq!(summary.started, 1);
    h.scheduler.wait_idle().await;
    assert_eq!(h.backend.peak_total(), 2);
}

#[test_log::test(tokio::test(start_paused = true))]
async fn test_external_cancel_aborts_within_one_heartbeat() {
    let h = Harness::new(config(), FakeBackend::new(Duration::from_secs(600)));
    let job = h.submit_video("u1", "waves at sunrise").await;

    let summary = h.poll(JobKind::Video).await;
    assert_eq!(summary.started, 1);

    tokio::time::sleep(Duration::from_secs(15)).await;
    let cancelled_at = Instant::now();
    h.store
        .update(job.id, JobUpdate::cancelled(), None)
        .await
        .unwrap();

    h.scheduler.wait_idle().await;
    assert!(cancelled_at.elapsed() <= HEARTBEAT);

    assert_eq!(
        h.store.status_path(job.id),
        vec![JobStatus::Queued, JobStatus::Processing, JobStatus::Cancelled]
    );
    assert!(h.sink.get(job.id).is_none());
    assert_eq!(h.queue.len(VIDEOS), 0);
}

#[test_log::test(tokio::test(start_paused = true))]
async fn test_cancel_before_start_skips_backend() {
    let h = Harness::new(config(), FakeBackend::new(Duration::from_secs(5)));
    let job = h.submit_image("u1", "a red fox").await;
    h.store
        .update(job.id, JobUpdate::cancelled(), None)
        .await
        .unwrap();

    let summary = h.poll(JobKind::Image).await;
    assert_eq!(summary.discarded, 1);
    assert_eq!(h.backend.calls(), 0);
    assert_eq!(
        h.store.status_path(job.id),
        vec![JobStatus::Queued, JobStatus::Cancelled]
    );
    assert_eq!(h.queue.len(IMAGES), 0);
}

#[test_log::test(tokio::test(start_paused = true))]
async fn test_generation_error_fails_job_and_deletes_message() {
    let h = Harness::new(config(), FakeBackend::new(Duration::from_secs(5)));
    let job = h.submit_image("u1", "please fail").await;

    h.poll(JobKind::Image).await;
    h.scheduler.wait_idle().await;

    let stored = h.store.snapshot(job.id).unwrap();
    assert_eq!(stored.status, JobStatus::Failed);
    assert_eq!(stored.progress, 0);
    assert!(stored.error.unwrap().contains("CUDA out of memory"));
    assert!(stored.failed_at.is_some());
    assert_eq!(
        h.store.status_path(job.id),
        vec![JobStatus::Queued, JobStatus::Processing, JobStatus::Failed]
    );
    assert_eq!(h.queue.len(IMAGES), 0);
}

#[test_log::test(tokio::test(start_paused = true))]
async fn test_store_failure_after_success_leaves_message() {
    let h = Harness::new(config(), FakeBackend::new(Duration::from_secs(5)));
    let job = h.submit_image("u1", "a red fox").await;
    h.store.fail_updates_to(JobStatus::Completed);

    h.poll(JobKind::Image).await;
    h.scheduler.wait_idle().await;

    assert_ne!(h.status(job.id), JobStatus::Completed);
    assert_eq!(h.queue.len(IMAGES), 1);
    assert_eq!(h.queue.visible_len(IMAGES), 0);

    tokio::time::advance(VISIBILITY).await;
    assert_eq!(h.queue.visible_len(IMAGES), 1);

    // Redelivery finds the job settled and drops the message
    h.store.heal();
    let summary = h.poll(JobKind::Image).await;
    assert_eq!(summary.received, 1);
    assert_eq!(summary.discarded, 1);
    assert_eq!(h.queue.len(IMAGES), 0);
    assert_eq!(h.backend.calls(), 1);
}

#[test_log::test(tokio::test(start_paused = true))]
async fn test_progress_is_monotonic_while_processing() {
    let h = Harness::new(config(), FakeBackend::new(Duration::from_secs(45)));
    let job = h.submit_video("u1", "timelapse of a city").await;

    h.poll(JobKind::Video).await;
    h.scheduler.wait_idle().await;

    let history = h.store.history(job.id);
    let processing: Vec<u8> = history
        .iter()
        .filter(|(status, _)| *status == JobStatus::Processing)
        .map(|(_, progress)| *progress)
        .collect();

    assert_eq!(processing, vec![25, 30, 35, 40, 45]);
    assert!(processing.windows(2).all(|w| w[0] <= w[1]));
    assert_eq!(history.last(), Some(&(JobStatus::Completed, 100)));

    let stored = h.store.snapshot(job.id).unwrap();
    assert_eq!(stored.message.as_deref(), Some("Completed"));
    assert_eq!(
        stored.result.unwrap()["assetUrl"],
        format!("https://cdn.test/{}.mp4", job.id)
    );
}

#[test_log::test(tokio::test(start_paused = true))]
async fn test_long_job_keeps_message_invisible() {
    // Generation outlasts the visibility timeout several times over
    let h = Harness::new(config(), FakeBackend::new(VISIBILITY * 3));
    h.submit_video("u1", "a slow render").await;

    h.poll(JobKind::Video).await;
    tokio::time::sleep(VISIBILITY * 2).await;
    assert_eq!(h.queue.visible_len(VIDEOS), 0);

    h.scheduler.wait_idle().await;
    assert_eq!(h.queue.len(VIDEOS), 0);
    assert_eq!(h.backend.calls(), 1);
}

#[test_log::test(tokio::test(start_paused = true))]
async fn test_malformed_messages_are_discarded() {
    let h = Harness::new(config(), FakeBackend::new(Duration::from_secs(5)));

    h.queue
        .send(IMAGES, "not json at all".to_string())
        .await
        .unwrap();
    let video = QueueMessage {
        job_id: uuid::Uuid::now_v7(),
        owner_id: "u1".to_string(),
        request: GenerationRequest::Video(VideoPayload::new("waves")),
    };
    h.queue
        .send(IMAGES, video.to_body().unwrap())
        .await
        .unwrap();

    let summary = h.poll(JobKind::Image).await;
    assert_eq!(summary.received, 2);
    assert_eq!(summary.discarded, 2);
    assert!(h.store.is_empty());
    assert_eq!(h.queue.len(IMAGES), 0);
    assert_eq!(h.backend.calls(), 0);
}

#[test_log::test(tokio::test(start_paused = true))]
async fn test_message_without_job_record_is_discarded() {
    let h = Harness::new(config(), FakeBackend::new(Duration::from_secs(5)));
    let orphan = QueueMessage {
        job_id: uuid::Uuid::now_v7(),
        owner_id: "u1".to_string(),
        request: GenerationRequest::Image(ImagePayload::new("ghost")),
    };
    h.queue
        .send(IMAGES, orphan.to_body().unwrap())
        .await
        .unwrap();

    let summary = h.poll(JobKind::Image).await;
    assert_eq!(summary.discarded, 1);
    assert!(h.store.is_empty());
    assert_eq!(h.queue.len(IMAGES), 0);
}

#[test_log::test(tokio::test(start_paused = true))]
async fn test_duplicate_delivery_does_not_rerun_job() {
    let h = Harness::new(config(), FakeBackend::new(Duration::from_secs(5)));
    let job = h.submit_image("u1", "a red fox").await;

    h.poll(JobKind::Image).await;
    h.scheduler.wait_idle().await;
    assert_eq!(h.status(job.id), JobStatus::Completed);

    h.queue
        .send(IMAGES, QueueMessage::for_job(&job).to_body().unwrap())
        .await
        .unwrap();
    let summary = h.poll(JobKind::Image).await;

    assert_eq!(summary.discarded, 1);
    assert_eq!(h.backend.calls(), 1);
    assert_eq!(h.status(job.id), JobStatus::Completed);
}

#[test_log::test(tokio::test(start_paused = true))]
async fn test_invalid_payload_fails_without_backend_call() {
    let h = Harness::new(config(), FakeBackend::new(Duration::from_secs(5)));

    // Bypass the submitter's validation, as an older enqueuer might
    let mut image = ImagePayload::new("a red fox");
    image.width = 8192;
    let job = Job::new("u1", GenerationRequest::Image(image));
    h.store.insert(job.clone()).await.unwrap();
    h.queue
        .send(IMAGES, QueueMessage::for_job(&job).to_body().unwrap())
        .await
        .unwrap();

    h.poll(JobKind::Image).await;
    h.scheduler.wait_idle().await;

    let stored = h.store.snapshot(job.id).unwrap();
    assert_eq!(stored.status, JobStatus::Failed);
    assert!(stored.error.unwrap().contains("width"));
    assert_eq!(h.backend.calls(), 0);
    assert_eq!(h.queue.len(IMAGES), 0);
}

#[test_log::test(tokio::test(start_paused = true))]
async fn test_transport_outage_is_not_fatal() {
    let h = Harness::new(config(), FakeBackend::new(Duration::from_secs(5)));
    let job = h.submit_image("u1", "a red fox").await;

    h.queue.set_unavailable(true);
    let summaries = h.scheduler.poll_once().await;
    assert_eq!(summaries.len(), 3);
    assert!(summaries.iter().all(|(_, s)| s.received == 0));
    assert_eq!(h.status(job.id), JobStatus::Queued);

    h.queue.set_unavailable(false);
    assert_eq!(h.poll(JobKind::Image).await.started, 1);
    h.scheduler.wait_idle().await;
    assert_eq!(h.status(job.id), JobStatus::Completed);
}

#[test_log::test(tokio::test(start_paused = true))]
async fn test_kinds_are_polled_independently() {
    let h = Harness::new(config(), FakeBackend::new(Duration::from_secs(5)));
    let image = h.submit_image("u1", "a red fox").await;
    let video = h.submit_video("u1", "waves").await;
    let article = h
        .submitter
        .submit(
            "u1",
            GenerationRequest::Article(ArticlePayload::topic("Rust at scale")),
        )
        .await
        .unwrap();

    let summaries = h.scheduler.poll_once().await;
    let kinds: Vec<JobKind> = summaries.iter().map(|(k, _)| *k).collect();
    assert_eq!(kinds, vec![JobKind::Article, JobKind::Image, JobKind::Video]);
    assert!(summaries.iter().all(|(_, s)| s.started == 1));

    h.scheduler.wait_idle().await;
    for job in [&image, &video, &article] {
        assert_eq!(h.status(job.id), JobStatus::Completed);
    }
    assert_eq!(
        h.sink.get(article.id).unwrap().content.as_deref(),
        Some("# Generated")
    );
}

#[test_log::test(tokio::test(start_paused = true))]
async fn test_run_drains_in_flight_jobs_on_shutdown() {
    let h = Harness::new(config(), FakeBackend::new(Duration::from_secs(20)));
    let job = h.submit_image("u1", "a red fox").await;

    let scheduler = h.scheduler.clone();
    let handle = tokio::spawn(async move { scheduler.run().await });

    // Let the first cycle start the job
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(h.status(job.id), JobStatus::Processing);

    h.scheduler.shutdown();
    handle.await.unwrap();

    assert_eq!(h.status(job.id), JobStatus::Completed);
    assert_eq!(h.queue.len(IMAGES), 0);
}

#[test_log::test(tokio::test(start_paused = true))]
async fn test_shutdown_timeout_leaves_job_processing() {
    let h = Harness::new(
        config().with_shutdown_timeout(Duration::from_secs(5)),
        FakeBackend::new(Duration::from_secs(600)),
    );
    let job = h.submit_video("u1", "an endless render").await;

    let scheduler = h.scheduler.clone();
    let handle = tokio::spawn(async move { scheduler.run().await });
    tokio::time::sleep(Duration::from_millis(500)).await;

    h.scheduler.shutdown();
    handle.await.unwrap();

    assert_eq!(h.status(job.id), JobStatus::Processing);
    assert_eq!(h.queue.len(VIDEOS), 1);
}

#[test_log::test(tokio::test(start_paused = true))]
async fn test_zero_heartbeat_interval_still_completes() {
    let h = Harness::new(
        config().with_heartbeat_interval(Duration::ZERO),
        FakeBackend::new(Duration::from_secs(1)),
    );
    let job = h.submit_image("u1", "a fox in snow").await;

    let summary = h.poll(JobKind::Image).await;
    assert_eq!(summary.started, 1);

    h.scheduler.wait_idle().await;
    assert_eq!(h.status(job.id), JobStatus::Completed);
    assert_eq!(h.queue.len(IMAGES), 0);
    assert_eq!(h.backend.calls(), 1);
    assert_eq!(h.scheduler.active_jobs().total(), 0);
}

/// Store whose records can no longer be decoded
struct UndecodableStore {
    inner: Arc<InMemoryJobStore>,
}

#[async_trait]
impl JobStore for UndecodableStore {
    async fn insert(&self, job: Job) -> Result<(), StoreError> {
        self.inner.insert(job).await
    }

    async fn get(&self, _job_id: Uuid) -> Result<Job, StoreError> {
        Err(StoreError::Serialization("unknown kind \"audio\"".to_string()))
    }

    async fn update(
        &self,
        job_id: Uuid,
        update: JobUpdate,
        expected_status: Option<JobStatus>,
    ) -> Result<Job, StoreError> {
        self.inner.update(job_id, update, expected_status).await
    }

    async fn count(&self, filter: &JobFilter) -> Result<u64, StoreError> {
        self.inner.count(filter).await
    }
}

#[test_log::test(tokio::test(start_paused = true))]
async fn test_undecodable_record_discards_message() {
    let h = Harness::new(config(), FakeBackend::new(Duration::from_secs(1)));
    let job = h.submit_image("u1", "a fox").await;

    let scheduler = Scheduler::new(
        h.queue.clone(),
        Arc::new(UndecodableStore {
            inner: h.store.clone(),
        }),
        h.backend.clone(),
        h.sink.clone(),
        config(),
    );

    let summary = scheduler
        .poll_once()
        .await
        .into_iter()
        .find(|(kind, _)| *kind == JobKind::Image)
        .map(|(_, summary)| summary)
        .unwrap_or_default();
    assert_eq!(summary.received, 1);
    assert_eq!(summary.deferred, 0);
    assert_eq!(summary.discarded, 1);
    assert_eq!(h.queue.len(IMAGES), 0);
    assert_eq!(h.backend.calls(), 0);
    assert_eq!(h.status(job.id), JobStatus::Queued);

    // Nothing comes back after the visibility window
    tokio::time::advance(VISIBILITY).await;
    let summaries = scheduler.poll_once().await;
    assert!(summaries.iter().all(|(_, summary)| summary.received == 0));
}

#[test_log::test(tokio::test(start_paused = true))]
async fn test_message_for_record_of_other_kind_is_discarded() {
    let h = Harness::new(config(), FakeBackend::new(Duration::from_secs(1)));
    let video = Job::new("u1", GenerationRequest::Video(VideoPayload::new("waves")));
    h.store.insert(video.clone()).await.unwrap();

    // Body claims an image job, so it parses on the image queue
    let body = QueueMessage {
        job_id: video.id,
        owner_id: "u1".to_string(),
        request: GenerationRequest::Image(ImagePayload::new("waves")),
    }
    .to_body()
    .unwrap();
    h.queue.send(IMAGES, body).await.unwrap();

    let summary = h.poll(JobKind::Image).await;
    assert_eq!(summary.received, 1);
    assert_eq!(summary.started, 0);
    assert_eq!(summary.discarded, 1);
    assert_eq!(h.queue.len(IMAGES), 0);
    assert_eq!(h.status(video.id), JobStatus::Queued);
    assert_eq!(h.backend.calls(), 0);
    assert_eq!(h.scheduler.active_jobs().count(JobKind::Image), 0);
}
