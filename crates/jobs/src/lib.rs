//! # Generation Job Engine
//!
//! Queue-driven execution of AI content generation jobs (articles, images,
//! videos) against a slow external backend.
//!
//! ## Features
//!
//! - **Store is the source of truth**: queue messages only trigger work; every
//!   decision re-reads the job record
//! - **Admission control**: per-owner and per-kind ceilings from live store counts
//! - **Heartbeats**: progress updates, cancellation detection and visibility
//!   extension while the backend call runs
//! - **Retry by redelivery**: a message is deleted only after a terminal status
//!   is durably written
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        Scheduler                            │
//! │  (polls each enabled kind, admits in receive order)         │
//! └─────────────────────────────────────────────────────────────┘
//!          │ receive/delete              │ admit / begin
//!          ▼                             ▼
//! ┌──────────────────┐        ┌──────────────────────────────────┐
//! │  QueueTransport  │        │           JobProcessor           │
//! │ (visibility      │◀───────│ (heartbeat + generation call,    │
//! │  timeout queue)  │ extend │  result sink, terminal write)    │
//! └──────────────────┘        └──────────────────────────────────┘
//!                                        │
//!                                        ▼
//!                             ┌──────────────────────┐
//!                             │       JobStore       │
//!                             │ (generation_jobs)    │
//!                             └──────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use contentgen_jobs::prelude::*;
//!
//! let config = SchedulerConfig::new()
//!     .with_queue(JobKind::Image, "image-jobs")
//!     .with_limits(JobKind::Image, KindLimits::new(4, 2));
//!
//! let scheduler = Scheduler::new(queue, store, generator, sink, config);
//! scheduler.run().await;
//! ```

pub mod generation;
pub mod job;
pub mod persistence;
pub mod queue;
pub mod submit;
pub mod worker;

/// Prelude for common imports
pub mod prelude {
    pub use crate::generation::{
        GenerationClient, GenerationEndpoints, GenerationError, GenerationOutput,
        HttpGenerationClient, InMemoryResultSink, PostgresResultSink, ResultSink, SinkError,
    };
    pub use crate::job::{
        ArticleMode, ArticlePayload, GenerationRequest, ImagePayload, Job, JobKind, JobStatus,
        QueueMessage, VideoPayload,
    };
    pub use crate::persistence::{
        InMemoryJobStore, JobFilter, JobStore, JobUpdate, PostgresJobStore, StoreError,
    };
    pub use crate::queue::{InMemoryQueue, PostgresQueue, QueueError, QueueTransport, RawMessage};
    pub use crate::submit::{JobSubmitter, SubmitError};
    pub use crate::worker::{
        AdmissionController, AdmissionDecision, ConcurrencyLimits, JobOutcome, JobProcessor,
        KindLimits, PollSummary, ProcessError, Scheduler, SchedulerConfig,
    };
}

// Re-export key types at crate root
pub use generation::{GenerationClient, GenerationError, GenerationOutput, ResultSink};
pub use job::{GenerationRequest, Job, JobKind, JobStatus, QueueMessage};
pub use persistence::{InMemoryJobStore, JobStore, PostgresJobStore, StoreError};
pub use queue::{InMemoryQueue, PostgresQueue, QueueTransport};
pub use worker::{Scheduler, SchedulerConfig};
