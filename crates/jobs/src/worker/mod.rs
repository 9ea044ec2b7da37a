//! Job execution on the worker side
//!
//! - [`Scheduler`] - poll loop across the enabled kinds
//! - [`AdmissionController`] - per-owner and per-kind ceilings
//! - [`JobProcessor`] - state machine for one job, with heartbeat

mod admission;
mod config;
mod heartbeat;
mod processor;
mod scheduler;

pub use admission::{AdmissionController, AdmissionDecision, DeferReason};
pub use config::{
    ConcurrencyLimits, KindLimits, ProcessorConfig, ProgressConfig, SchedulerConfig,
    MIN_HEARTBEAT_INTERVAL, MIN_POLL_INTERVAL,
};
pub use heartbeat::{progress_message, HeartbeatExit};
pub use processor::{BeginOutcome, JobOutcome, JobProcessor, ProcessError};
pub use scheduler::{ActiveJobs, PollSummary, Scheduler};
