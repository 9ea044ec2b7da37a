//! Scheduler and processor configuration

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::job::JobKind;

/// Shortest heartbeat period; zero would panic the ticker
pub const MIN_HEARTBEAT_INTERVAL: Duration = Duration::from_millis(100);

/// Shortest pause between polls; zero would spin the loop
pub const MIN_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Concurrency ceilings for one job kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KindLimits {
    /// Jobs of this kind processing at once on this worker
    pub max_concurrent: usize,

    /// Jobs of this kind processing at once for a single owner
    pub max_per_owner: usize,
}

impl KindLimits {
    pub fn new(max_concurrent: usize, max_per_owner: usize) -> Self {
        Self {
            max_concurrent,
            max_per_owner,
        }
    }

    /// Defaults sized for a single GPU backend
    pub fn default_for(kind: JobKind) -> Self {
        match kind {
            JobKind::Article => Self::new(2, 1),
            JobKind::Image => Self::new(4, 2),
            JobKind::Video => Self::new(1, 1),
        }
    }
}

/// Ceilings for every kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConcurrencyLimits {
    pub article: KindLimits,
    pub image: KindLimits,
    pub video: KindLimits,
}

impl Default for ConcurrencyLimits {
    fn default() -> Self {
        Self {
            article: KindLimits::default_for(JobKind::Article),
            image: KindLimits::default_for(JobKind::Image),
            video: KindLimits::default_for(JobKind::Video),
        }
    }
}

impl ConcurrencyLimits {
    pub fn for_kind(&self, kind: JobKind) -> KindLimits {
        match kind {
            JobKind::Article => self.article,
            JobKind::Image => self.image,
            JobKind::Video => self.video,
        }
    }

    pub fn set(&mut self, kind: JobKind, limits: KindLimits) {
        match kind {
            JobKind::Article => self.article = limits,
            JobKind::Image => self.image = limits,
            JobKind::Video => self.video = limits,
        }
    }

    /// Builder form of [`set`](Self::set)
    pub fn with(mut self, kind: JobKind, limits: KindLimits) -> Self {
        self.set(kind, limits);
        self
    }
}

/// Progress reporting while a job is processing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressConfig {
    /// Written when the job enters `processing`
    pub start: u8,

    /// Added on every heartbeat
    pub step: u8,

    /// Heartbeats never report more than this
    pub cap: u8,
}

impl Default for ProgressConfig {
    fn default() -> Self {
        Self {
            start: 25,
            step: 5,
            cap: 95,
        }
    }
}

impl ProgressConfig {
    /// Next heartbeat value after `current`
    pub fn next(&self, current: u8) -> u8 {
        current.saturating_add(self.step).min(self.cap).max(current)
    }
}

/// Settings for a single [`JobProcessor`](super::JobProcessor)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessorConfig {
    #[serde(with = "duration_millis")]
    pub heartbeat_interval: Duration,

    /// Visibility pushed onto the message at every heartbeat
    #[serde(with = "duration_millis")]
    pub visibility_timeout: Duration,

    pub progress: ProgressConfig,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(10),
            visibility_timeout: Duration::from_secs(900),
            progress: ProgressConfig::default(),
        }
    }
}

/// Scheduler configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Worker ID, used as a log field
    pub worker_id: String,

    /// Queue name per enabled kind
    pub queues: HashMap<JobKind, String>,

    pub limits: ConcurrencyLimits,

    /// Sleep between poll cycles
    #[serde(with = "duration_millis")]
    pub poll_interval: Duration,

    /// Receive batch cap
    pub max_messages_per_poll: usize,

    /// Long-poll wait per receive
    #[serde(with = "duration_millis")]
    pub long_poll_wait: Duration,

    /// How long `run` waits for in-flight jobs after shutdown is requested
    #[serde(with = "duration_millis")]
    pub shutdown_timeout: Duration,

    pub processor: ProcessorConfig,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            worker_id: format!("worker-{}", Uuid::now_v7()),
            queues: HashMap::new(),
            limits: ConcurrencyLimits::default(),
            poll_interval: Duration::from_millis(5000),
            max_messages_per_poll: 10,
            long_poll_wait: Duration::from_secs(10),
            shutdown_timeout: Duration::from_secs(30),
            processor: ProcessorConfig::default(),
        }
    }
}

impl SchedulerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the worker ID
    pub fn with_worker_id(mut self, id: impl Into<String>) -> Self {
        self.worker_id = id.into();
        self
    }

    /// Enable a kind by binding it to a queue
    pub fn with_queue(mut self, kind: JobKind, queue: impl Into<String>) -> Self {
        self.queues.insert(kind, queue.into());
        self
    }

    pub fn with_limits(mut self, kind: JobKind, limits: KindLimits) -> Self {
        self.limits.set(kind, limits);
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval.max(MIN_POLL_INTERVAL);
        self
    }

    pub fn with_max_messages_per_poll(mut self, max: usize) -> Self {
        self.max_messages_per_poll = max.max(1);
        self
    }

    pub fn with_long_poll_wait(mut self, wait: Duration) -> Self {
        self.long_poll_wait = wait;
        self
    }

    pub fn with_visibility_timeout(mut self, timeout: Duration) -> Self {
        self.processor.visibility_timeout = timeout;
        self
    }

    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.processor.heartbeat_interval = interval.max(MIN_HEARTBEAT_INTERVAL);
        self
    }

    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    pub fn visibility_timeout(&self) -> Duration {
        self.processor.visibility_timeout
    }

    /// Enabled kinds in polling order
    pub fn enabled_kinds(&self) -> Vec<(JobKind, &str)> {
        JobKind::ALL
            .iter()
            .filter_map(|kind| self.queues.get(kind).map(|q| (*kind, q.as_str())))
            .collect()
    }
}

mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        (duration.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
