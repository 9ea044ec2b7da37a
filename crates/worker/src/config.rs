// Worker settings from the environment
// Decision: a kind is enabled exactly when its queue variable is set
// Decision: malformed numbers fail startup instead of silently using defaults

use std::time::Duration;

use contentgen_jobs::generation::GenerationEndpoints;
use contentgen_jobs::worker::{KindLimits, SchedulerConfig};
use contentgen_jobs::JobKind;
use uuid::Uuid;

/// Configuration errors; each one aborts startup
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("{var} has invalid value {value:?}: {reason}")]
    Invalid {
        var: String,
        value: String,
        reason: String,
    },

    #[error("no queue configured; set at least one of ARTICLE_QUEUE, IMAGE_QUEUE, VIDEO_QUEUE")]
    NoQueues,

    #[error("{kind} jobs are enabled but no generation URL is configured (set GENERATION_API_URL or {var})")]
    MissingEndpoint { kind: JobKind, var: String },
}

/// Everything the worker binary needs to start
#[derive(Debug, Clone)]
pub struct WorkerSettings {
    pub database_url: String,
    pub run_migrations: bool,
    pub endpoints: GenerationEndpoints,
    pub scheduler: SchedulerConfig,
}

impl WorkerSettings {
    /// Read settings from process environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read settings through `lookup`; empty values count as unset
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env(lookup);

        let database_url = env.get("DATABASE_URL").ok_or(ConfigError::Missing("DATABASE_URL"))?;
        let run_migrations = env.parse_bool("RUN_MIGRATIONS", true)?;

        let mut scheduler = SchedulerConfig::new()
            .with_worker_id(
                env.get("WORKER_ID")
                    .unwrap_or_else(|| format!("worker-{}", Uuid::now_v7())),
            )
            .with_poll_interval(Duration::from_millis(
                env.parse_positive("POLL_INTERVAL_MS", 5000)?,
            ))
            .with_max_messages_per_poll(env.parse_positive("MAX_MESSAGES_PER_POLL", 10)?)
            .with_visibility_timeout(Duration::from_secs(
                env.parse_positive("VISIBILITY_TIMEOUT_SECONDS", 900)?,
            ))
            .with_long_poll_wait(Duration::from_secs(env.parse("LONG_POLL_WAIT_SECONDS", 10)?))
            .with_heartbeat_interval(Duration::from_secs(
                env.parse_positive("HEARTBEAT_INTERVAL_SECONDS", 10)?,
            ))
            .with_shutdown_timeout(Duration::from_secs(
                env.parse("SHUTDOWN_TIMEOUT_SECONDS", 30)?,
            ));

        let mut endpoints = env
            .get("GENERATION_API_URL")
            .map(|base| GenerationEndpoints::from_base_url(&base))
            .unwrap_or_default();

        for kind in JobKind::ALL {
            let prefix = kind.as_str().to_uppercase();

            if let Some(url) = env.get(&format!("{prefix}_GENERATION_URL")) {
                endpoints.set(kind, url);
            }

            let defaults = KindLimits::default_for(kind);
            let limits = KindLimits::new(
                env.parse_positive(&format!("{prefix}_MAX_CONCURRENT"), defaults.max_concurrent)?,
                env.parse_positive(&format!("{prefix}_MAX_PER_OWNER"), defaults.max_per_owner)?,
            );
            scheduler = scheduler.with_limits(kind, limits);

            if let Some(queue) = env.get(&format!("{prefix}_QUEUE")) {
                if endpoints.for_kind(kind).is_none() {
                    return Err(ConfigError::MissingEndpoint {
                        kind,
                        var: format!("{prefix}_GENERATION_URL"),
                    });
                }
                scheduler = scheduler.with_queue(kind, queue);
            }
        }

        if scheduler.queues.is_empty() {
            return Err(ConfigError::NoQueues);
        }

        Ok(Self {
            database_url,
            run_migrations,
            endpoints,
            scheduler,
        })
    }
}

struct Env<F>(F);

impl<F> Env<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn get(&self, key: &str) -> Option<String> {
        (self.0)(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn parse<T>(&self, key: &str, default: T) -> Result<T, ConfigError>
    where
        T: std::str::FromStr,
        T::Err: std::fmt::Display,
    {
        match self.get(key) {
            None => Ok(default),
            Some(value) => value.parse().map_err(|e: T::Err| ConfigError::Invalid {
                var: key.to_string(),
                reason: e.to_string(),
                value,
            }),
        }
    }

    fn parse_positive<T>(&self, key: &str, default: T) -> Result<T, ConfigError>
    where
        T: std::str::FromStr + Default + PartialEq,
        T::Err: std::fmt::Display,
    {
        let value = self.parse(key, default)?;
        if value == T::default() {
            return Err(ConfigError::Invalid {
                var: key.to_string(),
                value: "0".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(value)
    }

    fn parse_bool(&self, key: &str, default: bool) -> Result<bool, ConfigError> {
        match self.get(key).map(|v| v.to_lowercase()) {
            None => Ok(default),
            Some(v) if matches!(v.as_str(), "1" | "true" | "yes" | "on") => Ok(true),
            Some(v) if matches!(v.as_str(), "0" | "false" | "no" | "off") => Ok(false),
            Some(value) => Err(ConfigError::Invalid {
                var: key.to_string(),
                value,
                reason: "expected true or false".to_string(),
            }),
        }
    }
}
