// Process wiring for the generation worker: environment settings and tracing setup.
// The job machinery itself lives in contentgen-jobs.

pub mod config;
pub mod telemetry;

pub use config::{ConfigError, WorkerSettings};
pub use telemetry::{init_telemetry, TelemetryConfig, TelemetryGuard};
