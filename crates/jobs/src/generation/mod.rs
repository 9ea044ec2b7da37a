//! Generation backend and result sink
//!
//! - [`GenerationClient`] - one cancellable call per job
//! - [`HttpGenerationClient`] - reqwest implementation against the GPU backend
//! - [`ResultSink`] - durable content write ahead of `completed`

mod client;
mod http;
mod sink;

pub use client::{GenerationClient, GenerationError, GenerationOutput};
pub use http::{GenerationEndpoints, HttpGenerationClient};
pub use sink::{InMemoryResultSink, PostgresResultSink, ResultSink, SinkError, StoredContent};
