//! Queue transport
//!
//! - [`QueueTransport`] - receive/delete/send against named queues
//! - [`InMemoryQueue`] - tokio-time based implementation for tests and local runs
//! - [`PostgresQueue`] - `SKIP LOCKED` table-backed implementation

mod memory;
mod postgres;
mod transport;

pub use memory::InMemoryQueue;
pub use postgres::PostgresQueue;
pub use transport::{QueueError, QueueTransport, RawMessage};
