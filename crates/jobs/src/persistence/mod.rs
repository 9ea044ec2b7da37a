//! Job store persistence layer

mod memory;
mod postgres;
mod store;

pub use memory::InMemoryJobStore;
pub use postgres::PostgresJobStore;
pub use store::{JobFilter, JobStore, JobUpdate, StoreError};
