//! Job domain types
//!
//! - [`Job`] - the persisted record driven through the status machine
//! - [`GenerationRequest`] - kind-tagged payload (article, image, video)
//! - [`QueueMessage`] - the body carried by queue messages

mod message;
mod model;
mod payload;

pub use message::{MessageError, QueueMessage};
pub use model::{Job, JobKind, JobStatus};
pub use payload::{
    ArticleMode, ArticlePayload, GenerationRequest, ImagePayload, PayloadError, VideoPayload,
};
