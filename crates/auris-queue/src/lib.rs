//! Extraction queue worker (C8): a durable poll loop that hands queued
//! conversation turns to the memory pipeline and retries failures up to a
//! configured attempt cap.

pub mod error;
pub mod store;
pub mod types;
pub mod worker;

pub use error::{QueueError, Result};
pub use store::TaskStore;
pub use types::{ExtractionTask, TaskStatus};
pub use worker::{ExtractionWorker, QueueEnqueuer};
