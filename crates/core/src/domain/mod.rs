// Domain Layer - Queue configuration, lifecycle and durable record model

pub mod error;
pub mod queue;
pub mod record;

// Re-exports
pub use error::DomainError;
pub use queue::{
    QueueConfig, QueueId, QueueState, DEFAULT_BATCH_TIMEOUT, DEFAULT_BOOST_GRACE,
};
pub use record::{ItemCodec, NewRecord, QueueItem, StoredRecord};
