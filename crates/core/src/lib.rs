// persistq Core - Queue engine & ports
// NO storage dependencies: durable stores are adapters implementing port::DurableStore

pub mod application;
pub mod domain;
pub mod error;
pub mod port;

pub use application::{
    handler_fn, Pausable, PauseController, PersistableQueue, Queue, QueueHooks, QueueStats,
    ShutdownCoordinator, Signal,
};
pub use domain::{QueueConfig, QueueItem, QueueState};
pub use error::{AppError, Result};
pub use port::{DurableStore, Handler};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
