// Application Layer - Queue engine

pub mod buffer;
pub mod lifecycle;
pub mod pause;
pub mod queue;
pub mod signal;
pub mod worker;

// Re-exports
pub use crate::port::handler_fn;
pub use buffer::{BoundedBuffer, TryPushError};
pub use lifecycle::{HookHandle, Phase, ShutdownCoordinator};
pub use pause::{Pausable, PauseController};
pub use queue::{PersistableQueue, Queue, QueueHooks, QueueStats};
pub use signal::{Signal, SignalTrigger};
pub use worker::{PoolCounters, WorkerPool};
