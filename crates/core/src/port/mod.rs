// Port Layer - Interfaces for external dependencies

pub mod durable_store;
pub mod handler;

// Re-exports
pub use durable_store::DurableStore;
pub use handler::{handler_fn, FnHandler, Handler};
