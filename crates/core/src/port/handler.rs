// Handler Port (implemented by the surrounding application)

use async_trait::async_trait;

/// Batch consumer
///
/// Receives up to `batch_length` items and returns the items it did not process.
/// Returned items are re-submitted to the queue and delivered again in a later batch.
/// A handler that wants delivery to stop (e.g. downstream overload) pauses the queue
/// through its [`crate::application::PauseController`] before returning.
#[async_trait]
pub trait Handler<T: Send + 'static>: Send + Sync {
    async fn handle(&self, items: Vec<T>) -> Vec<T>;
}

/// Adapter turning a synchronous closure into a [`Handler`]
pub struct FnHandler<F> {
    f: F,
}

/// Wrap a closure `Fn(Vec<T>) -> Vec<T>` as a handler
pub fn handler_fn<T, F>(f: F) -> FnHandler<F>
where
    T: Send + 'static,
    F: Fn(Vec<T>) -> Vec<T> + Send + Sync,
{
    FnHandler { f }
}

#[async_trait]
impl<T, F> Handler<T> for FnHandler<F>
where
    T: Send + 'static,
    F: Fn(Vec<T>) -> Vec<T> + Send + Sync,
{
    async fn handle(&self, items: Vec<T>) -> Vec<T> {
        (self.f)(items)
    }
}
