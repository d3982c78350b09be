// Panic isolation for handler calls
use crate::port::Handler;
use std::any::Any;
use std::sync::Arc;
use tracing::error;

/// Result of a panic-guarded handler call
#[derive(Debug)]
pub enum PanicGuardResult<T> {
    /// Handler returned; carries its leftovers
    Success(Vec<T>),
    /// Handler panicked (or its task was cancelled)
    Panicked(String),
}

/// Run one handler call on its own task so a panic cannot take the worker down
///
/// The batch is moved into the task; callers keep a copy if they need to redeliver it.
pub async fn execute_guarded<T>(handler: Arc<dyn Handler<T>>, batch: Vec<T>) -> PanicGuardResult<T>
where
    T: Send + 'static,
{
    let handle = tokio::task::spawn(async move { handler.handle(batch).await });

    match handle.await {
        Ok(leftovers) => PanicGuardResult::Success(leftovers),
        Err(join_err) => {
            let panic_msg = if join_err.is_panic() {
                panic_message(join_err.into_panic())
            } else {
                "handler task cancelled".to_string()
            };
            error!(panic_msg = %panic_msg, "Handler panicked");
            PanicGuardResult::Panicked(panic_msg)
        }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "Unknown panic".to_string()
    }
}
