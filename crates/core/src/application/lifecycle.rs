// Shutdown Coordinator - ordered teardown across many queues

use futures::future::BoxFuture;
use std::future::Future;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{debug, info};

type Hook = Box<dyn FnOnce() -> BoxFuture<'static, ()> + Send>;

/// Teardown phase a hook belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    /// Stop consuming and persist in-flight state
    Shutdown,
    /// Release resources; runs after every shutdown hook
    Terminate,
}

/// Handle returned for each registration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HookHandle {
    phase: Phase,
    id: u64,
}

impl HookHandle {
    pub fn phase(&self) -> Phase {
        self.phase
    }
}

struct RegisteredHook {
    id: u64,
    name: String,
    hook: Hook,
}

#[derive(Default)]
struct Hooks {
    next_id: u64,
    shutdown: Vec<RegisteredHook>,
    terminate: Vec<RegisteredHook>,
    shutdown_started: bool,
    terminate_started: bool,
}

impl Hooks {
    fn list(&mut self, phase: Phase) -> &mut Vec<RegisteredHook> {
        match phase {
            Phase::Shutdown => &mut self.shutdown,
            Phase::Terminate => &mut self.terminate,
        }
    }

    fn started(&self, phase: Phase) -> bool {
        match phase {
            Phase::Shutdown => self.shutdown_started,
            Phase::Terminate => self.terminate_started,
        }
    }
}

/// Owns shutdown and terminate hooks and runs them in one coordinated pass
///
/// Each phase runs its hooks sequentially in reverse registration order. A hook
/// registered after its phase has started is spawned immediately.
#[derive(Default)]
pub struct ShutdownCoordinator {
    hooks: Mutex<Hooks>,
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_shutdown<F, Fut>(&self, name: impl Into<String>, hook: F) -> HookHandle
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.register(Phase::Shutdown, name.into(), Box::new(move || Box::pin(hook())))
    }

    pub fn register_terminate<F, Fut>(&self, name: impl Into<String>, hook: F) -> HookHandle
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.register(Phase::Terminate, name.into(), Box::new(move || Box::pin(hook())))
    }

    fn register(&self, phase: Phase, name: String, hook: Hook) -> HookHandle {
        let mut hooks = self.lock();
        hooks.next_id += 1;
        let handle = HookHandle {
            phase,
            id: hooks.next_id,
        };

        if hooks.started(phase) {
            drop(hooks);
            debug!(hook = %name, ?phase, "Phase already running, starting hook now");
            tokio::spawn(hook());
            return handle;
        }

        hooks.list(phase).push(RegisteredHook {
            id: handle.id,
            name,
            hook,
        });
        handle
    }

    /// Drop a hook that has not run yet; false if it already ran or never existed
    pub fn deregister(&self, handle: HookHandle) -> bool {
        let mut hooks = self.lock();
        let list = hooks.list(handle.phase);
        let before = list.len();
        list.retain(|registered| registered.id != handle.id);
        list.len() != before
    }

    /// Number of hooks waiting in a phase
    pub fn pending(&self, phase: Phase) -> usize {
        let mut hooks = self.lock();
        hooks.list(phase).len()
    }

    /// Run every shutdown hook (once)
    pub async fn shutdown(&self) {
        self.run_phase(Phase::Shutdown).await;
    }

    /// Run shutdown if it has not happened yet, then every terminate hook (once)
    pub async fn terminate(&self) {
        self.run_phase(Phase::Shutdown).await;
        self.run_phase(Phase::Terminate).await;
    }

    async fn run_phase(&self, phase: Phase) {
        let registered = {
            let mut hooks = self.lock();
            if hooks.started(phase) {
                return;
            }
            match phase {
                Phase::Shutdown => hooks.shutdown_started = true,
                Phase::Terminate => hooks.terminate_started = true,
            }
            std::mem::take(hooks.list(phase))
        };

        info!(?phase, hooks = registered.len(), "Running teardown phase");
        for RegisteredHook { name, hook, .. } in registered.into_iter().rev() {
            debug!(hook = %name, ?phase, "Running hook");
            hook().await;
        }
    }

    fn lock(&self) -> MutexGuard<'_, Hooks> {
        self.hooks.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
