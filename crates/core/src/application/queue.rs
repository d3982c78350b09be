// Persistable Queue - bounded buffer in front of a durable overflow store
//
// Producer -> push -> {buffer | store} -> store pump -> buffer -> worker pool -> handler

use crate::application::buffer::BoundedBuffer;
use crate::application::lifecycle::{HookHandle, ShutdownCoordinator};
use crate::application::pause::{Pausable, PauseController};
use crate::application::signal::{Signal, SignalTrigger};
use crate::application::worker::constants::{
    ERROR_RECOVERY_SLEEP_DURATION, FLUSH_POLL_INTERVAL, STORE_POLL_INTERVAL, STORE_PUMP_CHUNK,
};
use crate::application::worker::{PoolCounters, Requeue, WorkerPool};
use crate::domain::{ItemCodec, NewRecord, QueueConfig, QueueItem, QueueState};
use crate::error::{AppError, Result};
use crate::port::{DurableStore, Handler};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Instant};
use tracing::{debug, error, info, warn};

/// Producer-facing surface of a queue
#[async_trait]
pub trait Queue<T: Send + 'static>: Send + Sync {
    /// Start consuming and register teardown with the coordinator
    async fn run(&self, coordinator: &ShutdownCoordinator) -> Result<QueueHooks>;

    /// Enqueue one item
    async fn push(&self, item: T) -> Result<()>;
}

/// Coordinator registrations made by [`Queue::run`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueHooks {
    pub shutdown: HookHandle,
    pub terminate: HookHandle,
}

/// Point-in-time view of a queue
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueStats {
    pub buffered: usize,
    pub stored: u64,
    pub active_workers: usize,
    pub in_flight: usize,
    pub boosted: usize,
    pub paused: bool,
    pub state: QueueState,
}

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Decides where an item goes: buffer, durable store, or nowhere once terminated
struct Router<T> {
    queue: String,
    codec: ItemCodec<T>,
    store: Arc<dyn DurableStore>,
    buffer: Arc<BoundedBuffer<T>>,
    /// Wakes the store pump after an overflow append
    overflow: Notify,
    draining: AtomicBool,
    store_closed: AtomicBool,
}

impl<T: QueueItem> Router<T> {
    async fn route(&self, item: T) -> Result<()> {
        if self.store_closed.load(Ordering::SeqCst) {
            return Err(AppError::Closed(self.queue.clone()));
        }
        if self.draining.load(Ordering::SeqCst) {
            return self.persist(&item).await;
        }

        let item = match self.buffer.try_push(item) {
            Ok(()) => return Ok(()),
            Err(rejected) => rejected.into_inner(),
        };

        match self.persist(&item).await {
            Ok(()) => {
                self.overflow.notify_one();
                Ok(())
            }
            Err(e) if self.draining.load(Ordering::SeqCst) => Err(e),
            Err(e) => {
                error!(
                    queue = %self.queue,
                    error = %e,
                    "Overflow append failed, waiting for buffer space"
                );
                match self.buffer.push(item).await {
                    Ok(()) => Ok(()),
                    // Buffer closed by shutdown while waiting
                    Err(item) => self.persist(&item).await,
                }
            }
        }
    }

    async fn persist(&self, item: &T) -> Result<()> {
        let record = self.codec.encode(item, now_millis())?;
        self.store.append(&record).await
    }
}

#[async_trait]
impl<T: QueueItem> Requeue<T> for Router<T> {
    async fn requeue(&self, items: Vec<T>) {
        let count = items.len();
        for item in items {
            if let Err(e) = self.route(item).await {
                error!(queue = %self.queue, error = %e, count, "Failed to requeue leftovers");
            }
        }
    }

    fn restore(&self, items: Vec<T>) {
        // The buffer is drained into the store after the pool stops
        self.buffer.push_front_all(items);
    }
}

/// Moves durable records into the buffer: the backlog found at startup first,
/// then whatever overflows later
struct StorePump<T> {
    router: Arc<Router<T>>,
    shutdown: Signal,
}

impl<T: QueueItem> StorePump<T> {
    async fn run(self) {
        let router = self.router;
        let queue = router.queue.clone();
        // Highest seq already handed to the buffer; guards against replaying a
        // record whose consume failed
        let mut handed_off = i64::MIN;

        debug!(queue = %queue, "Store pump started");
        loop {
            if self.shutdown.is_fired() {
                break;
            }

            let records = match router.store.peek(STORE_PUMP_CHUNK).await {
                Ok(records) => records,
                Err(e) => {
                    error!(queue = %queue, error = %e, "Failed to read durable backlog");
                    tokio::select! {
                        _ = self.shutdown.wait() => break,
                        _ = sleep(ERROR_RECOVERY_SLEEP_DURATION) => continue,
                    }
                }
            };

            if records.is_empty() {
                tokio::select! {
                    _ = self.shutdown.wait() => break,
                    _ = router.overflow.notified() => {}
                    _ = sleep(STORE_POLL_INTERVAL) => {}
                }
                continue;
            }

            for record in records {
                if record.seq > handed_off {
                    let item = match router.codec.decode(&record) {
                        Ok(item) => item,
                        Err(e) => {
                            warn!(
                                queue = %queue,
                                seq = record.seq,
                                type_tag = %record.type_tag,
                                error = %e,
                                "Quarantining undecodable record"
                            );
                            if let Err(e) = router.store.quarantine(record.seq, &e.to_string()).await {
                                error!(queue = %queue, seq = record.seq, error = %e, "Failed to quarantine record");
                            }
                            continue;
                        }
                    };

                    tokio::select! {
                        biased;
                        _ = self.shutdown.wait() => {
                            debug!(queue = %queue, "Store pump stopped");
                            return;
                        }
                        pushed = router.buffer.push(item) => {
                            if pushed.is_err() {
                                return;
                            }
                        }
                    }
                    handed_off = record.seq;
                }

                if let Err(e) = router.store.consume(record.seq).await {
                    error!(queue = %queue, seq = record.seq, error = %e, "Failed to consume record");
                }
            }
        }
        debug!(queue = %queue, "Store pump stopped");
    }
}

struct QueueInner<T: QueueItem> {
    config: QueueConfig,
    router: Arc<Router<T>>,
    pause: PauseController,
    pool: tokio::sync::Mutex<WorkerPool<T>>,
    counters: Arc<PoolCounters>,
    pump: Mutex<Option<JoinHandle<()>>>,
    state: Mutex<QueueState>,
    shutdown: SignalTrigger,
    closed: SignalTrigger,
    terminated: SignalTrigger,
}

/// Work queue whose pending items survive a restart
///
/// Pushed items land in a bounded in-memory buffer; when it is full they overflow
/// into the durable store. Workers pull batches from the buffer and hand them to the
/// handler. On shutdown everything still buffered is written to the store so a later
/// instance with the same name and data directory picks it up.
pub struct PersistableQueue<T: QueueItem> {
    inner: Arc<QueueInner<T>>,
}

impl<T: QueueItem> Clone for PersistableQueue<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: QueueItem> PersistableQueue<T> {
    pub fn new<H, S>(handler: H, config: QueueConfig, store: S) -> Result<Self>
    where
        H: Handler<T> + 'static,
        S: DurableStore + 'static,
    {
        config.validate()?;

        let buffer = Arc::new(BoundedBuffer::new(config.queue_length));
        let pause = PauseController::new(config.name.clone());
        let shutdown = SignalTrigger::new();
        let router = Arc::new(Router {
            queue: config.name.clone(),
            codec: ItemCodec::new(),
            store: Arc::new(store),
            buffer: Arc::clone(&buffer),
            overflow: Notify::new(),
            draining: AtomicBool::new(false),
            store_closed: AtomicBool::new(false),
        });

        let requeue: Arc<dyn Requeue<T>> = router.clone();
        let pool = WorkerPool::new(
            &config,
            buffer,
            pause.clone(),
            Arc::new(handler),
            requeue,
            shutdown.subscribe(),
        );
        let counters = pool.counters();

        debug!(
            queue = %config.name,
            type_tag = router.codec.type_tag(),
            queue_length = config.queue_length,
            batch_length = config.batch_length,
            "Queue created"
        );

        Ok(Self {
            inner: Arc::new(QueueInner {
                config,
                router,
                pause,
                pool: tokio::sync::Mutex::new(pool),
                counters,
                pump: Mutex::new(None),
                state: Mutex::new(QueueState::Created),
                shutdown,
                closed: SignalTrigger::new(),
                terminated: SignalTrigger::new(),
            }),
        })
    }

    pub fn name(&self) -> &str {
        &self.inner.config.name
    }

    pub fn config(&self) -> &QueueConfig {
        &self.inner.config
    }

    pub fn state(&self) -> QueueState {
        *self.lock_state()
    }

    pub fn pause_controller(&self) -> PauseController {
        self.inner.pause.clone()
    }

    /// Fires once shutdown has persisted the buffer
    pub fn closed(&self) -> Signal {
        self.inner.closed.subscribe()
    }

    /// Fires once the store has been released
    pub fn terminated(&self) -> Signal {
        self.inner.terminated.subscribe()
    }

    /// Push a dynamically typed value; anything that is not a `T` is rejected untouched
    pub async fn push_json(&self, value: serde_json::Value) -> Result<()> {
        let item = self.inner.router.codec.from_value(value)?;
        self.inner.router.route(item).await
    }

    pub async fn stats(&self) -> Result<QueueStats> {
        let stored = self.inner.router.store.len().await?;
        Ok(QueueStats {
            buffered: self.inner.router.buffer.len(),
            stored,
            active_workers: self.inner.counters.active_workers(),
            in_flight: self.inner.counters.in_flight(),
            boosted: self.inner.counters.boosted(),
            paused: self.inner.pause.is_paused(),
            state: self.state(),
        })
    }

    /// Nothing buffered, stored, or held by a worker
    pub async fn is_empty(&self) -> Result<bool> {
        if !self.inner.router.buffer.is_empty() || self.inner.counters.in_flight() > 0 {
            return Ok(false);
        }
        Ok(self.inner.router.store.len().await? == 0)
    }

    /// Wait until every pending item has been handled
    pub async fn flush(&self, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        loop {
            if self.is_empty().await? {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(AppError::Timeout(format!(
                    "queue {} not empty after {:?}",
                    self.name(),
                    timeout
                )));
            }
            sleep(FLUSH_POLL_INTERVAL).await;
        }
    }

    /// Stop consuming and persist everything still in memory
    ///
    /// In-flight handler calls complete first. Pushes made from here on go to the
    /// durable store and are picked up by the next instance. A concurrent caller
    /// waits for the first one to finish.
    pub async fn shutdown(&self) -> Result<()> {
        let already_closing = {
            let mut state = self.lock_state();
            match *state {
                QueueState::ShuttingDown | QueueState::Terminated => true,
                current => {
                    *state = current.transition(QueueState::ShuttingDown)?;
                    false
                }
            }
        };
        if already_closing {
            self.closed().wait().await;
            return Ok(());
        }

        info!(queue = %self.name(), "Shutting down queue");
        let router = &self.inner.router;
        router.draining.store(true, Ordering::SeqCst);
        self.inner.shutdown.fire();

        let pump = self.lock_pump().take();
        if let Some(pump) = pump {
            if let Err(e) = pump.await {
                error!(queue = %self.name(), error = %e, "Store pump failed");
            }
        }
        self.inner.pool.lock().await.join().await;

        let result = self.persist_buffer().await;
        self.inner.closed.fire();
        if result.is_ok() {
            info!(queue = %self.name(), "Queue shut down");
        }
        result
    }

    /// Shut down if still running, then release the durable store
    pub async fn terminate(&self) -> Result<()> {
        if matches!(self.state(), QueueState::Running | QueueState::ShuttingDown) {
            self.shutdown().await?;
        }

        let from = {
            let mut state = self.lock_state();
            if *state == QueueState::Terminated {
                None
            } else {
                let from = *state;
                *state = from.transition(QueueState::Terminated)?;
                Some(from)
            }
        };
        let Some(from) = from else {
            self.terminated().wait().await;
            return Ok(());
        };

        let mut result = Ok(());
        if from == QueueState::Created {
            // Never ran: whatever was pushed is still in the buffer
            self.inner.router.draining.store(true, Ordering::SeqCst);
            result = self.persist_buffer().await;
            self.inner.closed.fire();
        }

        self.inner.router.store_closed.store(true, Ordering::SeqCst);
        self.inner.router.store.close().await;
        self.inner.terminated.fire();
        info!(queue = %self.name(), "Queue terminated");
        result
    }

    /// Close the buffer and write its contents ahead of older durable records
    async fn persist_buffer(&self) -> Result<()> {
        let router = &self.inner.router;
        router.buffer.close();
        let remaining = router.buffer.drain();
        if remaining.is_empty() {
            return Ok(());
        }

        let enqueued_at = now_millis();
        let records = remaining
            .iter()
            .map(|item| router.codec.encode(item, enqueued_at))
            .collect::<Result<Vec<NewRecord>>>()?;

        match router.store.prepend_all(&records).await {
            Ok(()) => {
                info!(queue = %self.name(), persisted = records.len(), "Persisted buffered items");
                Ok(())
            }
            Err(e) => {
                error!(
                    queue = %self.name(),
                    lost = records.len(),
                    error = %e,
                    "Failed to persist buffered items"
                );
                Err(e)
            }
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, QueueState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_pump(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.inner
            .pump
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl<T: QueueItem> Queue<T> for PersistableQueue<T> {
    async fn run(&self, coordinator: &ShutdownCoordinator) -> Result<QueueHooks> {
        {
            let mut state = self.lock_state();
            *state = state.transition(QueueState::Running)?;
        }

        let backlog = match self.inner.router.store.len().await {
            Ok(backlog) => backlog,
            Err(e) => {
                warn!(queue = %self.name(), error = %e, "Could not size durable backlog");
                0
            }
        };
        if backlog > 0 {
            info!(queue = %self.name(), recovered = backlog, "Recovered durable backlog");
        }

        let pump = StorePump {
            router: Arc::clone(&self.inner.router),
            shutdown: self.inner.shutdown.subscribe(),
        };
        *self.lock_pump() = Some(tokio::spawn(pump.run()));
        self.inner.pool.lock().await.start();

        let queue = self.clone();
        let shutdown = coordinator.register_shutdown(format!("{}:shutdown", self.name()), move || async move {
            if let Err(e) = queue.shutdown().await {
                error!(queue = %queue.name(), error = %e, "Queue shutdown failed");
            }
        });
        let queue = self.clone();
        let terminate = coordinator.register_terminate(format!("{}:terminate", self.name()), move || async move {
            if let Err(e) = queue.terminate().await {
                error!(queue = %queue.name(), error = %e, "Queue terminate failed");
            }
        });

        info!(
            queue = %self.name(),
            workers = self.inner.config.workers,
            buffered = self.inner.router.buffer.len(),
            "Queue running"
        );
        Ok(QueueHooks { shutdown, terminate })
    }

    async fn push(&self, item: T) -> Result<()> {
        self.inner.router.route(item).await
    }
}

impl<T: QueueItem> Pausable for PersistableQueue<T> {
    fn pause(&self) {
        self.inner.pause.pause();
    }

    fn resume(&self) {
        self.inner.pause.resume();
    }

    fn is_paused_is_resumed(&self) -> (Signal, Signal) {
        self.inner.pause.signals()
    }
}
