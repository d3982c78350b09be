// Worker Pool - batch delivery loop

mod boost;
pub mod constants;
mod panic_guard;

use constants::*;
pub use panic_guard::{execute_guarded, PanicGuardResult};

use crate::application::buffer::BoundedBuffer;
use crate::application::pause::PauseController;
use crate::application::signal::Signal;
use crate::domain::{QueueConfig, QueueItem};
use crate::port::Handler;
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time::{sleep, Instant};
use tracing::{debug, error, info, warn};

/// Destination for items a worker hands back to the queue
#[async_trait]
pub trait Requeue<T: Send + 'static>: Send + Sync {
    /// Leftovers reported by the handler; they go behind the current backlog
    async fn requeue(&self, items: Vec<T>);

    /// A popped batch that was never delivered; it goes back to the head
    fn restore(&self, items: Vec<T>);
}

/// Live counters shared between the pool and its queue
#[derive(Debug, Default)]
pub struct PoolCounters {
    active_workers: AtomicUsize,
    in_flight: AtomicUsize,
    boosted: AtomicUsize,
}

impl PoolCounters {
    pub fn active_workers(&self) -> usize {
        self.active_workers.load(Ordering::SeqCst)
    }

    /// Batches currently held by workers (assembled or inside the handler)
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub fn boosted(&self) -> usize {
        self.boosted.load(Ordering::SeqCst)
    }
}

/// State every worker task of one pool shares
pub(crate) struct PoolShared<T: Send + 'static> {
    queue: String,
    buffer: Arc<BoundedBuffer<T>>,
    pause: PauseController,
    handler: Arc<dyn Handler<T>>,
    requeue: Arc<dyn Requeue<T>>,
    shutdown: Signal,
    counters: Arc<PoolCounters>,
    batch_length: usize,
    batch_timeout: Duration,
    next_worker_id: AtomicUsize,
}

/// Dynamically sized set of workers draining a bounded buffer
pub struct WorkerPool<T: Send + 'static> {
    shared: Arc<PoolShared<T>>,
    workers: usize,
    boost: boost::BoostPolicy,
    tasks: JoinSet<()>,
    started: bool,
}

impl<T: QueueItem> WorkerPool<T> {
    pub fn new(
        config: &QueueConfig,
        buffer: Arc<BoundedBuffer<T>>,
        pause: PauseController,
        handler: Arc<dyn Handler<T>>,
        requeue: Arc<dyn Requeue<T>>,
        shutdown: Signal,
    ) -> Self {
        let shared = Arc::new(PoolShared {
            queue: config.name.clone(),
            buffer,
            pause,
            handler,
            requeue,
            shutdown,
            counters: Arc::new(PoolCounters::default()),
            batch_length: config.batch_length,
            batch_timeout: config.batch_timeout,
            next_worker_id: AtomicUsize::new(1),
        });

        Self {
            shared,
            workers: config.workers,
            boost: boost::BoostPolicy::from_config(config),
            tasks: JoinSet::new(),
            started: false,
        }
    }

    pub fn counters(&self) -> Arc<PoolCounters> {
        Arc::clone(&self.shared.counters)
    }

    /// Spawn the baseline workers and the boost supervisor
    pub fn start(&mut self) {
        if self.started {
            return;
        }
        self.started = true;

        info!(
            queue = %self.shared.queue,
            workers = self.workers,
            boost_workers = self.boost.boost_workers,
            max_workers = self.boost.max_workers,
            "Starting worker pool"
        );

        for _ in 0..self.workers {
            let worker = Worker::new(Arc::clone(&self.shared), None);
            self.tasks.spawn(worker.run());
        }

        if self.boost.boost_workers > 0 {
            let supervisor = boost::BoostSupervisor::new(Arc::clone(&self.shared), self.boost.clone());
            self.tasks.spawn(supervisor.run());
        }
    }

    /// Wait for every worker (and boost worker) to exit after shutdown
    pub async fn join(&mut self) {
        while let Some(result) = self.tasks.join_next().await {
            if let Err(e) = result {
                error!(queue = %self.shared.queue, error = %e, "Worker task failed");
            }
        }
        info!(queue = %self.shared.queue, "Worker pool stopped");
    }
}

/// One consumer task
struct Worker<T: Send + 'static> {
    id: usize,
    shared: Arc<PoolShared<T>>,
    /// Present for boost workers; fires when backlog subsides
    retire: Option<Signal>,
}

impl<T: QueueItem> Worker<T> {
    fn new(shared: Arc<PoolShared<T>>, retire: Option<Signal>) -> Self {
        let id = shared.next_worker_id.fetch_add(1, Ordering::SeqCst);
        Self { id, shared, retire }
    }

    fn is_boosted(&self) -> bool {
        self.retire.is_some()
    }

    async fn run(self) {
        let counters = Arc::clone(&self.shared.counters);
        counters.active_workers.fetch_add(1, Ordering::SeqCst);
        debug!(queue = %self.shared.queue, worker_id = self.id, boosted = self.is_boosted(), "Worker started");

        loop {
            if !self.wait_while_paused().await {
                break;
            }

            let batch = match self.next_batch().await {
                Some(batch) => batch,
                None => break,
            };

            // A pause that arrived while the batch was assembling holds it back
            if !self.wait_while_paused().await {
                self.give_back(batch);
                break;
            }

            self.deliver(batch).await;
        }

        counters.active_workers.fetch_sub(1, Ordering::SeqCst);
        debug!(queue = %self.shared.queue, worker_id = self.id, "Worker stopped");
    }

    /// Wait out a pause; false when shutdown or retirement ends the worker instead
    async fn wait_while_paused(&self) -> bool {
        while self.shared.pause.is_paused() {
            let (_, resumed) = self.shared.pause.signals();
            tokio::select! {
                _ = resumed.wait() => {}
                _ = self.shared.shutdown.wait() => return false,
                _ = self.retired() => return false,
            }
        }
        !self.shared.shutdown.is_fired() && !self.retire.as_ref().is_some_and(Signal::is_fired)
    }

    async fn retired(&self) {
        match &self.retire {
            Some(signal) => signal.wait().await,
            None => std::future::pending().await,
        }
    }

    /// Pull up to `batch_length` items; `None` when the worker should exit
    async fn next_batch(&self) -> Option<Vec<T>> {
        let first = tokio::select! {
            biased;
            _ = self.shared.shutdown.wait() => return None,
            _ = self.retired() => return None,
            // Counted as in flight before the item leaves the buffer lock
            item = self.shared.buffer.pop_tracked(&self.shared.counters.in_flight) => item?,
        };

        let mut batch = Vec::with_capacity(self.shared.batch_length);
        batch.push(first);

        let deadline = Instant::now() + self.shared.batch_timeout;
        while batch.len() < self.shared.batch_length {
            if let Some(item) = self.shared.buffer.try_pop() {
                batch.push(item);
                continue;
            }
            tokio::select! {
                biased;
                _ = self.shared.shutdown.wait() => break,
                item = self.shared.buffer.pop() => match item {
                    Some(item) => batch.push(item),
                    None => break,
                },
                _ = tokio::time::sleep_until(deadline) => break,
            }
        }
        Some(batch)
    }

    async fn deliver(&self, batch: Vec<T>) {
        let batch_size = batch.len();
        let backup = batch.clone();
        debug!(queue = %self.shared.queue, worker_id = self.id, batch_size, "Delivering batch");

        let leftovers = match execute_guarded(Arc::clone(&self.shared.handler), batch).await {
            PanicGuardResult::Success(leftovers) => leftovers,
            PanicGuardResult::Panicked(panic_msg) => {
                warn!(
                    queue = %self.shared.queue,
                    worker_id = self.id,
                    batch_size,
                    panic_msg = %panic_msg,
                    "Handler failed, batch will be redelivered"
                );
                tokio::select! {
                    _ = sleep(ERROR_RECOVERY_SLEEP_DURATION) => {}
                    _ = self.shared.shutdown.wait() => {}
                }
                backup
            }
        };

        if !leftovers.is_empty() {
            debug!(
                queue = %self.shared.queue,
                worker_id = self.id,
                leftovers = leftovers.len(),
                "Requeueing unprocessed items"
            );
            self.shared.requeue.requeue(leftovers).await;
        }
        self.shared.counters.in_flight.fetch_sub(1, Ordering::SeqCst);
    }

    fn give_back(&self, batch: Vec<T>) {
        debug!(queue = %self.shared.queue, worker_id = self.id, batch_size = batch.len(), "Returning undelivered batch");
        self.shared.requeue.restore(batch);
        self.shared.counters.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}
