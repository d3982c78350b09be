// Boost supervisor - elastic workers under backlog pressure

use super::constants::BOOST_CHECK_INTERVAL;
use super::{PoolShared, Worker};
use crate::application::signal::SignalTrigger;
use crate::domain::{QueueConfig, QueueItem};
use futures::FutureExt;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{error, info};

#[derive(Debug, Clone)]
pub(super) struct BoostPolicy {
    pub(super) boost_workers: usize,
    pub(super) max_workers: usize,
    high_water: usize,
    low_water: usize,
    grace: Duration,
}

impl BoostPolicy {
    pub(super) fn from_config(config: &QueueConfig) -> Self {
        Self {
            boost_workers: config.boost_workers,
            max_workers: config.max_workers,
            high_water: config.high_water_mark(),
            low_water: config.low_water_mark(),
            grace: config.boost_grace,
        }
    }

    /// Pressure: occupancy at the high-water mark, or any backlog with nobody consuming
    fn under_pressure(&self, backlog: usize, active_workers: usize) -> bool {
        backlog >= self.high_water || (active_workers == 0 && backlog > 0)
    }
}

pub(super) struct BoostSupervisor<T: Send + 'static> {
    shared: Arc<PoolShared<T>>,
    policy: BoostPolicy,
}

impl<T: QueueItem> BoostSupervisor<T> {
    pub(super) fn new(shared: Arc<PoolShared<T>>, policy: BoostPolicy) -> Self {
        Self { shared, policy }
    }

    pub(super) async fn run(self) {
        let shared = self.shared;
        let policy = self.policy;
        let mut boosted: Vec<SignalTrigger> = Vec::new();
        let mut tasks = JoinSet::new();
        let mut pressure_since: Option<Instant> = None;

        let mut tick = interval(BOOST_CHECK_INTERVAL);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shared.shutdown.wait() => break,
                _ = tick.tick() => {}
            }

            // Reap retired boost workers
            while let Some(Some(result)) = tasks.join_next().now_or_never() {
                if let Err(e) = result {
                    error!(queue = %shared.queue, error = %e, "Boost worker failed");
                }
            }

            let backlog = shared.buffer.len();
            let active = shared.counters.active_workers();

            if !shared.pause.is_paused() && policy.under_pressure(backlog, active) {
                let since = *pressure_since.get_or_insert_with(Instant::now);
                if since.elapsed() >= policy.grace
                    && boosted.len() < policy.boost_workers
                    && active < policy.max_workers
                {
                    let trigger = SignalTrigger::new();
                    let worker = Worker::new(Arc::clone(&shared), Some(trigger.subscribe()));
                    info!(
                        queue = %shared.queue,
                        worker_id = worker.id,
                        backlog,
                        boosted = boosted.len() + 1,
                        "Backlog pressure, starting boost worker"
                    );
                    tasks.spawn(worker.run());
                    boosted.push(trigger);
                    shared.counters.boosted.store(boosted.len(), Ordering::SeqCst);
                    // The next boost needs another full grace period
                    pressure_since = Some(Instant::now());
                }
            } else {
                pressure_since = None;
                if backlog <= policy.low_water && !boosted.is_empty() {
                    info!(
                        queue = %shared.queue,
                        backlog,
                        retiring = boosted.len(),
                        "Backlog subsided, retiring boost workers"
                    );
                    for trigger in boosted.drain(..) {
                        trigger.fire();
                    }
                    shared.counters.boosted.store(0, Ordering::SeqCst);
                }
            }
        }

        while let Some(result) = tasks.join_next().await {
            if let Err(e) = result {
                error!(queue = %shared.queue, error = %e, "Boost worker failed");
            }
        }
        shared.counters.boosted.store(0, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::super::{Requeue, WorkerPool};
    use super::*;
    use crate::application::buffer::BoundedBuffer;
    use crate::application::pause::PauseController;
    use crate::port::{handler_fn, Handler};
    use async_trait::async_trait;

    struct Discard;

    #[async_trait]
    impl Requeue<u32> for Discard {
        async fn requeue(&self, _items: Vec<u32>) {}
        fn restore(&self, _items: Vec<u32>) {}
    }

    #[test]
    fn test_pressure_rules() {
        let mut config = QueueConfig::new("boost", "/tmp");
        config.queue_length = 20;
        let policy = BoostPolicy::from_config(&config);

        assert!(!policy.under_pressure(10, 1));
        assert!(policy.under_pressure(15, 1));
        assert!(policy.under_pressure(1, 0));
        assert!(!policy.under_pressure(0, 0));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_boost_starts_and_retires() {
        let mut config = QueueConfig::new("boost", "/tmp");
        config.queue_length = 8;
        config.batch_length = 1;
        config.workers = 1;
        config.boost_workers = 2;
        config.max_workers = 3;
        config.boost_grace = Duration::from_millis(50);

        // Slow handler so the backlog builds up
        let handler: Arc<dyn Handler<u32>> = Arc::new(handler_fn(|_items: Vec<u32>| {
            std::thread::sleep(Duration::from_millis(30));
            Vec::new()
        }));

        let buffer = Arc::new(BoundedBuffer::new(config.queue_length));
        let shutdown = SignalTrigger::new();
        let mut pool = WorkerPool::new(
            &config,
            Arc::clone(&buffer),
            PauseController::new("boost"),
            handler,
            Arc::new(Discard),
            shutdown.subscribe(),
        );
        let counters = pool.counters();

        for i in 0..8 {
            buffer.try_push(i).unwrap();
        }
        pool.start();

        // Keep the buffer full until a boost worker shows up
        let boosted = tokio::time::timeout(Duration::from_secs(3), async {
            loop {
                while buffer.try_push(0).is_ok() {}
                if counters.boosted() > 0 {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await;
        assert!(boosted.is_ok(), "boost worker should start under pressure");
        assert!(counters.active_workers() <= config.max_workers);

        // Stop feeding; the backlog drains and the boost workers retire
        let retired = tokio::time::timeout(Duration::from_secs(5), async {
            while counters.boosted() > 0 {
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await;
        assert!(retired.is_ok(), "boost workers should retire once backlog subsides");

        shutdown.fire();
        pool.join().await;
        assert_eq!(counters.active_workers(), 0);
    }
}
