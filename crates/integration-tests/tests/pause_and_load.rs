//! Pause/resume, boost under load, and coordinated teardown of several queues

mod common;

use async_trait::async_trait;
use common::*;
use persistq_core::{Handler, Pausable, Queue, QueueState, ShutdownCoordinator};
use persistq_infra_sqlite::open_queue;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[tokio::test]
async fn test_pause_holds_and_resume_delivers() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let (handler, mut rx) = channel_handler::<TestData>();
    let queue = open_queue(handler, test_config("paused", dir.path()))
        .await
        .unwrap();
    queue.run(&ShutdownCoordinator::new()).await.unwrap();

    let (paused, resumed) = queue.is_paused_is_resumed();
    assert!(resumed.is_fired());
    queue.pause();
    assert!(paused.is_fired());

    // Producers are never blocked by a pause
    for i in 0..5 {
        queue.push(data("held", i)).await.unwrap();
    }
    assert_idle(&mut rx).await;

    let (_, resumed) = queue.is_paused_is_resumed();
    assert!(!resumed.is_fired());
    queue.resume();
    assert!(resumed.is_fired());

    let mut delivered = Vec::new();
    for _ in 0..5 {
        delivered.push(recv(&mut rx).await.test_int);
    }
    assert_eq!(delivered, vec![0, 1, 2, 3, 4]);
    queue.terminate().await.unwrap();
}

/// Sleeps per batch and records the peak number of concurrent calls
struct SlowHandler {
    running: AtomicUsize,
    peak: AtomicUsize,
    seen: Mutex<Vec<i64>>,
}

#[async_trait]
impl Handler<TestData> for Arc<SlowHandler> {
    async fn handle(&self, items: Vec<TestData>) -> Vec<TestData> {
        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(20)).await;
        self.seen
            .lock()
            .unwrap()
            .extend(items.iter().map(|item| item.test_int));
        self.running.fetch_sub(1, Ordering::SeqCst);
        Vec::new()
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_backlog_boosts_workers_and_loses_nothing() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config("loaded", dir.path());
    config.queue_length = 8;
    config.workers = 1;
    config.boost_workers = 2;
    config.max_workers = 3;

    let handler = Arc::new(SlowHandler {
        running: AtomicUsize::new(0),
        peak: AtomicUsize::new(0),
        seen: Mutex::new(Vec::new()),
    });
    let queue = open_queue::<TestData, _>(Arc::clone(&handler), config).await.unwrap();
    queue.run(&ShutdownCoordinator::new()).await.unwrap();

    for i in 0..100 {
        queue.push(data("load", i)).await.unwrap();
    }
    queue.flush(Duration::from_secs(20)).await.unwrap();

    let seen = handler.seen.lock().unwrap().clone();
    assert_eq!(seen.len(), 100);
    let unique: HashSet<_> = seen.iter().collect();
    assert_eq!(unique.len(), 100);

    let peak = handler.peak.load(Ordering::SeqCst);
    assert!(peak >= 2, "expected boost workers to join, peak was {peak}");
    assert!(peak <= 3);

    queue.terminate().await.unwrap();
}

#[tokio::test]
async fn test_leftovers_come_back_once() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();

    struct RejectFirstOdd {
        rejected: AtomicUsize,
        seen: Mutex<Vec<i64>>,
    }

    #[async_trait]
    impl Handler<TestData> for Arc<RejectFirstOdd> {
        async fn handle(&self, items: Vec<TestData>) -> Vec<TestData> {
            let mut leftovers = Vec::new();
            for item in items {
                if item.test_int % 2 == 1 && self.rejected.fetch_add(1, Ordering::SeqCst) == 0 {
                    leftovers.push(item);
                } else {
                    self.seen.lock().unwrap().push(item.test_int);
                }
            }
            leftovers
        }
    }

    let handler = Arc::new(RejectFirstOdd {
        rejected: AtomicUsize::new(0),
        seen: Mutex::new(Vec::new()),
    });
    let queue = open_queue::<TestData, _>(Arc::clone(&handler), test_config("leftovers", dir.path()))
        .await
        .unwrap();
    queue.run(&ShutdownCoordinator::new()).await.unwrap();

    for i in 0..6 {
        queue.push(data("item", i)).await.unwrap();
    }
    queue.flush(Duration::from_secs(5)).await.unwrap();

    let mut seen = handler.seen.lock().unwrap().clone();
    seen.sort();
    assert_eq!(seen, vec![0, 1, 2, 3, 4, 5]);
    queue.terminate().await.unwrap();
}

#[tokio::test]
async fn test_coordinator_tears_down_every_queue() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let coordinator = ShutdownCoordinator::new();

    let (first_handler, _first_rx) = channel_handler::<TestData>();
    let first = open_queue(first_handler, test_config("first", dir.path()))
        .await
        .unwrap();
    let (second_handler, _second_rx) = channel_handler::<u64>();
    let second = open_queue(second_handler, test_config("second", dir.path()))
        .await
        .unwrap();

    first.run(&coordinator).await.unwrap();
    second.run(&coordinator).await.unwrap();

    first.pause();
    first.push(data("parked", 1)).await.unwrap();
    coordinator.terminate().await;

    assert_eq!(first.state(), QueueState::Terminated);
    assert_eq!(second.state(), QueueState::Terminated);
    assert!(first.terminated().is_fired());
    assert!(second.terminated().is_fired());

    // The parked item is on disk for the next run
    let (handler, mut rx) = channel_handler::<TestData>();
    let reopened = open_queue(handler, test_config("first", dir.path()))
        .await
        .unwrap();
    reopened.run(&ShutdownCoordinator::new()).await.unwrap();
    assert_eq!(recv(&mut rx).await, data("parked", 1));
    reopened.terminate().await.unwrap();
}
