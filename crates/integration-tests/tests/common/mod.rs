//! Shared helpers for the integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use persistq_core::{Handler, QueueConfig};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

/// Install a test subscriber once (`RUST_LOG` overrides the default filter)
pub fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("persistq=debug"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestData {
    pub test_string: String,
    pub test_int: i64,
}

pub fn data(s: &str, n: i64) -> TestData {
    TestData {
        test_string: s.to_string(),
        test_int: n,
    }
}

/// Small queue with fast timings
pub fn test_config(name: &str, data_dir: &Path) -> QueueConfig {
    let mut config = QueueConfig::new(name, data_dir);
    config.batch_length = 2;
    config.queue_length = 20;
    config.workers = 1;
    config.boost_workers = 0;
    config.batch_timeout = Duration::from_millis(20);
    config.boost_grace = Duration::from_millis(50);
    config
}

/// Forwards every delivered item to a channel
pub struct ChannelHandler<T> {
    tx: mpsc::UnboundedSender<T>,
}

pub fn channel_handler<T>() -> (ChannelHandler<T>, mpsc::UnboundedReceiver<T>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (ChannelHandler { tx }, rx)
}

#[async_trait]
impl<T: Send + 'static> Handler<T> for ChannelHandler<T> {
    async fn handle(&self, items: Vec<T>) -> Vec<T> {
        for item in items {
            let _ = self.tx.send(item);
        }
        Vec::new()
    }
}

pub async fn recv<T>(rx: &mut mpsc::UnboundedReceiver<T>) -> T {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("item should be delivered")
        .expect("handler dropped")
}

pub async fn assert_idle<T: std::fmt::Debug>(rx: &mut mpsc::UnboundedReceiver<T>) {
    let got = tokio::time::timeout(Duration::from_millis(200), rx.recv()).await;
    assert!(got.is_err(), "unexpected delivery: {got:?}");
}
