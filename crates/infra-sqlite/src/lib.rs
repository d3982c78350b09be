// persistq Infrastructure - SQLite Adapter
// Implements: DurableStore (one database per queue name)

mod connection;
mod durable_store;
mod error;
mod migration;

pub use connection::create_pool;
pub use durable_store::{SqliteDurableStore, DATABASE_FILE};
pub use migration::run_migrations;

use persistq_core::{Handler, PersistableQueue, QueueConfig, QueueItem, Result};

/// Validate the config, open the queue's durable store, and build the queue
///
/// Nothing is created on disk when the config is invalid.
pub async fn open_queue<T, H>(handler: H, config: QueueConfig) -> Result<PersistableQueue<T>>
where
    T: QueueItem,
    H: Handler<T> + 'static,
{
    config.validate()?;
    let store = SqliteDurableStore::open(&config.name, &config.data_dir).await?;
    PersistableQueue::new(handler, config, store)
}

#[cfg(test)]
mod tests {
    use super::*;
    use persistq_core::handler_fn;

    #[tokio::test]
    async fn test_invalid_config_creates_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let config = QueueConfig::new("bad/name", dir.path());

        let result = open_queue::<u32, _>(handler_fn(|items: Vec<u32>| items), config).await;
        assert!(result.is_err());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_unusable_data_dir_fails_construction() {
        let dir = tempfile::tempdir().unwrap();
        let not_a_dir = dir.path().join("plain_file");
        std::fs::write(&not_a_dir, b"not a directory").unwrap();
        let config = QueueConfig::new("blocked", &not_a_dir);

        let err = open_queue::<u32, _>(handler_fn(|items: Vec<u32>| items), config)
            .await
            .err()
            .unwrap();
        assert!(err.is_io_failure(), "got {err:?}");
    }

    #[tokio::test]
    async fn test_corrupt_store_fails_construction() {
        let dir = tempfile::tempdir().unwrap();
        let store_dir = dir.path().join("corrupt");
        std::fs::create_dir_all(&store_dir).unwrap();
        std::fs::write(store_dir.join(DATABASE_FILE), vec![0xA5u8; 4096]).unwrap();
        let config = QueueConfig::new("corrupt", dir.path());

        let err = open_queue::<u32, _>(handler_fn(|items: Vec<u32>| items), config)
            .await
            .err()
            .unwrap();
        assert!(err.is_io_failure(), "got {err:?}");
    }

    #[tokio::test]
    async fn test_open_queue_creates_store() {
        let dir = tempfile::tempdir().unwrap();
        let config = QueueConfig::new("opened", dir.path());

        let queue = open_queue::<u32, _>(handler_fn(|_items: Vec<u32>| Vec::new()), config)
            .await
            .unwrap();
        assert_eq!(queue.name(), "opened");
        assert!(dir.path().join("opened").join(DATABASE_FILE).exists());
        queue.terminate().await.unwrap();
    }
}
