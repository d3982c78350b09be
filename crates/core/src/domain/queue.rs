// Queue Domain Model

use crate::domain::error::{DomainError, Result};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Queue identifier (also the storage namespace under `data_dir`)
pub type QueueId = String;

const MAX_QUEUE_NAME_LENGTH: usize = 64;

/// Environment variable holding the root directory for all durable queues
pub const DATA_DIR_ENV: &str = "PERSISTQ_DATA_DIR";
const DEFAULT_DATA_DIR: &str = "~/.persistq/queues";

/// Partial batch is delivered after this long without new items (100ms)
pub const DEFAULT_BATCH_TIMEOUT: Duration = Duration::from_millis(100);

/// Backlog must stay above the high-water mark this long before a boost worker starts (1s)
pub const DEFAULT_BOOST_GRACE: Duration = Duration::from_secs(1);

/// Queue configuration, immutable once a queue is constructed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueConfig {
    pub name: QueueId,
    pub data_dir: PathBuf,
    /// Maximum items handed to the handler in one call
    pub batch_length: usize,
    /// Capacity of the in-memory buffer
    pub queue_length: usize,
    /// Baseline worker count
    pub workers: usize,
    /// Extra workers allowed under backlog pressure
    pub boost_workers: usize,
    pub max_workers: usize,
    /// A partial batch is delivered after this long without new items
    pub batch_timeout: Duration,
    /// How long the buffer must stay above the high-water mark before boosting
    pub boost_grace: Duration,
}

impl QueueConfig {
    pub fn new(name: impl Into<String>, data_dir: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            data_dir: data_dir.into(),
            batch_length: 20,
            queue_length: 100,
            workers: 1,
            boost_workers: 5,
            max_workers: 10,
            batch_timeout: DEFAULT_BATCH_TIMEOUT,
            boost_grace: DEFAULT_BOOST_GRACE,
        }
    }

    /// Load a queue configuration from the process environment
    ///
    /// See [`QueueConfig::from_lookup`] for the recognised keys.
    pub fn from_env(name: impl Into<String>) -> crate::error::Result<Self> {
        Self::from_lookup(name, |key| std::env::var(key).ok())
    }

    /// Build a configuration from defaults overlaid with looked-up settings
    ///
    /// Keys:
    /// - `PERSISTQ_DATA_DIR` (tilde-expanded, default `~/.persistq/queues`)
    /// - `PERSISTQ_QUEUE_<NAME>_BATCH_LENGTH`, `_LENGTH`, `_WORKERS`, `_BOOST_WORKERS`,
    ///   `_MAX_WORKERS`, `_BATCH_TIMEOUT_MS`, `_BOOST_GRACE_MS`
    ///
    /// `<NAME>` is the queue name upper-cased with `-` replaced by `_`.
    pub fn from_lookup<F>(name: impl Into<String>, lookup: F) -> crate::error::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let name = name.into();
        let data_dir = lookup(DATA_DIR_ENV).unwrap_or_else(|| DEFAULT_DATA_DIR.to_string());
        let data_dir = PathBuf::from(shellexpand::tilde(&data_dir).into_owned());

        let mut config = Self::new(name.clone(), data_dir);
        let prefix = format!("PERSISTQ_QUEUE_{}_", name.to_uppercase().replace('-', "_"));
        let setting = |suffix: &str| {
            let key = format!("{prefix}{suffix}");
            lookup(&key).map(|value| (key, value))
        };

        if let Some(v) = parse_setting(setting("BATCH_LENGTH"))? {
            config.batch_length = v;
        }
        if let Some(v) = parse_setting(setting("LENGTH"))? {
            config.queue_length = v;
        }
        if let Some(v) = parse_setting(setting("WORKERS"))? {
            config.workers = v;
        }
        if let Some(v) = parse_setting(setting("BOOST_WORKERS"))? {
            config.boost_workers = v;
        }
        if let Some(v) = parse_setting(setting("MAX_WORKERS"))? {
            config.max_workers = v;
        }
        if let Some(ms) = parse_setting::<u64>(setting("BATCH_TIMEOUT_MS"))? {
            config.batch_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = parse_setting::<u64>(setting("BOOST_GRACE_MS"))? {
            config.boost_grace = Duration::from_millis(ms);
        }

        config.validate()?;
        Ok(config)
    }

    /// Validate invariants before any resource is opened
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(DomainError::ValidationError(
                "Queue name cannot be empty".to_string(),
            ));
        }
        if self.name.len() > MAX_QUEUE_NAME_LENGTH {
            return Err(DomainError::ValidationError(format!(
                "Queue name too long: {} chars (max {})",
                self.name.len(),
                MAX_QUEUE_NAME_LENGTH
            )));
        }
        if !self
            .name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            return Err(DomainError::ValidationError(format!(
                "Queue name must be alphanumeric (with '-' or '_'): {}",
                self.name
            )));
        }
        if self.batch_length == 0 {
            return Err(DomainError::ValidationError(
                "batch_length must be at least 1".to_string(),
            ));
        }
        if self.queue_length == 0 {
            return Err(DomainError::ValidationError(
                "queue_length must be at least 1".to_string(),
            ));
        }
        if self.workers + self.boost_workers > self.max_workers {
            return Err(DomainError::ValidationError(format!(
                "workers ({}) + boost_workers ({}) exceeds max_workers ({})",
                self.workers, self.boost_workers, self.max_workers
            )));
        }
        if self.workers + self.boost_workers == 0 {
            return Err(DomainError::ValidationError(
                "at least one worker or boost worker is required".to_string(),
            ));
        }
        Ok(())
    }

    /// Storage namespace for this queue: `data_dir/name`
    pub fn storage_dir(&self) -> PathBuf {
        self.data_dir.join(&self.name)
    }

    /// Buffer occupancy at which boost pressure starts counting
    pub fn high_water_mark(&self) -> usize {
        (self.queue_length * 3 / 4).max(1)
    }

    /// Buffer occupancy at which boost workers retire
    pub fn low_water_mark(&self) -> usize {
        self.queue_length / 4
    }
}

fn parse_setting<V: FromStr>(raw: Option<(String, String)>) -> crate::error::Result<Option<V>>
where
    V::Err: std::fmt::Display,
{
    match raw {
        None => Ok(None),
        Some((key, value)) => value.trim().parse::<V>().map(Some).map_err(|e| {
            crate::error::AppError::Config(format!("Invalid value for {key}: {value:?} ({e})"))
        }),
    }
}

/// Queue lifecycle state
///
/// Paused/resumed are a sub-state of `Running`, tracked by the pause controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueState {
    Created,
    Running,
    ShuttingDown,
    Terminated,
}

impl std::fmt::Display for QueueState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QueueState::Created => write!(f, "CREATED"),
            QueueState::Running => write!(f, "RUNNING"),
            QueueState::ShuttingDown => write!(f, "SHUTTING_DOWN"),
            QueueState::Terminated => write!(f, "TERMINATED"),
        }
    }
}

impl QueueState {
    /// Validate and return the next state
    pub fn transition(self, to: QueueState) -> Result<QueueState> {
        let allowed = matches!(
            (self, to),
            (QueueState::Created, QueueState::Running)
                | (QueueState::Created, QueueState::Terminated)
                | (QueueState::Running, QueueState::ShuttingDown)
                | (QueueState::ShuttingDown, QueueState::Terminated)
        );
        if !allowed {
            return Err(DomainError::InvalidStateTransition {
                from: self.to_string(),
                to: to.to_string(),
            });
        }
        Ok(to)
    }
}
