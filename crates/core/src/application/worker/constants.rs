// Worker constants (no magic values)
use std::time::Duration;

/// How often the boost supervisor samples buffer occupancy (100ms)
pub const BOOST_CHECK_INTERVAL: Duration = Duration::from_millis(100);

/// Sleep after a handler panic before the worker pulls again (500ms)
pub const ERROR_RECOVERY_SLEEP_DURATION: Duration = Duration::from_millis(500);

/// Fallback poll of the durable store when no overflow notification arrives (1s)
pub const STORE_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Records read from the durable store per pump round
pub const STORE_PUMP_CHUNK: usize = 32;

/// Poll interval while waiting for a flush to complete (20ms)
pub const FLUSH_POLL_INTERVAL: Duration = Duration::from_millis(20);
