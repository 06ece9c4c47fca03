/**
 * Configuration constants for cross-namespace caches and their watch loops
 */
use std::time::Duration;
use tracing::warn;

/// Default interval between full relists of a watch source
pub const DEFAULT_RESYNC_SECONDS: u64 = 600;

/// Interval between `has_synced` polls while waiting for caches to sync
pub const SYNC_POLL_INTERVAL_MILLIS: u64 = 100;

/// Maximum backoff time in seconds between restart attempts
pub const MAX_BACKOFF_SECONDS: u64 = 60;

/// Initial backoff time in seconds
pub const INITIAL_BACKOFF_SECONDS: u64 = 1;

/// Watch stream timeout in seconds (294 vs 300 to allow 6 seconds for graceful shutdown)
pub const WATCH_TIMEOUT_SECONDS: u32 = 294;

/// Shortest sync poll interval; a zero interval would spin
pub const MIN_SYNC_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Shortest restart backoff; doubling a zero backoff would never grow
pub const MIN_BACKOFF: Duration = Duration::from_millis(10);

/// Environment variable overriding the resync interval (seconds, 0 disables)
pub const RESYNC_ENV: &str = "XNS_CACHE_RESYNC_SECONDS";

/// Environment variable overriding the sync poll interval (milliseconds)
pub const SYNC_POLL_ENV: &str = "XNS_CACHE_SYNC_POLL_MILLIS";

/// Runtime configuration shared by a registry and every watch source it creates
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// How often a source drops its watch and relists; zero disables resync
    pub resync_period: Duration,
    /// Poll interval used by `wait_for_cache_sync`
    pub sync_poll_interval: Duration,
    /// Server-side timeout requested for each watch call
    pub watch_timeout_secs: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            resync_period: Duration::from_secs(DEFAULT_RESYNC_SECONDS),
            sync_poll_interval: Duration::from_millis(SYNC_POLL_INTERVAL_MILLIS),
            watch_timeout_secs: WATCH_TIMEOUT_SECONDS,
            initial_backoff: Duration::from_secs(INITIAL_BACKOFF_SECONDS),
            max_backoff: Duration::from_secs(MAX_BACKOFF_SECONDS),
        }
    }
}

impl CacheConfig {
    /// Defaults, overridden by `XNS_CACHE_*` environment variables when set.
    /// Unparseable values are logged and ignored.
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(secs) = read_env_u64(RESYNC_ENV) {
            config.resync_period = Duration::from_secs(secs);
        }
        if let Some(millis) = read_env_u64(SYNC_POLL_ENV).filter(|m| *m > 0) {
            config.sync_poll_interval = Duration::from_millis(millis);
        }
        config
    }

    #[must_use]
    pub const fn with_resync_period(mut self, resync_period: Duration) -> Self {
        self.resync_period = resync_period;
        self
    }

    /// Intervals below [`MIN_SYNC_POLL_INTERVAL`] are raised to it
    #[must_use]
    pub const fn with_sync_poll_interval(mut self, interval: Duration) -> Self {
        self.sync_poll_interval = at_least(interval, MIN_SYNC_POLL_INTERVAL);
        self
    }

    /// `initial` is raised to [`MIN_BACKOFF`] and `max` to `initial`
    #[must_use]
    pub const fn with_backoff(mut self, initial: Duration, max: Duration) -> Self {
        self.initial_backoff = at_least(initial, MIN_BACKOFF);
        self.max_backoff = at_least(max, self.initial_backoff);
        self
    }

    /// Poll interval for sync waits, never below [`MIN_SYNC_POLL_INTERVAL`]
    #[must_use]
    pub const fn sync_poll(&self) -> Duration {
        at_least(self.sync_poll_interval, MIN_SYNC_POLL_INTERVAL)
    }

    /// `(initial, max)` restart backoff, never below [`MIN_BACKOFF`]
    #[must_use]
    pub const fn retry_backoff(&self) -> (Duration, Duration) {
        let initial = at_least(self.initial_backoff, MIN_BACKOFF);
        (initial, at_least(self.max_backoff, initial))
    }
}

const fn at_least(value: Duration, floor: Duration) -> Duration {
    if value.as_nanos() < floor.as_nanos() { floor } else { value }
}

fn read_env_u64(name: &str) -> Option<u64> {
    let raw = std::env::var(name).ok()?;
    match raw.trim().parse::<u64>() {
        Ok(value) => Some(value),
        Err(e) => {
            warn!("Ignoring {}={:?}: {}", name, raw, e);
            None
        }
    }
}

/// Validate configuration constants at compile time
const _: () = {
    assert!(SYNC_POLL_INTERVAL_MILLIS > 0, "SYNC_POLL_INTERVAL_MILLIS must be greater than 0");
    assert!(MAX_BACKOFF_SECONDS > 0, "MAX_BACKOFF_SECONDS must be greater than 0");
    assert!(INITIAL_BACKOFF_SECONDS > 0, "INITIAL_BACKOFF_SECONDS must be greater than 0");
    assert!(INITIAL_BACKOFF_SECONDS <= MAX_BACKOFF_SECONDS, "INITIAL_BACKOFF_SECONDS must not exceed MAX_BACKOFF_SECONDS");
    assert!(WATCH_TIMEOUT_SECONDS > 0, "WATCH_TIMEOUT_SECONDS must be greater than 0");
};
