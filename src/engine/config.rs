//! Engine tuning knobs.
//!
//! Populated from `spurgo.toml` via [`crate::config::Settings`]; the
//! defaults here keep the engine usable without a config file.

use std::time::Duration;

const DEFAULT_RING_CAPACITY: usize = 4096;
const DEFAULT_SCAN_LIMIT: u64 = 256;
const DEFAULT_SCAN_INTERVAL: Duration = Duration::from_secs(30);
const DEFAULT_FETCH_LIMIT: usize = 128;
const DEFAULT_FETCH_MAX_BYTES: u64 = 1024 * 1024;
const DEFAULT_DISPATCH_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_BACKOFF_BASE: Duration = Duration::from_millis(100);
const DEFAULT_BACKOFF_CAP: Duration = Duration::from_secs(10);
const DEFAULT_MAX_TOTAL_EVENTS: u64 = 100_000;
const DEFAULT_DELETE_BATCH_SIZE: u64 = 64;
const DEFAULT_RETENTION_INTERVAL: Duration = Duration::from_secs(5);

/// Sequencer pass tuning.
#[derive(Debug, Clone)]
pub struct SequencerConfig {
    /// How many sequenced events to reload into the ring on a cold start
    /// or after a sequence conflict. Matches the ring capacity.
    pub reload_limit: u64,
    /// Page size for scanning unsequenced events.
    pub scan_limit: u64,
    /// Fallback scan period for producers that never signal.
    pub scan_interval: Duration,
    pub backoff_base: Duration,
    pub backoff_cap: Duration,
}

impl Default for SequencerConfig {
    fn default() -> Self {
        Self {
            reload_limit: DEFAULT_RING_CAPACITY as u64,
            scan_limit: DEFAULT_SCAN_LIMIT,
            scan_interval: DEFAULT_SCAN_INTERVAL,
            backoff_base: DEFAULT_BACKOFF_BASE,
            backoff_cap: DEFAULT_BACKOFF_CAP,
        }
    }
}

/// Per-server retry consumer tuning.
#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    /// Maximum events per fetched batch.
    pub fetch_limit: usize,
    /// Maximum payload bytes per fetched batch; one oversized event is
    /// still delivered alone.
    pub fetch_max_bytes: u64,
    /// Upper bound on a single dispatcher call.
    pub dispatch_timeout: Duration,
    pub backoff_base: Duration,
    pub backoff_cap: Duration,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            fetch_limit: DEFAULT_FETCH_LIMIT,
            fetch_max_bytes: DEFAULT_FETCH_MAX_BYTES,
            dispatch_timeout: DEFAULT_DISPATCH_TIMEOUT,
            backoff_base: DEFAULT_BACKOFF_BASE,
            backoff_cap: DEFAULT_BACKOFF_CAP,
        }
    }
}

/// Retention job tuning.
#[derive(Debug, Clone)]
pub struct RetentionConfig {
    /// Soft cap on the number of live sequenced events; nothing is
    /// deleted while the log stays at or under it.
    pub max_total_events: u64,
    /// Upper bound on how far one pass may advance the deletion cutoff.
    pub delete_batch_size: u64,
    /// Fallback period between passes; offset commits also nudge the job.
    pub interval: Duration,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            max_total_events: DEFAULT_MAX_TOTAL_EVENTS,
            delete_batch_size: DEFAULT_DELETE_BATCH_SIZE,
            interval: DEFAULT_RETENTION_INTERVAL,
        }
    }
}

/// Everything [`super::Relay::start`] needs beyond the collaborators.
#[derive(Debug, Clone, Default)]
pub struct RelayConfig {
    pub sequencer: SequencerConfig,
    pub consumer: ConsumerConfig,
    pub retention: RetentionConfig,
}

impl RelayConfig {
    /// Ring capacity, tied to the sequencer reload limit.
    pub fn ring_capacity(&self) -> usize {
        self.sequencer.reload_limit.max(1) as usize
    }
}

impl From<&crate::config::Settings> for RelayConfig {
    fn from(settings: &crate::config::Settings) -> Self {
        Self {
            sequencer: SequencerConfig {
                reload_limit: settings.engine.ring_capacity as u64,
                scan_limit: settings.engine.scan_limit,
                scan_interval: Duration::from_secs(settings.engine.scan_interval_secs),
                backoff_base: Duration::from_millis(settings.engine.backoff_base_ms),
                backoff_cap: Duration::from_millis(settings.engine.backoff_cap_ms),
            },
            consumer: ConsumerConfig {
                fetch_limit: settings.consumer.fetch_limit,
                fetch_max_bytes: settings.consumer.fetch_max_bytes,
                dispatch_timeout: Duration::from_secs(settings.consumer.dispatch_timeout_secs),
                backoff_base: Duration::from_millis(settings.engine.backoff_base_ms),
                backoff_cap: Duration::from_millis(settings.engine.backoff_cap_ms),
            },
            retention: RetentionConfig {
                max_total_events: settings.retention.max_total_events,
                delete_batch_size: settings.retention.delete_batch_size,
                interval: Duration::from_secs(settings.retention.interval_secs),
            },
        }
    }
}
