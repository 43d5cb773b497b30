//! Timing and sizing knobs for a sync session.

use crate::local_changes::DEFAULT_LOCAL_WRITE_TTL;
use crate::notified::DEFAULT_NOTIFIED_CAPACITY;
use serde::{Deserialize, Deserializer, Serialize};
use std::time::Duration;

/// Shortest period a timer may be armed with.
const MIN_PERIOD_MS: u64 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Polling period in milliseconds (default: 10s)
    #[serde(
        default = "default_poll_interval_ms",
        deserialize_with = "deserialize_period_ms"
    )]
    pub poll_interval_ms: u64,

    /// Quiet period after a realtime event before refetching (default: 500ms)
    #[serde(
        default = "default_debounce_ms",
        deserialize_with = "deserialize_period_ms"
    )]
    pub debounce_ms: u64,

    /// How long a local write suppresses notifications for its echo (default: 15s)
    #[serde(default = "default_local_write_ttl_ms")]
    pub local_write_ttl_ms: u64,

    /// Maximum number of remembered notifications (default: 100)
    #[serde(default = "default_notified_capacity")]
    pub notified_capacity: usize,
}

fn deserialize_period_ms<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    let ms = u64::deserialize(deserializer)?;
    if ms < MIN_PERIOD_MS {
        return Err(serde::de::Error::custom(format!(
            "period must be at least {MIN_PERIOD_MS}ms"
        )));
    }
    Ok(ms)
}

fn default_poll_interval_ms() -> u64 {
    10_000
}

fn default_debounce_ms() -> u64 {
    500
}

fn default_local_write_ttl_ms() -> u64 {
    DEFAULT_LOCAL_WRITE_TTL.as_millis() as u64
}

fn default_notified_capacity() -> usize {
    DEFAULT_NOTIFIED_CAPACITY
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            debounce_ms: default_debounce_ms(),
            local_write_ttl_ms: default_local_write_ttl_ms(),
            notified_capacity: default_notified_capacity(),
        }
    }
}

impl SyncConfig {
    /// Polling period, never shorter than 1ms.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(MIN_PERIOD_MS))
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms.max(MIN_PERIOD_MS))
    }

    pub fn local_write_ttl(&self) -> Duration {
        Duration::from_millis(self.local_write_ttl_ms)
    }
}
