use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Point-in-time view of a cache, for diagnostics and tests.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheStats {
    /// Entries currently held, fresh or stale.
    pub entries: usize,

    /// Entries still inside the freshness window.
    pub fresh_entries: usize,

    /// Source calls currently running under singleflight.
    pub in_flight: usize,

    #[serde(with = "duration_secs")]
    pub ttl: Duration,

    /// Lookups answered from a fresh entry.
    pub hits: u64,

    /// Lookups that needed the source.
    pub misses: u64,

    /// Misses that joined a call already running for the same key.
    pub coalesced: u64,

    /// Calls actually issued to the source.
    pub source_calls: u64,

    /// Failed refreshes answered with old data.
    pub stale_served: u64,

    /// Failed refreshes with nothing to fall back on.
    pub unavailable: u64,

    /// Entries removed by invalidation.
    pub invalidated: u64,

    #[serde(with = "duration_secs_opt")]
    pub oldest_entry_age: Option<Duration>,

    #[serde(with = "duration_secs_opt")]
    pub newest_entry_age: Option<Duration>,
}

impl CacheStats {
    /// Fraction of lookups served without a source call.
    pub fn hit_ratio(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }

    /// Get a summary string for logging
    pub fn summary(&self) -> String {
        format!(
            "{} entries ({} fresh, {} in flight) | {} hits, {} misses ({} coalesced), \
             {} source calls | {} stale, {} unavailable | {} invalidated",
            self.entries,
            self.fresh_entries,
            self.in_flight,
            self.hits,
            self.misses,
            self.coalesced,
            self.source_calls,
            self.stale_served,
            self.unavailable,
            self.invalidated
        )
    }
}

/// One cached entry as seen from outside.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntrySummary {
    pub key: String,
    #[serde(with = "duration_secs")]
    pub age: Duration,
    pub fresh: bool,
    /// Wall-clock time of the fetch that produced the entry.
    pub fetched_at: DateTime<Utc>,
}

/// Monotonic counters shared by every clone of a cache.
#[derive(Debug, Default)]
pub(crate) struct CacheCounters {
    pub hits: AtomicU64,
    pub misses: AtomicU64,
    pub coalesced: AtomicU64,
    pub source_calls: AtomicU64,
    pub stale_served: AtomicU64,
    pub unavailable: AtomicU64,
    pub invalidated: AtomicU64,
}

impl CacheCounters {
    pub fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    pub fn get(counter: &AtomicU64) -> u64 {
        counter.load(Ordering::Relaxed)
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_secs_f64().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = f64::deserialize(deserializer)?;
        from_secs(secs)
    }

    /// Negative values clamp to zero; infinite or out-of-range ones are rejected.
    pub(super) fn from_secs<E: serde::de::Error>(secs: f64) -> Result<Duration, E> {
        Duration::try_from_secs_f64(secs.max(0.0))
            .map_err(|e| E::custom(format!("invalid duration {}: {}", secs, e)))
    }
}

mod duration_secs_opt {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.map(|d| d.as_secs_f64()).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = Option::<f64>::deserialize(deserializer)?;
        secs.map(super::duration_secs::from_secs).transpose()
    }
}
