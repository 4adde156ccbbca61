use crate::error::{FolioError, Result};
use std::time::Duration;

/// Default freshness window.
pub const DEFAULT_TTL: Duration = Duration::from_secs(5 * 60);

/// Configuration for a [`ContentCache`](crate::ContentCache)
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// How long an entry is served without asking the source. Default: 5 minutes.
    pub ttl: Duration,

    /// Coalesce concurrent misses for the same key into one source call.
    /// Default: true.
    pub dedupe_in_flight: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl: DEFAULT_TTL,
            dedupe_in_flight: true,
        }
    }
}

impl CacheConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn with_dedupe_in_flight(mut self, enabled: bool) -> Self {
        self.dedupe_in_flight = enabled;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.ttl.is_zero() {
            return Err(FolioError::Validation("ttl must be > 0".into()));
        }

        Ok(())
    }
}
