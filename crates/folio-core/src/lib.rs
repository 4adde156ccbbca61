//! Read-through content cache for headless CMS queries.
//!
//! [`ContentCache`] sits in front of a [`ContentSource`] and answers each
//! `(query, params)` pair from memory while it is fresh. Stale entries are
//! refreshed on the next lookup, and if the refresh fails the old data is
//! served instead of an error.
pub mod cache;
pub mod config;
pub mod error;
pub mod key;
pub mod source;
pub mod stats;

pub use cache::{ContentCache, FetchStatus, Fetched};
pub use config::{CacheConfig, DEFAULT_TTL};
pub use error::{FolioError, Result};
pub use key::{canonical_json, CacheKey, QueryParams};
pub use source::{ContentSource, DynSource};
pub use stats::{CacheStats, EntrySummary};
