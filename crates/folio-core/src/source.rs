use crate::error::Result;
use crate::key::QueryParams;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

/// A remote content repository that can answer structured queries.
///
/// The cache treats every `Err` the same way: no status-code or error-kind
/// branching happens above this trait.
#[async_trait]
pub trait ContentSource: Send + Sync {
    /// Execute `query` with `params` substituted, returning the raw result.
    async fn query(&self, query: &str, params: &QueryParams) -> Result<Value>;

    /// Source identifier (used in log lines).
    fn name(&self) -> &str;
}

#[async_trait]
impl<S: ContentSource + ?Sized> ContentSource for Arc<S> {
    async fn query(&self, query: &str, params: &QueryParams) -> Result<Value> {
        (**self).query(query, params).await
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}

#[async_trait]
impl<S: ContentSource + ?Sized> ContentSource for Box<S> {
    async fn query(&self, query: &str, params: &QueryParams) -> Result<Value> {
        (**self).query(query, params).await
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}

/// Shared trait object, for callers that pick the source at runtime.
pub type DynSource = Arc<dyn ContentSource>;
