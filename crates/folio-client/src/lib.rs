//! HTTP content source for Sanity-style CMS query APIs.
//!
//! [`CmsClient`] implements [`ContentSource`] so it can sit directly behind a
//! [`folio_core::ContentCache`].
//!
//! # Example
//! ```rust,no_run
//! use folio_client::{CmsClient, CmsConfig};
//! use folio_core::{CacheConfig, ContentCache};
//!
//! #[tokio::main]
//! async fn main() -> folio_core::Result<()> {
//!     let client = CmsClient::new(CmsConfig::new("abc123", "production"))?;
//!     let cache = ContentCache::new(client, CacheConfig::default());
//!
//!     let podcasts = cache.fetch("*[_type=='podcast'] | order(date desc)[0...12]", None).await;
//!     println!("{:?}", podcasts.status());
//!     Ok(())
//! }
//! ```
use async_trait::async_trait;
use folio_core::{ContentSource, FolioError, QueryParams, Result};
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

pub const DEFAULT_API_VERSION: &str = "2024-01-01";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Connection settings for a CMS project.
#[derive(Debug, Clone)]
pub struct CmsConfig {
    pub project_id: String,
    pub dataset: String,
    /// Dated API version, with or without the leading `v`.
    pub api_version: String,
    /// Read token. Authenticated reads always go to the live API.
    pub token: Option<String>,
    /// Read from the edge cache host when no token is set.
    pub use_cdn: bool,
    pub timeout: Duration,
    /// Replaces `https://{project_id}.api.sanity.io` (self-hosted gateways, tests).
    pub base_url: Option<String>,
}

impl CmsConfig {
    pub fn new(project_id: impl Into<String>, dataset: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            dataset: dataset.into(),
            api_version: DEFAULT_API_VERSION.to_string(),
            token: None,
            use_cdn: true,
            timeout: DEFAULT_TIMEOUT,
            base_url: None,
        }
    }

    pub fn with_api_version(mut self, version: impl Into<String>) -> Self {
        self.api_version = version.into();
        self
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn with_cdn(mut self, use_cdn: bool) -> Self {
        self.use_cdn = use_cdn;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.base_url.is_none() && self.project_id.trim().is_empty() {
            return Err(FolioError::Validation("project_id must be set".into()));
        }

        if self.dataset.is_empty()
            || !self
                .dataset
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-')
        {
            return Err(FolioError::Validation(format!(
                "dataset {:?} must be non-empty lowercase letters, digits, '_' or '-'",
                self.dataset
            )));
        }

        if self.api_version.trim_start_matches('v').is_empty() {
            return Err(FolioError::Validation("api_version must be set".into()));
        }

        if self.timeout.is_zero() {
            return Err(FolioError::Validation("timeout must be > 0".into()));
        }

        Ok(())
    }

    /// Full query endpoint URL.
    pub fn endpoint(&self) -> String {
        let base = match &self.base_url {
            Some(url) => url.trim_end_matches('/').to_string(),
            None => {
                let host = if self.use_cdn && self.token.is_none() {
                    "apicdn"
                } else {
                    "api"
                };
                format!("https://{}.{}.sanity.io", self.project_id, host)
            }
        };

        format!(
            "{}/v{}/data/query/{}",
            base,
            self.api_version.trim_start_matches('v'),
            self.dataset
        )
    }
}

/// Query-string pairs for one request: the query itself plus one
/// JSON-encoded `$name` entry per parameter.
pub fn query_pairs(query: &str, params: &QueryParams) -> Vec<(String, String)> {
    let mut pairs = Vec::with_capacity(params.len() + 1);
    pairs.push(("query".to_string(), query.to_string()));
    for (name, value) in params {
        pairs.push((format!("${}", name), value.to_string()));
    }
    pairs
}

#[derive(Deserialize)]
struct ErrorResponse {
    error: ErrorBody,
}

#[derive(Deserialize)]
struct ErrorBody {
    description: Option<String>,
    #[serde(rename = "type")]
    kind: Option<String>,
}

/// Turn an HTTP status and body into the query result or an error.
pub fn parse_response(status: u16, body: &str) -> Result<Value> {
    if !(200..300).contains(&status) {
        let message = match serde_json::from_str::<ErrorResponse>(body) {
            Ok(ErrorResponse { error }) => match (error.kind, error.description) {
                (Some(kind), Some(desc)) => format!("{}: {}", kind, desc),
                (None, Some(desc)) => desc,
                (Some(kind), None) => kind,
                (None, None) => truncate(body),
            },
            Err(_) => truncate(body),
        };
        return Err(FolioError::Status { status, message });
    }

    // `result: null` is a valid answer (e.g. `*[_id == $id][0]` with no match).
    let mut parsed: serde_json::Map<String, Value> = serde_json::from_str(body)?;
    parsed
        .remove("result")
        .ok_or_else(|| FolioError::Source("response has no result field".into()))
}

fn truncate(body: &str) -> String {
    const MAX: usize = 200;
    match body.char_indices().nth(MAX) {
        Some((idx, _)) => format!("{}…", &body[..idx]),
        None => body.to_string(),
    }
}

/// A [`ContentSource`] backed by the CMS HTTP query API.
pub struct CmsClient {
    http: reqwest::Client,
    config: CmsConfig,
    endpoint: String,
}

impl CmsClient {
    pub fn new(config: CmsConfig) -> Result<Self> {
        config.validate()?;

        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(concat!("folio/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| FolioError::Transport(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http,
            endpoint: config.endpoint(),
            config,
        })
    }

    pub fn config(&self) -> &CmsConfig {
        &self.config
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl ContentSource for CmsClient {
    async fn query(&self, query: &str, params: &QueryParams) -> Result<Value> {
        debug!(dataset = %self.config.dataset, params = params.len(), "cms query");

        let mut request = self.http.get(&self.endpoint).query(&query_pairs(query, params));
        if let Some(token) = &self.config.token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| FolioError::Transport(e.to_string()))?;
        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| FolioError::Transport(e.to_string()))?;

        parse_response(status, &body)
    }

    fn name(&self) -> &str {
        "cms"
    }
}
