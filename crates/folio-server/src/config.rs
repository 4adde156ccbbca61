use folio_client::{CmsConfig, DEFAULT_API_VERSION};
use folio_core::CacheConfig;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

/// Environment variable that overrides `[cms].token`.
pub const TOKEN_ENV: &str = "FOLIO_CMS_TOKEN";

/// Contents of `folio.toml`. Every field has a default, so a partial file
/// (or none at all) is valid input.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FolioConfig {
    pub cms: CmsTomlConfig,
    pub cache: CacheTomlConfig,
    pub server: ServerTomlConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CmsTomlConfig {
    pub project_id: String,
    pub dataset: String,
    pub api_version: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    pub use_cdn: bool,
    pub timeout_secs: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
}

impl Default for CmsTomlConfig {
    fn default() -> Self {
        Self {
            project_id: String::new(),
            dataset: "production".into(),
            api_version: DEFAULT_API_VERSION.into(),
            token: None,
            use_cdn: true,
            timeout_secs: 10,
            base_url: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheTomlConfig {
    pub ttl_secs: u64,
    pub dedupe_in_flight: bool,
}

impl Default for CacheTomlConfig {
    fn default() -> Self {
        Self {
            ttl_secs: 300,
            dedupe_in_flight: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerTomlConfig {
    pub http_addr: SocketAddr,
    /// Shared secret expected in `x-folio-webhook-secret`. Unset disables the check.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub webhook_secret: Option<String>,
    /// Log a cache stats line this often. 0 disables.
    pub stats_log_interval_secs: u64,
}

impl Default for ServerTomlConfig {
    fn default() -> Self {
        Self {
            http_addr: SocketAddr::from(([0, 0, 0, 0], 3030)),
            webhook_secret: None,
            stats_log_interval_secs: 300,
        }
    }
}

impl FolioConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&text)?)
    }

    /// Load `path`, or the defaults when there is no file there. A file that
    /// exists but does not parse is an error.
    pub fn load_or_default(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            tracing::debug!("{} not found, using defaults", path.display());
            return Ok(Self::default());
        }
        Self::load(path).map_err(|e| anyhow::anyhow!("Failed to parse {}: {}", path.display(), e))
    }

    /// Apply environment overrides (currently only the CMS token).
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(token) = std::env::var(TOKEN_ENV) {
            if !token.is_empty() {
                self.cms.token = Some(token);
            }
        }
        self
    }

    /// Every problem found, empty when the config is usable.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if let Err(e) = self.cms_config().validate() {
            errors.push(format!("[cms] {}", e));
        }
        if let Err(e) = self.cache_config().validate() {
            errors.push(format!("[cache] {}", e));
        }
        if let Some(secret) = &self.server.webhook_secret {
            if secret.len() < 16 {
                errors.push("[server] webhook_secret must be at least 16 characters".into());
            }
        }

        errors
    }

    pub fn cms_config(&self) -> CmsConfig {
        let cms = &self.cms;
        let mut config = CmsConfig::new(&cms.project_id, &cms.dataset)
            .with_api_version(&cms.api_version)
            .with_cdn(cms.use_cdn)
            .with_timeout(Duration::from_secs(cms.timeout_secs));
        if let Some(token) = &cms.token {
            config = config.with_token(token);
        }
        if let Some(base_url) = &cms.base_url {
            config = config.with_base_url(base_url);
        }
        config
    }

    pub fn cache_config(&self) -> CacheConfig {
        CacheConfig::new()
            .with_ttl(Duration::from_secs(self.cache.ttl_secs))
            .with_dedupe_in_flight(self.cache.dedupe_in_flight)
    }
}
