use crate::config::FolioConfig;
use crate::http::{self, AppState, HttpCache};
use anyhow::Result;
use folio_client::CmsClient;
use folio_core::{ContentCache, DynSource};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;

pub async fn run(config: FolioConfig) -> Result<()> {
    let errors = config.validate();
    if !errors.is_empty() {
        anyhow::bail!("Invalid configuration:\n  - {}", errors.join("\n  - "));
    }

    info!("Starting Folio v{}", env!("CARGO_PKG_VERSION"));

    let client = CmsClient::new(config.cms_config())?;
    info!("Content source: {}", client.endpoint());

    let source: DynSource = Arc::new(client);
    let cache: HttpCache = ContentCache::new(source, config.cache_config());
    info!(
        "Cache ready (ttl: {}s, singleflight: {})",
        config.cache.ttl_secs, config.cache.dedupe_in_flight
    );

    let stats_task = spawn_stats_logger(cache.clone(), config.server.stats_log_interval_secs);

    let state = AppState::new(cache, config.server.webhook_secret.clone());
    let app = http::create_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let addr = config.server.http_addr;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("HTTP server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if let Some(task) = stats_task {
        task.abort();
    }
    info!("Folio stopped");

    Ok(())
}

/// Periodically log a one-line cache summary. `interval_secs == 0` disables it.
fn spawn_stats_logger(cache: HttpCache, interval_secs: u64) -> Option<JoinHandle<()>> {
    if interval_secs == 0 {
        return None;
    }

    let interval = Duration::from_secs(interval_secs);
    Some(tokio::spawn(async move {
        loop {
            tokio::time::sleep(interval).await;
            info!("Cache: {}", cache.stats().summary());
        }
    }))
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received, terminating...");
}
