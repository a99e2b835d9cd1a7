mod config;
mod error;
mod metrics;
mod rep;
mod store;
mod web;

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};

use crate::config::Config;
use crate::metrics::MetricsCounters;
use crate::rep::engine::RepEngine;
use crate::store::Store;
use crate::web::server::WebServer;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "teamtrust=info".into()),
        )
        .init();

    info!("🤝 teamtrust v{} starting...", env!("CARGO_PKG_VERSION"));

    // Load config
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "teamtrust.toml".to_string());

    let config = Config::load(&config_path)?;
    info!("Config loaded from {}", config_path);

    let config = Arc::new(config);

    // Load the persistence snapshot
    let store = Arc::new(Store::load(&config.store.path)?);
    let metrics = Arc::new(MetricsCounters::new());
    let engine = Arc::new(RepEngine::new(config.clone(), store.clone(), metrics.clone()));

    // Periodic snapshot reload - scores are recomputed per request, so a
    // swap is all it takes for new ratings to show up
    if config.store.reload_interval_secs > 0 {
        let reload_store = store.clone();
        let reload_metrics = metrics.clone();
        let interval_secs = config.store.reload_interval_secs;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs));
            ticker.tick().await; // first tick completes immediately
            loop {
                ticker.tick().await;
                match reload_store.reload() {
                    Ok(()) => {
                        reload_metrics.snapshot_reloads.fetch_add(1, Ordering::Relaxed);
                        info!("📥 Snapshot reloaded (generation {})", reload_store.generation());
                    }
                    Err(e) => {
                        reload_metrics.snapshot_reload_failures.fetch_add(1, Ordering::Relaxed);
                        warn!("Snapshot reload failed, keeping previous: {}", e);
                    }
                }
            }
        });
    } else {
        info!("Snapshot reload disabled");
    }

    // Serve the JSON API
    let web = WebServer::new(engine, config.clone());
    if let Err(e) = web.run().await {
        error!("Web server error: {}", e);
        return Err(e);
    }
    Ok(())
}
