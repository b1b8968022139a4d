// feedsync-core/src/bin/feedsync.rs
// Process wiring: checks, storage, pipelines, signal-driven shutdown.

use anyhow::{Context, Result};
use chrono::Utc;
use dotenvy::dotenv;
use std::path::Path;
use std::sync::Arc;
use tracing::{error, info, warn};

use feedsync_common::KlineRepository;
use feedsync_core::config::Settings;
use feedsync_core::exchange::{BinanceRest, StreamSubscriber};
use feedsync_core::logging::init_tracing;
use feedsync_core::service::{MarketDataService, Supervisor};

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();

    let mut settings = Settings::new().context("failed to load settings")?;
    settings.validate().context("invalid settings")?;
    init_tracing(&settings.logging)?;

    info!(
        symbol = %settings.sync.symbol,
        interval = %settings.sync.kline_interval,
        eligibility = ?settings.sync.candle_eligibility,
        "feedsync starting"
    );

    let rest = Arc::new(BinanceRest::new(&settings.exchange).context("failed to build REST client")?);
    rest.ping().await.context("exchange ping failed")?;
    let server_time = rest.server_time().await.context("server time request failed")?;
    info!(
        server_time,
        offset_ms = server_time - Utc::now().timestamp_millis(),
        "exchange reachable"
    );

    ensure_db_dir(&settings.database.url)?;
    let repository = KlineRepository::connect(&settings.database.url, settings.database.max_connections)
        .await
        .context("failed to open kline store")?;
    repository.ping().await.context("kline store ping failed")?;
    repository
        .ensure_klines_table()
        .await
        .context("failed to prepare klines table")?;

    let supervisor = Supervisor::new();
    let service = MarketDataService::new(
        rest,
        Arc::new(repository),
        StreamSubscriber::new(&settings.exchange.ws_url),
        settings.sync.clone(),
        supervisor.clone(),
    );

    let pipelines = match service.start_all().await {
        Ok(pipelines) => pipelines,
        Err(e) => {
            error!("pipeline startup failed: {}", e);
            supervisor.shutdown();
            supervisor.wait().await;
            return Err(e).context("startup aborted");
        }
    };

    tokio::select! {
        _ = shutdown_signal() => {}
        _ = supervisor.wait() => {
            warn!("every pipeline stopped on its own");
        }
    }

    supervisor.shutdown();
    supervisor.wait().await;
    pipelines.log_summary();
    info!("feedsync stopped");
    Ok(())
}

/// `sqlite:` file URLs need their parent directory to exist.
fn ensure_db_dir(url: &str) -> Result<()> {
    let path = url.trim_start_matches("sqlite://").trim_start_matches("sqlite:");
    if path.starts_with(':') {
        return Ok(());
    }
    let path = path.split('?').next().unwrap_or(path);
    if let Some(parent) = Path::new(path).parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("received Ctrl+C, shutting down"),
        () = terminate => info!("received SIGTERM, shutting down"),
    }
}
