mod analyzer;
mod api;
mod config;
mod db;
mod error;
mod fetcher;
mod jobs;
mod limiter;
mod state;
mod trading;
mod types;

use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::api::health::UpstreamHealth;
use crate::api::latency::LatencyStats;
use crate::api::routes::{router, ApiState};
use crate::config::Config;
use crate::db::MetadataStore;
use crate::error::Result;
use crate::fetcher::MarketClient;
use crate::jobs::{JobSweeper, Orchestrator};
use crate::limiter::RateLimiter;
use crate::state::JobRegistry;
use crate::trading::TradeDesk;

#[tokio::main]
async fn main() {
    let cfg = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Config error: {e}");
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(&cfg.log_level))
        .init();

    if let Err(e) = run(cfg).await {
        error!("Fatal error: {e}");
        std::process::exit(1);
    }
}

async fn run(cfg: Config) -> Result<()> {
    // --- Order metadata store ---
    let metadata = MetadataStore::open(&cfg.db_path).await?;

    // --- Upstream client ---
    let limiter = RateLimiter::new(cfg.requests_per_second);
    let health = Arc::new(UpstreamHealth::new());
    let latency = Arc::new(LatencyStats::new());
    let client = Arc::new(MarketClient::new(
        &cfg,
        Arc::clone(&limiter),
        Arc::clone(&health),
        Arc::clone(&latency),
    )?);
    info!(
        "Upstream {} | {} req/s, {} in flight",
        cfg.upstream_api_url,
        cfg.requests_per_second,
        limiter.status().max_in_flight,
    );

    // --- Jobs ---
    let registry = JobRegistry::new();
    if cfg.tradeable_marker.is_empty() {
        warn!("TRADEABLE_MARKER is empty: every submitted item will be analysed");
    }
    let orchestrator = Arc::new(Orchestrator::new(
        Arc::clone(&registry),
        client.clone(),
        &cfg.tradeable_marker,
    ));

    // Job sweeper (background, every 60s)
    if cfg.job_retention_secs > 0 {
        let sweeper = JobSweeper::new(
            Arc::clone(&registry),
            Duration::from_secs(cfg.job_retention_secs),
        );
        tokio::spawn(async move { sweeper.run().await });
    } else {
        info!("JOB_RETENTION_SECS=0: finished jobs are kept for the life of the process");
    }

    // HTTP API server
    let trade_desk = TradeDesk::new(Arc::clone(&client), metadata.clone());
    let api_state = ApiState {
        orchestrator,
        trade_desk,
        client,
        limiter,
        health,
        latency,
        metadata,
    };
    let app = router(api_state);
    let bind_addr = format!("0.0.0.0:{}", cfg.api_port);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!("HTTP API listening on {bind_addr}");

    axum::serve(listener, app).await?;

    Ok(())
}
