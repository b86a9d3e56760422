//! Funding-rate arbitrage keeper: binary entry point.
//!
//! Wires the adapter set, the Market State Cache's refresh loop, the Funding
//! Aggregator's periodic funding refresh loop, the Pairing/Single-Leg
//! Scheduler's tick loop, and the Liquidation Monitor's scan loop, then runs
//! until shut down. Exit codes follow the documented contract: 0 normal
//! shutdown, 1 fatal configuration error, 2 unrecoverable
//! adapter-initialization failure.

use anyhow::{Context, Result};
use funding_keeper::adapter::null::NullAdapter;
use funding_keeper::adapter::VenueAdapter;
use funding_keeper::cache::MarketStateCache;
use funding_keeper::config::EngineConfig;
use funding_keeper::diagnostics::Diagnostics;
use funding_keeper::funding::FundingAggregator;
use funding_keeper::hedged_close::HedgedCloseExecutor;
use funding_keeper::lock_service::LockService;
use funding_keeper::models::Venue;
use funding_keeper::monitor::LiquidationMonitor;
use funding_keeper::rate_limiter::RateLimiter;
use funding_keeper::scheduler::PairingScheduler;
use funding_keeper::symbol_registry::SymbolMappingRegistry;
use std::collections::HashMap;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> ExitCode {
    funding_keeper::telemetry::init();

    let adapters = match build_adapters() {
        Ok(a) => a,
        Err(e) => {
            tracing::error!(error = %e, "unrecoverable adapter-initialization failure");
            return ExitCode::from(2);
        }
    };

    match run(adapters).await {
        Ok(()) => ExitCode::from(0),
        Err(e) => {
            tracing::error!(error = %e, "fatal configuration error");
            ExitCode::from(1)
        }
    }
}

async fn run(adapters: HashMap<Venue, Arc<dyn VenueAdapter>>) -> Result<()> {
    info!("funding-rate arbitrage keeper starting");

    let config = EngineConfig::from_env();
    let cache = Arc::new(MarketStateCache::new(adapters));

    for venue in Venue::ALL {
        if let Err(e) = cache.refresh_venue(venue).await {
            warn!(%venue, error = %e, "initial refresh failed for venue, will retry on schedule");
        }
    }

    let registry = Arc::new(SymbolMappingRegistry::new(Arc::new(cache.adapters().clone())));
    if let Some(path) = &config.symbol_mapping_snapshot_path {
        if let Err(e) = registry.load_snapshot(path).await {
            warn!(error = %e, "no usable symbol mapping snapshot on disk, discovering fresh");
        }
    }
    registry
        .discover_common_assets()
        .await
        .context("symbol discovery failed")?;
    if let Some(path) = &config.symbol_mapping_snapshot_path {
        if let Err(e) = registry.save_snapshot(path).await {
            warn!(error = %e, "failed to persist symbol mapping snapshot");
        }
    }

    let diagnostics = Diagnostics::new();
    let locks = Arc::new(LockService::new());
    let rate_limiter = Arc::new(RateLimiter::new(&config.rate_limiter));

    let funding = Arc::new(FundingAggregator::new(
        cache.clone(),
        registry,
        diagnostics.clone(),
        config.require_open_interest,
        config.opportunity_batch_size,
        config.opportunity_batch_pause,
    ));

    let hedged_close = Arc::new(HedgedCloseExecutor::new(
        cache.clone(),
        locks.clone(),
        rate_limiter.clone(),
        diagnostics.clone(),
        config.adapter_call_deadline,
    ));

    let scheduler = Arc::new(PairingScheduler::new(
        cache.clone(),
        funding.clone(),
        locks,
        rate_limiter,
        hedged_close.clone(),
        diagnostics.clone(),
        config.clone(),
    ));

    let monitor = Arc::new(LiquidationMonitor::new(
        cache.clone(),
        hedged_close,
        diagnostics,
        config.clone(),
    ));

    let _refresh_handle = cache.spawn_refresh_loop(
        config.refresh_interval,
        config.stale_after,
        config.hard_refresh_interval,
    );
    let _funding_refresh_handle = funding.clone().spawn_refresh_loop(config.funding_refresh_interval);
    let _monitor_handle = monitor.spawn();

    info!("engine running");
    let mut tick = tokio::time::interval(config.scheduler_tick_interval);
    loop {
        tick.tick().await;
        scheduler.tick().await;
    }
}

/// Builds the adapter set. Real HTTP/WS adapters for Hyperliquid/Lighter/
/// Aster/Extended are out of scope (spec §1); every venue falls back to
/// `NullAdapter` so the engine boots even with nothing configured, and a
/// future concrete adapter only has to be inserted here.
fn build_adapters() -> Result<HashMap<Venue, Arc<dyn VenueAdapter>>> {
    let mut adapters: HashMap<Venue, Arc<dyn VenueAdapter>> = HashMap::new();
    for venue in Venue::ALL {
        adapters.insert(venue, Arc::new(NullAdapter::new(venue)));
    }
    Ok(adapters)
}
