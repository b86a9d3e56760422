//! End-to-end scenario tests run against `MockAdapter`, covering the
//! documented scenarios not already exercised by a module's own unit tests
//! (zombie-order detection end-to-end through a full scheduler tick, and the
//! hedged partial-close fraction arithmetic).

use funding_keeper::adapter::mock::MockAdapter;
use funding_keeper::adapter::VenueAdapter;
use funding_keeper::cache::MarketStateCache;
use funding_keeper::config::{EngineConfig, RateLimiterConfig};
use funding_keeper::diagnostics::Diagnostics;
use funding_keeper::funding::FundingAggregator;
use funding_keeper::hedged_close::HedgedCloseExecutor;
use funding_keeper::lock_service::LockService;
use funding_keeper::models::{OrderRequest, OrderType, PairedPosition, Position, Side, TimeInForce, Venue};
use funding_keeper::rate_limiter::{Priority, RateLimiter};
use funding_keeper::scheduler::PairingScheduler;
use funding_keeper::symbol_registry::SymbolMappingRegistry;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

fn position(venue: Venue, side: Side, size: f64) -> Position {
    let now = Utc::now();
    Position {
        venue,
        normalized: "MEGA".into(),
        side,
        size,
        entry_price: 10.0,
        mark_price: 10.0,
        unrealized_pnl: 0.0,
        leverage: Some(5.0),
        liquidation_price: None,
        margin_used: None,
        opened_at: now,
        last_updated: now,
    }
}

fn rate_limiter() -> Arc<RateLimiter> {
    let mut cfg = HashMap::new();
    for v in Venue::ALL {
        cfg.insert(v, RateLimiterConfig { bucket_size: 100, refill_per_sec: 100.0 });
    }
    Arc::new(RateLimiter::new(&cfg))
}

/// S2 — same-venue zombie: a SHORT position on LIGHTER plus an unrelated open
/// LONG order on LIGHTER for the same symbol has no counterpart on another
/// venue, so a full scheduler tick must cancel it.
#[tokio::test]
async fn zombie_order_on_same_venue_is_cancelled_by_a_tick() {
    let lighter = MockAdapter::new(Venue::Lighter);
    lighter.set_position(position(Venue::Lighter, Side::Short, 158.0));
    lighter.set_auto_fill(false);
    lighter
        .place_order(OrderRequest {
            normalized: "MEGA".into(),
            venue: Venue::Lighter,
            side: Side::Long,
            size: 158.0,
            price: Some(10.0),
            order_type: OrderType::Limit,
            reduce_only: false,
            tif: TimeInForce::Gtc,
        })
        .await
        .unwrap();
    assert_eq!(lighter.open_order_count("MEGA"), 1);

    let mut adapters: HashMap<Venue, Arc<dyn VenueAdapter>> = HashMap::new();
    adapters.insert(Venue::Lighter, lighter.clone());
    let cache = Arc::new(MarketStateCache::new(adapters));
    cache.refresh_venue(Venue::Lighter).await.unwrap();

    let registry = Arc::new(SymbolMappingRegistry::new(Arc::new(cache.adapters().clone())));
    let diagnostics = Diagnostics::new();
    let funding = Arc::new(FundingAggregator::new(
        cache.clone(),
        registry,
        diagnostics.clone(),
        false,
        5,
        Duration::from_millis(0),
    ));
    let locks = Arc::new(LockService::new());
    let rl = rate_limiter();
    let hedged_close = Arc::new(HedgedCloseExecutor::new(
        cache.clone(),
        locks.clone(),
        rl.clone(),
        diagnostics.clone(),
        Duration::from_secs(1),
    ));
    let scheduler = PairingScheduler::new(cache, funding, locks, rl, hedged_close, diagnostics, EngineConfig::default());

    scheduler.tick().await;

    assert_eq!(lighter.open_order_count("MEGA"), 0);
}

/// S5 — hedged partial close: closing 25% of a 200-unit pair leaves 150 on
/// each leg and reports both legs closed.
#[tokio::test]
async fn hedged_partial_close_leaves_the_expected_remainder_on_each_leg() {
    let hl = MockAdapter::new(Venue::Hyperliquid);
    hl.set_position(position(Venue::Hyperliquid, Side::Long, 200.0));
    let lighter = MockAdapter::new(Venue::Lighter);
    lighter.set_position(position(Venue::Lighter, Side::Short, 200.0));

    let mut adapters: HashMap<Venue, Arc<dyn VenueAdapter>> = HashMap::new();
    adapters.insert(Venue::Hyperliquid, hl.clone());
    adapters.insert(Venue::Lighter, lighter.clone());
    let cache = Arc::new(MarketStateCache::new(adapters));

    let locks = Arc::new(LockService::new());
    let executor = HedgedCloseExecutor::new(
        cache,
        locks,
        rate_limiter(),
        Diagnostics::new(),
        Duration::from_secs(1),
    );

    let paired = PairedPosition {
        normalized: "MEGA".into(),
        long: Some(position(Venue::Hyperliquid, Side::Long, 200.0)),
        short: Some(position(Venue::Lighter, Side::Short, 200.0)),
    };

    let result = executor
        .close_pair(&paired, 0.25, OrderType::Market, Priority::Normal, false, 1)
        .await
        .unwrap();

    assert!(result.long_closed);
    assert!(result.short_closed);
    assert!(result.errors.is_empty());

    let remaining_long = hl.get_position("MEGA").await.unwrap().unwrap();
    let remaining_short = lighter.get_position("MEGA").await.unwrap().unwrap();
    assert!((remaining_long.size - 150.0).abs() < 1e-9);
    assert!((remaining_short.size - 150.0).abs() < 1e-9);
}
