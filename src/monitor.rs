//! Liquidation Monitor (spec §4.J, component J).
//!
//! Grounded on `main.rs`'s periodic-task-plus-per-source-isolation pattern
//! (one venue's failure never suppresses the scan for the others) and on
//! `scrapers::polymarket_api::RateLimiter`'s exponential backoff constants,
//! generalized here to the 1s/2s/4s schedule spec §4.J prescribes.

use crate::cache::MarketStateCache;
use crate::config::EngineConfig;
use crate::diagnostics::{DecisionEvent, Diagnostics};
use crate::hedged_close::HedgedCloseExecutor;
use crate::liquidation;
use crate::models::{OrderType, PairedPosition, Position, Side};
use crate::rate_limiter::Priority;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub struct LiquidationMonitor {
    cache: Arc<MarketStateCache>,
    hedged_close: Arc<HedgedCloseExecutor>,
    diagnostics: Diagnostics,
    config: EngineConfig,
    thread_seq: AtomicU64,
}

impl LiquidationMonitor {
    pub fn new(
        cache: Arc<MarketStateCache>,
        hedged_close: Arc<HedgedCloseExecutor>,
        diagnostics: Diagnostics,
        config: EngineConfig,
    ) -> Self {
        Self {
            cache,
            hedged_close,
            diagnostics,
            config,
            thread_seq: AtomicU64::new(1),
        }
    }

    fn next_thread_id(&self) -> u64 {
        self.thread_seq.fetch_add(1, Ordering::Relaxed)
    }

    /// One scan cycle (spec §4.J). Reads positions from the Market State
    /// Cache (per-venue failures there are already isolated by the cache
    /// itself), pairs them by normalized symbol, and evaluates each pair's
    /// legs together against the emergency/warning thresholds.
    pub async fn scan(&self) {
        let positions = self.cache.all_positions().await;
        let mut by_symbol: HashMap<String, (Option<Position>, Option<Position>)> = HashMap::new();
        for p in positions {
            let entry = by_symbol.entry(p.normalized.clone()).or_default();
            match p.side {
                Side::Long => entry.0.get_or_insert(p),
                Side::Short => entry.1.get_or_insert(p),
            };
        }

        for (normalized, (long, short)) in by_symbol {
            self.evaluate_pair(&normalized, long, short).await;
        }
    }

    /// Evaluates both legs of a pair together and closes at most once: if
    /// either leg (or both) has crossed the emergency threshold, the pair is
    /// closed a single time rather than once per breaching leg, since a
    /// second close would resubmit full-size orders against positions the
    /// first close already zeroed out.
    async fn evaluate_pair(&self, normalized: &str, long: Option<Position>, short: Option<Position>) {
        let risks: Vec<(&Position, liquidation::LiquidationRisk)> = [&long, &short]
            .into_iter()
            .flatten()
            .map(|leg| (leg, liquidation::valuate(leg)))
            .collect();

        let emergency = risks
            .iter()
            .find(|(_, risk)| risk.proximity_to_liquidation >= self.config.emergency_close_threshold);

        if let Some((leg, risk)) = emergency {
            if !self.config.enable_emergency_close {
                tracing::warn!(%normalized, venue = %leg.venue, proximity = risk.proximity_to_liquidation, "emergency threshold crossed but emergency close is disabled");
                return;
            }
            self.diagnostics.emit(DecisionEvent::EmergencyCloseTriggered {
                normalized: normalized.to_string(),
                venue: leg.venue,
                proximity: risk.proximity_to_liquidation,
            });
            self.emergency_close(normalized, long.clone(), short.clone()).await;
            return;
        }

        for (leg, risk) in &risks {
            if risk.proximity_to_liquidation >= self.config.warning_threshold {
                tracing::warn!(%normalized, venue = %leg.venue, proximity = risk.proximity_to_liquidation, "liquidation proximity warning");
            }
        }
    }

    /// Closes the full pair at market with `f = 1.0`, retrying per leg up to
    /// `max_close_retries` with exponential backoff 1s/2s/4s (spec §4.J
    /// step 4). Emergency closes acquire rate-limit tokens with EMERGENCY
    /// priority (handled inside `HedgedCloseExecutor::close_pair`).
    async fn emergency_close(&self, normalized: &str, long: Option<Position>, short: Option<Position>) {
        let paired = PairedPosition {
            normalized: normalized.to_string(),
            long,
            short,
        };

        let mut backoff = Duration::from_secs(1);
        for attempt in 0..self.config.max_close_retries {
            let thread_id = self.next_thread_id();
            match self
                .hedged_close
                .close_pair(&paired, 1.0, OrderType::Market, Priority::Emergency, false, thread_id)
                .await
            {
                Ok(result) if result.errors.is_empty() => return,
                Ok(result) => {
                    tracing::warn!(%normalized, attempt, errors = ?result.errors, "emergency close attempt had leg errors");
                }
                Err(e) => {
                    tracing::warn!(%normalized, attempt, error = %e, "emergency close attempt failed outright");
                }
            }
            if attempt + 1 < self.config.max_close_retries {
                tokio::time::sleep(backoff).await;
                backoff *= 2;
            }
        }
    }

    /// Spawns the periodic scan loop (spec §4.J, default 10s).
    pub fn spawn(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        let interval = self.config.liq_check_interval;
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(interval);
            loop {
                tick.tick().await;
                self.scan().await;
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::mock::MockAdapter;
    use crate::lock_service::LockService;
    use crate::models::Venue;
    use crate::rate_limiter::RateLimiter;
    use chrono::Utc;
    use std::collections::HashMap as StdHashMap;

    fn position(venue: Venue, side: Side, mark: f64, liq: f64) -> Position {
        let now = Utc::now();
        Position {
            venue,
            normalized: "BTC".into(),
            side,
            size: 1.0,
            entry_price: 100.0,
            mark_price: mark,
            unrealized_pnl: 0.0,
            leverage: Some(10.0),
            liquidation_price: Some(liq),
            margin_used: None,
            opened_at: now,
            last_updated: now,
        }
    }

    #[tokio::test]
    async fn emergency_threshold_triggers_hedged_close() {
        let hl = MockAdapter::new(Venue::Hyperliquid);
        let long_leg = position(Venue::Hyperliquid, Side::Long, 91.0, 90.0);
        hl.set_position(long_leg.clone());
        let lg = MockAdapter::new(Venue::Lighter);
        let short_leg = position(Venue::Lighter, Side::Short, 91.0, 120.0);
        lg.set_position(short_leg.clone());

        let mut adapters: StdHashMap<Venue, Arc<dyn crate::adapter::VenueAdapter>> = StdHashMap::new();
        adapters.insert(Venue::Hyperliquid, hl.clone());
        adapters.insert(Venue::Lighter, lg.clone());
        let cache = Arc::new(MarketStateCache::new(adapters));
        cache.refresh_venue(Venue::Hyperliquid).await.unwrap();
        cache.refresh_venue(Venue::Lighter).await.unwrap();

        let mut rl_cfg = StdHashMap::new();
        for v in Venue::ALL {
            rl_cfg.insert(v, crate::config::RateLimiterConfig { bucket_size: 50, refill_per_sec: 50.0 });
        }
        let rate_limiter = Arc::new(RateLimiter::new(&rl_cfg));
        let locks = Arc::new(LockService::new());
        let diagnostics = Diagnostics::new();
        let hedged_close = Arc::new(HedgedCloseExecutor::new(
            cache.clone(),
            locks,
            rate_limiter,
            diagnostics.clone(),
            Duration::from_secs(1),
        ));

        let config = EngineConfig::default();
        let monitor = LiquidationMonitor::new(cache, hedged_close, diagnostics.clone(), config);
        monitor.scan().await;

        assert!(diagnostics.count("emergency_close_triggered") >= 1);
        assert_eq!(hl.open_order_count("BTC"), 0); // market reduce-only fills immediately in the mock
    }

    #[tokio::test]
    async fn safe_position_does_not_trigger_close() {
        let hl = MockAdapter::new(Venue::Hyperliquid);
        hl.set_position(position(Venue::Hyperliquid, Side::Long, 100.0, 50.0));
        let mut adapters: StdHashMap<Venue, Arc<dyn crate::adapter::VenueAdapter>> = StdHashMap::new();
        adapters.insert(Venue::Hyperliquid, hl.clone());
        let cache = Arc::new(MarketStateCache::new(adapters));
        cache.refresh_venue(Venue::Hyperliquid).await.unwrap();

        let mut rl_cfg = StdHashMap::new();
        for v in Venue::ALL {
            rl_cfg.insert(v, crate::config::RateLimiterConfig { bucket_size: 50, refill_per_sec: 50.0 });
        }
        let rate_limiter = Arc::new(RateLimiter::new(&rl_cfg));
        let locks = Arc::new(LockService::new());
        let diagnostics = Diagnostics::new();
        let hedged_close = Arc::new(HedgedCloseExecutor::new(
            cache.clone(),
            locks,
            rate_limiter,
            diagnostics.clone(),
            Duration::from_secs(1),
        ));
        let monitor = LiquidationMonitor::new(cache, hedged_close, diagnostics.clone(), EngineConfig::default());
        monitor.scan().await;

        assert_eq!(diagnostics.count("emergency_close_triggered"), 0);
    }
}
