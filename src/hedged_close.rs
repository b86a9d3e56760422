//! Hedged Close Executor (spec §4.H, component H).
//!
//! Both legs are submitted concurrently via plain `tokio::join!` rather than
//! `try_join!` — spec §4.H is explicit that a failure on one leg must never
//! abort the other. Grounded on `arbitrage::engine::ArbitrageEngine`'s
//! `leg1`/`leg2` two-leg structuring and on `main.rs`'s parallel-task
//! patterns for driving independent futures to completion.

use crate::cache::MarketStateCache;
use crate::diagnostics::{DecisionEvent, Diagnostics};
use crate::errors::EngineError;
use crate::lock_service::{LockPurpose, LockService};
use crate::models::{OrderRequest, OrderType, PairedPosition, Position, Side, TimeInForce};
use crate::rate_limiter::{Priority, RateLimiter};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Default)]
pub struct HedgeCloseResult {
    pub long_closed: bool,
    pub short_closed: bool,
    pub errors: Vec<String>,
}

pub struct HedgedCloseExecutor {
    cache: Arc<MarketStateCache>,
    locks: Arc<LockService>,
    rate_limiter: Arc<RateLimiter>,
    diagnostics: Diagnostics,
    adapter_call_deadline: Duration,
}

impl HedgedCloseExecutor {
    pub fn new(
        cache: Arc<MarketStateCache>,
        locks: Arc<LockService>,
        rate_limiter: Arc<RateLimiter>,
        diagnostics: Diagnostics,
        adapter_call_deadline: Duration,
    ) -> Self {
        Self {
            cache,
            locks,
            rate_limiter,
            diagnostics,
            adapter_call_deadline,
        }
    }

    /// Closes a fraction `f` of both legs of `paired` (spec §4.H). When
    /// `skip_locking` is set, the caller (e.g. single-leg recovery unwinding
    /// its own leg) already holds the symbol lock and this call must not
    /// try to acquire it again.
    pub async fn close_pair(
        &self,
        paired: &PairedPosition,
        fraction: f64,
        order_type: OrderType,
        priority: Priority,
        skip_locking: bool,
        thread_id: u64,
    ) -> Result<HedgeCloseResult, EngineError> {
        let normalized = paired.normalized.clone();

        if !skip_locking
            && !self
                .locks
                .try_acquire_symbol_lock(&normalized, thread_id, LockPurpose::ClosePair)
        {
            return Err(EngineError::SymbolLockContended {
                normalized: normalized.clone(),
            });
        }

        let (long_fut, short_fut) = (
            self.close_leg(paired.long.as_ref(), fraction, order_type, priority),
            self.close_leg(paired.short.as_ref(), fraction, order_type, priority),
        );
        let (long_outcome, short_outcome) = tokio::join!(long_fut, short_fut);

        if !skip_locking {
            self.locks.release_symbol_lock(&normalized, thread_id);
        }

        let mut result = HedgeCloseResult::default();
        match long_outcome {
            LegOutcome::Closed => result.long_closed = true,
            LegOutcome::Absent => {}
            LegOutcome::Failed(e) => result.errors.push(format!("long leg: {e}")),
        }
        match short_outcome {
            LegOutcome::Closed => result.short_closed = true,
            LegOutcome::Absent => {}
            LegOutcome::Failed(e) => result.errors.push(format!("short leg: {e}")),
        }

        self.diagnostics.emit(DecisionEvent::HedgedCloseCompleted {
            normalized,
            long_closed: result.long_closed,
            short_closed: result.short_closed,
        });

        Ok(result)
    }

    async fn close_leg(
        &self,
        leg: Option<&Position>,
        fraction: f64,
        order_type: OrderType,
        priority: Priority,
    ) -> LegOutcome {
        let Some(position) = leg else {
            return LegOutcome::Absent;
        };

        let size = position.size * fraction;
        if size <= 0.0 {
            return LegOutcome::Absent;
        }

        let adapter = match self.cache.adapter_for(position.venue) {
            Some(a) => a,
            None => {
                return LegOutcome::Failed(format!("no adapter configured for {}", position.venue))
            }
        };

        if let Err(e) = self
            .rate_limiter
            .acquire(position.venue, 1, priority, self.adapter_call_deadline)
            .await
        {
            return LegOutcome::Failed(e.to_string());
        }

        // Closing a LONG is a reduce-only SELL (a SHORT order); closing a
        // SHORT is a reduce-only BUY (a LONG order) — spec §4.H step 3.
        let closing_side = position.side.opposite();
        let req = OrderRequest {
            normalized: position.normalized.clone(),
            venue: position.venue,
            side: closing_side,
            size,
            price: match order_type {
                OrderType::Market => None,
                OrderType::Limit => Some(position.mark_price),
            },
            order_type,
            reduce_only: true,
            tif: TimeInForce::Gtc,
        };

        match adapter.place_order(req).await {
            Ok(_) => LegOutcome::Closed,
            Err(e) => LegOutcome::Failed(e.to_string()),
        }
    }
}

enum LegOutcome {
    Closed,
    Absent,
    Failed(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::mock::MockAdapter;
    use crate::config::RateLimiterConfig;
    use crate::errors::AdapterErrorKind;
    use crate::models::{Side, Venue};
    use chrono::Utc;
    use std::collections::HashMap;

    fn position(venue: Venue, side: Side, size: f64) -> Position {
        let now = Utc::now();
        Position {
            venue,
            normalized: "BTC".into(),
            side,
            size,
            entry_price: 100.0,
            mark_price: 100.0,
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
        for v in crate::models::Venue::ALL {
            cfg.insert(v, RateLimiterConfig { bucket_size: 100, refill_per_sec: 100.0 });
        }
        Arc::new(RateLimiter::new(&cfg))
    }

    #[tokio::test]
    async fn closes_both_legs_independently_on_partial_failure() {
        let hl = MockAdapter::new(Venue::Hyperliquid);
        hl.set_position(position(Venue::Hyperliquid, Side::Long, 10.0));
        let lg = MockAdapter::new(Venue::Lighter);
        lg.set_position(position(Venue::Lighter, Side::Short, 10.0));
        lg.inject_place_order_error(AdapterErrorKind::Network);

        let mut adapters: HashMap<Venue, Arc<dyn crate::adapter::VenueAdapter>> = HashMap::new();
        adapters.insert(Venue::Hyperliquid, hl);
        adapters.insert(Venue::Lighter, lg);
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
            normalized: "BTC".into(),
            long: Some(position(Venue::Hyperliquid, Side::Long, 10.0)),
            short: Some(position(Venue::Lighter, Side::Short, 10.0)),
        };

        let result = executor
            .close_pair(&paired, 1.0, OrderType::Market, Priority::Emergency, false, 1)
            .await
            .unwrap();

        assert!(result.long_closed);
        assert!(!result.short_closed);
        assert_eq!(result.errors.len(), 1);
    }

    #[tokio::test]
    async fn contended_lock_is_rejected_unless_skipped() {
        let adapters: HashMap<Venue, Arc<dyn crate::adapter::VenueAdapter>> = HashMap::new();
        let cache = Arc::new(MarketStateCache::new(adapters));
        let locks = Arc::new(LockService::new());
        assert!(locks.try_acquire_symbol_lock("BTC", 99, LockPurpose::Open));

        let executor = HedgedCloseExecutor::new(
            cache,
            locks,
            rate_limiter(),
            Diagnostics::new(),
            Duration::from_secs(1),
        );
        let paired = PairedPosition {
            normalized: "BTC".into(),
            long: None,
            short: None,
        };

        let err = executor
            .close_pair(&paired, 1.0, OrderType::Market, Priority::Normal, false, 1)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::SymbolLockContended { .. }));
    }
}
