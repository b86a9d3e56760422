//! Pairing / Single-Leg Scheduler (spec §4.I, component I — the largest
//! subsystem). Tick loop: snapshot, classify, zombie-sweep, open new pairs
//! from opportunities, and run the single-leg recovery state machine.
//!
//! Grounded on the teacher's `vault::engine` tick-and-react orchestration
//! shape (periodic polling + decision dispatch), generalized from one-sided
//! betting decisions to two-sided pair management, and on `main.rs`'s
//! non-reentrant task loop that counts a tick still in flight as a
//! diagnostic rather than silently queuing the next one.

use crate::adapter::OpenOrderView;
use crate::cache::MarketStateCache;
use crate::config::EngineConfig;
use crate::diagnostics::{DecisionEvent, Diagnostics};
use crate::errors::EngineError;
use crate::funding::FundingAggregator;
use crate::hedged_close::HedgedCloseExecutor;
use crate::lock_service::{LockPurpose, LockService};
use crate::models::{
    OrderRequest, OrderStatus, OrderType, PairedPosition, Position, Side, SingleLegRetryInfo,
    TimeInForce, Venue,
};
use crate::rate_limiter::{Priority, RateLimiter};
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

/// Per-symbol classification (spec §4.I step 2). `PairedPosition` already
/// carries the valid/single-leg/empty distinction via its own predicates;
/// this enum just names it for callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    Valid,
    SingleLeg,
    Empty,
}

fn classify(paired: &PairedPosition) -> Classification {
    if paired.is_valid() {
        Classification::Valid
    } else if paired.is_single_leg() {
        Classification::SingleLeg
    } else {
        Classification::Empty
    }
}

pub struct PairingScheduler {
    cache: Arc<MarketStateCache>,
    funding: Arc<FundingAggregator>,
    locks: Arc<LockService>,
    rate_limiter: Arc<RateLimiter>,
    hedged_close: Arc<HedgedCloseExecutor>,
    diagnostics: Diagnostics,
    config: EngineConfig,
    retry_info: Mutex<HashMap<String, SingleLegRetryInfo>>,
    thread_seq: AtomicU64,
    tick_in_flight: AtomicBool,
}

impl PairingScheduler {
    pub fn new(
        cache: Arc<MarketStateCache>,
        funding: Arc<FundingAggregator>,
        locks: Arc<LockService>,
        rate_limiter: Arc<RateLimiter>,
        hedged_close: Arc<HedgedCloseExecutor>,
        diagnostics: Diagnostics,
        config: EngineConfig,
    ) -> Self {
        Self {
            cache,
            funding,
            locks,
            rate_limiter,
            hedged_close,
            diagnostics,
            config,
            retry_info: Mutex::new(HashMap::new()),
            thread_seq: AtomicU64::new(1),
            tick_in_flight: AtomicBool::new(false),
        }
    }

    fn next_thread_id(&self) -> u64 {
        self.thread_seq.fetch_add(1, Ordering::Relaxed)
    }

    /// Runs one full tick. A tick still in flight when the timer fires again
    /// is counted as a dropped tick rather than queued (spec §9, mirroring
    /// the teacher's non-reentrant task loop).
    pub async fn tick(&self) {
        if self.tick_in_flight.swap(true, Ordering::AcqRel) {
            self.diagnostics.emit(DecisionEvent::TickDropped {
                scheduler: "pairing",
            });
            return;
        }

        self.run_tick().await;

        self.tick_in_flight.store(false, Ordering::Release);
    }

    async fn run_tick(&self) {
        let snapshots = self.snapshot_by_symbol().await;

        self.zombie_sweep(&snapshots).await;

        let mut empty_symbols = Vec::new();
        let mut single_leg_symbols = Vec::new();
        for (normalized, paired) in &snapshots {
            match classify(paired) {
                Classification::Empty => empty_symbols.push(normalized.clone()),
                Classification::SingleLeg => single_leg_symbols.push(normalized.clone()),
                Classification::Valid => {
                    // Pair is healthy: any stale retry info is stale by definition.
                    self.retry_info.lock().remove(normalized);
                }
            }
        }

        self.open_new_pairs(&empty_symbols).await;

        for normalized in &single_leg_symbols {
            if let Some(paired) = snapshots.get(normalized) {
                self.recover_single_leg(normalized, paired).await;
            }
        }
    }

    /// Step 1: groups every known position by normalized symbol into a
    /// `PairedPosition` view (spec §4.I step 1). Only the first position per
    /// side is retained — invariant I4/I2 keep this at most one in practice.
    async fn snapshot_by_symbol(&self) -> HashMap<String, PairedPosition> {
        let positions = self.cache.all_positions().await;
        let mut by_symbol: HashMap<String, (Option<Position>, Option<Position>)> = HashMap::new();
        for p in positions {
            let entry = by_symbol.entry(p.normalized.clone()).or_default();
            match p.side {
                Side::Long => entry.0.get_or_insert(p),
                Side::Short => entry.1.get_or_insert(p),
            };
        }
        by_symbol
            .into_iter()
            .map(|(normalized, (long, short))| {
                (
                    normalized.clone(),
                    PairedPosition {
                        normalized,
                        long,
                        short,
                    },
                )
            })
            .collect()
    }

    /// Step 3: cancels orders with no counterpart position/order on a
    /// different venue (spec §4.I step 3).
    async fn zombie_sweep(&self, snapshots: &HashMap<String, PairedPosition>) {
        let mut orders_by_venue: Vec<(Venue, Vec<OpenOrderView>)> = Vec::new();
        for (venue, adapter) in self.cache.adapters().iter() {
            match adapter.get_open_orders().await {
                Ok(orders) => orders_by_venue.push((*venue, orders)),
                Err(e) => tracing::warn!(%venue, error = %e, "zombie sweep: failed to list open orders"),
            }
        }

        for (venue, orders) in &orders_by_venue {
            for order in orders {
                if self.has_counterpart(*venue, order, &orders_by_venue, snapshots) {
                    continue;
                }
                if let Some(adapter) = self.cache.adapter_for(*venue) {
                    match adapter.cancel_order(&order.order_id, &order.normalized).await {
                        Ok(_) => self.diagnostics.emit(DecisionEvent::ZombieOrderCancelled {
                            normalized: order.normalized.clone(),
                            venue: *venue,
                            order_id: order.order_id.clone(),
                        }),
                        Err(e) => tracing::warn!(order_id = %order.order_id, error = %e, "failed to cancel zombie order"),
                    }
                }
            }
        }
    }

    fn has_counterpart(
        &self,
        venue: Venue,
        order: &OpenOrderView,
        orders_by_venue: &[(Venue, Vec<OpenOrderView>)],
        snapshots: &HashMap<String, PairedPosition>,
    ) -> bool {
        // A reduce-only order against a position already held on the same
        // venue is a legitimate close, not a zombie (spec §4.I step 3).
        if order.reduce_only {
            if let Some(paired) = snapshots.get(&order.normalized) {
                let same_venue_position = [&paired.long, &paired.short]
                    .into_iter()
                    .flatten()
                    .any(|p| p.venue == venue);
                if same_venue_position {
                    return true;
                }
            }
        }

        let counterpart_position = snapshots.get(&order.normalized).is_some_and(|paired| {
            [&paired.long, &paired.short]
                .into_iter()
                .flatten()
                .any(|p| p.venue != venue)
        });
        let counterpart_order = orders_by_venue.iter().any(|(other_venue, orders)| {
            *other_venue != venue && orders.iter().any(|o| o.normalized == order.normalized)
        });

        counterpart_position || counterpart_order
    }

    /// Opens the top opportunity for each symbol that currently has no
    /// position at all (spec §4.I "Opening a new pair").
    async fn open_new_pairs(&self, empty_symbols: &[String]) {
        if empty_symbols.is_empty() {
            return;
        }
        let opportunities = self
            .funding
            .find_arbitrage_opportunities(empty_symbols, self.config.open_threshold)
            .await;

        let mut opened = std::collections::HashSet::new();
        for opp in opportunities {
            if !opened.insert(opp.normalized.clone()) {
                continue; // one pair per symbol per tick
            }
            let thread_id = self.next_thread_id();
            if !self
                .locks
                .try_acquire_symbol_lock(&opp.normalized, thread_id, LockPurpose::Open)
            {
                continue;
            }

            let long_req = OrderRequest {
                normalized: opp.normalized.clone(),
                venue: opp.long_venue,
                side: Side::Long,
                size: 0.0, // sized by the caller's position-sizing policy; left to the embedder
                price: Some(opp.long_mark_price),
                order_type: OrderType::Limit,
                reduce_only: false,
                tif: TimeInForce::Gtc,
            };
            let short_req = OrderRequest {
                normalized: opp.normalized.clone(),
                venue: opp.short_venue,
                side: Side::Short,
                size: 0.0,
                price: Some(opp.short_mark_price),
                order_type: OrderType::Limit,
                reduce_only: false,
                tif: TimeInForce::Gtc,
            };

            let (long_ok, short_ok) = self.place_leg_pair(&opp.normalized, thread_id, long_req, short_req).await;

            self.locks.release_symbol_lock(&opp.normalized, thread_id);

            match (long_ok, short_ok) {
                (true, true) => self.diagnostics.emit(DecisionEvent::PairOpened {
                    normalized: opp.normalized.clone(),
                    long_venue: opp.long_venue,
                    short_venue: opp.short_venue,
                }),
                (true, false) | (false, true) => {
                    // One leg filled, the other didn't: pin the venue
                    // assignment and hand off to the recovery machine
                    // (spec §4.I "does not abort a filled leg").
                    self.retry_info.lock().insert(
                        opp.normalized.clone(),
                        SingleLegRetryInfo {
                            normalized: opp.normalized.clone(),
                            long_venue: opp.long_venue,
                            short_venue: opp.short_venue,
                            retry_count: 0,
                            last_retry_time: Utc::now(),
                        },
                    );
                    self.diagnostics.emit(DecisionEvent::SingleLegDetected {
                        normalized: opp.normalized.clone(),
                        venue: if long_ok { opp.long_venue } else { opp.short_venue },
                    });
                }
                (false, false) => {}
            }
        }
    }

    async fn place_leg_pair(
        &self,
        normalized: &str,
        thread_id: u64,
        long_req: OrderRequest,
        short_req: OrderRequest,
    ) -> (bool, bool) {
        let (long_res, short_res) = tokio::join!(
            self.place_leg(normalized, thread_id, long_req),
            self.place_leg(normalized, thread_id, short_req)
        );
        (long_res, short_res)
    }

    async fn place_leg(&self, normalized: &str, thread_id: u64, req: OrderRequest) -> bool {
        let (venue, side) = (req.venue, req.side);
        let key = format!("{normalized}|{venue}|{side}|{thread_id}");
        if !self
            .locks
            .register_order_placing(&key, normalized, venue, side, thread_id, req.size, req.price)
        {
            return false;
        }
        if self
            .rate_limiter
            .acquire(venue, 1, Priority::Normal, self.config.adapter_call_deadline)
            .await
            .is_err()
        {
            self.locks
                .update_order_status(venue, normalized, side, OrderStatus::Failed, None, None);
            return false;
        }
        let Some(adapter) = self.cache.adapter_for(venue) else {
            self.locks
                .update_order_status(venue, normalized, side, OrderStatus::Failed, None, None);
            return false;
        };
        match adapter.place_order(req).await {
            Ok(resp) => {
                self.locks.update_order_status(
                    venue,
                    normalized,
                    side,
                    resp.status,
                    Some(resp.order_id),
                    resp.avg_fill_price,
                );
                resp.status == OrderStatus::Filled || resp.status == OrderStatus::PartiallyFilled
            }
            Err(_) => {
                self.locks
                    .update_order_status(venue, normalized, side, OrderStatus::Failed, None, None);
                false
            }
        }
    }

    /// Single-leg recovery state machine (spec §4.I). Runs at most one
    /// recovery attempt per tick per symbol.
    async fn recover_single_leg(&self, normalized: &str, paired: &PairedPosition) {
        let Some(position) = paired.single_leg() else {
            return;
        };

        let existing_retry = self.retry_info.lock().get(normalized).cloned();
        if let Some(info) = &existing_retry {
            let required_wait = self.config.single_leg_backoff * info.retry_count.max(1);
            let elapsed = Utc::now().signed_duration_since(info.last_retry_time);
            if elapsed.to_std().unwrap_or_default() < required_wait {
                return; // backoff not elapsed yet
            }
            if info.retry_count >= self.config.max_single_leg_retries {
                self.escalate_to_unwind(normalized, position).await;
                return;
            }
        }

        let available_venues: Vec<Venue> = self.cache.adapters().keys().copied().collect();
        let (missing_venue, missing_side) =
            match determine_missing_side(position, existing_retry.as_ref(), &available_venues, &self.config) {
                Ok(v) => v,
                Err(_) => {
                    self.escalate_to_unwind(normalized, position).await;
                    return;
                }
            };

        let (long_venue, short_venue) = match missing_side {
            Side::Long => (missing_venue, position.venue),
            Side::Short => (position.venue, missing_venue),
        };

        let thread_id = self.next_thread_id();
        if !self
            .locks
            .try_acquire_symbol_lock(normalized, thread_id, LockPurpose::Recovery)
        {
            return;
        }

        let retry_count = existing_retry.as_ref().map(|i| i.retry_count).unwrap_or(0) + 1;
        self.retry_info.lock().insert(
            normalized.to_string(),
            SingleLegRetryInfo {
                normalized: normalized.to_string(),
                long_venue,
                short_venue,
                retry_count,
                last_retry_time: Utc::now(),
            },
        );
        self.diagnostics.emit(DecisionEvent::RecoveryAttempt {
            normalized: normalized.to_string(),
            retry_count,
        });

        // Step 1: cancel any pending order on the other venue for this symbol.
        if let Some(adapter) = self.cache.adapter_for(missing_venue) {
            if let Ok(orders) = adapter.get_open_orders().await {
                for o in orders.iter().filter(|o| o.normalized == normalized) {
                    let _ = adapter.cancel_order(&o.order_id, normalized).await;
                }
            }
        }

        // Step 2: place the missing leg.
        let mark = self
            .cache
            .get_mark_price(normalized, missing_venue)
            .await
            .unwrap_or(position.mark_price);
        let req = OrderRequest {
            normalized: normalized.to_string(),
            venue: missing_venue,
            side: missing_side,
            size: position.size,
            price: Some(mark),
            order_type: OrderType::Limit,
            reduce_only: false,
            tif: TimeInForce::Gtc,
        };

        let placed = match self.cache.adapter_for(missing_venue) {
            Some(adapter) => adapter.place_order(req).await.ok(),
            None => None,
        };

        let Some(placed) = placed else {
            self.locks.release_symbol_lock(normalized, thread_id);
            return;
        };

        // Step 3: poll for fill up to N polls.
        let max_polls = (self.config.single_leg_fill_wait.as_secs_f64()
            / self.config.single_leg_poll_interval.as_secs_f64())
        .ceil() as u32;
        let mut filled = placed.status == OrderStatus::Filled;
        let mut order_id = placed.order_id.clone();
        if !filled {
            if let Some(adapter) = self.cache.adapter_for(missing_venue) {
                for _ in 0..max_polls.max(1) {
                    tokio::time::sleep(self.config.single_leg_poll_interval).await;
                    match adapter.get_order_status(&order_id, normalized).await {
                        Ok(order) if order.status == OrderStatus::Filled => {
                            filled = true;
                            break;
                        }
                        Ok(order) => order_id = order.order_id,
                        Err(_) => break,
                    }
                }
            }
        }

        if filled {
            self.retry_info.lock().remove(normalized);
            self.diagnostics.emit(DecisionEvent::PairOpened {
                normalized: normalized.to_string(),
                long_venue,
                short_venue,
            });
        } else {
            // Step 4: cancel the unfilled order, then unwind the existing leg.
            if let Some(adapter) = self.cache.adapter_for(missing_venue) {
                let _ = adapter.cancel_order(&order_id, normalized).await;
            }
            self.unwind_leg(normalized, position).await;
        }

        self.locks.release_symbol_lock(normalized, thread_id);
    }

    async fn escalate_to_unwind(&self, normalized: &str, position: &Position) {
        self.diagnostics.emit(DecisionEvent::RecoveryEscalatedToUnwind {
            normalized: normalized.to_string(),
        });
        let thread_id = self.next_thread_id();
        if self
            .locks
            .try_acquire_symbol_lock(normalized, thread_id, LockPurpose::Recovery)
        {
            self.unwind_leg(normalized, position).await;
            self.locks.release_symbol_lock(normalized, thread_id);
        }
        self.retry_info.lock().remove(normalized);
    }

    /// Reduce-only closes the lone existing leg, used both on recovery
    /// timeout and on retry-budget escalation (spec §4.I step 4).
    async fn unwind_leg(&self, normalized: &str, position: &Position) {
        let paired = match position.side {
            Side::Long => PairedPosition {
                normalized: normalized.to_string(),
                long: Some(position.clone()),
                short: None,
            },
            Side::Short => PairedPosition {
                normalized: normalized.to_string(),
                long: None,
                short: Some(position.clone()),
            },
        };
        let thread_id = self.next_thread_id();
        let _ = self
            .hedged_close
            .close_pair(&paired, 1.0, OrderType::Limit, Priority::High, true, thread_id)
            .await;
    }
}

/// Frozen venue assignment for single-leg recovery (spec §4.I
/// `determineMissingSide`). Once a retry record exists, the venue
/// assignments are frozen for the lifetime of that record (I5) — recovery
/// never re-derives them from fresh market data even if rates have moved.
fn determine_missing_side(
    position: &Position,
    retry_info: Option<&SingleLegRetryInfo>,
    available_venues: &[Venue],
    config: &EngineConfig,
) -> Result<(Venue, Side), EngineError> {
    let (long_venue, short_venue) = if let Some(info) = retry_info.filter(|i| i.mentions(position.venue)) {
        (info.long_venue, info.short_venue)
    } else {
        let others: Vec<Venue> = available_venues
            .iter()
            .copied()
            .filter(|v| *v != position.venue)
            .collect();
        if others.is_empty() {
            return Err(EngineError::NoCounterparty {
                normalized: position.normalized.clone(),
            });
        }
        let preferred = config
            .preferred_venue_for_missing_leg
            .iter()
            .copied()
            .find(|v| others.contains(v))
            .unwrap_or(others[0]);
        match position.side {
            Side::Long => (position.venue, preferred),
            Side::Short => (preferred, position.venue),
        }
    };

    let (missing_venue, missing_side) = match position.side {
        Side::Long => (short_venue, Side::Short),
        Side::Short => (long_venue, Side::Long),
    };
    if missing_venue == position.venue {
        return Err(EngineError::NoCounterparty {
            normalized: position.normalized.clone(),
        });
    }
    Ok((missing_venue, missing_side))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Venue;
    use chrono::Utc;

    fn position(venue: Venue, side: Side) -> Position {
        let now = Utc::now();
        Position {
            venue,
            normalized: "BTC".into(),
            side,
            size: 5.0,
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

    #[test]
    fn frozen_retry_info_overrides_fresh_derivation() {
        let position = position(Venue::Lighter, Side::Long);
        let retry_info = SingleLegRetryInfo {
            normalized: "BTC".into(),
            long_venue: Venue::Lighter,
            short_venue: Venue::Aster,
            retry_count: 1,
            last_retry_time: Utc::now(),
        };
        let cfg = EngineConfig::default();
        let (missing_venue, missing_side) =
            determine_missing_side(&position, Some(&retry_info), &Venue::ALL, &cfg).unwrap();
        // Even though HYPERLIQUID is available and preferred, the frozen
        // retry record pins the short leg to ASTER.
        assert_eq!(missing_venue, Venue::Aster);
        assert_eq!(missing_side, Side::Short);
    }

    #[test]
    fn fresh_derivation_prefers_configured_venue() {
        let position = position(Venue::Lighter, Side::Short);
        let cfg = EngineConfig::default();
        let (missing_venue, missing_side) =
            determine_missing_side(&position, None, &Venue::ALL, &cfg).unwrap();
        assert_eq!(missing_venue, Venue::Hyperliquid);
        assert_eq!(missing_side, Side::Long);
    }

    #[test]
    fn no_counterparty_when_only_own_venue_available() {
        let position = position(Venue::Hyperliquid, Side::Long);
        let cfg = EngineConfig::default();
        let err = determine_missing_side(&position, None, &[Venue::Hyperliquid], &cfg).unwrap_err();
        assert!(matches!(err, EngineError::NoCounterparty { .. }));
    }

    #[test]
    fn classification_matches_paired_position_predicates() {
        let valid = PairedPosition {
            normalized: "BTC".into(),
            long: Some(position(Venue::Hyperliquid, Side::Long)),
            short: Some(position(Venue::Lighter, Side::Short)),
        };
        assert_eq!(classify(&valid), Classification::Valid);

        let single = PairedPosition {
            normalized: "BTC".into(),
            long: Some(position(Venue::Hyperliquid, Side::Long)),
            short: None,
        };
        assert_eq!(classify(&single), Classification::SingleLeg);

        let empty = PairedPosition {
            normalized: "BTC".into(),
            long: None,
            short: None,
        };
        assert_eq!(classify(&empty), Classification::Empty);
    }
}
