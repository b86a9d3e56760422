//! Execution Lock Service (spec §4.C, component C): symbol-level mutual
//! exclusion plus the active-order registry that is the source of truth for
//! invariant I4 ("at most one active order per (venue, normalized, side)").
//!
//! Both structures are non-suspending, so they're guarded by
//! `parking_lot::Mutex` rather than an async lock, matching the teacher's use
//! of `parking_lot` for short synchronous critical sections
//! (`middleware::rate_limit::RateLimitLayer`, `vault::engine`).

use crate::models::{OrderStatus, Side, Venue};
use parking_lot::Mutex;
use std::collections::HashMap;

/// Symbol-lock purposes, used only for diagnostics (which code path is
/// holding a given symbol's lock).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockPurpose {
    Open,
    ClosePair,
    Recovery,
}

struct SymbolLockState {
    holder_thread_id: u64,
    purpose: LockPurpose,
}

#[derive(Debug, Clone)]
pub struct ActiveOrderEntry {
    pub key: String,
    pub normalized: String,
    pub venue: Venue,
    pub side: Side,
    pub thread_id: u64,
    pub size: f64,
    pub price: Option<f64>,
    pub status: OrderStatus,
    pub order_id: Option<String>,
    pub fill_price: Option<f64>,
}

/// Execution Lock Service: the symbol lock plus the active-order registry.
/// The "global lock holder" label is a diagnostics-only field (spec §4.C,
/// §9 open question: the source's global lock is never used to serialize
/// execution, only to label the currently-most-active task for humans).
pub struct LockService {
    symbol_locks: Mutex<HashMap<String, SymbolLockState>>,
    active_orders: Mutex<HashMap<(Venue, String, Side), ActiveOrderEntry>>,
    global_lock_holder_label: Mutex<Option<String>>,
}

impl Default for LockService {
    fn default() -> Self {
        Self::new()
    }
}

impl LockService {
    pub fn new() -> Self {
        Self {
            symbol_locks: Mutex::new(HashMap::new()),
            active_orders: Mutex::new(HashMap::new()),
            global_lock_holder_label: Mutex::new(None),
        }
    }

    /// Non-blocking: returns `true` iff no other holder exists for
    /// `normalized` (spec §4.C).
    pub fn try_acquire_symbol_lock(
        &self,
        normalized: &str,
        thread_id: u64,
        purpose: LockPurpose,
    ) -> bool {
        let mut locks = self.symbol_locks.lock();
        match locks.get(normalized) {
            Some(existing) if existing.holder_thread_id != thread_id => false,
            _ => {
                locks.insert(
                    normalized.to_string(),
                    SymbolLockState {
                        holder_thread_id: thread_id,
                        purpose,
                    },
                );
                *self.global_lock_holder_label.lock() =
                    Some(format!("{normalized}@{thread_id} ({purpose:?})"));
                true
            }
        }
    }

    /// Releases the lock iff `thread_id` is the current holder; idempotent
    /// otherwise (spec §4.C).
    pub fn release_symbol_lock(&self, normalized: &str, thread_id: u64) {
        let mut locks = self.symbol_locks.lock();
        if let Some(existing) = locks.get(normalized) {
            if existing.holder_thread_id == thread_id {
                locks.remove(normalized);
            }
        }
    }

    pub fn is_symbol_locked(&self, normalized: &str) -> bool {
        self.symbol_locks.lock().contains_key(normalized)
    }

    pub fn global_lock_holder_label(&self) -> Option<String> {
        self.global_lock_holder_label.lock().clone()
    }

    /// Registers an order about to be transmitted. Succeeds iff no active
    /// order already exists for `(venue, normalized, side)` — this is what
    /// invariant I4 is checked against (spec §4.C, §4.I "before transmission").
    pub fn register_order_placing(
        &self,
        key: &str,
        normalized: &str,
        venue: Venue,
        side: Side,
        thread_id: u64,
        size: f64,
        price: Option<f64>,
    ) -> bool {
        let mut active = self.active_orders.lock();
        let map_key = (venue, normalized.to_string(), side);
        if active.get(&map_key).map(|e| e.status.is_active()).unwrap_or(false) {
            return false;
        }
        active.insert(
            map_key,
            ActiveOrderEntry {
                key: key.to_string(),
                normalized: normalized.to_string(),
                venue,
                side,
                thread_id,
                size,
                price,
                status: OrderStatus::Submitted,
                order_id: None,
                fill_price: None,
            },
        );
        true
    }

    pub fn update_order_status(
        &self,
        venue: Venue,
        normalized: &str,
        side: Side,
        status: OrderStatus,
        order_id: Option<String>,
        fill_price: Option<f64>,
    ) {
        let mut active = self.active_orders.lock();
        let map_key = (venue, normalized.to_string(), side);
        if let Some(entry) = active.get_mut(&map_key) {
            entry.status = status;
            if order_id.is_some() {
                entry.order_id = order_id;
            }
            if fill_price.is_some() {
                entry.fill_price = fill_price;
            }
            if status.is_terminal() {
                active.remove(&map_key);
            }
        }
    }

    /// O(1) query: is there an active order for `(venue, normalized, side)`?
    pub fn has_active_order(&self, venue: Venue, normalized: &str, side: Side) -> bool {
        self.active_orders
            .lock()
            .get(&(venue, normalized.to_string(), side))
            .map(|e| e.status.is_active())
            .unwrap_or(false)
    }

    pub fn active_order_count(&self) -> usize {
        self.active_orders
            .lock()
            .values()
            .filter(|e| e.status.is_active())
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Side, Venue};

    #[test]
    fn symbol_lock_is_exclusive_not_recursive() {
        let svc = LockService::new();
        assert!(svc.try_acquire_symbol_lock("BTC", 1, LockPurpose::Open));
        assert!(!svc.try_acquire_symbol_lock("BTC", 2, LockPurpose::Open));
        // Same holder re-acquiring is still granted (idempotent for the
        // current holder), mirroring spec's "holder must release before
        // reacquiring" only binding *other* callers.
        assert!(svc.try_acquire_symbol_lock("BTC", 1, LockPurpose::Open));
        svc.release_symbol_lock("BTC", 1);
        assert!(svc.try_acquire_symbol_lock("BTC", 2, LockPurpose::Open));
    }

    #[test]
    fn release_is_idempotent_for_non_holder() {
        let svc = LockService::new();
        assert!(svc.try_acquire_symbol_lock("BTC", 1, LockPurpose::Open));
        svc.release_symbol_lock("BTC", 2); // not the holder: no-op
        assert!(!svc.try_acquire_symbol_lock("BTC", 2, LockPurpose::Open));
        svc.release_symbol_lock("BTC", 1);
        assert!(svc.try_acquire_symbol_lock("BTC", 2, LockPurpose::Open));
    }

    #[test]
    fn at_most_one_active_order_per_venue_symbol_side() {
        let svc = LockService::new();
        assert!(svc.register_order_placing("k1", "BTC", Venue::Hyperliquid, Side::Long, 1, 10.0, None));
        assert!(!svc.register_order_placing("k2", "BTC", Venue::Hyperliquid, Side::Long, 2, 5.0, None));
        assert!(svc.has_active_order(Venue::Hyperliquid, "BTC", Side::Long));

        svc.update_order_status(
            Venue::Hyperliquid,
            "BTC",
            Side::Long,
            OrderStatus::Filled,
            Some("o1".into()),
            Some(100.0),
        );
        assert!(!svc.has_active_order(Venue::Hyperliquid, "BTC", Side::Long));
        assert!(svc.register_order_placing("k3", "BTC", Venue::Hyperliquid, Side::Long, 3, 7.0, None));
    }
}
