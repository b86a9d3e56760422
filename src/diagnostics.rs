//! Operator-visible decision events and counters.
//!
//! Design Notes (spec §9) call out "Emoji/logging noise in decision paths" as
//! a pattern to re-architect: business logic (the scheduler, the monitor, the
//! hedged close executor) never calls `tracing` macros directly. Instead it
//! emits a typed [`DecisionEvent`] through [`Diagnostics`], which is the only
//! thing that talks to `tracing`. This mirrors the teacher's separation of
//! concerns between `middleware::logging` (the one place that logs) and the
//! rest of the request pipeline (which just returns values).

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

use crate::models::Venue;

/// Structured events a caller can emit through [`Diagnostics::emit`].
#[derive(Debug, Clone)]
pub enum DecisionEvent {
    OpportunityFound {
        normalized: String,
        long_venue: Venue,
        short_venue: Venue,
        spread: f64,
    },
    PairOpened {
        normalized: String,
        long_venue: Venue,
        short_venue: Venue,
    },
    SingleLegDetected {
        normalized: String,
        venue: Venue,
    },
    ZombieOrderCancelled {
        normalized: String,
        venue: Venue,
        order_id: String,
    },
    RecoveryAttempt {
        normalized: String,
        retry_count: u32,
    },
    RecoveryEscalatedToUnwind {
        normalized: String,
    },
    HedgedCloseCompleted {
        normalized: String,
        long_closed: bool,
        short_closed: bool,
    },
    EmergencyCloseTriggered {
        normalized: String,
        venue: Venue,
        proximity: f64,
    },
    TickDropped {
        scheduler: &'static str,
    },
}

impl DecisionEvent {
    fn counter_key(&self) -> &'static str {
        match self {
            DecisionEvent::OpportunityFound { .. } => "opportunity_found",
            DecisionEvent::PairOpened { .. } => "pair_opened",
            DecisionEvent::SingleLegDetected { .. } => "single_leg_detected",
            DecisionEvent::ZombieOrderCancelled { .. } => "zombie_order_cancelled",
            DecisionEvent::RecoveryAttempt { .. } => "recovery_attempt",
            DecisionEvent::RecoveryEscalatedToUnwind { .. } => "recovery_escalated_to_unwind",
            DecisionEvent::HedgedCloseCompleted { .. } => "hedged_close_completed",
            DecisionEvent::EmergencyCloseTriggered { .. } => "emergency_close_triggered",
            DecisionEvent::TickDropped { .. } => "tick_dropped",
        }
    }
}

/// Counters + structured-event sink shared across every orchestration
/// component. Cheap to clone (an `Arc` internally).
#[derive(Clone, Default)]
pub struct Diagnostics {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    counters: Mutex<HashMap<&'static str, AtomicU64>>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn emit(&self, event: DecisionEvent) {
        self.bump(event.counter_key());
        match &event {
            DecisionEvent::OpportunityFound {
                normalized,
                long_venue,
                short_venue,
                spread,
            } => info!(%normalized, %long_venue, %short_venue, spread, "opportunity found"),
            DecisionEvent::PairOpened {
                normalized,
                long_venue,
                short_venue,
            } => info!(%normalized, %long_venue, %short_venue, "pair opened"),
            DecisionEvent::SingleLegDetected { normalized, venue } => {
                warn!(%normalized, %venue, "single leg detected")
            }
            DecisionEvent::ZombieOrderCancelled {
                normalized,
                venue,
                order_id,
            } => warn!(%normalized, %venue, %order_id, "zombie order cancelled"),
            DecisionEvent::RecoveryAttempt {
                normalized,
                retry_count,
            } => info!(%normalized, retry_count, "single-leg recovery attempt"),
            DecisionEvent::RecoveryEscalatedToUnwind { normalized } => {
                warn!(%normalized, "single-leg recovery escalated to unwind")
            }
            DecisionEvent::HedgedCloseCompleted {
                normalized,
                long_closed,
                short_closed,
            } => info!(%normalized, long_closed, short_closed, "hedged close completed"),
            DecisionEvent::EmergencyCloseTriggered {
                normalized,
                venue,
                proximity,
            } => warn!(%normalized, %venue, proximity, "emergency close triggered"),
            DecisionEvent::TickDropped { scheduler } => {
                warn!(scheduler, "tick dropped: previous tick still running")
            }
        }
    }

    fn bump(&self, key: &'static str) {
        let counters = self.inner.counters.lock();
        if let Some(counter) = counters.get(key) {
            counter.fetch_add(1, Ordering::Relaxed);
            return;
        }
        drop(counters);
        let mut counters = self.inner.counters.lock();
        counters
            .entry(key)
            .or_insert_with(|| AtomicU64::new(0))
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn count(&self, key: &str) -> u64 {
        self.inner
            .counters
            .lock()
            .get(key)
            .map(|c| c.load(Ordering::Relaxed))
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate_per_event_kind() {
        let diag = Diagnostics::new();
        diag.emit(DecisionEvent::TickDropped { scheduler: "pairing" });
        diag.emit(DecisionEvent::TickDropped { scheduler: "pairing" });
        diag.emit(DecisionEvent::PairOpened {
            normalized: "BTC".into(),
            long_venue: Venue::Hyperliquid,
            short_venue: Venue::Lighter,
        });
        assert_eq!(diag.count("tick_dropped"), 2);
        assert_eq!(diag.count("pair_opened"), 1);
        assert_eq!(diag.count("recovery_attempt"), 0);
    }
}
