//! Market State Cache (spec §4.D, component D): unified positions, marks, and
//! fundings keyed by (venue, normalized symbol).
//!
//! Readers get a point-in-time consistent per-venue view; cross-venue
//! snapshots are eventually consistent within `T_refresh` (spec §4.D, §5).
//! Mutations to a venue's position slice are serialized by a one-shot
//! per-venue refresh guard so the periodic refresh never overlaps itself for
//! the same venue (spec §5).

use crate::adapter::{RawSymbolId, VenueAdapter, VenueEvent};
use crate::errors::AdapterError;
use crate::models::{FundingRate, Position, Side, Venue};
use chrono::Utc;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, RwLock};

/// A unified snapshot of positions/marks/fundings across every configured
/// venue. Cheap to clone (`Arc` internally).
#[derive(Clone)]
pub struct MarketStateCache {
    adapters: Arc<HashMap<Venue, Arc<dyn VenueAdapter>>>,
    positions: Arc<RwLock<HashMap<(Venue, String, Side), Position>>>,
    marks: Arc<RwLock<HashMap<(String, Venue), f64>>>,
    fundings: Arc<RwLock<HashMap<(String, Venue), FundingRate>>>,
    last_reactive_refresh: Arc<Mutex<HashMap<Venue, Instant>>>,
    refreshing: Arc<Mutex<HashSet<Venue>>>,
}

impl MarketStateCache {
    pub fn new(adapters: HashMap<Venue, Arc<dyn VenueAdapter>>) -> Self {
        Self {
            adapters: Arc::new(adapters),
            positions: Arc::new(RwLock::new(HashMap::new())),
            marks: Arc::new(RwLock::new(HashMap::new())),
            fundings: Arc::new(RwLock::new(HashMap::new())),
            last_reactive_refresh: Arc::new(Mutex::new(HashMap::new())),
            refreshing: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Re-reads `venue`'s full position slice from its adapter and replaces
    /// it wholesale: keys for this venue absent from the fresh read are
    /// deleted (invariant I3). Guarded so a venue's refresh never overlaps
    /// itself (spec §5).
    pub async fn refresh_venue(&self, venue: Venue) -> Result<(), AdapterError> {
        {
            let mut refreshing = self.refreshing.lock().await;
            if !refreshing.insert(venue) {
                return Ok(()); // a refresh for this venue is already in flight
            }
        }

        let result = self.refresh_venue_inner(venue).await;

        self.refreshing.lock().await.remove(&venue);
        result
    }

    async fn refresh_venue_inner(&self, venue: Venue) -> Result<(), AdapterError> {
        let adapter = self
            .adapters
            .get(&venue)
            .ok_or_else(|| AdapterError::internal(format!("no adapter configured for {venue}")))?;

        let fresh = adapter.get_positions().await?;
        let mut fresh_by_key = HashMap::new();
        for p in fresh {
            if !p.is_closed() {
                fresh_by_key.insert((p.venue, p.normalized.clone(), p.side), p);
            }
        }

        let mut positions = self.positions.write().await;
        positions.retain(|(v, _, _), _| *v != venue);
        positions.extend(fresh_by_key);
        drop(positions);

        self.last_reactive_refresh
            .lock()
            .await
            .insert(venue, Instant::now());
        Ok(())
    }

    /// Handles a typed WS event for one venue by re-reading that venue's
    /// slice (spec §4.D "reactive" path: the payload itself is a trigger,
    /// not authoritative — the cache always re-reads to stay consistent with
    /// partial fills the event alone wouldn't capture).
    pub async fn handle_event(&self, venue: Venue, _event: VenueEvent) -> Result<(), AdapterError> {
        self.refresh_venue(venue).await
    }

    /// Periodic refresh: re-reads every venue whose last reactive refresh is
    /// older than `stale_after` (spec §4.D, default `T_stale` = 10s).
    pub async fn refresh_stale(&self, stale_after: Duration) {
        let now = Instant::now();
        let stale_venues: Vec<Venue> = {
            let last = self.last_reactive_refresh.lock().await;
            self.adapters
                .keys()
                .filter(|v| {
                    last.get(v)
                        .map(|t| now.duration_since(*t) >= stale_after)
                        .unwrap_or(true)
                })
                .copied()
                .collect()
        };
        for venue in stale_venues {
            if let Err(e) = self.refresh_venue(venue).await {
                tracing::warn!(%venue, error = %e, "periodic stale refresh failed");
            }
        }
    }

    /// Unconditional full refresh across every venue (spec §4.D, `T_hard`
    /// default 5 min, "to defeat blindness from missed WS events").
    pub async fn force_refresh_all(&self) {
        let venues: Vec<Venue> = self.adapters.keys().copied().collect();
        for venue in venues {
            if let Err(e) = self.refresh_venue(venue).await {
                tracing::warn!(%venue, error = %e, "hard refresh failed");
            }
        }
    }

    pub async fn positions_for_symbol(&self, normalized: &str) -> Vec<Position> {
        self.positions
            .read()
            .await
            .values()
            .filter(|p| p.normalized == normalized)
            .cloned()
            .collect()
    }

    pub async fn all_positions(&self) -> Vec<Position> {
        self.positions.read().await.values().cloned().collect()
    }

    pub async fn get_position(&self, venue: Venue, normalized: &str, side: Side) -> Option<Position> {
        self.positions
            .read()
            .await
            .get(&(venue, normalized.to_string(), side))
            .cloned()
    }

    pub async fn set_mark_price(&self, normalized: &str, venue: Venue, price: f64) {
        self.marks
            .write()
            .await
            .insert((normalized.to_string(), venue), price);
    }

    pub async fn get_mark_price(&self, normalized: &str, venue: Venue) -> Option<f64> {
        self.marks.read().await.get(&(normalized.to_string(), venue)).copied()
    }

    pub async fn set_funding(&self, rate: FundingRate) {
        self.fundings
            .write()
            .await
            .insert((rate.normalized.clone(), rate.venue), rate);
    }

    pub async fn get_funding(&self, normalized: &str, venue: Venue) -> Option<FundingRate> {
        self.fundings
            .read()
            .await
            .get(&(normalized.to_string(), venue))
            .cloned()
    }

    pub async fn fundings_for_symbol(&self, normalized: &str) -> Vec<FundingRate> {
        self.fundings
            .read()
            .await
            .values()
            .filter(|f| f.normalized == normalized)
            .cloned()
            .collect()
    }

    /// Returns the cached funding rate for `(normalized, venue)`, falling
    /// back to a live adapter call and caching the result when nothing is
    /// cached yet (spec §4.F "from cache or on-demand adapter calls").
    pub async fn funding_on_demand(
        &self,
        normalized: &str,
        venue: Venue,
        raw_id: &RawSymbolId,
    ) -> Result<Option<FundingRate>, AdapterError> {
        if let Some(cached) = self.get_funding(normalized, venue).await {
            return Ok(Some(cached));
        }
        let adapter = self
            .adapters
            .get(&venue)
            .ok_or_else(|| AdapterError::internal(format!("no adapter configured for {venue}")))?;
        let fresh = adapter.get_funding_data(normalized, raw_id).await?;
        if let Some(rate) = &fresh {
            self.set_funding(rate.clone()).await;
        }
        Ok(fresh)
    }

    /// Unconditionally refetches funding for `normalized` across every venue
    /// in `per_venue_id`, replacing whatever was cached (spec §4.D periodic
    /// funding refresh). Per-venue failures don't abort the others.
    pub async fn refresh_funding(&self, normalized: &str, per_venue_id: &BTreeMap<Venue, String>) {
        for (venue, raw_id) in per_venue_id {
            let Some(adapter) = self.adapters.get(venue) else {
                continue;
            };
            let raw = RawSymbolId::Text(raw_id.clone());
            match adapter.get_funding_data(normalized, &raw).await {
                Ok(Some(rate)) => self.set_funding(rate).await,
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(%venue, %normalized, error = %e, "periodic funding refresh failed");
                }
            }
        }
    }

    pub fn adapters(&self) -> &HashMap<Venue, Arc<dyn VenueAdapter>> {
        &self.adapters
    }

    pub fn adapter_for(&self, venue: Venue) -> Option<Arc<dyn VenueAdapter>> {
        self.adapters.get(&venue).cloned()
    }

    /// Spawns the background task driving the periodic + hard refresh
    /// timers described in spec §4.D. Returns the task handle so the caller
    /// can abort it on shutdown.
    pub fn spawn_refresh_loop(
        &self,
        refresh_interval: Duration,
        stale_after: Duration,
        hard_refresh_interval: Duration,
    ) -> tokio::task::JoinHandle<()> {
        let cache = self.clone();
        tokio::spawn(async move {
            let mut refresh_tick = tokio::time::interval(refresh_interval);
            let mut hard_tick = tokio::time::interval(hard_refresh_interval);
            loop {
                tokio::select! {
                    _ = refresh_tick.tick() => {
                        cache.refresh_stale(stale_after).await;
                    }
                    _ = hard_tick.tick() => {
                        cache.force_refresh_all().await;
                    }
                }
            }
        })
    }
}

/// Helper shared by the Scheduler (§4.I) and Liquidation Monitor (§4.J):
/// snapshots positions for a normalized symbol into longs/shorts partitioned
/// by venue (spec §4.I step 1).
pub struct SymbolSnapshot {
    pub normalized: String,
    pub longs: Vec<Position>,
    pub shorts: Vec<Position>,
}

impl SymbolSnapshot {
    pub fn from_positions(normalized: &str, positions: &[Position]) -> Self {
        let mut longs = Vec::new();
        let mut shorts = Vec::new();
        for p in positions {
            if p.normalized != normalized {
                continue;
            }
            match p.side {
                Side::Long => longs.push(p.clone()),
                Side::Short => shorts.push(p.clone()),
            }
        }
        Self {
            normalized: normalized.to_string(),
            longs,
            shorts,
        }
    }

}
