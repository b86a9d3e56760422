//! Funding Aggregator & Opportunity Finder (spec §4.F, component F).
//!
//! Grounded on `arbitrage::engine::ArbitrageEngine::scan_opportunities`'s
//! scan → validate → filter → sort pipeline, and on
//! `scrapers::polymarket_api`'s throttled-loop batching style (batched work
//! with an inter-batch pause to respect rate limits).

use crate::adapter::RawSymbolId;
use crate::cache::MarketStateCache;
use crate::diagnostics::{DecisionEvent, Diagnostics};
use crate::models::{FundingRate, Opportunity, Venue};
use crate::symbol_registry::SymbolMappingRegistry;
use std::sync::Arc;
use std::time::Duration;

const ANNUALIZATION_FACTOR: f64 = 24.0 * 365.0;

pub struct RateComparison {
    pub highest: FundingRate,
    pub lowest: FundingRate,
    pub spread: f64,
}

pub struct FundingAggregator {
    cache: Arc<MarketStateCache>,
    registry: Arc<SymbolMappingRegistry>,
    diagnostics: Diagnostics,
    require_open_interest: bool,
    batch_size: usize,
    batch_pause: Duration,
}

impl FundingAggregator {
    pub fn new(
        cache: Arc<MarketStateCache>,
        registry: Arc<SymbolMappingRegistry>,
        diagnostics: Diagnostics,
        require_open_interest: bool,
        batch_size: usize,
        batch_pause: Duration,
    ) -> Self {
        Self {
            cache,
            registry,
            diagnostics,
            require_open_interest,
            batch_size,
            batch_pause,
        }
    }

    /// Funding rates for `normalized` across every venue in the symbol
    /// mapping: cache hits are returned as-is, misses fall back to an
    /// on-demand adapter call whose result is cached for next time (spec
    /// §4.F). If the mapping hasn't been discovered yet, falls back to
    /// whatever happens to be cached already. A rate is omitted if OI is
    /// required by config and unavailable (spec §4.F, §7: OI is a gating
    /// data point).
    pub async fn get_funding_rates(&self, normalized: &str) -> Vec<FundingRate> {
        let rates = match self.registry.mapping_for(normalized).await {
            Some(mapping) if !mapping.per_venue_id.is_empty() => {
                let mut rates = Vec::with_capacity(mapping.per_venue_id.len());
                for (venue, raw_id) in &mapping.per_venue_id {
                    let raw = RawSymbolId::Text(raw_id.clone());
                    match self.cache.funding_on_demand(normalized, *venue, &raw).await {
                        Ok(Some(rate)) => rates.push(rate),
                        Ok(None) => {}
                        Err(e) => {
                            tracing::warn!(%venue, %normalized, error = %e, "on-demand funding fetch failed");
                        }
                    }
                }
                rates
            }
            _ => self.cache.fundings_for_symbol(normalized).await,
        };

        rates
            .into_iter()
            .filter(|r| !self.require_open_interest || r.open_interest.is_some())
            .collect()
    }

    /// Unconditionally refetches funding for every tradable symbol across
    /// every venue it trades on, replacing whatever was cached (spec §4.D
    /// periodic funding refresh, default 5 min).
    pub async fn refresh_all_funding(&self) {
        for mapping in self.registry.all_mappings().await {
            if mapping.per_venue_id.len() < 2 {
                continue;
            }
            self.cache
                .refresh_funding(&mapping.normalized, &mapping.per_venue_id)
                .await;
        }
    }

    /// Spawns the periodic funding refresh loop (spec §4.D, default
    /// `T_funding` = 5 min).
    pub fn spawn_refresh_loop(self: Arc<Self>, interval: Duration) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(interval);
            loop {
                tick.tick().await;
                self.refresh_all_funding().await;
            }
        })
    }

    /// Highest/lowest current-rate venues and their spread (spec §4.F).
    pub async fn compare_funding_rates(&self, normalized: &str) -> Option<RateComparison> {
        let mut rates = self.get_funding_rates(normalized).await;
        if rates.len() < 2 {
            return None;
        }
        rates.sort_by(|a, b| b.current_rate.partial_cmp(&a.current_rate).unwrap());
        let highest = rates.first().cloned()?;
        let lowest = rates.last().cloned()?;
        let spread = highest.current_rate - lowest.current_rate;
        Some(RateComparison {
            highest,
            lowest,
            spread,
        })
    }

    /// Scans `symbols` in bounded batches (spec §4.F), yielding every
    /// candidate opportunity clearing `min_spread`, sorted by expected
    /// annualized return with the documented tie-break.
    pub async fn find_arbitrage_opportunities(
        &self,
        symbols: &[String],
        min_spread: f64,
    ) -> Vec<Opportunity> {
        let mut found = Vec::new();

        for batch in symbols.chunks(self.batch_size.max(1)) {
            for normalized in batch {
                found.extend(self.opportunities_for_symbol(normalized, min_spread).await);
            }
            if !self.batch_pause.is_zero() {
                tokio::time::sleep(self.batch_pause).await;
            }
        }

        found.sort_by(|a, b| {
            b.expected_return
                .partial_cmp(&a.expected_return)
                .unwrap()
                .then_with(|| {
                    let oi_a = a.long_oi.unwrap_or(0.0) + a.short_oi.unwrap_or(0.0);
                    let oi_b = b.long_oi.unwrap_or(0.0) + b.short_oi.unwrap_or(0.0);
                    oi_b.partial_cmp(&oi_a).unwrap()
                })
                .then_with(|| a.normalized.cmp(&b.normalized))
        });

        for opp in &found {
            self.diagnostics.emit(DecisionEvent::OpportunityFound {
                normalized: opp.normalized.clone(),
                long_venue: opp.long_venue,
                short_venue: opp.short_venue,
                spread: opp.spread,
            });
        }

        found
    }

    async fn opportunities_for_symbol(&self, normalized: &str, min_spread: f64) -> Vec<Opportunity> {
        let rates = self.get_funding_rates(normalized).await;
        if rates.len() < 2 {
            return Vec::new();
        }

        let mut candidates = Vec::new();

        // Directional cross: long the negative-rate venue (receives funding),
        // short the positive-rate venue, across the most extreme pair of
        // opposite-signed rates (spec §4.F item 1).
        let best_positive = rates
            .iter()
            .filter(|r| r.current_rate > 0.0)
            .max_by(|a, b| a.current_rate.partial_cmp(&b.current_rate).unwrap());
        let best_negative = rates
            .iter()
            .filter(|r| r.current_rate < 0.0)
            .min_by(|a, b| a.current_rate.partial_cmp(&b.current_rate).unwrap());
        if let (Some(pos), Some(neg)) = (best_positive, best_negative) {
            if pos.venue != neg.venue {
                if let Some(opp) = self.build_opportunity(normalized, neg, pos, min_spread) {
                    candidates.push(opp);
                }
            }
        }

        // Simple extremes: highest vs lowest current rate regardless of sign
        // (spec §4.F item 2), yielded independently of the directional cross.
        if let Some(cmp) = self.compare_from_rates(&rates) {
            if cmp.highest.venue != cmp.lowest.venue {
                if let Some(opp) =
                    self.build_opportunity(normalized, &cmp.lowest, &cmp.highest, min_spread)
                {
                    candidates.push(opp);
                }
            }
        }

        candidates
    }

    fn compare_from_rates(&self, rates: &[FundingRate]) -> Option<RateComparison> {
        if rates.len() < 2 {
            return None;
        }
        let mut sorted = rates.to_vec();
        sorted.sort_by(|a, b| b.current_rate.partial_cmp(&a.current_rate).unwrap());
        let highest = sorted.first().cloned()?;
        let lowest = sorted.last().cloned()?;
        let spread = highest.current_rate - lowest.current_rate;
        Some(RateComparison {
            highest,
            lowest,
            spread,
        })
    }

    /// `long` pays the lower (or negative) rate and receives funding; `short`
    /// pays the higher rate. Spread is always `short.rate - long.rate` so it
    /// is positive for a genuine arbitrage (spec §3 "signed" definition: the
    /// long venue is assigned the lower rate by construction here).
    fn build_opportunity(
        &self,
        normalized: &str,
        long: &FundingRate,
        short: &FundingRate,
        min_spread: f64,
    ) -> Option<Opportunity> {
        let spread = short.current_rate - long.current_rate;
        if long.venue == short.venue || spread.abs() < min_spread {
            return None;
        }
        Some(Opportunity {
            normalized: normalized.to_string(),
            long_venue: long.venue,
            short_venue: short.venue,
            long_rate: long.current_rate,
            short_rate: short.current_rate,
            spread,
            expected_return: spread.abs() * ANNUALIZATION_FACTOR,
            long_mark_price: long.mark_price,
            short_mark_price: short.mark_price,
            long_oi: long.open_interest,
            short_oi: short.open_interest,
            t: long.t_observed.max(short.t_observed),
        })
    }

    pub fn registry(&self) -> &Arc<SymbolMappingRegistry> {
        &self.registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::mock::MockAdapter;
    use crate::models::Venue;
    use chrono::Utc;
    use std::collections::HashMap;

    fn rate(venue: Venue, current_rate: f64) -> FundingRate {
        FundingRate {
            venue,
            normalized: "BTC".into(),
            current_rate,
            predicted_rate: current_rate,
            mark_price: 50_000.0,
            open_interest: Some(1_000_000.0),
            volume_24h: None,
            t_observed: Utc::now(),
        }
    }

    async fn setup(rates: Vec<FundingRate>) -> FundingAggregator {
        let adapters: HashMap<Venue, Arc<dyn crate::adapter::VenueAdapter>> = HashMap::new();
        let cache = Arc::new(MarketStateCache::new(adapters));
        for r in rates {
            cache.set_funding(r).await;
        }
        let mock_adapters: HashMap<Venue, Arc<dyn crate::adapter::VenueAdapter>> = HashMap::new();
        let registry = Arc::new(SymbolMappingRegistry::new(Arc::new(mock_adapters)));
        FundingAggregator::new(
            cache,
            registry,
            Diagnostics::new(),
            false,
            5,
            Duration::from_millis(0),
        )
    }

    #[tokio::test]
    async fn compare_funding_rates_sorts_descending_and_computes_spread() {
        let agg = setup(vec![
            rate(Venue::Hyperliquid, 0.02),
            rate(Venue::Lighter, -0.01),
        ])
        .await;
        let cmp = agg.compare_funding_rates("BTC").await.unwrap();
        assert_eq!(cmp.highest.venue, Venue::Hyperliquid);
        assert_eq!(cmp.lowest.venue, Venue::Lighter);
        assert!((cmp.spread - 0.03).abs() < 1e-9);
    }

    #[tokio::test]
    async fn finds_directional_cross_and_simple_extremes() {
        let agg = setup(vec![
            rate(Venue::Hyperliquid, 0.05),
            rate(Venue::Lighter, -0.02),
            rate(Venue::Aster, 0.01),
        ])
        .await;

        let opps = agg
            .find_arbitrage_opportunities(&["BTC".to_string()], 0.01)
            .await;

        assert!(opps.iter().any(|o| o.long_venue == Venue::Lighter && o.short_venue == Venue::Hyperliquid));
        // Simple extremes also pairs the global highest vs lowest, same pair here.
        assert!(opps.iter().all(|o| o.spread >= 0.01));
        assert!(opps.windows(2).all(|w| w[0].expected_return >= w[1].expected_return));
    }

    #[tokio::test]
    async fn below_min_spread_is_excluded() {
        let agg = setup(vec![
            rate(Venue::Hyperliquid, 0.001),
            rate(Venue::Lighter, 0.0005),
        ])
        .await;
        let opps = agg
            .find_arbitrage_opportunities(&["BTC".to_string()], 0.01)
            .await;
        assert!(opps.is_empty());
    }
}
