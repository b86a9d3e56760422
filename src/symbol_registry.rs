//! Symbol Mapping Registry (spec §4.E, component E): normalized <-> per-venue
//! identifiers, common-asset discovery, and the persisted snapshot mirror of
//! `signals::db_storage`'s disk-backed cache in the teacher repo.

use crate::adapter::VenueAdapter;
use crate::errors::AdapterError;
use crate::models::{normalize_symbol, SymbolMapping, Venue};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::RwLock;

const SNAPSHOT_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SymbolMappingSnapshot {
    pub generated_at: DateTime<Utc>,
    pub version: u32,
    pub mappings: Vec<SymbolMapping>,
}

/// Discovers common assets across venues and answers normalized-symbol
/// lookups. Persists a JSON snapshot so the engine can start without
/// re-discovering (spec §4.E, §6 "Persisted State").
pub struct SymbolMappingRegistry {
    adapters: Arc<HashMap<Venue, Arc<dyn VenueAdapter>>>,
    mappings: RwLock<BTreeMap<String, SymbolMapping>>,
}

impl SymbolMappingRegistry {
    pub fn new(adapters: Arc<HashMap<Venue, Arc<dyn VenueAdapter>>>) -> Self {
        Self {
            adapters,
            mappings: RwLock::new(BTreeMap::new()),
        }
    }

    /// Queries every adapter's catalog API, normalizes each identifier, and
    /// rebuilds the mapping table (spec §4.E). Individual adapter failures
    /// don't abort discovery for the remaining venues (spec §7 "per-venue
    /// isolation").
    pub async fn discover_common_assets(&self) -> Result<(), AdapterError> {
        let mut built: BTreeMap<String, SymbolMapping> = BTreeMap::new();

        for (venue, adapter) in self.adapters.iter() {
            let symbols = match adapter.list_symbols().await {
                Ok(s) => s,
                Err(e) => {
                    tracing::warn!(%venue, error = %e, "symbol discovery failed for venue");
                    continue;
                }
            };
            for raw in symbols {
                let raw_str = raw.to_string();
                let normalized = normalize_symbol(&raw_str);
                built
                    .entry(normalized.clone())
                    .or_insert_with(|| SymbolMapping::new(normalized))
                    .per_venue_id
                    .insert(*venue, raw_str);
            }
        }

        *self.mappings.write().await = built;
        Ok(())
    }

    /// Normalized symbols tradable on >= 2 venues (spec §3).
    pub async fn tradable_symbols(&self) -> Vec<String> {
        self.mappings
            .read()
            .await
            .values()
            .filter(|m| m.is_tradable())
            .map(|m| m.normalized.clone())
            .collect()
    }

    pub async fn mapping_for(&self, normalized: &str) -> Option<SymbolMapping> {
        self.mappings.read().await.get(normalized).cloned()
    }

    pub async fn venues_for(&self, normalized: &str) -> Vec<Venue> {
        self.mappings
            .read()
            .await
            .get(normalized)
            .map(|m| m.per_venue_id.keys().copied().collect())
            .unwrap_or_default()
    }

    pub async fn all_mappings(&self) -> Vec<SymbolMapping> {
        self.mappings.read().await.values().cloned().collect()
    }

    pub async fn load_snapshot(&self, path: &Path) -> anyhow::Result<()> {
        let data = tokio::fs::read(path).await?;
        let snapshot: SymbolMappingSnapshot = serde_json::from_slice(&data)?;
        let mut mappings = BTreeMap::new();
        for m in snapshot.mappings {
            mappings.insert(m.normalized.clone(), m);
        }
        *self.mappings.write().await = mappings;
        Ok(())
    }

    pub async fn save_snapshot(&self, path: &Path) -> anyhow::Result<()> {
        let mappings: Vec<SymbolMapping> = self.mappings.read().await.values().cloned().collect();
        let snapshot = SymbolMappingSnapshot {
            generated_at: Utc::now(),
            version: SNAPSHOT_VERSION,
            mappings,
        };
        let data = serde_json::to_vec_pretty(&snapshot)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(path, data).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::mock::MockAdapter;
    use crate::adapter::RawSymbolId;

    #[tokio::test]
    async fn discovery_merges_per_venue_ids_by_normalized_symbol() {
        let hl = MockAdapter::new(Venue::Hyperliquid);
        hl.set_symbols(vec![RawSymbolId::Text("BTC-USD".into()), RawSymbolId::Text("SOLO".into())]);
        let lg = MockAdapter::new(Venue::Lighter);
        lg.set_symbols(vec![RawSymbolId::Text("BTCUSDT".into())]);

        let mut adapters: HashMap<Venue, Arc<dyn VenueAdapter>> = HashMap::new();
        adapters.insert(Venue::Hyperliquid, hl);
        adapters.insert(Venue::Lighter, lg);
        let registry = SymbolMappingRegistry::new(Arc::new(adapters));

        registry.discover_common_assets().await.unwrap();

        let tradable = registry.tradable_symbols().await;
        assert_eq!(tradable, vec!["BTC".to_string()]);

        let btc = registry.mapping_for("BTC").await.unwrap();
        assert_eq!(btc.per_venue_id.len(), 2);
        assert!(!registry.mapping_for("SOLO").await.unwrap().is_tradable());
    }

    #[tokio::test]
    async fn snapshot_round_trips_through_disk() {
        let hl = MockAdapter::new(Venue::Hyperliquid);
        hl.set_symbols(vec![RawSymbolId::Text("ETH-PERP".into())]);
        let mut adapters: HashMap<Venue, Arc<dyn VenueAdapter>> = HashMap::new();
        adapters.insert(Venue::Hyperliquid, hl);
        let registry = SymbolMappingRegistry::new(Arc::new(adapters));
        registry.discover_common_assets().await.unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("snapshot.json");
        registry.save_snapshot(&path).await.unwrap();

        let adapters2: HashMap<Venue, Arc<dyn VenueAdapter>> = HashMap::new();
        let registry2 = SymbolMappingRegistry::new(Arc::new(adapters2));
        registry2.load_snapshot(&path).await.unwrap();

        assert_eq!(registry2.mapping_for("ETH").await.unwrap().per_venue_id.len(), 1);
    }
}
