//! Core data model: venues, normalized symbols, positions, orders, funding
//! rates, opportunities, and the pairing/retry bookkeeping types.
//!
//! Every type here mirrors a record from spec §3 one-to-one; nothing is added
//! beyond `serde` derives and constructors.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Minimum size below which a position is considered closed (spec §3, I3).
pub const EPSILON: f64 = 0.0001;

/// Enumerated venue tag (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Venue {
    Hyperliquid,
    Lighter,
    Aster,
    Extended,
}

impl Venue {
    pub const ALL: [Venue; 4] = [
        Venue::Hyperliquid,
        Venue::Lighter,
        Venue::Aster,
        Venue::Extended,
    ];
}

impl fmt::Display for Venue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Venue::Hyperliquid => "HYPERLIQUID",
            Venue::Lighter => "LIGHTER",
            Venue::Aster => "ASTER",
            Venue::Extended => "EXTENDED",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Side {
    Long,
    Short,
}

impl Side {
    pub fn opposite(self) -> Side {
        match self {
            Side::Long => Side::Short,
            Side::Short => Side::Long,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", if matches!(self, Side::Long) { "LONG" } else { "SHORT" })
    }
}

/// Suffix set stripped during normalization (spec §3). Order matters: longer,
/// more specific suffixes are tried first so `"BTC-PERP"` doesn't get left
/// with a dangling `-` after stripping `PERP`.
const NORMALIZE_SUFFIXES: &[&str] = &["-PERP", "-USD", "PERP", "USDT", "USDC", "USD"];

/// Uppercases and strips the suffix set from spec §3. Normalization is total
/// and idempotent: `norm(norm(x)) == norm(x)`.
pub fn normalize_symbol(raw: &str) -> String {
    let upper = raw.trim().to_uppercase();
    for suffix in NORMALIZE_SUFFIXES {
        if let Some(stripped) = upper.strip_suffix(suffix) {
            if !stripped.is_empty() {
                return stripped.to_string();
            }
        }
    }
    upper
}

/// `{ normalized, perVenueId: venue -> identifier }` (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SymbolMapping {
    pub normalized: String,
    pub per_venue_id: std::collections::BTreeMap<Venue, String>,
}

impl SymbolMapping {
    pub fn new(normalized: impl Into<String>) -> Self {
        Self {
            normalized: normalized.into(),
            per_venue_id: std::collections::BTreeMap::new(),
        }
    }

    /// A normalized symbol is tradable iff it appears on >= 2 venues.
    pub fn is_tradable(&self) -> bool {
        self.per_venue_id.len() >= 2
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct MarkPriceEntry {
    pub venue: Venue,
    pub t_observed: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FundingRate {
    pub venue: Venue,
    pub normalized: String,
    /// Per-funding-interval decimal, normalized to an hourly rate by the
    /// aggregator (spec §3, §9 open question: divides by 24 iff the adapter
    /// declares `funding_period_hours == 24`).
    pub current_rate: f64,
    pub predicted_rate: f64,
    pub mark_price: f64,
    pub open_interest: Option<f64>,
    pub volume_24h: Option<f64>,
    pub t_observed: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub venue: Venue,
    pub normalized: String,
    pub side: Side,
    pub size: f64,
    pub entry_price: f64,
    pub mark_price: f64,
    pub unrealized_pnl: f64,
    pub leverage: Option<f64>,
    pub liquidation_price: Option<f64>,
    pub margin_used: Option<f64>,
    pub opened_at: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
}

impl Position {
    /// A position is closed when `|size| < EPSILON` (spec §3).
    pub fn is_closed(&self) -> bool {
        self.size.abs() < EPSILON
    }

    pub fn key(&self) -> (Venue, String, Side) {
        (self.venue, self.normalized.clone(), self.side)
    }
}

/// Conceptual view grouping at most one LONG and one SHORT with the same
/// normalized symbol on different venues (spec §3).
#[derive(Debug, Clone)]
pub struct PairedPosition {
    pub normalized: String,
    pub long: Option<Position>,
    pub short: Option<Position>,
}

impl PairedPosition {
    /// Valid iff both legs exist on different venues.
    pub fn is_valid(&self) -> bool {
        match (&self.long, &self.short) {
            (Some(l), Some(s)) => l.venue != s.venue,
            _ => false,
        }
    }

    /// Single-leg iff exactly one side is present, or both are present but
    /// pinned to the same venue (same-venue pair is not a valid hedge).
    pub fn is_single_leg(&self) -> bool {
        match (&self.long, &self.short) {
            (Some(_), None) | (None, Some(_)) => true,
            (Some(l), Some(s)) => l.venue == s.venue,
            (None, None) => false,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.long.is_none() && self.short.is_none()
    }

    /// The lone leg present, when this pairing is single-leg. Callers should
    /// only invoke this after confirming `is_single_leg()`.
    pub fn single_leg(&self) -> Option<&Position> {
        if !self.is_single_leg() {
            return None;
        }
        self.long.as_ref().or(self.short.as_ref())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderType {
    Market,
    Limit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimeInForce {
    Gtc,
    Ioc,
    Fok,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderStatus {
    Submitted,
    WaitingFill,
    PartiallyFilled,
    Filled,
    Cancelled,
    Failed,
    Expired,
}

impl OrderStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            OrderStatus::Filled
                | OrderStatus::Cancelled
                | OrderStatus::Failed
                | OrderStatus::Expired
        )
    }

    pub fn is_active(self) -> bool {
        matches!(
            self,
            OrderStatus::Submitted | OrderStatus::WaitingFill | OrderStatus::PartiallyFilled
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderRequest {
    pub normalized: String,
    pub venue: Venue,
    pub side: Side,
    pub size: f64,
    pub price: Option<f64>,
    pub order_type: OrderType,
    pub reduce_only: bool,
    pub tif: TimeInForce,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub order_id: String,
    pub venue: Venue,
    pub normalized: String,
    pub side: Side,
    pub size: f64,
    pub price: Option<f64>,
    pub order_type: OrderType,
    pub reduce_only: bool,
    pub tif: TimeInForce,
    pub status: OrderStatus,
    pub filled_size: f64,
    pub avg_fill_price: Option<f64>,
    pub placed_at: DateTime<Utc>,
}

/// A transient, never-persisted tuple describing a profitable cross-venue
/// funding-rate spread (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Opportunity {
    pub normalized: String,
    pub long_venue: Venue,
    pub short_venue: Venue,
    pub long_rate: f64,
    pub short_rate: f64,
    /// Signed: `long_rate - short_rate`.
    pub spread: f64,
    /// `|spread| * 24 * 365`.
    pub expected_return: f64,
    pub long_mark_price: f64,
    pub short_mark_price: f64,
    pub long_oi: Option<f64>,
    pub short_oi: Option<f64>,
    pub t: DateTime<Utc>,
}

/// Keyed by `normalized|longVenue|shortVenue`; pins the venue assignment
/// decided at opening so recovery never re-derives it from fresh market data
/// (spec §3, I5, the "Critical rule" in §4.I).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SingleLegRetryInfo {
    pub normalized: String,
    pub long_venue: Venue,
    pub short_venue: Venue,
    pub retry_count: u32,
    pub last_retry_time: DateTime<Utc>,
}

impl SingleLegRetryInfo {
    pub fn key(normalized: &str, long_venue: Venue, short_venue: Venue) -> String {
        format!("{normalized}|{long_venue}|{short_venue}")
    }

    /// Whether this retry record concerns the given position's venue, i.e.
    /// the position's venue is one of the two pinned venues.
    pub fn mentions(&self, venue: Venue) -> bool {
        self.long_venue == venue || self.short_venue == venue
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RiskLevel {
    Safe,
    Warning,
    Danger,
    Critical,
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RiskLevel::Safe => "SAFE",
            RiskLevel::Warning => "WARNING",
            RiskLevel::Danger => "DANGER",
            RiskLevel::Critical => "CRITICAL",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LiquidationRisk {
    pub venue: Venue,
    pub normalized: String,
    pub side: Side,
    pub mark_price: f64,
    pub liq_price: f64,
    pub entry_price: f64,
    pub leverage: f64,
    /// Whether `liq_price` was estimated rather than reported by the venue
    /// (spec §4.G); downstream gating should be more conservative when true.
    pub liq_price_estimated: bool,
    pub distance_to_liquidation: f64,
    pub proximity_to_liquidation: f64,
    pub risk_level: RiskLevel,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalization_strips_known_suffixes() {
        assert_eq!(normalize_symbol("BTC"), "BTC");
        assert_eq!(normalize_symbol("BTC-USD"), "BTC");
        assert_eq!(normalize_symbol("BTCUSDT"), "BTC");
        assert_eq!(normalize_symbol("BTC-PERP"), "BTC");
        assert_eq!(normalize_symbol("btcusdc"), "BTC");
        assert_eq!(normalize_symbol("ETHPERP"), "ETH");
    }

    #[test]
    fn normalization_is_idempotent() {
        for raw in ["BTC", "BTC-USD", "BTCUSDT", "BTC-PERP", "MEGA-USD", "mega"] {
            let once = normalize_symbol(raw);
            let twice = normalize_symbol(&once);
            assert_eq!(once, twice);
        }
    }

    #[test]
    fn normalization_collides_suffix_variants() {
        let variants = ["BTC", "BTC-USD", "BTCUSDT", "BTC-PERP"];
        let normalized: Vec<_> = variants.iter().map(|s| normalize_symbol(s)).collect();
        assert!(normalized.windows(2).all(|w| w[0] == w[1]));
    }

    #[test]
    fn paired_position_classification() {
        let now = Utc::now();
        let mk = |venue, side| Position {
            venue,
            normalized: "MEGA".into(),
            side,
            size: 10.0,
            entry_price: 1.0,
            mark_price: 1.0,
            unrealized_pnl: 0.0,
            leverage: Some(5.0),
            liquidation_price: None,
            margin_used: None,
            opened_at: now,
            last_updated: now,
        };

        let valid = PairedPosition {
            normalized: "MEGA".into(),
            long: Some(mk(Venue::Hyperliquid, Side::Long)),
            short: Some(mk(Venue::Lighter, Side::Short)),
        };
        assert!(valid.is_valid());
        assert!(!valid.is_single_leg());

        let same_venue = PairedPosition {
            normalized: "MEGA".into(),
            long: Some(mk(Venue::Lighter, Side::Long)),
            short: Some(mk(Venue::Lighter, Side::Short)),
        };
        assert!(!same_venue.is_valid());
        assert!(same_venue.is_single_leg());

        let single = PairedPosition {
            normalized: "MEGA".into(),
            long: None,
            short: Some(mk(Venue::Lighter, Side::Short)),
        };
        assert!(single.is_single_leg());
        assert!(!single.is_valid());
    }
}
