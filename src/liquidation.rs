//! Liquidation Risk Valuator (spec §4.G, component G).
//!
//! A pure calculator with no I/O, grounded on `risk::KellyCalculator` /
//! `risk::VaRCalculator`'s shape: plain structs of numeric inputs, free
//! functions deriving risk metrics, no adapter or cache access.

use crate::models::{LiquidationRisk, Position, RiskLevel, Side};

const DEFAULT_INITIAL_BUFFER: f64 = 0.1;
const MAINTENANCE_MARGIN_ASSUMPTION: f64 = 0.015;
const FALLBACK_LIQ_DISTANCE_PCT: f64 = 0.05;

/// `max(0, (mark - liq) / mark)` for LONG, mirrored for SHORT (spec §4.G).
pub fn distance_to_liquidation(side: Side, mark_price: f64, liq_price: f64) -> f64 {
    let raw = match side {
        Side::Long => (mark_price - liq_price) / mark_price,
        Side::Short => (liq_price - mark_price) / mark_price,
    };
    raw.max(0.0)
}

/// `1 / leverage`, or the documented default when leverage is unknown.
pub fn initial_buffer(leverage: Option<f64>) -> f64 {
    match leverage {
        Some(l) if l > 0.0 => 1.0 / l,
        _ => DEFAULT_INITIAL_BUFFER,
    }
}

/// `clamp(0, 1, (initialBuffer - distance) / initialBuffer)`; 0 when the
/// current buffer already exceeds the initial one (in profit).
pub fn proximity_to_liquidation(distance: f64, buffer: f64) -> f64 {
    if buffer <= 0.0 {
        return 0.0;
    }
    ((buffer - distance) / buffer).clamp(0.0, 1.0)
}

pub fn risk_level(proximity: f64) -> RiskLevel {
    if proximity >= 0.9 {
        RiskLevel::Critical
    } else if proximity >= 0.7 {
        RiskLevel::Danger
    } else if proximity >= 0.4 {
        RiskLevel::Warning
    } else {
        RiskLevel::Safe
    }
}

/// Estimates a liquidation price when the venue doesn't report one: `entry *
/// (1 -/+ max(0.01, 1/leverage - 0.015))`, falling back to +/-5% of mark when
/// leverage is unknown (spec §4.G).
pub fn estimate_liquidation_price(side: Side, entry_price: f64, mark_price: f64, leverage: Option<f64>) -> f64 {
    match leverage {
        Some(l) if l > 0.0 => {
            let buffer = (1.0 / l - MAINTENANCE_MARGIN_ASSUMPTION).max(0.01);
            match side {
                Side::Long => entry_price * (1.0 - buffer),
                Side::Short => entry_price * (1.0 + buffer),
            }
        }
        _ => match side {
            Side::Long => mark_price * (1.0 - FALLBACK_LIQ_DISTANCE_PCT),
            Side::Short => mark_price * (1.0 + FALLBACK_LIQ_DISTANCE_PCT),
        },
    }
}

/// Full risk valuation for one position (spec §4.G). Uses the venue-reported
/// liquidation price when present, otherwise estimates one and marks the
/// result accordingly so callers can gate more conservatively.
pub fn valuate(position: &Position) -> LiquidationRisk {
    let (liq_price, estimated) = match position.liquidation_price {
        Some(p) => (p, false),
        None => (
            estimate_liquidation_price(
                position.side,
                position.entry_price,
                position.mark_price,
                position.leverage,
            ),
            true,
        ),
    };

    let distance = distance_to_liquidation(position.side, position.mark_price, liq_price);
    let buffer = initial_buffer(position.leverage);
    let proximity = proximity_to_liquidation(distance, buffer);

    LiquidationRisk {
        venue: position.venue,
        normalized: position.normalized.clone(),
        side: position.side,
        mark_price: position.mark_price,
        liq_price,
        entry_price: position.entry_price,
        leverage: position.leverage.unwrap_or(1.0),
        liq_price_estimated: estimated,
        distance_to_liquidation: distance,
        proximity_to_liquidation: proximity,
        risk_level: risk_level(proximity),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn position(side: Side, mark: f64, liq: Option<f64>, leverage: Option<f64>) -> Position {
        let now = Utc::now();
        Position {
            venue: crate::models::Venue::Hyperliquid,
            normalized: "BTC".into(),
            side,
            size: 1.0,
            entry_price: 100.0,
            mark_price: mark,
            unrealized_pnl: 0.0,
            leverage,
            liquidation_price: liq,
            margin_used: None,
            opened_at: now,
            last_updated: now,
        }
    }

    #[test]
    fn distance_and_proximity_for_long_approaching_liquidation() {
        // 10x leverage, initial buffer 0.1. Mark has drifted to within 5% of liq.
        let p = position(Side::Long, 95.0, Some(90.25), Some(10.0));
        let risk = valuate(&p);
        assert!(!risk.liq_price_estimated);
        assert!(risk.distance_to_liquidation > 0.0 && risk.distance_to_liquidation < 0.1);
        assert!(risk.proximity_to_liquidation > 0.0);
    }

    #[test]
    fn in_profit_position_has_zero_proximity() {
        let p = position(Side::Long, 150.0, Some(90.0), Some(10.0));
        let risk = valuate(&p);
        assert_eq!(risk.proximity_to_liquidation, 0.0);
        assert_eq!(risk.risk_level, RiskLevel::Safe);
    }

    #[test]
    fn missing_liquidation_price_is_estimated_and_flagged() {
        let p = position(Side::Short, 100.0, None, Some(20.0));
        let risk = valuate(&p);
        assert!(risk.liq_price_estimated);
        // buffer = max(0.01, 1/20 - 0.015) = 0.035; SHORT liq = entry * 1.035
        assert!((risk.liq_price - 103.5).abs() < 1e-6);
    }

    #[test]
    fn unknown_leverage_falls_back_to_five_percent_of_mark() {
        let p = position(Side::Long, 100.0, None, None);
        let risk = valuate(&p);
        assert!((risk.liq_price - 95.0).abs() < 1e-6);
    }

    #[test]
    fn risk_level_thresholds() {
        assert_eq!(risk_level(0.95), RiskLevel::Critical);
        assert_eq!(risk_level(0.75), RiskLevel::Danger);
        assert_eq!(risk_level(0.45), RiskLevel::Warning);
        assert_eq!(risk_level(0.1), RiskLevel::Safe);
    }
}
