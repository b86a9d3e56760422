//! Funding-rate arbitrage keeper: execution orchestration engine.
//!
//! Discovers funding-rate spreads across perpetual-futures venues, opens
//! matched LONG/SHORT pairs to harvest them, and watches liquidation risk
//! and pairing integrity on every tick. See `SPEC_FULL.md` for the full
//! component breakdown (A-J).

pub mod adapter;
pub mod cache;
pub mod config;
pub mod diagnostics;
pub mod errors;
pub mod funding;
pub mod hedged_close;
pub mod liquidation;
pub mod lock_service;
pub mod models;
pub mod monitor;
pub mod rate_limiter;
pub mod scheduler;
pub mod symbol_registry;
pub mod telemetry;
