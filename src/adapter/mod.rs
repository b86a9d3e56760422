//! Venue Adapter Contract (spec §6, component A).
//!
//! The engine never talks to a real venue directly: every call goes through
//! `dyn VenueAdapter`, matching the teacher's "thin interfaces" framing of
//! external collaborators (Design Notes, spec §9 "Cyclic references" item —
//! the cache and scheduler only know about this trait, never about a concrete
//! HTTP/WS client). `async_trait` is used because the engine holds
//! heterogeneous concrete adapters behind one object-safe interface in a
//! `HashMap<Venue, Arc<dyn VenueAdapter>>`.

pub mod mock;
pub mod null;

use crate::errors::AdapterError;
use crate::models::{FundingRate, Order, OrderRequest, OrderStatus, Position};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One open order as returned by `getOpenOrders` (spec §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenOrderView {
    pub order_id: String,
    pub normalized: String,
    pub side: crate::models::Side,
    pub price: Option<f64>,
    pub size: f64,
    pub filled_size: f64,
    pub reduce_only: bool,
    pub placed_at: DateTime<Utc>,
}

/// A funding payment record as returned by `getFundingPayments` (spec §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FundingPayment {
    pub normalized: String,
    pub amount: f64,
    pub rate: f64,
    pub t: DateTime<Utc>,
}

/// Typed WS event channel payloads (Design Notes "Mixed WS event handlers"
/// item): each adapter emits one of these two variants on a single channel
/// per venue; the cache updater is the sole consumer.
#[derive(Debug, Clone)]
pub enum VenueEvent {
    OrderUpdate(Order),
    PositionsUpdate(Vec<Position>),
}

/// Raw per-venue symbol: a string ticker or an integer market index,
/// depending on the venue's own catalog representation (spec §3).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RawSymbolId {
    Text(String),
    Index(i64),
}

impl std::fmt::Display for RawSymbolId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RawSymbolId::Text(s) => write!(f, "{s}"),
            RawSymbolId::Index(i) => write!(f, "{i}"),
        }
    }
}

/// Response to `placeOrder` (spec §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaceOrderResponse {
    pub order_id: String,
    pub status: OrderStatus,
    pub filled_size: Option<f64>,
    pub avg_fill_price: Option<f64>,
}

/// Uniform position/order/market-data operations per venue (spec §6). A
/// concrete implementation talking to a real venue over HTTP/WS is outside
/// this crate's scope; only the contract and two reference
/// implementations (`mock`, `null`) live here.
#[async_trait]
pub trait VenueAdapter: Send + Sync {
    fn venue(&self) -> crate::models::Venue;

    /// Whether this adapter reports funding on a 24h period rather than
    /// hourly (spec §9 open question: the aggregator divides by 24 iff this
    /// is `true`).
    fn funding_period_hours(&self) -> u32 {
        1
    }

    async fn place_order(&self, req: OrderRequest) -> Result<PlaceOrderResponse, AdapterError>;
    async fn cancel_order(&self, order_id: &str, normalized: &str) -> Result<bool, AdapterError>;
    async fn cancel_all_orders(&self, normalized: &str) -> Result<u32, AdapterError>;
    async fn get_order_status(&self, order_id: &str, normalized: &str) -> Result<Order, AdapterError>;
    async fn get_open_orders(&self) -> Result<Vec<OpenOrderView>, AdapterError>;
    async fn get_positions(&self) -> Result<Vec<Position>, AdapterError>;
    async fn get_position(&self, normalized: &str) -> Result<Option<Position>, AdapterError>;
    async fn get_mark_price(&self, normalized: &str) -> Result<f64, AdapterError>;
    async fn get_best_bid_ask(&self, normalized: &str) -> Result<(f64, f64), AdapterError>;
    async fn get_balance(&self) -> Result<f64, AdapterError>;
    async fn get_equity(&self) -> Result<f64, AdapterError>;
    async fn get_available_margin(&self) -> Result<f64, AdapterError>;
    async fn list_symbols(&self) -> Result<Vec<RawSymbolId>, AdapterError>;
    async fn get_funding_data(&self, normalized: &str, raw_id: &RawSymbolId) -> Result<Option<FundingRate>, AdapterError>;
    async fn get_funding_payments(
        &self,
        start_ms: Option<i64>,
        end_ms: Option<i64>,
    ) -> Result<Vec<FundingPayment>, AdapterError>;

    /// Subscribes to the venue's order/position event stream. The returned
    /// receiver is the sole feed the Market State Cache's reactive refresh
    /// path listens on for this venue.
    async fn subscribe_positions_and_orders(
        &self,
    ) -> Result<tokio::sync::mpsc::Receiver<VenueEvent>, AdapterError>;
}
