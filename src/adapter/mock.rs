//! In-memory, scriptable adapter used by every scenario test (spec §8).
//!
//! Grounded on the teacher's pattern of hand-rolled in-memory test doubles
//! (e.g. `auth::middleware`'s tests construct `User`/`Claims` directly rather
//! than standing up a real identity provider). `MockAdapter` holds its own
//! position book, order book, and funding table behind `parking_lot::Mutex`
//! and lets tests script fills, failures, and funding rates explicitly.

use super::{FundingPayment, OpenOrderView, PlaceOrderResponse, RawSymbolId, VenueAdapter, VenueEvent};
use crate::errors::{AdapterError, AdapterErrorKind};
use crate::models::{FundingRate, Order, OrderRequest, OrderStatus, Position, Venue};
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

#[derive(Default)]
struct State {
    positions: HashMap<String, Position>, // key: normalized|side
    orders: HashMap<String, Order>,
    fundings: HashMap<String, FundingRate>, // key: normalized
    mark_prices: HashMap<String, f64>,
    symbols: Vec<RawSymbolId>,
    /// Queue of error kinds to return on the next N `place_order` calls, in
    /// order, so a test can script "fails once, then succeeds".
    inject_place_order_errors: std::collections::VecDeque<AdapterErrorKind>,
    /// When set, every order placed immediately fills at this price instead
    /// of staying SUBMITTED.
    auto_fill: bool,
    event_tx: Option<mpsc::Sender<VenueEvent>>,
}

pub struct MockAdapter {
    venue: Venue,
    funding_period_hours: u32,
    state: Mutex<State>,
    order_seq: AtomicU64,
}

impl MockAdapter {
    pub fn new(venue: Venue) -> Arc<Self> {
        Self::new_with_funding_period(venue, 1)
    }

    pub fn new_with_funding_period(venue: Venue, funding_period_hours: u32) -> Arc<Self> {
        Arc::new(Self {
            venue,
            funding_period_hours,
            state: Mutex::new(State {
                auto_fill: true,
                ..Default::default()
            }),
            order_seq: AtomicU64::new(0),
        })
    }

    fn side_key(normalized: &str, side: crate::models::Side) -> String {
        format!("{normalized}|{side}")
    }

    pub fn set_position(&self, position: Position) {
        let key = Self::side_key(&position.normalized, position.side);
        self.state.lock().positions.insert(key, position);
    }

    pub fn clear_position(&self, normalized: &str, side: crate::models::Side) {
        self.state.lock().positions.remove(&Self::side_key(normalized, side));
    }

    pub fn set_funding(&self, rate: FundingRate) {
        self.state.lock().fundings.insert(rate.normalized.clone(), rate);
    }

    pub fn set_mark_price(&self, normalized: &str, price: f64) {
        self.state.lock().mark_prices.insert(normalized.to_string(), price);
    }

    pub fn set_symbols(&self, symbols: Vec<RawSymbolId>) {
        self.state.lock().symbols = symbols;
    }

    pub fn set_auto_fill(&self, auto_fill: bool) {
        self.state.lock().auto_fill = auto_fill;
    }

    pub fn inject_place_order_error(&self, kind: AdapterErrorKind) {
        self.state.lock().inject_place_order_errors.push_back(kind);
    }

    /// Returns a sender a test can use to push synthetic `VenueEvent`s onto
    /// this adapter's subscription channel. Must be called after
    /// `subscribe_positions_and_orders` has established the channel.
    pub fn event_sender(&self) -> Option<mpsc::Sender<VenueEvent>> {
        self.state.lock().event_tx.clone()
    }

    /// Test helper: force an order to a given status (simulating a fill that
    /// happens asynchronously on the venue).
    pub fn set_order_status(&self, order_id: &str, status: OrderStatus, filled_size: Option<f64>) {
        let mut state = self.state.lock();
        if let Some(order) = state.orders.get_mut(order_id) {
            order.status = status;
            if let Some(fs) = filled_size {
                order.filled_size = fs;
            }
        }
    }

    pub fn open_order_count(&self, normalized: &str) -> usize {
        self.state
            .lock()
            .orders
            .values()
            .filter(|o| o.normalized == normalized && o.status.is_active())
            .count()
    }
}

#[async_trait]
impl VenueAdapter for MockAdapter {
    fn venue(&self) -> Venue {
        self.venue
    }

    fn funding_period_hours(&self) -> u32 {
        self.funding_period_hours
    }

    async fn place_order(&self, req: OrderRequest) -> Result<PlaceOrderResponse, AdapterError> {
        let mut state = self.state.lock();
        if let Some(kind) = state.inject_place_order_errors.pop_front() {
            return Err(AdapterError::new(kind, "injected test error"));
        }

        let id = self.order_seq.fetch_add(1, Ordering::Relaxed);
        let order_id = format!("mock-{}-{id}", self.venue);
        let status = if state.auto_fill {
            OrderStatus::Filled
        } else {
            OrderStatus::Submitted
        };
        let filled_size = if state.auto_fill { req.size } else { 0.0 };
        let fill_price = req.price.unwrap_or(1.0);

        let order = Order {
            order_id: order_id.clone(),
            venue: self.venue,
            normalized: req.normalized.clone(),
            side: req.side,
            size: req.size,
            price: req.price,
            order_type: req.order_type,
            reduce_only: req.reduce_only,
            tif: req.tif,
            status,
            filled_size,
            avg_fill_price: if state.auto_fill { Some(fill_price) } else { None },
            placed_at: Utc::now(),
        };
        state.orders.insert(order_id.clone(), order);

        if state.auto_fill {
            let key = Self::side_key(&req.normalized, req.side);
            if req.reduce_only {
                if let Some(pos) = state.positions.get_mut(&key) {
                    pos.size = (pos.size - req.size).max(0.0);
                    pos.last_updated = Utc::now();
                    if pos.is_closed() {
                        state.positions.remove(&key);
                    }
                }
            } else {
                let entry = state.positions.entry(key).or_insert_with(|| Position {
                    venue: self.venue,
                    normalized: req.normalized.clone(),
                    side: req.side,
                    size: 0.0,
                    entry_price: fill_price,
                    mark_price: fill_price,
                    unrealized_pnl: 0.0,
                    leverage: Some(5.0),
                    liquidation_price: None,
                    margin_used: None,
                    opened_at: Utc::now(),
                    last_updated: Utc::now(),
                });
                entry.size += req.size;
                entry.last_updated = Utc::now();
            }
        }

        Ok(PlaceOrderResponse {
            order_id,
            status,
            filled_size: Some(filled_size),
            avg_fill_price: if state.auto_fill { Some(fill_price) } else { None },
        })
    }

    async fn cancel_order(&self, order_id: &str, _normalized: &str) -> Result<bool, AdapterError> {
        let mut state = self.state.lock();
        if let Some(order) = state.orders.get_mut(order_id) {
            if !order.status.is_terminal() {
                order.status = OrderStatus::Cancelled;
                return Ok(true);
            }
        }
        Ok(false)
    }

    async fn cancel_all_orders(&self, normalized: &str) -> Result<u32, AdapterError> {
        let mut state = self.state.lock();
        let mut n = 0;
        for order in state.orders.values_mut() {
            if order.normalized == normalized && !order.status.is_terminal() {
                order.status = OrderStatus::Cancelled;
                n += 1;
            }
        }
        Ok(n)
    }

    async fn get_order_status(&self, order_id: &str, _normalized: &str) -> Result<Order, AdapterError> {
        self.state
            .lock()
            .orders
            .get(order_id)
            .cloned()
            .ok_or_else(|| AdapterError::not_found(format!("order {order_id} not found")))
    }

    async fn get_open_orders(&self) -> Result<Vec<OpenOrderView>, AdapterError> {
        Ok(self
            .state
            .lock()
            .orders
            .values()
            .filter(|o| o.status.is_active())
            .map(|o| OpenOrderView {
                order_id: o.order_id.clone(),
                normalized: o.normalized.clone(),
                side: o.side,
                price: o.price,
                size: o.size,
                filled_size: o.filled_size,
                reduce_only: o.reduce_only,
                placed_at: o.placed_at,
            })
            .collect())
    }

    async fn get_positions(&self) -> Result<Vec<Position>, AdapterError> {
        Ok(self.state.lock().positions.values().cloned().collect())
    }

    async fn get_position(&self, normalized: &str) -> Result<Option<Position>, AdapterError> {
        let state = self.state.lock();
        Ok(state
            .positions
            .values()
            .find(|p| p.normalized == normalized)
            .cloned())
    }

    async fn get_mark_price(&self, normalized: &str) -> Result<f64, AdapterError> {
        self.state
            .lock()
            .mark_prices
            .get(normalized)
            .copied()
            .ok_or_else(|| AdapterError::not_found(format!("no mark price for {normalized}")))
    }

    async fn get_best_bid_ask(&self, normalized: &str) -> Result<(f64, f64), AdapterError> {
        let mark = self.get_mark_price(normalized).await?;
        Ok((mark * 0.999, mark * 1.001))
    }

    async fn get_balance(&self) -> Result<f64, AdapterError> {
        Ok(100_000.0)
    }

    async fn get_equity(&self) -> Result<f64, AdapterError> {
        Ok(100_000.0)
    }

    async fn get_available_margin(&self) -> Result<f64, AdapterError> {
        Ok(100_000.0)
    }

    async fn list_symbols(&self) -> Result<Vec<RawSymbolId>, AdapterError> {
        Ok(self.state.lock().symbols.clone())
    }

    async fn get_funding_data(
        &self,
        normalized: &str,
        _raw_id: &RawSymbolId,
    ) -> Result<Option<FundingRate>, AdapterError> {
        Ok(self.state.lock().fundings.get(normalized).cloned())
    }

    async fn get_funding_payments(
        &self,
        _start_ms: Option<i64>,
        _end_ms: Option<i64>,
    ) -> Result<Vec<FundingPayment>, AdapterError> {
        Ok(Vec::new())
    }

    async fn subscribe_positions_and_orders(
        &self,
    ) -> Result<mpsc::Receiver<VenueEvent>, AdapterError> {
        let (tx, rx) = mpsc::channel(256);
        self.state.lock().event_tx = Some(tx);
        Ok(rx)
    }
}
