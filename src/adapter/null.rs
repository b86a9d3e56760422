//! Null-object adapter for disabled/optional venues (e.g. EXTENDED when not
//! configured). Design Notes (spec §9, "Ad-hoc dependency injection with
//! optional collaborators"): optional behavior is modelled by a null-object
//! collaborator rather than threading `Option<Arc<dyn VenueAdapter>>`
//! presence checks through every call site.

use super::{FundingPayment, OpenOrderView, PlaceOrderResponse, RawSymbolId, VenueAdapter, VenueEvent};
use crate::errors::AdapterError;
use crate::models::{FundingRate, Order, OrderRequest, Position, Venue};
use async_trait::async_trait;
use tokio::sync::mpsc;

pub struct NullAdapter {
    venue: Venue,
}

impl NullAdapter {
    pub fn new(venue: Venue) -> Self {
        Self { venue }
    }
}

#[async_trait]
impl VenueAdapter for NullAdapter {
    fn venue(&self) -> Venue {
        self.venue
    }

    async fn place_order(&self, _req: OrderRequest) -> Result<PlaceOrderResponse, AdapterError> {
        Err(AdapterError::validation("venue disabled"))
    }

    async fn cancel_order(&self, _order_id: &str, _normalized: &str) -> Result<bool, AdapterError> {
        Ok(false)
    }

    async fn cancel_all_orders(&self, _normalized: &str) -> Result<u32, AdapterError> {
        Ok(0)
    }

    async fn get_order_status(&self, order_id: &str, _normalized: &str) -> Result<Order, AdapterError> {
        Err(AdapterError::not_found(format!("order {order_id} not found: venue disabled")))
    }

    async fn get_open_orders(&self) -> Result<Vec<OpenOrderView>, AdapterError> {
        Ok(Vec::new())
    }

    async fn get_positions(&self) -> Result<Vec<Position>, AdapterError> {
        Ok(Vec::new())
    }

    async fn get_position(&self, _normalized: &str) -> Result<Option<Position>, AdapterError> {
        Ok(None)
    }

    async fn get_mark_price(&self, normalized: &str) -> Result<f64, AdapterError> {
        Err(AdapterError::not_found(format!("no mark price for {normalized}: venue disabled")))
    }

    async fn get_best_bid_ask(&self, normalized: &str) -> Result<(f64, f64), AdapterError> {
        Err(AdapterError::not_found(format!("no book for {normalized}: venue disabled")))
    }

    async fn get_balance(&self) -> Result<f64, AdapterError> {
        Ok(0.0)
    }

    async fn get_equity(&self) -> Result<f64, AdapterError> {
        Ok(0.0)
    }

    async fn get_available_margin(&self) -> Result<f64, AdapterError> {
        Ok(0.0)
    }

    async fn list_symbols(&self) -> Result<Vec<RawSymbolId>, AdapterError> {
        Ok(Vec::new())
    }

    async fn get_funding_data(
        &self,
        _normalized: &str,
        _raw_id: &RawSymbolId,
    ) -> Result<Option<FundingRate>, AdapterError> {
        Ok(None)
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
        let (_tx, rx) = mpsc::channel(1);
        Ok(rx)
    }
}
