use serde::{Deserialize, Serialize};

use crate::models::{OrderKind, OrderSide, OrderStatus};

/// Tradeable-instrument limits as reported by the exchange.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstrumentSpec {
    pub symbol: String,
    /// Smallest quantity increment, in base-asset units.
    pub qty_step: f64,
    /// Smallest accepted order quantity, in base-asset units.
    pub min_qty: f64,
}

impl InstrumentSpec {
    /// Rounds a quantity down to the instrument step. Never rounds up: an
    /// over-sized order is worse than a slightly under-sized one.
    pub fn truncate_qty(&self, qty: f64) -> f64 {
        if qty <= 0.0 {
            return 0.0;
        }
        if self.qty_step <= 0.0 {
            return round8(qty);
        }
        let steps = ((qty + 1e-12) / self.qty_step).floor();
        round8((steps * self.qty_step).max(0.0))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ticker {
    pub symbol: String,
    pub last: f64,
    pub bid: f64,
    pub ask: f64,
}

/// Everything the sizing step needs to know about the market right now.
#[derive(Debug, Clone, PartialEq)]
pub struct MarketSnapshot {
    pub ticker: Ticker,
    pub spec: InstrumentSpec,
}

impl MarketSnapshot {
    pub fn last(&self) -> f64 {
        self.ticker.last
    }
}

/// One order to be placed. `price: None` means market; `trigger_price: Some`
/// makes it a conditional (stop) order routed through the trigger endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRequest {
    pub symbol: String,
    pub side: OrderSide,
    pub quantity: f64,
    pub price: Option<f64>,
    pub trigger_price: Option<f64>,
    pub reduce_only: bool,
    pub client_id: String,
    pub leverage: Option<u32>,
}

impl OrderRequest {
    pub fn kind(&self) -> OrderKind {
        if self.trigger_price.is_some() {
            OrderKind::Trigger
        } else {
            OrderKind::Standard
        }
    }
}

/// Handle to an order that already exists on the exchange. Cancel and status
/// queries need the kind because trigger orders live under other endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderRef {
    pub id: String,
    pub client_id: String,
    pub symbol: String,
    pub kind: OrderKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderState {
    pub status: OrderStatus,
    /// Filled quantity in base-asset units.
    pub filled: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionInfo {
    pub symbol: String,
    /// Open quantity in base-asset units. 0 means flat.
    pub contracts: f64,
}

fn round8(value: f64) -> f64 {
    (value * 1e8).round() / 1e8
}
