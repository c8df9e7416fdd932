use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{Direction, OrderRef};

/// One take-profit leg of a managed position. `index` is the ladder
/// position (0 = TP1); legs that failed to place are simply absent, so the
/// index is what identifies TP1, not the list position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TpLeg {
    pub order: OrderRef,
    pub index: usize,
    pub quantity: f64,
    pub price: f64,
    /// Set by the monitor once the leg's fill reaches its planned quantity.
    #[serde(default)]
    pub filled: bool,
}

impl TpLeg {
    pub fn label(&self) -> String {
        format!("TP{}", self.index + 1)
    }
}

/// Live record of one executed signal: the entry, its protective orders and
/// the state the monitor mutates. Owned exclusively by the monitor task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderBundle {
    pub symbol: String,
    pub direction: Direction,
    pub correlation_id: String,
    pub entry_order: OrderRef,
    pub entry_price: f64,
    pub total_quantity: f64,
    pub tp_legs: Vec<TpLeg>,
    pub stop_order: Option<OrderRef>,
    #[serde(default)]
    pub stop_is_break_even: bool,
    pub created_at: DateTime<Utc>,
}

impl OrderBundle {
    pub fn tp1(&self) -> Option<&TpLeg> {
        self.tp_legs.iter().find(|leg| leg.index == 0)
    }

    /// Quantity still open once TP1 has been taken. The break-even stop is
    /// sized to this.
    pub fn quantity_after_tp1(&self) -> f64 {
        let tp1_qty = self.tp1().map(|leg| leg.quantity).unwrap_or(0.0);
        (self.total_quantity - tp1_qty).max(0.0)
    }
}
