use serde::{Deserialize, Serialize};

use crate::models::Direction;

/// A parsed trade intent. Built once by the parser, never mutated.
///
/// `symbol` is already normalized to the perpetual-swap form
/// (`BASE/USDT:USDT`). Prices are strictly positive and the TP ladder is
/// ordered away from the entry in the trade direction; the parser enforces
/// both before constructing a value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeSignal {
    pub symbol: String,
    pub direction: Direction,
    pub entry_price: f64,
    pub take_profit_1: f64,
    pub take_profit_2: f64,
    #[serde(default)]
    pub take_profit_3: Option<f64>,
    #[serde(default)]
    pub stop_loss: Option<f64>,
}

impl TradeSignal {
    /// Third target price, falling back to TP2 when the message has no TP3.
    pub fn effective_tp3(&self) -> f64 {
        self.take_profit_3.unwrap_or(self.take_profit_2)
    }
}
