use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Mutex;

use crate::config::{Config, EntryMode};
use crate::exchange::Exchange;
use crate::models::{
    Direction, InstrumentSpec, MarginMode, OrderBundle, OrderRef, OrderRequest, OrderState,
    OrderStatus, PositionInfo, Ticker, TpLeg, TradeSignal,
};
use crate::notify::{Audience, Notifier};

/// A Config suitable for testing: dry-run, no credentials, the canonical
/// 50 USDT x20 account with the 20/50/30 split and no initial stop.
pub fn default_test_config() -> Config {
    Config {
        telegram_bot_token: "test-token".to_string(),
        telegram_channel_id: -100_123,
        owner_user_id: 7,
        mexc_api_key: String::new(),
        mexc_api_secret: String::new(),
        margin_usdt: 50.0,
        leverage: 20,
        allow_slippage_pct: 0.30,
        tp_split: vec![0.20, 0.50, 0.30],
        entry_mode: EntryMode::Market,
        use_stop_loss: false,
        stop_loss_pct: 2.0,
        monitor_poll_secs: 7,
        dry_run: true,
        log_level: "info".to_string(),
    }
}

pub fn make_signal(
    direction: Direction,
    entry: f64,
    tp1: f64,
    tp2: f64,
    tp3: Option<f64>,
) -> TradeSignal {
    TradeSignal {
        symbol: "STX/USDT:USDT".to_string(),
        direction,
        entry_price: entry,
        take_profit_1: tp1,
        take_profit_2: tp2,
        take_profit_3: tp3,
        stop_loss: None,
    }
}

pub fn test_spec(step: f64) -> InstrumentSpec {
    InstrumentSpec {
        symbol: "STX/USDT:USDT".to_string(),
        qty_step: step,
        min_qty: step,
    }
}

/// An executed bundle in its post-entry state, with a 20/50/30 ladder and
/// the TP1 leg at `tp1_qty`.
pub fn make_bundle(
    direction: Direction,
    entry_price: f64,
    total: f64,
    tp1_qty: f64,
    stop_order: Option<OrderRef>,
) -> OrderBundle {
    let correlation_id = "strikt-stx-1".to_string();
    let order = |suffix: &str, id: &str| OrderRef {
        id: id.to_string(),
        client_id: format!("{correlation_id}-{suffix}"),
        symbol: "STX/USDT:USDT".to_string(),
        kind: crate::models::OrderKind::Standard,
    };

    let rest = total - tp1_qty;
    let tp_legs = vec![
        TpLeg {
            order: order("tp1", "101"),
            index: 0,
            quantity: tp1_qty,
            price: entry_price * 1.01,
            filled: false,
        },
        TpLeg {
            order: order("tp2", "102"),
            index: 1,
            quantity: rest * 0.625,
            price: entry_price * 1.02,
            filled: false,
        },
        TpLeg {
            order: order("tp3", "103"),
            index: 2,
            quantity: rest * 0.375,
            price: entry_price * 1.03,
            filled: false,
        },
    ];

    let entry_order = order("entry", "100");
    OrderBundle {
        symbol: "STX/USDT:USDT".to_string(),
        direction,
        correlation_id,
        entry_order,
        entry_price,
        total_quantity: total,
        tp_legs,
        stop_order,
        stop_is_break_even: false,
        created_at: Utc::now(),
    }
}

/// Scriptable in-memory exchange. Records every mutating call; status and
/// position reads come from maps the test sets up front.
pub struct MockExchange {
    next_id: Mutex<u64>,
    pub created: Mutex<Vec<OrderRequest>>,
    pub canceled: Mutex<Vec<OrderRef>>,
    pub setup_calls: Mutex<Vec<String>>,
    order_states: Mutex<HashMap<String, OrderState>>,
    positions: Mutex<HashMap<String, f64>>,
    ticker_last: Mutex<f64>,
    spec: Mutex<InstrumentSpec>,
    fail_substrings: Mutex<Vec<String>>,
    fail_leverage: Mutex<bool>,
    fail_fetches: Mutex<bool>,
    fail_cancels: Mutex<bool>,
    margin_per_order: Mutex<bool>,
}

impl MockExchange {
    pub fn new() -> Self {
        Self {
            next_id: Mutex::new(0),
            created: Mutex::new(Vec::new()),
            canceled: Mutex::new(Vec::new()),
            setup_calls: Mutex::new(Vec::new()),
            order_states: Mutex::new(HashMap::new()),
            positions: Mutex::new(HashMap::new()),
            ticker_last: Mutex::new(0.643),
            spec: Mutex::new(test_spec(0.01)),
            fail_substrings: Mutex::new(Vec::new()),
            fail_leverage: Mutex::new(false),
            fail_fetches: Mutex::new(false),
            fail_cancels: Mutex::new(false),
            margin_per_order: Mutex::new(false),
        }
    }

    pub fn set_ticker(&self, last: f64) {
        *self.ticker_last.lock().unwrap() = last;
    }

    pub fn set_spec(&self, spec: InstrumentSpec) {
        *self.spec.lock().unwrap() = spec;
    }

    /// Any create_order whose client id contains `needle` fails.
    pub fn fail_orders_containing(&self, needle: &str) {
        self.fail_substrings.lock().unwrap().push(needle.to_string());
    }

    pub fn clear_order_failures(&self) {
        self.fail_substrings.lock().unwrap().clear();
    }

    pub fn set_fail_leverage(&self, fail: bool) {
        *self.fail_leverage.lock().unwrap() = fail;
    }

    /// Makes fetch_order and fetch_position fail, simulating a flaky venue.
    pub fn set_fail_fetches(&self, fail: bool) {
        *self.fail_fetches.lock().unwrap() = fail;
    }

    pub fn set_fail_cancels(&self, fail: bool) {
        *self.fail_cancels.lock().unwrap() = fail;
    }

    /// Makes set_margin_mode report that the venue takes the mode on each
    /// order instead of via a standalone call.
    pub fn set_margin_per_order(&self, per_order: bool) {
        *self.margin_per_order.lock().unwrap() = per_order;
    }

    pub fn set_order_filled(&self, client_id: &str, filled: f64) {
        self.order_states.lock().unwrap().insert(
            client_id.to_string(),
            OrderState {
                status: OrderStatus::Filled,
                filled,
            },
        );
    }

    pub fn set_order_partial(&self, client_id: &str, filled: f64) {
        self.order_states.lock().unwrap().insert(
            client_id.to_string(),
            OrderState {
                status: OrderStatus::Open,
                filled,
            },
        );
    }

    pub fn set_position(&self, symbol: &str, contracts: f64) {
        self.positions
            .lock()
            .unwrap()
            .insert(symbol.to_string(), contracts);
    }
}

#[async_trait]
impl Exchange for MockExchange {
    async fn load_instruments(&self) -> Result<usize> {
        Ok(1)
    }

    async fn instrument(&self, symbol: &str) -> Result<InstrumentSpec> {
        let spec = self.spec.lock().unwrap().clone();
        if symbol != spec.symbol {
            bail!("unknown instrument {symbol}");
        }
        Ok(spec)
    }

    async fn ticker(&self, symbol: &str) -> Result<Ticker> {
        let last = *self.ticker_last.lock().unwrap();
        Ok(Ticker {
            symbol: symbol.to_string(),
            last,
            bid: last,
            ask: last,
        })
    }

    async fn set_leverage_and_margin_mode(
        &self,
        symbol: &str,
        _leverage: u32,
        _mode: MarginMode,
    ) -> Result<()> {
        self.setup_calls
            .lock()
            .unwrap()
            .push(format!("combined:{symbol}"));
        if *self.fail_leverage.lock().unwrap() {
            bail!("leverage change rejected");
        }
        Ok(())
    }

    async fn set_margin_mode(&self, symbol: &str, _mode: MarginMode) -> Result<bool> {
        self.setup_calls
            .lock()
            .unwrap()
            .push(format!("margin-mode:{symbol}"));
        Ok(!*self.margin_per_order.lock().unwrap())
    }

    async fn set_leverage(&self, symbol: &str, _leverage: u32) -> Result<()> {
        self.setup_calls
            .lock()
            .unwrap()
            .push(format!("leverage:{symbol}"));
        Ok(())
    }

    async fn create_order(&self, request: &OrderRequest) -> Result<OrderRef> {
        let failing = self
            .fail_substrings
            .lock()
            .unwrap()
            .iter()
            .any(|needle| request.client_id.contains(needle));
        if failing {
            bail!("order {} rejected", request.client_id);
        }

        let mut next = self.next_id.lock().unwrap();
        *next += 1;
        let id = next.to_string();
        drop(next);

        self.created.lock().unwrap().push(request.clone());
        Ok(OrderRef {
            id,
            client_id: request.client_id.clone(),
            symbol: request.symbol.clone(),
            kind: request.kind(),
        })
    }

    async fn cancel_order(&self, order: &OrderRef) -> Result<()> {
        if *self.fail_cancels.lock().unwrap() {
            bail!("cancel of {} rejected", order.client_id);
        }
        self.canceled.lock().unwrap().push(order.clone());
        Ok(())
    }

    async fn fetch_order(&self, order: &OrderRef) -> Result<OrderState> {
        if *self.fail_fetches.lock().unwrap() {
            bail!("order fetch timed out");
        }
        Ok(self
            .order_states
            .lock()
            .unwrap()
            .get(&order.client_id)
            .cloned()
            .unwrap_or(OrderState {
                status: OrderStatus::Open,
                filled: 0.0,
            }))
    }

    async fn fetch_position(&self, symbol: &str) -> Result<Option<PositionInfo>> {
        if *self.fail_fetches.lock().unwrap() {
            bail!("position fetch timed out");
        }
        let contracts = self
            .positions
            .lock()
            .unwrap()
            .get(symbol)
            .copied()
            .unwrap_or(0.0);
        if contracts <= 0.0 {
            return Ok(None);
        }
        Ok(Some(PositionInfo {
            symbol: symbol.to_string(),
            contracts,
        }))
    }
}

/// Captures notifications instead of sending them.
#[derive(Default)]
pub struct RecordingNotifier {
    pub sent: Mutex<Vec<(Audience, String)>>,
}

impl RecordingNotifier {
    pub fn count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }

    pub fn texts(&self) -> Vec<String> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .map(|(_, text)| text.clone())
            .collect()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, audience: Audience, text: &str) {
        self.sent.lock().unwrap().push((audience, text.to_string()));
    }
}
