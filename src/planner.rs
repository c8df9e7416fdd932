use serde::{Deserialize, Serialize};

use crate::config::{Config, EntryMode};
use crate::models::{Direction, InstrumentSpec, MarginMode, OrderSide, TradeSignal};
use crate::sizing::SizingResult;

const MARGIN_MODE: MarginMode = MarginMode::Isolated;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlannedEntry {
    pub side: OrderSide,
    pub quantity: f64,
    /// None places a market order.
    pub price: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlannedTpLeg {
    pub side: OrderSide,
    pub quantity: f64,
    pub price: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlannedStop {
    pub side: OrderSide,
    pub quantity: f64,
    pub trigger_price: f64,
}

/// Complete set of orders for one signal, before anything touches the
/// exchange. Correlation ids are attached later by the execution engine so
/// the plan stays a pure function of its inputs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderPlan {
    pub symbol: String,
    pub direction: Direction,
    pub entry_price: f64,
    pub leverage: u32,
    pub margin_mode: MarginMode,
    pub entry: PlannedEntry,
    pub tp_legs: Vec<PlannedTpLeg>,
    pub stop: Option<PlannedStop>,
}

impl OrderPlan {
    pub fn total_quantity(&self) -> f64 {
        self.entry.quantity
    }
}

pub fn plan_orders(
    signal: &TradeSignal,
    sizing: &SizingResult,
    spec: &InstrumentSpec,
    cfg: &Config,
) -> OrderPlan {
    let total = sizing.quantity;
    let reduce_side = signal.direction.closing_side();

    let prices = [
        signal.take_profit_1,
        signal.take_profit_2,
        signal.effective_tp3(),
    ];

    // Every leg but the last is truncated independently; the last leg takes
    // whatever remains so the legs always sum to the entry quantity.
    let mut tp_legs = Vec::with_capacity(cfg.tp_split.len());
    let mut allocated = 0.0;
    for (i, frac) in cfg.tp_split.iter().enumerate() {
        let quantity = if i + 1 == cfg.tp_split.len() {
            snap_to_step((total - allocated).max(0.0), spec.qty_step)
        } else {
            spec.truncate_qty(total * frac)
        };
        allocated += quantity;
        tp_legs.push(PlannedTpLeg {
            side: reduce_side,
            quantity,
            price: prices[i.min(prices.len() - 1)],
        });
    }

    let entry = PlannedEntry {
        side: signal.direction.entry_side(),
        quantity: total,
        price: match cfg.entry_mode {
            EntryMode::Market => None,
            EntryMode::Limit => Some(signal.entry_price),
        },
    };

    let stop = cfg.use_stop_loss.then(|| PlannedStop {
        side: reduce_side,
        quantity: total,
        trigger_price: signal
            .stop_loss
            .unwrap_or_else(|| fallback_stop_price(signal, cfg.stop_loss_pct)),
    });

    OrderPlan {
        symbol: signal.symbol.clone(),
        direction: signal.direction,
        entry_price: signal.entry_price,
        leverage: cfg.leverage,
        margin_mode: MARGIN_MODE,
        entry,
        tp_legs,
        stop,
    }
}

fn fallback_stop_price(signal: &TradeSignal, stop_loss_pct: f64) -> f64 {
    let offset = signal.entry_price * stop_loss_pct / 100.0;
    match signal.direction {
        Direction::Long => signal.entry_price - offset,
        Direction::Short => signal.entry_price + offset,
    }
}

/// Nearest step multiple. Used only for the remainder leg, where the exact
/// value is a step multiple up to float noise and flooring could eat a step.
fn snap_to_step(qty: f64, step: f64) -> f64 {
    if step <= 0.0 {
        return round8(qty.max(0.0));
    }
    round8(((qty / step).round() * step).max(0.0))
}

fn round8(x: f64) -> f64 {
    (x * 1e8).round() / 1e8
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::InstrumentSpec;
    use crate::test_helpers::{default_test_config, make_signal};

    fn spec_with_step(step: f64) -> InstrumentSpec {
        InstrumentSpec {
            symbol: "STX/USDT:USDT".to_string(),
            qty_step: step,
            min_qty: step,
        }
    }

    fn sized(quantity: f64) -> SizingResult {
        SizingResult {
            quantity,
            notional: 1000.0,
        }
    }

    fn long_signal() -> crate::models::TradeSignal {
        make_signal(Direction::Long, 0.643, 0.650, 0.660, Some(0.670))
    }

    #[test]
    fn three_way_split_sums_to_total() {
        let cfg = default_test_config();
        let spec = spec_with_step(0.01);
        for total in [77.76, 10.0, 0.05, 123.45, 1555.2] {
            let plan = plan_orders(&long_signal(), &sized(total), &spec, &cfg);
            let sum: f64 = plan.tp_legs.iter().map(|l| l.quantity).sum();
            assert!(
                (sum - total).abs() < 1e-9,
                "legs {sum} != total {total}"
            );
        }
    }

    #[test]
    fn remainder_lands_in_last_leg() {
        let cfg = default_test_config();
        let plan = plan_orders(&long_signal(), &sized(77.76), &spec_with_step(0.01), &cfg);
        let q: Vec<f64> = plan.tp_legs.iter().map(|l| l.quantity).collect();
        assert_eq!(q, vec![15.55, 38.88, 23.33]);
    }

    #[test]
    fn full_notional_quantities() {
        let cfg = default_test_config();
        let plan = plan_orders(&long_signal(), &sized(1555.2), &spec_with_step(0.01), &cfg);
        let q: Vec<f64> = plan.tp_legs.iter().map(|l| l.quantity).collect();
        assert_eq!(q, vec![311.04, 777.6, 466.56]);
        assert_eq!(plan.total_quantity(), 1555.2);
    }

    #[test]
    fn tp_legs_reduce_on_the_closing_side() {
        let cfg = default_test_config();
        let long = plan_orders(&long_signal(), &sized(10.0), &spec_with_step(0.01), &cfg);
        assert_eq!(long.entry.side, OrderSide::Buy);
        assert!(long.tp_legs.iter().all(|l| l.side == OrderSide::Sell));

        let short = make_signal(Direction::Short, 0.643, 0.641297, 0.639253, Some(0.637209));
        let plan = plan_orders(&short, &sized(10.0), &spec_with_step(0.01), &cfg);
        assert_eq!(plan.entry.side, OrderSide::Sell);
        assert!(plan.tp_legs.iter().all(|l| l.side == OrderSide::Buy));
    }

    #[test]
    fn last_leg_price_falls_back_to_tp2() {
        let cfg = default_test_config();
        let signal = make_signal(Direction::Long, 0.643, 0.650, 0.660, None);
        let plan = plan_orders(&signal, &sized(10.0), &spec_with_step(0.01), &cfg);
        assert_eq!(plan.tp_legs[2].price, 0.660);
    }

    #[test]
    fn two_leg_split_works() {
        let mut cfg = default_test_config();
        cfg.tp_split = vec![0.30, 0.70];
        let plan = plan_orders(&long_signal(), &sized(10.0), &spec_with_step(0.001), &cfg);
        let q: Vec<f64> = plan.tp_legs.iter().map(|l| l.quantity).collect();
        assert_eq!(q, vec![3.0, 7.0]);
        assert_eq!(plan.tp_legs[0].price, 0.650);
        assert_eq!(plan.tp_legs[1].price, 0.660);
    }

    #[test]
    fn market_entry_by_default_limit_on_request() {
        let mut cfg = default_test_config();
        let market = plan_orders(&long_signal(), &sized(10.0), &spec_with_step(0.01), &cfg);
        assert_eq!(market.entry.price, None);

        cfg.entry_mode = EntryMode::Limit;
        let limit = plan_orders(&long_signal(), &sized(10.0), &spec_with_step(0.01), &cfg);
        assert_eq!(limit.entry.price, Some(0.643));
    }

    #[test]
    fn stop_uses_signal_sl_when_present() {
        let mut cfg = default_test_config();
        cfg.use_stop_loss = true;
        let mut signal = long_signal();
        signal.stop_loss = Some(0.600);
        let plan = plan_orders(&signal, &sized(10.0), &spec_with_step(0.01), &cfg);
        let stop = plan.stop.unwrap();
        assert_eq!(stop.trigger_price, 0.600);
        assert_eq!(stop.quantity, 10.0);
        assert_eq!(stop.side, OrderSide::Sell);
    }

    #[test]
    fn stop_derives_from_percent_without_signal_sl() {
        let mut cfg = default_test_config();
        cfg.use_stop_loss = true;
        cfg.stop_loss_pct = 2.0;
        let signal = make_signal(Direction::Short, 100.0, 99.0, 98.0, None);
        let plan = plan_orders(&signal, &sized(10.0), &spec_with_step(0.01), &cfg);
        let stop = plan.stop.unwrap();
        assert!((stop.trigger_price - 102.0).abs() < 1e-9);
    }

    #[test]
    fn no_stop_when_disabled() {
        let cfg = default_test_config(); // use_stop_loss off
        let plan = plan_orders(&long_signal(), &sized(10.0), &spec_with_step(0.01), &cfg);
        assert!(plan.stop.is_none());
    }

    #[test]
    fn identical_inputs_give_identical_plans() {
        let cfg = default_test_config();
        let a = plan_orders(&long_signal(), &sized(77.76), &spec_with_step(0.01), &cfg);
        let b = plan_orders(&long_signal(), &sized(77.76), &spec_with_step(0.01), &cfg);
        assert_eq!(a, b);
    }
}
