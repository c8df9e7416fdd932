use anyhow::Error as AnyError;
use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

use crate::exchange::Exchange;
use crate::models::{MarginMode, OrderBundle, OrderRef, OrderRequest, TpLeg};
use crate::planner::{OrderPlan, PlannedStop, PlannedTpLeg};

#[derive(Debug, Error)]
pub enum ExecutionError {
    /// The entry itself was refused, so no position exists and no child
    /// orders were submitted.
    #[error("entry order for {symbol} failed: {source}")]
    EntryRejected {
        symbol: String,
        #[source]
        source: AnyError,
    },
}

/// How one leverage/margin-mode setup step ended. `Skipped` means the venue
/// had nothing to do server-side, not that the call failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetupStatus {
    Applied,
    Skipped,
    Failed,
}

/// One leverage/margin-mode setup step and how it ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetupStep {
    pub action: &'static str,
    pub status: SetupStatus,
}

/// Diagnostic record of the best-effort setup phase. None of the steps is
/// required: the account may already carry the right mode from a prior run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LeverageSetup {
    pub steps: Vec<SetupStep>,
}

impl LeverageSetup {
    pub fn applied(&self) -> bool {
        self.steps.iter().any(|s| s.status == SetupStatus::Applied)
    }
}

/// A child order that could not be placed after the entry succeeded. The
/// position is open and under-protected until the operator intervenes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LegFailure {
    pub label: String,
    pub error: String,
}

#[derive(Debug)]
pub struct ExecutionOutcome {
    pub bundle: OrderBundle,
    pub setup: LeverageSetup,
    pub leg_failures: Vec<LegFailure>,
}

impl ExecutionOutcome {
    pub fn fully_protected(&self) -> bool {
        self.leg_failures.is_empty()
    }
}

/// Submits a planned order set to the exchange: setup, entry, TP legs, stop,
/// in that order. The entry gates everything; child-leg failures are
/// collected rather than propagated.
pub struct ExecutionEngine {
    exchange: Arc<dyn Exchange>,
}

impl ExecutionEngine {
    pub fn new(exchange: Arc<dyn Exchange>) -> Self {
        Self { exchange }
    }

    pub async fn execute(&self, plan: &OrderPlan) -> Result<ExecutionOutcome, ExecutionError> {
        let correlation_id = correlation_id(&plan.symbol);
        let setup = self.apply_leverage(plan).await;

        let entry_request = OrderRequest {
            symbol: plan.symbol.clone(),
            side: plan.entry.side,
            quantity: plan.entry.quantity,
            price: plan.entry.price,
            trigger_price: None,
            reduce_only: false,
            client_id: format!("{correlation_id}-entry"),
            leverage: Some(plan.leverage),
        };
        let entry_order = self
            .exchange
            .create_order(&entry_request)
            .await
            .map_err(|source| ExecutionError::EntryRejected {
                symbol: plan.symbol.clone(),
                source,
            })?;
        info!(
            "entry placed: {} {} {} qty {}",
            plan.symbol, plan.direction, entry_order.id, plan.entry.quantity
        );

        let mut tp_legs = Vec::with_capacity(plan.tp_legs.len());
        let mut leg_failures = Vec::new();
        for (index, leg) in plan.tp_legs.iter().enumerate() {
            let label = format!("TP{}", index + 1);
            if leg.quantity <= 0.0 {
                warn!("{label} for {} rounds to zero quantity, skipping", plan.symbol);
                continue;
            }
            match self.submit_tp(plan, leg, index, &correlation_id).await {
                Ok(order) => tp_legs.push(TpLeg {
                    order,
                    index,
                    quantity: leg.quantity,
                    price: leg.price,
                    filled: false,
                }),
                Err(err) => {
                    warn!("{label} for {} failed: {err:#}", plan.symbol);
                    leg_failures.push(LegFailure {
                        label,
                        error: format!("{err:#}"),
                    });
                }
            }
        }

        let stop_order = match &plan.stop {
            Some(stop) => match self.submit_stop(plan, stop, &correlation_id).await {
                Ok(order) => Some(order),
                Err(err) => {
                    warn!("stop for {} failed: {err:#}", plan.symbol);
                    leg_failures.push(LegFailure {
                        label: "SL".to_string(),
                        error: format!("{err:#}"),
                    });
                    None
                }
            },
            None => None,
        };

        Ok(ExecutionOutcome {
            bundle: OrderBundle {
                symbol: plan.symbol.clone(),
                direction: plan.direction,
                correlation_id,
                entry_order,
                entry_price: plan.entry_price,
                total_quantity: plan.entry.quantity,
                tp_legs,
                stop_order,
                stop_is_break_even: false,
                created_at: Utc::now(),
            },
            setup,
            leg_failures,
        })
    }

    /// Combined leverage + margin-mode call first; when that fails, the
    /// split calls in order. Every step is best-effort.
    async fn apply_leverage(&self, plan: &OrderPlan) -> LeverageSetup {
        let mut setup = LeverageSetup::default();

        let combined = self
            .exchange
            .set_leverage_and_margin_mode(&plan.symbol, plan.leverage, plan.margin_mode)
            .await;
        let combined_ok = combined.is_ok();
        if let Err(err) = combined {
            warn!("leverage+margin setup for {} failed: {err:#}", plan.symbol);
        }
        setup.steps.push(SetupStep {
            action: "leverage+margin-mode",
            status: if combined_ok {
                SetupStatus::Applied
            } else {
                SetupStatus::Failed
            },
        });
        if combined_ok {
            return setup;
        }

        let margin = self
            .exchange
            .set_margin_mode(&plan.symbol, plan.margin_mode)
            .await;
        if let Err(err) = &margin {
            warn!("margin-mode setup for {} failed: {err:#}", plan.symbol);
        }
        setup.steps.push(SetupStep {
            action: "margin-mode",
            status: match margin {
                Ok(true) => SetupStatus::Applied,
                Ok(false) => SetupStatus::Skipped,
                Err(_) => SetupStatus::Failed,
            },
        });

        let leverage = self.exchange.set_leverage(&plan.symbol, plan.leverage).await;
        if let Err(err) = &leverage {
            warn!("leverage setup for {} failed: {err:#}", plan.symbol);
        }
        setup.steps.push(SetupStep {
            action: "leverage",
            status: if leverage.is_ok() {
                SetupStatus::Applied
            } else {
                SetupStatus::Failed
            },
        });

        setup
    }

    async fn submit_tp(
        &self,
        plan: &OrderPlan,
        leg: &PlannedTpLeg,
        index: usize,
        correlation_id: &str,
    ) -> anyhow::Result<OrderRef> {
        let request = OrderRequest {
            symbol: plan.symbol.clone(),
            side: leg.side,
            quantity: leg.quantity,
            price: Some(leg.price),
            trigger_price: None,
            reduce_only: true,
            client_id: format!("{correlation_id}-tp{}", index + 1),
            leverage: None,
        };
        self.exchange.create_order(&request).await
    }

    async fn submit_stop(
        &self,
        plan: &OrderPlan,
        stop: &PlannedStop,
        correlation_id: &str,
    ) -> anyhow::Result<OrderRef> {
        let request = OrderRequest {
            symbol: plan.symbol.clone(),
            side: stop.side,
            quantity: stop.quantity,
            price: None,
            trigger_price: Some(stop.trigger_price),
            reduce_only: true,
            client_id: format!("{correlation_id}-sl"),
            leverage: None,
        };
        self.exchange.create_order(&request).await
    }
}

/// Per-trade prefix shared by every order of one bundle, so the exchange-side
/// records reconcile to it.
fn correlation_id(symbol: &str) -> String {
    let base = symbol
        .split('/')
        .next()
        .unwrap_or(symbol)
        .to_lowercase();
    format!("strikt-{base}-{}", Utc::now().timestamp_millis())
}

// --- Dry-run twin ---

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SimulatedLeg {
    pub label: String,
    pub quantity: f64,
    pub price: f64,
}

/// What the execution engine would have done, computed from the plan's
/// arithmetic alone. Returned to the operator for review in dry-run mode.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SimulatedBundle {
    pub symbol: String,
    pub direction: String,
    pub entry_price: f64,
    pub entry_is_market: bool,
    pub quantity: f64,
    pub leverage: u32,
    pub margin_mode: MarginMode,
    pub tp_legs: Vec<SimulatedLeg>,
    pub stop_trigger: Option<f64>,
}

impl SimulatedBundle {
    /// Operator-facing summary of the would-be orders.
    pub fn report(&self) -> String {
        let mut lines = vec![
            "\u{1f9ea} DRY-RUN".to_string(),
            format!("Symbol: {}", self.symbol),
            format!("Side: {}", self.direction.to_uppercase()),
            format!(
                "Entry: {} @ {} (x{} {})",
                if self.entry_is_market { "market" } else { "limit" },
                self.entry_price,
                self.leverage,
                self.margin_mode
            ),
            format!("Qty: {:.4}", self.quantity),
        ];
        for leg in &self.tp_legs {
            lines.push(format!("{}: {:.4} @ {}", leg.label, leg.quantity, leg.price));
        }
        match self.stop_trigger {
            Some(trigger) => lines.push(format!("SL: trigger @ {trigger}")),
            None => lines.push("SL: none (break-even shift after TP1)".to_string()),
        }
        lines.push("No orders were sent.".to_string());
        lines.join("\n")
    }
}

/// Dry-run twin of `ExecutionEngine::execute`. No I/O.
pub fn simulate(plan: &OrderPlan) -> SimulatedBundle {
    SimulatedBundle {
        symbol: plan.symbol.clone(),
        direction: plan.direction.to_string(),
        entry_price: plan.entry_price,
        entry_is_market: plan.entry.price.is_none(),
        quantity: plan.entry.quantity,
        leverage: plan.leverage,
        margin_mode: plan.margin_mode,
        tp_legs: plan
            .tp_legs
            .iter()
            .enumerate()
            .map(|(i, leg)| SimulatedLeg {
                label: format!("TP{}", i + 1),
                quantity: leg.quantity,
                price: leg.price,
            })
            .collect(),
        stop_trigger: plan.stop.as_ref().map(|s| s.trigger_price),
    }
}
