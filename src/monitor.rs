use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::exchange::Exchange;
use crate::models::{OrderBundle, OrderRequest, OrderStatus};
use crate::notify::{Audience, Notifier};

const FILL_EPSILON: f64 = 1e-9;

/// What one polling cycle observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    /// Nothing actionable this cycle; keep polling.
    Watching,
    /// TP1 filled and the stop was moved to the entry price.
    ShiftedToBreakEven,
    /// The exchange reports zero open contracts. Terminal.
    Flat,
}

/// Watches one executed bundle until the position is flat. Each cycle
/// re-reads order and position state from the exchange; local bookkeeping is
/// never trusted on its own. One monitor per bundle, no shared state.
pub struct PositionMonitor {
    exchange: Arc<dyn Exchange>,
    notifier: Arc<dyn Notifier>,
    bundle: OrderBundle,
    poll_interval: Duration,
}

impl PositionMonitor {
    pub fn new(
        exchange: Arc<dyn Exchange>,
        notifier: Arc<dyn Notifier>,
        bundle: OrderBundle,
        poll_interval: Duration,
    ) -> Self {
        Self {
            exchange,
            notifier,
            bundle,
            poll_interval,
        }
    }

    pub fn bundle(&self) -> &OrderBundle {
        &self.bundle
    }

    /// Polls until the position is flat. Transient fetch errors only warn;
    /// the next tick retries.
    pub async fn run(mut self) {
        info!(
            "monitoring {} ({}), poll every {:?}",
            self.bundle.symbol, self.bundle.correlation_id, self.poll_interval
        );
        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick fires immediately; skip it so the entry has one
        // interval to land before the first status read.
        ticker.tick().await;

        loop {
            ticker.tick().await;
            if self.poll_once().await == PollOutcome::Flat {
                return;
            }
        }
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    /// One cycle of the state machine: check TP1 first, then the position.
    /// A TP1 fill that also flattened the position still reports the
    /// break-even milestone before the flat one.
    pub async fn poll_once(&mut self) -> PollOutcome {
        let mut shifted = false;
        if !self.bundle.stop_is_break_even {
            match self.tp1_filled().await {
                Ok(true) => shifted = self.shift_stop_to_break_even().await,
                Ok(false) => {}
                Err(err) => {
                    warn!(
                        "TP1 status fetch for {} failed: {err:#}",
                        self.bundle.symbol
                    );
                }
            }
        }

        match self.exchange.fetch_position(&self.bundle.symbol).await {
            Ok(position) => {
                let contracts = position.map(|p| p.contracts).unwrap_or(0.0);
                if contracts <= 0.0 {
                    info!(
                        "{} is flat, monitoring ends ({})",
                        self.bundle.symbol, self.bundle.correlation_id
                    );
                    self.notifier
                        .notify(
                            Audience::Owner,
                            &format!(
                                "\u{1f3c1} Position closed: {} {}",
                                self.bundle.symbol,
                                self.bundle.direction.as_str().to_uppercase()
                            ),
                        )
                        .await;
                    return PollOutcome::Flat;
                }
                debug!("{} still holds {}", self.bundle.symbol, contracts);
            }
            Err(err) => {
                warn!(
                    "position fetch for {} failed: {err:#}",
                    self.bundle.symbol
                );
            }
        }

        if shifted {
            PollOutcome::ShiftedToBreakEven
        } else {
            PollOutcome::Watching
        }
    }

    /// True once the TP1 leg's fill reaches its planned quantity. Bundles
    /// whose TP1 leg failed to place never report a fill; they are watched
    /// for flatness only.
    async fn tp1_filled(&self) -> anyhow::Result<bool> {
        let Some(tp1) = self.bundle.tp1() else {
            return Ok(false);
        };
        let state = self.exchange.fetch_order(&tp1.order).await?;
        Ok(state.status == OrderStatus::Filled || state.filled + FILL_EPSILON >= tp1.quantity)
    }

    /// Cancels the old stop (best-effort: a stale reduce-only stop at a
    /// worse price is harmless once the new one exists) and places a new
    /// reduce-only stop at the original entry, sized to what TP1 left open.
    /// The flag flips only on a successful submit, so a failed shift is
    /// retried next cycle and a completed one never re-triggers.
    async fn shift_stop_to_break_even(&mut self) -> bool {
        if let Some(stop) = &self.bundle.stop_order {
            if let Err(err) = self.exchange.cancel_order(stop).await {
                warn!(
                    "cancel of stop {} for {} failed: {err:#}",
                    stop.id, self.bundle.symbol
                );
            }
        }

        let remaining = self.bundle.quantity_after_tp1();
        let request = OrderRequest {
            symbol: self.bundle.symbol.clone(),
            side: self.bundle.direction.closing_side(),
            quantity: remaining,
            price: None,
            trigger_price: Some(self.bundle.entry_price),
            reduce_only: true,
            client_id: format!("{}-be", self.bundle.correlation_id),
            leverage: None,
        };

        match self.exchange.create_order(&request).await {
            Ok(order) => {
                info!(
                    "break-even stop for {} placed at {} for qty {}",
                    self.bundle.symbol, self.bundle.entry_price, remaining
                );
                self.bundle.stop_order = Some(order);
                self.bundle.stop_is_break_even = true;
                if let Some(leg) = self.bundle.tp_legs.iter_mut().find(|l| l.index == 0) {
                    leg.filled = true;
                }
                self.notifier
                    .notify(
                        Audience::Owner,
                        &format!(
                            "\u{1f512} TP1 hit on {}, stop moved to break-even @ {}",
                            self.bundle.symbol, self.bundle.entry_price
                        ),
                    )
                    .await;
                true
            }
            Err(err) => {
                warn!(
                    "break-even stop for {} failed, retrying next cycle: {err:#}",
                    self.bundle.symbol
                );
                false
            }
        }
    }
}
