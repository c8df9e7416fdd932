use anyhow::Result;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use strikt_autotrader::config::{Config, RunMode, SharedConfig};
use strikt_autotrader::exchange::Exchange;
use strikt_autotrader::execution::{simulate, ExecutionEngine, ExecutionOutcome};
use strikt_autotrader::models::{MarketSnapshot, TradeSignal};
use strikt_autotrader::monitor::PositionMonitor;
use strikt_autotrader::notify::{Audience, Notifier};
use strikt_autotrader::parser::{parse_signal, to_perp};
use strikt_autotrader::planner::plan_orders;
use strikt_autotrader::sizing::size_position;
use strikt_autotrader::telegram::{InboundMessage, TelegramClient};

const POLL_RETRY_DELAY: Duration = Duration::from_secs(5);

/// Dedup set for (chat, message) id pairs. Telegram only redelivers inside
/// the long-poll overlap window, so once the set reaches its cap it is
/// cleared rather than growing for the life of the process.
struct SeenMessages {
    ids: HashSet<(i64, i64)>,
}

impl SeenMessages {
    const CAP: usize = 4096;

    fn new() -> Self {
        Self {
            ids: HashSet::new(),
        }
    }

    /// True the first time a pair is seen.
    fn insert(&mut self, chat_id: i64, message_id: i64) -> bool {
        if self.ids.len() >= Self::CAP {
            self.ids.clear();
        }
        self.ids.insert((chat_id, message_id))
    }
}

pub struct SignalBot {
    config: SharedConfig,
    telegram: Arc<TelegramClient>,
    exchange: Arc<dyn Exchange>,
    engine: ExecutionEngine,
    offset: i64,
    seen: SeenMessages,
    monitors: Vec<JoinHandle<()>>,
}

impl SignalBot {
    pub async fn new(
        config: SharedConfig,
        telegram: Arc<TelegramClient>,
        exchange: Arc<dyn Exchange>,
    ) -> Self {
        let cfg = config.read().await;

        info!("{}", "=".repeat(60));
        info!("STRIKT autotrader starting up");
        info!(
            "Mode: {}",
            match cfg.run_mode() {
                RunMode::DryRun => "DRY-RUN",
                RunMode::Live => "LIVE TRADING",
            }
        );
        info!("Margin: {} USDT @ x{}", cfg.margin_usdt, cfg.leverage);
        info!(
            "TP split: {:?} | initial stop: {}",
            cfg.tp_split, cfg.use_stop_loss
        );
        info!("{}", "=".repeat(60));

        drop(cfg);

        Self {
            config,
            telegram,
            exchange: exchange.clone(),
            engine: ExecutionEngine::new(exchange),
            offset: 0,
            seen: SeenMessages::new(),
            monitors: Vec::new(),
        }
    }

    pub async fn run(&mut self) -> Result<()> {
        self.startup().await;
        info!("Bot polling. Press Ctrl+C to stop.");

        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    self.shutdown().await;
                    return Ok(());
                }
                _ = self.tick() => {}
            }
        }
    }

    /// Instrument preload and the startup DM are both non-fatal: the venue
    /// may be briefly unreachable while signals are still worth queueing.
    async fn startup(&self) {
        match self.exchange.load_instruments().await {
            Ok(count) => info!("loaded {count} instruments"),
            Err(err) => warn!("instrument preload failed: {err:#}"),
        }
        self.telegram
            .notify(Audience::Owner, "\u{1f916} Autotrader started.")
            .await;
    }

    async fn tick(&mut self) {
        let updates = match self.telegram.get_updates(self.offset).await {
            Ok(updates) => updates,
            Err(err) => {
                warn!("update poll failed: {err:#}");
                tokio::time::sleep(POLL_RETRY_DELAY).await;
                return;
            }
        };

        for update in updates {
            self.offset = self.offset.max(update.update_id + 1);
            if let Some(message) = update.into_inbound() {
                self.dispatch(message).await;
            }
        }
    }

    /// Messages are handled strictly one at a time in arrival order. Signal
    /// frequency is low enough that a slow exchange call delaying the next
    /// message is acceptable.
    async fn dispatch(&mut self, message: InboundMessage) {
        let cfg = self.config.read().await.clone();

        if message.chat_id != cfg.telegram_channel_id && message.chat_id != cfg.owner_user_id {
            debug!("ignoring message from chat {}", message.chat_id);
            return;
        }
        // Message ids are only unique per chat.
        if !self.seen.insert(message.chat_id, message.message_id) {
            debug!("already processed message {}", message.message_id);
            return;
        }

        if message.chat_id == cfg.owner_user_id && message.text.starts_with('/') {
            self.handle_command(&message.text, &cfg).await;
            return;
        }

        match parse_signal(&message.text) {
            Ok(signal) => self.handle_signal(signal, &cfg).await,
            Err(rejection) => debug!("not a signal: {rejection}"),
        }
    }

    async fn handle_command(&self, text: &str, cfg: &Config) {
        let mut parts = text.split_whitespace();
        let command = parts.next().unwrap_or("");
        let arg = parts.next().unwrap_or("");

        match command {
            "/start" => {
                let reply = format!(
                    "\u{1f916} Autotrader active.\nMode: {}\nMargin: {} USDT @ x{}\nOpen monitors: {}",
                    match cfg.run_mode() {
                        RunMode::DryRun => "DRY-RUN",
                        RunMode::Live => "LIVE",
                    },
                    cfg.margin_usdt,
                    cfg.leverage,
                    self.monitors.iter().filter(|h| !h.is_finished()).count(),
                );
                self.telegram.notify(Audience::Owner, &reply).await;
            }
            "/dryrun" => {
                let enable = match arg.to_lowercase().as_str() {
                    "on" | "true" => true,
                    "off" | "false" => false,
                    _ => {
                        self.telegram
                            .notify(Audience::Owner, "Usage: /dryrun on|off")
                            .await;
                        return;
                    }
                };
                self.config.write().await.dry_run = enable;
                info!("dry-run set to {enable}");
                self.telegram
                    .notify(
                        Audience::Owner,
                        &format!(
                            "Dry-run {}, applies from the next signal.",
                            if enable { "enabled" } else { "disabled" }
                        ),
                    )
                    .await;
            }
            "/ping" => {
                let reply = match self.exchange.ticker("BTC/USDT:USDT").await {
                    Ok(ticker) => {
                        format!("\u{2705} Exchange reachable (BTC last: {})", ticker.last)
                    }
                    Err(err) => format!("\u{274c} Exchange unreachable: {err:#}"),
                };
                self.telegram.notify(Audience::Owner, &reply).await;
            }
            "/ticker" => {
                if arg.is_empty() {
                    self.telegram
                        .notify(Audience::Owner, "Usage: /ticker SYMBOL")
                        .await;
                    return;
                }
                let symbol = to_perp(&arg.to_uppercase());
                let reply = match self.exchange.ticker(&symbol).await {
                    Ok(t) => format!(
                        "{}\nlast: {}\nbid: {}\nask: {}",
                        t.symbol, t.last, t.bid, t.ask
                    ),
                    Err(err) => format!("\u{274c} {err:#}"),
                };
                self.telegram.notify(Audience::Owner, &reply).await;
            }
            _ => {
                self.telegram
                    .notify(Audience::Owner, "Commands: /start /dryrun /ping /ticker")
                    .await;
            }
        }
    }

    async fn handle_signal(&mut self, signal: TradeSignal, cfg: &Config) {
        info!(
            "signal: {} {} entry {}",
            signal.symbol, signal.direction, signal.entry_price
        );

        let spec = match self.exchange.instrument(&signal.symbol).await {
            Ok(spec) => spec,
            Err(err) => {
                self.report(&format!("\u{274c} Error: {err:#}")).await;
                return;
            }
        };
        let ticker = match self.exchange.ticker(&signal.symbol).await {
            Ok(ticker) => ticker,
            Err(err) => {
                self.report(&format!("\u{274c} Error: {err:#}")).await;
                return;
            }
        };
        let last = ticker.last;
        let snapshot = MarketSnapshot {
            ticker,
            spec: spec.clone(),
        };

        let sizing = match size_position(&signal, &snapshot, cfg) {
            Ok(sizing) => sizing,
            Err(err) => {
                self.report(&format!("\u{26a0}\u{fe0f} Trade skipped: {err}")).await;
                return;
            }
        };
        let plan = plan_orders(&signal, &sizing, &spec, cfg);

        match cfg.run_mode() {
            RunMode::DryRun => {
                self.report(&simulate(&plan).report()).await;
            }
            RunMode::Live => match self.engine.execute(&plan).await {
                Ok(outcome) => {
                    self.report_execution(&signal, &outcome, last).await;
                    let monitor = PositionMonitor::new(
                        self.exchange.clone(),
                        self.telegram.clone() as Arc<dyn Notifier>,
                        outcome.bundle,
                        Duration::from_secs(cfg.monitor_poll_secs),
                    );
                    self.monitors.retain(|handle| !handle.is_finished());
                    self.monitors.push(monitor.spawn());
                }
                Err(err) => {
                    self.report(&format!("\u{1f6d1} Trade failed: {err}")).await;
                }
            },
        }
    }

    async fn report_execution(&self, signal: &TradeSignal, outcome: &ExecutionOutcome, last: f64) {
        let bundle = &outcome.bundle;
        let tp_list = bundle
            .tp_legs
            .iter()
            .map(|leg| format!("{} {:.4} @ {}", leg.label(), leg.quantity, leg.price))
            .collect::<Vec<_>>()
            .join("\n");
        self.report(&format!(
            "\u{2705} Trade executed\nSymbol: {}\nSide: {}\nEntry: {} (market {})\nQty: {}\n{}",
            bundle.symbol,
            bundle.direction.as_str().to_uppercase(),
            signal.entry_price,
            last,
            bundle.total_quantity,
            tp_list,
        ))
        .await;

        for failure in &outcome.leg_failures {
            self.report(&format!(
                "\u{26a0}\u{fe0f} {} on {} was NOT placed ({}). Position is under-protected!",
                failure.label, bundle.symbol, failure.error
            ))
            .await;
        }
    }

    /// Every user-facing milestone goes to the channel and to the owner,
    /// each independently best-effort.
    async fn report(&self, text: &str) {
        self.telegram.notify(Audience::Channel, text).await;
        self.telegram.notify(Audience::Owner, text).await;
    }

    async fn shutdown(&mut self) {
        info!("Shutting down...");
        // Monitors are aborted; any orders they manage stay live on the
        // exchange until an operator intervenes.
        for handle in self.monitors.drain(..) {
            handle.abort();
        }
        info!("Bot stopped.");
    }
}
