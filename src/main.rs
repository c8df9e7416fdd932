mod bot;

use anyhow::Result;
use std::sync::Arc;
use tracing_subscriber::{fmt, EnvFilter};

use strikt_autotrader::config::Config;
use strikt_autotrader::exchange::MexcClient;
use strikt_autotrader::telegram::TelegramClient;

use crate::bot::SignalBot;

#[tokio::main]
async fn main() -> Result<()> {
    let cfg = Config::from_env()?;

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&cfg.log_level));

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_timer(fmt::time::UtcTime::rfc_3339())
        .init();

    let telegram = Arc::new(TelegramClient::new(&cfg));
    let exchange = Arc::new(MexcClient::new(&cfg));

    let mut bot = SignalBot::new(cfg.shared(), telegram, exchange).await;
    bot.run().await?;

    Ok(())
}
