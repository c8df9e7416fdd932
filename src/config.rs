use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::RwLock;

pub type SharedConfig = Arc<RwLock<Config>>;

/// Whether a dispatch actually trades or only reports the would-be plan.
/// Read from the shared config at the start of each dispatch, so a `/dryrun`
/// toggle takes effect on the very next processed signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    Live,
    DryRun,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryMode {
    Market,
    Limit,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    // Telegram
    pub telegram_bot_token: String,
    pub telegram_channel_id: i64,
    pub owner_user_id: i64,

    // Exchange
    pub mexc_api_key: String,
    pub mexc_api_secret: String,

    // Position sizing
    pub margin_usdt: f64,
    pub leverage: u32,
    pub allow_slippage_pct: f64,

    // Order plan
    pub tp_split: Vec<f64>,
    pub entry_mode: EntryMode,
    pub use_stop_loss: bool,
    pub stop_loss_pct: f64,

    // Monitoring
    pub monitor_poll_secs: u64,

    // Toggleable at runtime via /dryrun; everything else is fixed at start.
    pub dry_run: bool,

    // Logging
    pub log_level: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let env = |key: &str, default: &str| -> String {
            std::env::var(key).unwrap_or_else(|_| default.to_string())
        };

        let telegram_bot_token = env("TELEGRAM_BOT_TOKEN", "");
        if telegram_bot_token.is_empty() {
            bail!("TELEGRAM_BOT_TOKEN is required");
        }

        let dry_run = env("DRY_RUN", "true").to_lowercase() == "true";
        let mexc_api_key = env("MEXC_API_KEY", "");
        let mexc_api_secret = env("MEXC_API_SECRET", "");
        if !dry_run && (mexc_api_key.is_empty() || mexc_api_secret.is_empty()) {
            bail!("MEXC_API_KEY and MEXC_API_SECRET are required when DRY_RUN=false");
        }

        let leverage: u32 = env("LEVERAGE", "20")
            .parse()
            .context("LEVERAGE must be a whole number")?;
        if leverage == 0 {
            bail!("LEVERAGE must be at least 1");
        }

        Ok(Config {
            telegram_bot_token,
            telegram_channel_id: env("TELEGRAM_CHANNEL_ID", "0").parse().unwrap_or(0),
            owner_user_id: env("OWNER_USER_ID", "0").parse().unwrap_or(0),
            mexc_api_key,
            mexc_api_secret,
            margin_usdt: env("MARGIN_USDT", "50").parse().unwrap_or(50.0),
            leverage,
            allow_slippage_pct: env("ALLOW_SLIPPAGE_PCT", "0.30").parse().unwrap_or(0.30),
            tp_split: parse_tp_split(&env("TP_SPLIT", "20,50,30"))?,
            entry_mode: match env("ENTRY_MODE", "market").to_lowercase().as_str() {
                "limit" => EntryMode::Limit,
                _ => EntryMode::Market,
            },
            use_stop_loss: env("USE_STOP_LOSS", "false").to_lowercase() == "true",
            stop_loss_pct: env("STOP_LOSS_PCT", "2.0").parse().unwrap_or(2.0),
            monitor_poll_secs: env("MONITOR_POLL_SECS", "7").parse().unwrap_or(7),
            dry_run,
            log_level: env("LOG_LEVEL", "info"),
        })
    }

    pub fn run_mode(&self) -> RunMode {
        if self.dry_run {
            RunMode::DryRun
        } else {
            RunMode::Live
        }
    }

    pub fn shared(self) -> SharedConfig {
        Arc::new(RwLock::new(self))
    }
}

/// "20,50,30" -> [0.20, 0.50, 0.30]. The percentages must be positive and
/// sum to 100 so the TP legs always cover the full entry quantity.
fn parse_tp_split(raw: &str) -> Result<Vec<f64>> {
    let parts: Result<Vec<f64>> = raw
        .split(',')
        .map(|p| {
            p.trim()
                .parse::<f64>()
                .with_context(|| format!("TP_SPLIT entry {p:?} is not a number"))
        })
        .collect();
    let pcts = parts?;

    if pcts.is_empty() || pcts.iter().any(|&p| p <= 0.0) {
        bail!("TP_SPLIT needs at least one positive percentage");
    }
    let total: f64 = pcts.iter().sum();
    if (total - 100.0).abs() > 0.01 {
        bail!("TP_SPLIT percentages sum to {total}, expected 100");
    }

    Ok(pcts.iter().map(|p| p / 100.0).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_split_parses_to_fractions() {
        assert_eq!(parse_tp_split("20,50,30").unwrap(), vec![0.20, 0.50, 0.30]);
    }

    #[test]
    fn two_leg_split_is_accepted() {
        assert_eq!(parse_tp_split("30, 70").unwrap(), vec![0.30, 0.70]);
    }

    #[test]
    fn split_must_sum_to_one_hundred() {
        assert!(parse_tp_split("20,50,40").is_err());
        assert!(parse_tp_split("100,0").is_err());
        assert!(parse_tp_split("").is_err());
        assert!(parse_tp_split("fifty,fifty").is_err());
    }

    #[test]
    fn run_mode_follows_the_flag() {
        let mut cfg = crate::test_helpers::default_test_config();
        assert_eq!(cfg.run_mode(), RunMode::DryRun);
        cfg.dry_run = false;
        assert_eq!(cfg.run_mode(), RunMode::Live);
    }
}
