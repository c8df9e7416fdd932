use async_trait::async_trait;
use std::sync::Mutex;

use strikt_autotrader::config::{Config, EntryMode};
use strikt_autotrader::notify::{Audience, Notifier};

/// The channel's STRIKT format, as posted: marker line, hashtag pair,
/// emphasised side, backticked prices, trailing chatter.
pub const SHORT_SIGNAL: &str = "\u{1f525} STRIKT VIP SIGNAL \u{1f525}\n\
    #STX/USDT (\u{1f4c9})\n\
    \u{27a1}\u{fe0f} *SHORT*\n\
    Entry: `0.643`\n\
    TP1: `0.641297`\n\
    TP2: `0.639253`\n\
    TP3: `0.637209`\n\
    \u{26a1} Leverage: x20";

pub const LONG_SIGNAL: &str = "STRIKT\n\
    STX/USDT\n\
    \u{27a1}\u{fe0f} *LONG*\n\
    Entry: 0.643\n\
    TP1: 0.650\n\
    TP2: 0.660\n\
    TP3: 0.670";

/// 50 USDT margin at x20, 20/50/30 split, no initial stop: the canonical
/// deployment parameters.
pub fn test_config() -> Config {
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
