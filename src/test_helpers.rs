use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::chat::{ChatId, NotificationSink};
use crate::config::Config;
use crate::models::{Direction, Settings, Signal};

/// A Config suitable for testing: fake chat credentials, no exchange keys.
pub fn make_config() -> Config {
    Config {
        telegram_bot_token: "123:test-token".to_string(),
        telegram_chat_id: 42,
        binance_api_key: String::new(),
        binance_api_secret: String::new(),
        binance_rest_url: "http://127.0.0.1:9".to_string(),
        binance_ws_url: "ws://127.0.0.1:9/ws".to_string(),
        recv_window_ms: 5000,
        exchange_timeout_secs: 2,
        webhook_addr: "127.0.0.1:0".to_string(),
        journal_dir: std::env::temp_dir()
            .join("signal-desk-test")
            .to_string_lossy()
            .into_owned(),
        recalc_batch_limit: 20,
        log_level: "debug".to_string(),
    }
}

/// Manual TP mode with TP 1/2/3 %, SL 1 % enabled and dynamic recalc on.
pub fn manual_settings() -> Settings {
    Settings {
        auto_take_profit: false,
        use_stop_loss: true,
        dynamic_recalc: true,
        tp_pcts: [1.0, 2.0, 3.0],
        manual_sl_pct: 1.0,
        tp_enabled: [true, true, true],
        ..Settings::default()
    }
}

/// A pending BTCUSDT signal with no levels set.
pub fn signal(id: &str, direction: Direction, entry: f64) -> Signal {
    let mut s = Signal::new(id, direction, "BTCUSDT", entry);
    s.timeframe = "15m".to_string();
    s.time = "2024-01-15T12:00:00Z".to_string();
    s
}

/// Notification sink that keeps every message it is given.
#[derive(Default)]
pub struct RecordingSink {
    sent: Mutex<Vec<(ChatId, String)>>,
}

impl RecordingSink {
    pub async fn messages(&self) -> Vec<(ChatId, String)> {
        self.sent.lock().await.clone()
    }
}

#[async_trait]
impl NotificationSink for RecordingSink {
    async fn notify(&self, chat: ChatId, text: &str) {
        self.sent.lock().await.push((chat, text.to_string()));
    }
}
