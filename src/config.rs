use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

pub type SharedConfig = Arc<RwLock<Config>>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    // Chat
    pub telegram_bot_token: String,
    /// Chat that receives inbound alerts and background failure reports.
    pub telegram_chat_id: i64,

    // Exchange
    pub binance_api_key: String,
    pub binance_api_secret: String,
    pub binance_rest_url: String,
    pub binance_ws_url: String,
    pub recv_window_ms: u64,
    pub exchange_timeout_secs: u64,

    // Ingress
    pub webhook_addr: String,

    // Journal
    pub journal_dir: String,
    pub recalc_batch_limit: usize,

    // Logging
    pub log_level: String,
}

impl Config {
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        let env = |key: &str, default: &str| -> String {
            std::env::var(key).unwrap_or_else(|_| default.to_string())
        };

        Config {
            telegram_bot_token: env("TELEGRAM_BOT_TOKEN", ""),
            telegram_chat_id: env("TELEGRAM_CHAT_ID", "0").trim().parse().unwrap_or(0),
            binance_api_key: env("BINANCE_API_KEY", ""),
            binance_api_secret: env("BINANCE_API_SECRET", ""),
            binance_rest_url: env("BINANCE_REST_URL", "https://fapi.binance.com")
                .trim_end_matches('/')
                .to_string(),
            binance_ws_url: env("BINANCE_WS_URL", "wss://fstream.binance.com/ws")
                .trim_end_matches('/')
                .to_string(),
            recv_window_ms: env("BINANCE_RECV_WINDOW", "5000").parse().unwrap_or(5000),
            exchange_timeout_secs: env("EXCHANGE_TIMEOUT_SECS", "10")
                .parse()
                .ok()
                .filter(|s| *s > 0)
                .unwrap_or(10),
            webhook_addr: env("WEBHOOK_ADDR", "0.0.0.0:8000"),
            journal_dir: env("JOURNAL_DIR", "data"),
            recalc_batch_limit: env("RECALC_BATCH_LIMIT", "20").parse().unwrap_or(20),
            log_level: env("LOG_LEVEL", "info"),
        }
    }

    pub fn exchange_timeout(&self) -> Duration {
        Duration::from_secs(self.exchange_timeout_secs.max(1))
    }

    pub fn has_exchange_credentials(&self) -> bool {
        !self.binance_api_key.is_empty() && !self.binance_api_secret.is_empty()
    }

    pub fn validate(&self) -> Result<()> {
        if self.telegram_bot_token.trim().is_empty() {
            bail!("TELEGRAM_BOT_TOKEN is not set");
        }
        if self.telegram_chat_id == 0 {
            bail!("TELEGRAM_CHAT_ID is not set or not a valid chat id");
        }
        Ok(())
    }

    pub fn shared(self) -> SharedConfig {
        Arc::new(RwLock::new(self))
    }
}
