pub mod binance;
pub mod user_stream;

pub use binance::BinanceFutures;
pub use user_stream::BinanceUserStream;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;

use crate::error::ExchangeError;
use crate::models::{Direction, MarginMode};

#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub api_key: String,
    pub api_secret: String,
}

impl Credentials {
    pub fn new(api_key: impl Into<String>, api_secret: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            api_secret: api_secret.into(),
        }
    }

    /// Stable, non-secret label for the account these keys belong to.
    pub fn account_label(&self) -> String {
        let prefix: String = self.api_key.chars().take(8).collect();
        format!("acct-{}", prefix)
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("api_key", &self.account_label())
            .field("api_secret", &"<redacted>")
            .finish()
    }
}

/// Quantization rules the exchange enforces for one symbol.
#[derive(Debug, Clone, PartialEq)]
pub struct SymbolRules {
    pub symbol: String,
    pub step_size: f64,
    pub min_qty: f64,
    pub tick_size: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum OrderKind {
    Market,
    Limit { price: String },
    TakeProfitMarket { stop_price: String },
    StopMarket { stop_price: String },
}

impl OrderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderKind::Market => "MARKET",
            OrderKind::Limit { .. } => "LIMIT",
            OrderKind::TakeProfitMarket { .. } => "TAKE_PROFIT_MARKET",
            OrderKind::StopMarket { .. } => "STOP_MARKET",
        }
    }

    fn id_tag(&self) -> &'static str {
        match self {
            OrderKind::Market => "mkt",
            OrderKind::Limit { .. } => "lmt",
            OrderKind::TakeProfitMarket { .. } => "tp",
            OrderKind::StopMarket { .. } => "sl",
        }
    }
}

/// Prices and quantities are pre-formatted to the symbol's precision.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderRequest {
    pub symbol: String,
    pub side: Direction,
    pub kind: OrderKind,
    pub quantity: Option<String>,
    pub reduce_only: bool,
    pub close_position: bool,
    pub client_order_id: String,
}

impl OrderRequest {
    pub fn entry(symbol: &str, side: Direction, kind: OrderKind, quantity: String) -> Self {
        let client_order_id = next_client_order_id(kind.id_tag());
        Self {
            symbol: symbol.to_string(),
            side,
            kind,
            quantity: Some(quantity),
            reduce_only: false,
            close_position: false,
            client_order_id,
        }
    }

    /// Conditional order that closes the whole position when triggered.
    pub fn protective(symbol: &str, side: Direction, kind: OrderKind) -> Self {
        let client_order_id = next_client_order_id(kind.id_tag());
        Self {
            symbol: symbol.to_string(),
            side,
            kind,
            quantity: None,
            reduce_only: true,
            close_position: true,
            client_order_id,
        }
    }
}

static ORDER_SEQ: AtomicU64 = AtomicU64::new(0);

/// Locally generated `sd-<kind>-<millis>-<seq>` id, unique within the process.
pub fn next_client_order_id(tag: &str) -> String {
    let seq = ORDER_SEQ.fetch_add(1, Ordering::Relaxed);
    format!("sd-{}-{}-{}", tag, Utc::now().timestamp_millis(), seq)
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderAck {
    pub order_id: i64,
    pub client_order_id: String,
    pub status: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderStatus {
    New,
    PartiallyFilled,
    Filled,
    Canceled,
    Rejected,
    Expired,
    Other,
}

impl OrderStatus {
    pub fn from_exchange(s: &str) -> Self {
        match s {
            "NEW" => OrderStatus::New,
            "PARTIALLY_FILLED" => OrderStatus::PartiallyFilled,
            "FILLED" => OrderStatus::Filled,
            "CANCELED" => OrderStatus::Canceled,
            "REJECTED" => OrderStatus::Rejected,
            "EXPIRED" => OrderStatus::Expired,
            _ => OrderStatus::Other,
        }
    }

    /// The order can no longer change or fill.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderStatus::Filled | OrderStatus::Canceled | OrderStatus::Rejected | OrderStatus::Expired
        )
    }
}

/// One order state change from the user data stream.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderUpdate {
    pub symbol: String,
    pub order_id: i64,
    pub client_order_id: String,
    pub status: OrderStatus,
    pub avg_price: f64,
    pub realized_profit: f64,
    pub reduce_only: bool,
    pub event_time: DateTime<Utc>,
}

/// The futures account operations the orchestrator and fill monitor need.
#[async_trait]
pub trait FuturesExchange: Send + Sync {
    async fn validate_credentials(&self, creds: &Credentials) -> Result<(), ExchangeError>;
    async fn set_credentials(&self, creds: Credentials);
    /// Identifies the account currently in use; `None` without credentials.
    async fn account_id(&self) -> Option<String>;
    async fn change_margin_type(&self, symbol: &str, mode: MarginMode) -> Result<(), ExchangeError>;
    /// Returns the leverage the exchange actually applied.
    async fn change_leverage(&self, symbol: &str, leverage: u32) -> Result<u32, ExchangeError>;
    async fn symbol_rules(&self, symbol: &str) -> Result<SymbolRules, ExchangeError>;
    async fn current_price(&self, symbol: &str) -> Result<f64, ExchangeError>;
    async fn place_order(&self, req: &OrderRequest) -> Result<OrderAck, ExchangeError>;
    async fn start_user_stream(&self) -> Result<String, ExchangeError>;
    async fn keepalive_user_stream(&self, listen_key: &str) -> Result<(), ExchangeError>;
}

/// Opens the push feed for a listen key. The receiver closes when the
/// connection drops.
#[async_trait]
pub trait UserStreamConnector: Send + Sync {
    async fn connect(&self, listen_key: &str) -> Result<mpsc::Receiver<OrderUpdate>, ExchangeError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_ids_are_unique_and_tagged() {
        let a = OrderRequest::protective("BTCUSDT", Direction::Sell, OrderKind::StopMarket {
            stop_price: "99".into(),
        });
        let b = OrderRequest::protective("BTCUSDT", Direction::Sell, OrderKind::StopMarket {
            stop_price: "99".into(),
        });
        assert!(a.client_order_id.starts_with("sd-sl-"));
        assert_ne!(a.client_order_id, b.client_order_id);
        assert!(a.close_position && a.quantity.is_none());
    }

    #[test]
    fn debug_hides_secret() {
        let creds = Credentials::new("ABCDEFGHIJKL", "topsecret");
        let shown = format!("{:?}", creds);
        assert!(!shown.contains("topsecret"));
        assert!(shown.contains("acct-ABCDEFGH"));
    }
}
