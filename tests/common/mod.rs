#![allow(dead_code)]

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

use signal_desk::bot::SignalDesk;
use signal_desk::chat::{ChatId, ChatTransport, Keyboard, MessageId, NotificationSink};
use signal_desk::config::Config;
use signal_desk::error::ExchangeError;
use signal_desk::exchange::{
    Credentials, FuturesExchange, OrderAck, OrderRequest, OrderStatus, OrderUpdate, SymbolRules,
    UserStreamConnector,
};
use signal_desk::models::MarginMode;
use signal_desk::trading::journal::{ConfirmedSignalRecord, TradeRecord};
use signal_desk::trading::{FillMonitor, TradeJournal};

pub const ADMIN_CHAT: ChatId = 42;

pub fn make_config() -> Config {
    Config {
        telegram_bot_token: "123:test-token".to_string(),
        telegram_chat_id: ADMIN_CHAT,
        binance_api_key: String::new(),
        binance_api_secret: String::new(),
        binance_rest_url: "http://127.0.0.1:9".to_string(),
        binance_ws_url: "ws://127.0.0.1:9/ws".to_string(),
        recv_window_ms: 5000,
        exchange_timeout_secs: 2,
        webhook_addr: "127.0.0.1:0".to_string(),
        journal_dir: std::env::temp_dir()
            .join("signal-desk-it")
            .to_string_lossy()
            .into_owned(),
        recalc_batch_limit: 20,
        log_level: "debug".to_string(),
    }
}

/// Exchange double: records every call, answers from canned state.
pub struct MockExchange {
    pub calls: Mutex<Vec<String>>,
    pub orders: Mutex<Vec<OrderRequest>>,
    pub price: Mutex<f64>,
    pub price_delay: Mutex<Option<Duration>>,
    /// Leverage the exchange reports back; `None` echoes the request.
    pub effective_leverage: Mutex<Option<u32>>,
    pub margin_error: Mutex<Option<ExchangeError>>,
    /// Reject orders of this type (e.g. `STOP_MARKET`).
    pub reject_kind: Mutex<Option<&'static str>>,
    pub rules: Mutex<SymbolRules>,
    pub account: Mutex<Option<String>>,
    pub credentials: Mutex<Option<Credentials>>,
    pub keepalives: AtomicUsize,
    next_order_id: AtomicI64,
}

impl MockExchange {
    pub fn new() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            orders: Mutex::new(Vec::new()),
            price: Mutex::new(100.0),
            price_delay: Mutex::new(None),
            effective_leverage: Mutex::new(None),
            margin_error: Mutex::new(None),
            reject_kind: Mutex::new(None),
            rules: Mutex::new(SymbolRules {
                symbol: "BTCUSDT".to_string(),
                step_size: 0.001,
                min_qty: 0.001,
                tick_size: 0.1,
            }),
            account: Mutex::new(Some("acct-test".to_string())),
            credentials: Mutex::new(None),
            keepalives: AtomicUsize::new(0),
            next_order_id: AtomicI64::new(1000),
        }
    }

    fn record(&self, call: impl Into<String>) {
        self.calls.lock().unwrap().push(call.into());
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn orders(&self) -> Vec<OrderRequest> {
        self.orders.lock().unwrap().clone()
    }

    pub fn set_price(&self, price: f64) {
        *self.price.lock().unwrap() = price;
    }
}

#[async_trait]
impl FuturesExchange for MockExchange {
    async fn validate_credentials(&self, creds: &Credentials) -> Result<(), ExchangeError> {
        self.record("validate_credentials");
        if creds.api_secret == "good-secret" {
            Ok(())
        } else {
            Err(ExchangeError::Api {
                code: -2015,
                msg: "Invalid API-key, IP, or permissions for action.".into(),
            })
        }
    }

    async fn set_credentials(&self, creds: Credentials) {
        self.record("set_credentials");
        *self.account.lock().unwrap() = Some(creds.account_label());
        *self.credentials.lock().unwrap() = Some(creds);
    }

    async fn account_id(&self) -> Option<String> {
        self.account.lock().unwrap().clone()
    }

    async fn change_margin_type(&self, symbol: &str, mode: MarginMode) -> Result<(), ExchangeError> {
        self.record(format!("margin {} {}", symbol, mode.exchange_value()));
        match self.margin_error.lock().unwrap().clone() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    async fn change_leverage(&self, symbol: &str, leverage: u32) -> Result<u32, ExchangeError> {
        self.record(format!("leverage {} {}", symbol, leverage));
        Ok(self.effective_leverage.lock().unwrap().unwrap_or(leverage))
    }

    async fn symbol_rules(&self, symbol: &str) -> Result<SymbolRules, ExchangeError> {
        self.record(format!("rules {}", symbol));
        let mut rules = self.rules.lock().unwrap().clone();
        rules.symbol = symbol.to_string();
        Ok(rules)
    }

    async fn current_price(&self, symbol: &str) -> Result<f64, ExchangeError> {
        self.record(format!("price {}", symbol));
        let delay = *self.price_delay.lock().unwrap();
        if let Some(d) = delay {
            tokio::time::sleep(d).await;
        }
        Ok(*self.price.lock().unwrap())
    }

    async fn place_order(&self, req: &OrderRequest) -> Result<OrderAck, ExchangeError> {
        self.record(format!("order {} {}", req.kind.as_str(), req.side.exchange_side()));
        if *self.reject_kind.lock().unwrap() == Some(req.kind.as_str()) {
            return Err(ExchangeError::Api {
                code: -2021,
                msg: "Order would immediately trigger.".into(),
            });
        }
        self.orders.lock().unwrap().push(req.clone());
        Ok(OrderAck {
            order_id: self.next_order_id.fetch_add(1, Ordering::SeqCst),
            client_order_id: req.client_order_id.clone(),
            status: "NEW".to_string(),
        })
    }

    async fn start_user_stream(&self) -> Result<String, ExchangeError> {
        self.record("start_user_stream");
        Ok("listen-key".to_string())
    }

    async fn keepalive_user_stream(&self, _listen_key: &str) -> Result<(), ExchangeError> {
        self.keepalives.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SentMessage {
    pub chat: ChatId,
    pub message_id: MessageId,
    pub text: String,
    pub keyboard: Option<Keyboard>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EditedMessage {
    pub chat: ChatId,
    pub message_id: MessageId,
    pub text: Option<String>,
    pub keyboard: Option<Keyboard>,
}

/// Chat double: keeps everything the desk sends.
#[derive(Default)]
pub struct MockChat {
    pub sent: Mutex<Vec<SentMessage>>,
    pub edits: Mutex<Vec<EditedMessage>>,
    pub acks: Mutex<Vec<String>>,
    pub fail_sends: AtomicBool,
    next_id: AtomicI64,
}

impl MockChat {
    pub fn sent(&self) -> Vec<SentMessage> {
        self.sent.lock().unwrap().clone()
    }

    pub fn texts(&self) -> Vec<String> {
        self.sent().into_iter().map(|m| m.text).collect()
    }

    pub fn last_text(&self) -> String {
        self.texts().last().cloned().unwrap_or_default()
    }

    pub fn edits(&self) -> Vec<EditedMessage> {
        self.edits.lock().unwrap().clone()
    }

    pub fn acks(&self) -> Vec<String> {
        self.acks.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChatTransport for MockChat {
    async fn send_message(&self, chat: ChatId, text: &str, keyboard: Option<&Keyboard>) -> Result<MessageId> {
        if self.fail_sends.load(Ordering::SeqCst) {
            bail!("chat unavailable");
        }
        let message_id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        self.sent.lock().unwrap().push(SentMessage {
            chat,
            message_id,
            text: text.to_string(),
            keyboard: keyboard.cloned(),
        });
        Ok(message_id)
    }

    async fn edit_message(
        &self,
        chat: ChatId,
        message_id: MessageId,
        text: &str,
        keyboard: Option<&Keyboard>,
    ) -> Result<()> {
        self.edits.lock().unwrap().push(EditedMessage {
            chat,
            message_id,
            text: Some(text.to_string()),
            keyboard: keyboard.cloned(),
        });
        Ok(())
    }

    async fn edit_keyboard(&self, chat: ChatId, message_id: MessageId, keyboard: Option<&Keyboard>) -> Result<()> {
        self.edits.lock().unwrap().push(EditedMessage {
            chat,
            message_id,
            text: None,
            keyboard: keyboard.cloned(),
        });
        Ok(())
    }

    async fn answer_callback(&self, callback_id: &str, _text: Option<&str>) -> Result<()> {
        self.acks.lock().unwrap().push(callback_id.to_string());
        Ok(())
    }
}

/// User stream whose events are pushed by the test.
#[derive(Default)]
pub struct ChannelStream {
    receivers: Mutex<Vec<mpsc::Receiver<OrderUpdate>>>,
    pub connects: AtomicUsize,
}

impl ChannelStream {
    /// Queue one connection; the returned sender feeds it.
    pub fn open(&self) -> mpsc::Sender<OrderUpdate> {
        let (tx, rx) = mpsc::channel(64);
        self.receivers.lock().unwrap().push(rx);
        tx
    }
}

#[async_trait]
impl UserStreamConnector for ChannelStream {
    async fn connect(&self, _listen_key: &str) -> Result<mpsc::Receiver<OrderUpdate>, ExchangeError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        let mut queued = self.receivers.lock().unwrap();
        if queued.is_empty() {
            return Err(ExchangeError::Transport("no stream queued".into()));
        }
        Ok(queued.remove(0))
    }
}

#[derive(Default)]
pub struct MemoryJournal {
    pub signals: Mutex<Vec<ConfirmedSignalRecord>>,
    pub trades: Mutex<Vec<TradeRecord>>,
}

impl MemoryJournal {
    pub fn trades(&self) -> Vec<TradeRecord> {
        self.trades.lock().unwrap().clone()
    }
}

#[async_trait]
impl TradeJournal for MemoryJournal {
    async fn record_signal(&self, record: ConfirmedSignalRecord) -> Result<()> {
        self.signals.lock().unwrap().push(record);
        Ok(())
    }

    async fn record_trade(&self, record: TradeRecord) -> Result<()> {
        self.trades.lock().unwrap().push(record);
        Ok(())
    }

    async fn trades_since(&self, since: DateTime<Utc>) -> Result<Vec<TradeRecord>> {
        Ok(self
            .trades()
            .into_iter()
            .filter(|t| t.recorded_at >= since)
            .collect())
    }
}

pub struct Harness {
    pub desk: Arc<SignalDesk>,
    pub chat: Arc<MockChat>,
    pub exchange: Arc<MockExchange>,
    pub stream: Arc<ChannelStream>,
    pub journal: Arc<MemoryJournal>,
    pub fills: Arc<FillMonitor>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_exchange(MockExchange::new())
    }

    pub fn with_exchange(exchange: MockExchange) -> Self {
        Self::build(exchange, None)
    }

    /// Harness whose fill monitor pings the listen key every `every`.
    pub fn with_keepalive(every: Duration) -> Self {
        Self::build(MockExchange::new(), Some(every))
    }

    fn build(exchange: MockExchange, keepalive: Option<Duration>) -> Self {
        let cfg = make_config();
        let chat = Arc::new(MockChat::default());
        let exchange = Arc::new(exchange);
        let stream = Arc::new(ChannelStream::default());
        let journal = Arc::new(MemoryJournal::default());
        let sink: Arc<dyn NotificationSink> = chat.clone();

        let mut monitor = FillMonitor::new(
            exchange.clone(),
            stream.clone(),
            sink.clone(),
            journal.clone(),
            cfg.telegram_chat_id,
        );
        if let Some(every) = keepalive {
            monitor = monitor.with_keepalive(every);
        }
        let fills = Arc::new(monitor);
        let desk = Arc::new(SignalDesk::new(
            &cfg,
            chat.clone(),
            sink,
            exchange.clone(),
            fills.clone(),
            journal.clone(),
        ));
        Self {
            desk,
            chat,
            exchange,
            stream,
            journal,
            fills,
        }
    }
}

pub fn filled(symbol: &str, order_id: i64, avg_price: f64, realized_profit: f64) -> OrderUpdate {
    OrderUpdate {
        avg_price,
        realized_profit,
        ..update(symbol, order_id, OrderStatus::Filled)
    }
}

/// A bare status change with no fill price.
pub fn update(symbol: &str, order_id: i64, status: OrderStatus) -> OrderUpdate {
    OrderUpdate {
        symbol: symbol.to_string(),
        order_id,
        client_order_id: format!("sd-test-{}", order_id),
        status,
        avg_price: 0.0,
        realized_profit: 0.0,
        reduce_only: true,
        event_time: Utc::now(),
    }
}

/// Poll `check` until it holds or two seconds pass.
pub async fn wait_until<F: Fn() -> bool>(check: F) -> bool {
    wait_until_for(Duration::from_secs(2), check).await
}

/// Poll `check` every 10ms until it holds or `limit` passes.
pub async fn wait_until_for<F: Fn() -> bool>(limit: Duration, check: F) -> bool {
    let deadline = tokio::time::Instant::now() + limit;
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}
