use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::chat::{ChatId, NotificationSink};
use crate::exchange::{FuturesExchange, OrderStatus, OrderUpdate, UserStreamConnector};
use crate::models::Signal;
use crate::trading::journal::{TradeJournal, TradeRecord};
use crate::trading::orchestrator::{ExecutionReport, LegRole};
use crate::trading::supervisor::{spawn_supervised, Backoff, TaskOutcome};

pub const DEDUP_CAPACITY: usize = 1024;
pub const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(30 * 60);

const UNKNOWN_ACCOUNT: &str = "default";

/// Bounded set of recently seen keys; the oldest key is evicted first.
#[derive(Debug)]
pub struct RecentSet {
    capacity: usize,
    order: VecDeque<String>,
    seen: HashSet<String>,
}

impl RecentSet {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            order: VecDeque::new(),
            seen: HashSet::new(),
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.seen.contains(key)
    }

    /// Returns false when `key` was already present.
    pub fn insert(&mut self, key: &str) -> bool {
        if self.seen.contains(key) {
            return false;
        }
        if self.order.len() == self.capacity {
            if let Some(old) = self.order.pop_front() {
                self.seen.remove(&old);
            }
        }
        self.order.push_back(key.to_string());
        self.seen.insert(key.to_string());
        true
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TrackedOrder {
    pub chat: ChatId,
    pub signal_id: String,
    pub symbol: String,
    pub role: LegRole,
    pub entry: f64,
}

fn order_key(symbol: &str, order_id: i64) -> String {
    format!("{}:{}", symbol, order_id)
}

/// Watches the account's order-update feed and tells operators when their
/// legs fill.
pub struct FillMonitor {
    exchange: Arc<dyn FuturesExchange>,
    connector: Arc<dyn UserStreamConnector>,
    sink: Arc<dyn NotificationSink>,
    journal: Arc<dyn TradeJournal>,
    admin_chat: ChatId,
    tracked: RwLock<HashMap<String, TrackedOrder>>,
    notified: Mutex<RecentSet>,
    streams: Mutex<HashMap<String, JoinHandle<TaskOutcome>>>,
    keepalive: Duration,
}

impl FillMonitor {
    pub fn new(
        exchange: Arc<dyn FuturesExchange>,
        connector: Arc<dyn UserStreamConnector>,
        sink: Arc<dyn NotificationSink>,
        journal: Arc<dyn TradeJournal>,
        admin_chat: ChatId,
    ) -> Self {
        Self {
            exchange,
            connector,
            sink,
            journal,
            admin_chat,
            tracked: RwLock::new(HashMap::new()),
            notified: Mutex::new(RecentSet::new(DEDUP_CAPACITY)),
            streams: Mutex::new(HashMap::new()),
            keepalive: KEEPALIVE_INTERVAL,
        }
    }

    pub fn with_keepalive(mut self, every: Duration) -> Self {
        self.keepalive = every;
        self
    }

    async fn current_account(&self) -> String {
        self.exchange
            .account_id()
            .await
            .unwrap_or_else(|| UNKNOWN_ACCOUNT.to_string())
    }

    /// Remember every order of `report` for `chat` and make sure the feed is open.
    pub async fn track(self: &Arc<Self>, chat: ChatId, signal: &Signal, report: &ExecutionReport) {
        {
            let mut tracked = self.tracked.write().await;
            let mut add = |order_id: i64, role: LegRole| {
                tracked.insert(
                    order_key(&report.symbol, order_id),
                    TrackedOrder {
                        chat,
                        signal_id: signal.id.clone(),
                        symbol: report.symbol.clone(),
                        role,
                        entry: signal.entry_price,
                    },
                );
            };
            add(report.entry.order_id, LegRole::Entry);
            for leg in &report.protective {
                add(leg.ack.order_id, leg.role);
            }
        }
        debug!(signal = %signal.id, legs = report.protective.len() + 1, "Tracking orders");
        self.ensure_stream().await;
    }

    pub async fn tracked_count(&self) -> usize {
        self.tracked.read().await.len()
    }

    /// Start the feed for the current account unless one is already running.
    pub async fn ensure_stream(self: &Arc<Self>) {
        let account = self.current_account().await;
        let mut streams = self.streams.lock().await;
        if let Some(handle) = streams.get(&account) {
            if !handle.is_finished() {
                return;
            }
        }
        info!(%account, "Starting order update stream");
        let monitor = Arc::clone(self);
        let acct = account.clone();
        let handle = spawn_supervised(
            "fill-monitor",
            async move { monitor.run_stream(acct).await },
            self.sink.clone(),
            self.admin_chat,
        );
        streams.insert(account, handle);
    }

    /// Connection loop for one account. Returns once the account in use
    /// changes; reconnects with backoff otherwise.
    pub async fn run_stream(self: Arc<Self>, account: String) -> anyhow::Result<()> {
        let mut backoff = Backoff::default();
        loop {
            if self.current_account().await != account {
                info!(%account, "Account changed, closing order update stream");
                return Ok(());
            }

            let listen_key = match self.exchange.start_user_stream().await {
                Ok(k) => k,
                Err(e) => {
                    let delay = backoff.next_delay();
                    warn!(%account, error = %e, "Failed to open user stream, retrying in {:?}", delay);
                    tokio::time::sleep(delay).await;
                    continue;
                }
            };
            let mut updates = match self.connector.connect(&listen_key).await {
                Ok(rx) => rx,
                Err(e) => {
                    let delay = backoff.next_delay();
                    warn!(%account, error = %e, "Failed to connect user stream, retrying in {:?}", delay);
                    tokio::time::sleep(delay).await;
                    continue;
                }
            };
            backoff.reset();
            info!(%account, "Order update stream connected");

            let mut keepalive = tokio::time::interval(self.keepalive);
            keepalive.tick().await;
            loop {
                tokio::select! {
                    update = updates.recv() => match update {
                        Some(u) => {
                            self.handle_update(u).await;
                        }
                        None => {
                            warn!(%account, "Order update stream closed");
                            break;
                        }
                    },
                    _ = keepalive.tick() => {
                        if self.current_account().await != account {
                            info!(%account, "Account changed, closing order update stream");
                            return Ok(());
                        }
                        if let Err(e) = self.exchange.keepalive_user_stream(&listen_key).await {
                            warn!(%account, error = %e, "Listen key keepalive failed");
                        }
                    }
                }
            }

            let delay = backoff.next_delay();
            tokio::time::sleep(delay).await;
        }
    }

    /// Forget the legs of a position that a protective fill has closed: all of
    /// them after the stop, the stop once no take-profit is left.
    async fn release_position(&self, filled: &TrackedOrder) {
        let mut tracked = self.tracked.write().await;
        let same = |o: &TrackedOrder| o.signal_id == filled.signal_id && o.symbol == filled.symbol;
        let closed = filled.role == LegRole::StopLoss
            || !tracked
                .values()
                .any(|o| same(o) && matches!(o.role, LegRole::TakeProfit(_)));
        if closed {
            let before = tracked.len();
            tracked.retain(|_, o| !same(o));
            debug!(signal = %filled.signal_id, released = before - tracked.len(), "Position closed");
        }
    }

    /// Apply one feed event. Returns true when it produced a notification.
    pub async fn handle_update(&self, update: OrderUpdate) -> bool {
        let key = order_key(&update.symbol, update.order_id);
        if update.status != OrderStatus::Filled {
            if update.status.is_terminal() {
                if let Some(gone) = self.tracked.write().await.remove(&key) {
                    debug!(order = %key, signal = %gone.signal_id, status = ?update.status, "Order closed without a fill");
                }
            }
            return false;
        }
        if self.notified.lock().await.contains(&key) {
            debug!(order = %key, "Duplicate fill event ignored");
            return false;
        }
        let Some(tracked) = self.tracked.write().await.remove(&key) else {
            debug!(order = %key, "Fill for untracked order");
            return false;
        };
        self.notified.lock().await.insert(&key);
        if tracked.role.is_protective() {
            self.release_position(&tracked).await;
        }

        let text = match tracked.role {
            LegRole::Entry => format!(
                "📥 Entry order for {} filled at {} (order {}).",
                tracked.symbol, update.avg_price, update.order_id
            ),
            role => format!(
                "🎯 {} for {} filled at {} (order {}). Realized PnL: {:.2}",
                role, tracked.symbol, update.avg_price, update.order_id, update.realized_profit
            ),
        };
        info!(order = %key, signal = %tracked.signal_id, role = %tracked.role, "Order filled");
        self.sink.notify(tracked.chat, &text).await;

        if tracked.role.is_protective() {
            let record = TradeRecord {
                signal_id: tracked.signal_id.clone(),
                symbol: tracked.symbol.clone(),
                entry: tracked.entry,
                exit: update.avg_price,
                profit: update.realized_profit,
                recorded_at: update.event_time,
            };
            if let Err(e) = self.journal.record_trade(record).await {
                warn!(signal = %tracked.signal_id, "Failed to journal trade: {:#}", e);
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recent_set_rejects_repeats() {
        let mut set = RecentSet::new(4);
        assert!(set.insert("BTCUSDT:1"));
        assert!(!set.insert("BTCUSDT:1"));
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn recent_set_evicts_oldest() {
        let mut set = RecentSet::new(2);
        set.insert("a");
        set.insert("b");
        set.insert("c");
        assert!(!set.contains("a"));
        assert!(set.contains("b") && set.contains("c"));
        assert_eq!(set.len(), 2);
        assert!(set.insert("a"));
    }

    #[test]
    fn keys_are_per_symbol() {
        assert_ne!(order_key("BTCUSDT", 7), order_key("ETHUSDT", 7));
    }
}
