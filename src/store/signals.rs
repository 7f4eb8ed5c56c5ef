use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};
use sha2::{Digest, Sha256};
use tokio::sync::RwLock;

use crate::chat::{ChatId, MessageId};
use crate::error::{EditError, StoreError, ValidationError};
use crate::models::Signal;

const FALLBACK_PREFIX: &str = "signal";

static FALLBACK_SEQ: AtomicU64 = AtomicU64::new(0);

/// Longest id that still fits every inline button (`field|<id>|EntryPrice`)
/// inside Telegram's 64-byte callback data limit.
pub const MAX_SIGNAL_ID_LEN: usize = 40;
const DIGEST_LEN: usize = 8;

/// Collapse every run of characters outside `[A-Za-z0-9]` into one `_` and
/// trim separators from both ends. Idempotent. An id with nothing usable left
/// gets a generated `signal_<nanos>_<seq>` id.
///
/// Underscores count as separators as well, so `a__b` becomes `a_b`.
/// Ids longer than [`MAX_SIGNAL_ID_LEN`] keep their head and end in a short
/// SHA-256 digest of the full id, so distinct long ids stay distinct.
pub fn sanitize_signal_id(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut pending_sep = false;
    for ch in raw.chars() {
        if ch.is_ascii_alphanumeric() {
            if pending_sep && !out.is_empty() {
                out.push('_');
            }
            pending_sep = false;
            out.push(ch);
        } else {
            pending_sep = true;
        }
    }

    if out.is_empty() {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or_default();
        let seq = FALLBACK_SEQ.fetch_add(1, Ordering::Relaxed);
        return format!("{}_{}_{}", FALLBACK_PREFIX, nanos, seq);
    }
    if out.len() > MAX_SIGNAL_ID_LEN {
        let digest = hex::encode(Sha256::digest(out.as_bytes()));
        let head = out[..MAX_SIGNAL_ID_LEN - DIGEST_LEN - 1].trim_end_matches('_');
        return format!("{}_{}", head, &digest[..DIGEST_LEN]);
    }
    out
}

struct Entry {
    seq: u64,
    signal: Signal,
}

/// Keyed store of signals. Writers hold the lock for a single record change;
/// terminal records reject every further edit.
#[derive(Default)]
pub struct SignalRepository {
    inner: RwLock<HashMap<String, Entry>>,
    seq: AtomicU64,
}

impl SignalRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite the record under `signal.id`.
    pub async fn create(&self, signal: Signal) {
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        let mut map = self.inner.write().await;
        map.insert(signal.id.clone(), Entry { seq, signal });
    }

    pub async fn get(&self, id: &str) -> Result<Signal, StoreError> {
        self.inner
            .read()
            .await
            .get(id)
            .map(|e| e.signal.clone())
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    /// Pending signals, newest first.
    pub async fn list_unconfirmed(&self, limit: usize) -> Vec<Signal> {
        let map = self.inner.read().await;
        let mut pending: Vec<&Entry> = map.values().filter(|e| e.signal.is_pending()).collect();
        pending.sort_by(|a, b| b.seq.cmp(&a.seq));
        pending
            .into_iter()
            .take(limit)
            .map(|e| e.signal.clone())
            .collect()
    }

    /// Apply `edit` to a pending signal. The change is committed only when
    /// `edit` succeeds, so a rejected value leaves the record untouched.
    pub async fn update<T, F>(&self, id: &str, edit: F) -> Result<(Signal, T), EditError>
    where
        F: FnOnce(&mut Signal) -> Result<T, ValidationError>,
    {
        let mut map = self.inner.write().await;
        let entry = map
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        if !entry.signal.is_pending() {
            return Err(StoreError::Finalized(id.to_string()).into());
        }
        let mut draft = entry.signal.clone();
        let out = edit(&mut draft)?;
        entry.signal = draft.clone();
        Ok((draft, out))
    }

    /// Mark a pending signal confirmed after a final `refresh`. Only the first
    /// caller wins; a second confirm sees `Finalized`.
    pub async fn confirm_with<F>(&self, id: &str, refresh: F) -> Result<Signal, StoreError>
    where
        F: FnOnce(&mut Signal),
    {
        let mut map = self.inner.write().await;
        let entry = map
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        if !entry.signal.is_pending() {
            return Err(StoreError::Finalized(id.to_string()));
        }
        refresh(&mut entry.signal);
        entry.signal.confirmed = true;
        Ok(entry.signal.clone())
    }

    pub async fn dismiss(&self, id: &str) -> Result<Signal, StoreError> {
        let mut map = self.inner.write().await;
        let entry = map
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        if !entry.signal.is_pending() {
            return Err(StoreError::Finalized(id.to_string()));
        }
        entry.signal.dismissed = true;
        Ok(entry.signal.clone())
    }

    /// Run `refresh` over the newest `limit` pending signals and return the
    /// ones it reported as changed.
    pub async fn refresh_unconfirmed<F>(&self, limit: usize, mut refresh: F) -> Vec<Signal>
    where
        F: FnMut(&mut Signal) -> bool,
    {
        let mut map = self.inner.write().await;
        let mut pending: Vec<&mut Entry> =
            map.values_mut().filter(|e| e.signal.is_pending()).collect();
        pending.sort_by(|a, b| b.seq.cmp(&a.seq));
        pending
            .into_iter()
            .take(limit)
            .filter_map(|e| refresh(&mut e.signal).then(|| e.signal.clone()))
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageRef {
    pub chat: ChatId,
    pub message_id: MessageId,
}

/// Signal id to the chat message that renders it.
#[derive(Default)]
pub struct MessageIdRegistry {
    inner: RwLock<HashMap<String, MessageRef>>,
}

impl MessageIdRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set(&self, signal_id: &str, msg: MessageRef) {
        self.inner.write().await.insert(signal_id.to_string(), msg);
    }

    pub async fn get(&self, signal_id: &str) -> Option<MessageRef> {
        self.inner.read().await.get(signal_id).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Direction, SignalField};
    use crate::test_helpers::signal;

    #[test]
    fn sanitize_collapses_runs() {
        assert_eq!(sanitize_signal_id("BTC/USDT :: 15m#1"), "BTC_USDT_15m_1");
        assert_eq!(sanitize_signal_id("__abc__"), "abc");
        assert_eq!(sanitize_signal_id("sig1"), "sig1");
    }

    #[test]
    fn sanitize_is_idempotent() {
        for raw in ["a b", "--x--y--", "ÄÖÜ-1", "plain", "***", ""] {
            let once = sanitize_signal_id(raw);
            assert_eq!(sanitize_signal_id(&once), once);
        }
    }

    #[test]
    fn underscores_are_separators() {
        assert_eq!(sanitize_signal_id("a__b"), "a_b");
    }

    #[test]
    fn long_ids_are_capped_and_stay_distinct() {
        let base = "TradingView alert ".repeat(5);
        let a = sanitize_signal_id(&format!("{}BTCUSDT", base));
        let b = sanitize_signal_id(&format!("{}ETHUSDT", base));
        assert!(a.len() <= MAX_SIGNAL_ID_LEN, "{}", a);
        assert_ne!(a, b);
        assert_eq!(sanitize_signal_id(&a), a);
        assert!(a.starts_with("TradingView_alert_"));
    }

    #[test]
    fn sanitize_fallback_is_unique() {
        let a = sanitize_signal_id("!!!");
        let b = sanitize_signal_id("");
        assert!(a.starts_with("signal_"));
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn create_overwrites_duplicate() {
        let repo = SignalRepository::new();
        repo.create(signal("s1", Direction::Buy, 100.0)).await;
        repo.create(signal("s1", Direction::Sell, 200.0)).await;
        let s = repo.get("s1").await.unwrap();
        assert_eq!(s.direction, Direction::Sell);
        assert_eq!(s.entry_price, 200.0);
    }

    #[tokio::test]
    async fn rejected_edit_leaves_record_untouched() {
        let repo = SignalRepository::new();
        repo.create(signal("s1", Direction::Buy, 100.0)).await;
        let err = repo
            .update("s1", |s| s.apply_field(SignalField::Tp1, 90.0))
            .await
            .unwrap_err();
        assert!(matches!(err, EditError::Invalid(_)));
        assert_eq!(repo.get("s1").await.unwrap().take_profits[0], 0.0);
    }

    #[tokio::test]
    async fn terminal_signals_are_immutable() {
        let repo = SignalRepository::new();
        repo.create(signal("s1", Direction::Buy, 100.0)).await;
        repo.confirm_with("s1", |_| {}).await.unwrap();
        assert_eq!(
            repo.confirm_with("s1", |_| {}).await,
            Err(StoreError::Finalized("s1".into()))
        );
        assert!(repo.dismiss("s1").await.is_err());
        let err = repo
            .update("s1", |s| s.apply_field(SignalField::EntryPrice, 1.0))
            .await
            .unwrap_err();
        assert_eq!(err, EditError::Store(StoreError::Finalized("s1".into())));
    }

    #[tokio::test]
    async fn unconfirmed_listing_is_newest_first() {
        let repo = SignalRepository::new();
        for id in ["a", "b", "c", "d"] {
            repo.create(signal(id, Direction::Buy, 10.0)).await;
        }
        repo.dismiss("c").await.unwrap();
        let ids: Vec<String> = repo
            .list_unconfirmed(2)
            .await
            .into_iter()
            .map(|s| s.id)
            .collect();
        assert_eq!(ids, vec!["d", "b"]);
    }

    #[tokio::test]
    async fn message_registry_round_trip() {
        let reg = MessageIdRegistry::new();
        assert_eq!(reg.get("x").await, None);
        let msg = MessageRef { chat: 7, message_id: 42 };
        reg.set("x", msg).await;
        assert_eq!(reg.get("x").await, Some(msg));
    }
}
