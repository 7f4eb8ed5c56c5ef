use std::collections::HashMap;
use tokio::sync::RwLock;

use crate::chat::ChatId;
use crate::models::{SettingKey, SignalField};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CredentialStep {
    ApiKey,
    ApiSecret { api_key: String },
}

/// The one thing an operator's next text message will be applied to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PendingEdit {
    SignalField { signal_id: String, field: SignalField },
    Setting(SettingKey),
    Credential(CredentialStep),
}

/// Per-chat pending edit. Entries have no expiry; a stale one is consumed by
/// the operator's next text message.
#[derive(Default)]
pub struct OperatorSessionStore {
    inner: RwLock<HashMap<ChatId, PendingEdit>>,
}

impl OperatorSessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, chat: ChatId) -> Option<PendingEdit> {
        self.inner.read().await.get(&chat).cloned()
    }

    /// Replaces whatever edit was pending for `chat`.
    pub async fn set(&self, chat: ChatId, edit: PendingEdit) {
        self.inner.write().await.insert(chat, edit);
    }

    pub async fn delete(&self, chat: ChatId) -> Option<PendingEdit> {
        self.inner.write().await.remove(&chat)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn one_pending_edit_per_chat() {
        let store = OperatorSessionStore::new();
        store.set(1, PendingEdit::Setting(SettingKey::Leverage)).await;
        store
            .set(
                1,
                PendingEdit::SignalField {
                    signal_id: "s1".into(),
                    field: SignalField::Tp1,
                },
            )
            .await;
        assert!(matches!(
            store.get(1).await,
            Some(PendingEdit::SignalField { .. })
        ));
        assert_eq!(store.get(2).await, None);
        assert!(store.delete(1).await.is_some());
        assert_eq!(store.get(1).await, None);
    }
}
