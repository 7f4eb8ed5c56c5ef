use std::collections::HashMap;
use tokio::sync::RwLock;

use crate::chat::ChatId;
use crate::error::ValidationError;
use crate::models::Settings;

/// Per-chat settings. Reads return a full snapshot; writes build the new
/// record off to the side and swap it in whole.
pub struct SettingsRepository {
    inner: RwLock<HashMap<ChatId, Settings>>,
    defaults: Settings,
}

impl Default for SettingsRepository {
    fn default() -> Self {
        Self::with_defaults(Settings::default())
    }
}

impl SettingsRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_defaults(defaults: Settings) -> Self {
        Self {
            inner: RwLock::new(HashMap::new()),
            defaults,
        }
    }

    /// Stored settings, or the defaults for a chat that never changed any.
    pub async fn get(&self, chat: ChatId) -> Settings {
        self.inner
            .read()
            .await
            .get(&chat)
            .cloned()
            .unwrap_or_else(|| self.defaults.clone())
    }

    pub async fn update<T, F>(&self, chat: ChatId, change: F) -> Result<(Settings, T), ValidationError>
    where
        F: FnOnce(&mut Settings) -> Result<T, ValidationError>,
    {
        let mut map = self.inner.write().await;
        let mut draft = map
            .get(&chat)
            .cloned()
            .unwrap_or_else(|| self.defaults.clone());
        let out = change(&mut draft)?;
        draft.normalize_close_pcts();
        map.insert(chat, draft.clone());
        Ok((draft, out))
    }

    pub async fn replace(&self, chat: ChatId, mut settings: Settings) {
        settings.normalize_close_pcts();
        self.inner.write().await.insert(chat, settings);
    }
}
