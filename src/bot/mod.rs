pub mod actions;
pub mod render;

use anyhow::Result;
use chrono::Utc;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::chat::{ChatEvent, ChatId, ChatTransport, MessageId, NotificationSink};
use crate::config::Config;
use crate::core::recalculate;
use crate::error::{EditError, IngestError, StoreError};
use crate::exchange::{Credentials, FuturesExchange};
use crate::models::{InboundAlert, SettingKey, SettingKind, Settings, Signal, SignalField};
use crate::store::{
    sanitize_signal_id, CredentialStep, MessageIdRegistry, MessageRef, OperatorSessionStore,
    PendingEdit, SettingsRepository, SignalRepository,
};
use crate::trading::journal::ConfirmedSignalRecord;
use crate::trading::{
    spawn_supervised, FillMonitor, Period, PerformanceSummary, TaskOutcome, TradeJournal,
    TradeOrchestrator,
};

use self::actions::CallbackAction;

const WELCOME: &str = "Welcome! Incoming signals appear here with buttons to edit, confirm or dismiss them.\n\n\
/settings - trading settings\n\
/setapi - set exchange API credentials\n\
/pending - list unconfirmed signals";
const SIGNAL_NOT_FOUND: &str = "Signal not found.";
const SIGNAL_FINALIZED: &str = "This signal is already confirmed or dismissed.";
const NO_CREDENTIALS: &str = "Exchange API credentials are not set. Use /setapi first.";

/// Result of a confirm request. `Submitted` carries the supervised trade task.
#[derive(Debug)]
pub enum ConfirmOutcome {
    NotFound,
    AlreadyFinalized,
    MissingCredentials,
    Submitted(JoinHandle<TaskOutcome>),
}

/// Routes chat events and inbound alerts through the stores and hands
/// confirmed signals to the orchestrator.
pub struct SignalDesk {
    signals: SignalRepository,
    messages: MessageIdRegistry,
    sessions: OperatorSessionStore,
    settings: SettingsRepository,
    chat: Arc<dyn ChatTransport>,
    sink: Arc<dyn NotificationSink>,
    exchange: Arc<dyn FuturesExchange>,
    orchestrator: Arc<TradeOrchestrator>,
    fills: Arc<FillMonitor>,
    journal: Arc<dyn TradeJournal>,
    admin_chat: ChatId,
    recalc_limit: usize,
}

impl SignalDesk {
    pub fn new(
        cfg: &Config,
        chat: Arc<dyn ChatTransport>,
        sink: Arc<dyn NotificationSink>,
        exchange: Arc<dyn FuturesExchange>,
        fills: Arc<FillMonitor>,
        journal: Arc<dyn TradeJournal>,
    ) -> Self {
        let orchestrator = Arc::new(TradeOrchestrator::new(exchange.clone(), cfg.exchange_timeout()));
        Self {
            signals: SignalRepository::new(),
            messages: MessageIdRegistry::new(),
            sessions: OperatorSessionStore::new(),
            settings: SettingsRepository::new(),
            chat,
            sink,
            exchange,
            orchestrator,
            fills,
            journal,
            admin_chat: cfg.telegram_chat_id,
            recalc_limit: cfg.recalc_batch_limit,
        }
    }

    pub fn admin_chat(&self) -> ChatId {
        self.admin_chat
    }

    pub fn signals(&self) -> &SignalRepository {
        &self.signals
    }

    pub fn settings(&self) -> &SettingsRepository {
        &self.settings
    }

    pub fn sessions(&self) -> &OperatorSessionStore {
        &self.sessions
    }

    // --- Alerts ---

    /// Store an inbound alert and post it to the admin chat.
    pub async fn ingest_alert(&self, alert: InboundAlert) -> Result<Signal, IngestError> {
        alert.validate()?;
        let id = sanitize_signal_id(&alert.signal_id);
        let mut signal = alert.into_signal(id)?;

        let settings = self.settings.get(self.admin_chat).await;
        if recalculate(&mut signal, &settings) {
            debug!(signal = %signal.id, "Derived TP/SL levels on ingest");
        }
        self.signals.create(signal.clone()).await;

        let text = render::signal_text(&signal, &settings);
        let keyboard = render::signal_keyboard(&signal.id);
        let message_id = self
            .chat
            .send_message(self.admin_chat, &text, Some(&keyboard))
            .await
            .map_err(|e| IngestError::Delivery(format!("{:#}", e)))?;
        self.messages
            .set(
                &signal.id,
                MessageRef {
                    chat: self.admin_chat,
                    message_id,
                },
            )
            .await;

        info!(signal = %signal.id, symbol = %signal.symbol, direction = %signal.direction, "Alert received");
        Ok(signal)
    }

    // --- Chat events ---

    pub async fn handle_event(&self, event: ChatEvent) {
        match event {
            ChatEvent::Text { chat, text } => {
                if let Err(e) = self.handle_text(chat, &text).await {
                    warn!("Failed to handle message from chat {}: {:#}", chat, e);
                }
            }
            ChatEvent::Callback {
                chat,
                message_id,
                callback_id,
                data,
            } => {
                let action = CallbackAction::parse(&data);
                action.log_if_unknown();
                if let Err(e) = self.handle_callback(chat, message_id, action).await {
                    warn!("Failed to handle callback '{}' from chat {}: {:#}", data, chat, e);
                }
                if let Err(e) = self.chat.answer_callback(&callback_id, None).await {
                    warn!("Callback acknowledgement failed: {:#}", e);
                }
            }
        }
    }

    async fn reply(&self, chat: ChatId, text: &str) -> Result<()> {
        self.chat.send_message(chat, text, None).await.map(|_| ())
    }

    async fn handle_text(&self, chat: ChatId, text: &str) -> Result<()> {
        let text = text.trim();
        if text.starts_with('/') {
            // A command abandons whatever edit was pending.
            self.sessions.delete(chat).await;
            return self.handle_command(chat, text).await;
        }

        match self.sessions.get(chat).await {
            Some(PendingEdit::SignalField { signal_id, field }) => {
                self.apply_signal_field(chat, &signal_id, field, text).await
            }
            Some(PendingEdit::Setting(key)) => self.apply_setting_value(chat, key, text).await,
            Some(PendingEdit::Credential(step)) => self.apply_credential(chat, step, text).await,
            None => {
                self.reply(chat, "Use the buttons on a signal, or /settings to change settings.")
                    .await
            }
        }
    }

    async fn handle_command(&self, chat: ChatId, text: &str) -> Result<()> {
        let command = text
            .split_whitespace()
            .next()
            .unwrap_or_default()
            .split('@')
            .next()
            .unwrap_or_default();
        match command {
            "/start" => self.reply(chat, WELCOME).await,
            "/settings" => {
                let settings = self.settings.get(chat).await;
                self.chat
                    .send_message(
                        chat,
                        &render::settings_text(&settings),
                        Some(&render::settings_keyboard(&settings)),
                    )
                    .await
                    .map(|_| ())
            }
            "/setapi" => {
                self.sessions
                    .set(chat, PendingEdit::Credential(CredentialStep::ApiKey))
                    .await;
                self.reply(chat, "Please enter your Binance API key.").await
            }
            "/pending" => self.list_pending(chat).await,
            _ => self.reply(chat, "Unknown command.").await,
        }
    }

    async fn list_pending(&self, chat: ChatId) -> Result<()> {
        let pending = self.signals.list_unconfirmed(self.recalc_limit).await;
        if pending.is_empty() {
            return self.reply(chat, "No pending signals.").await;
        }
        let settings = self.settings.get(chat).await;
        for signal in pending.iter().rev() {
            let message_id = self
                .chat
                .send_message(
                    chat,
                    &render::signal_text(signal, &settings),
                    Some(&render::signal_keyboard(&signal.id)),
                )
                .await?;
            self.messages
                .set(&signal.id, MessageRef { chat, message_id })
                .await;
        }
        Ok(())
    }

    async fn handle_callback(&self, chat: ChatId, message_id: MessageId, action: CallbackAction) -> Result<()> {
        match action {
            CallbackAction::ShowEditOptions(id) => match self.signals.get(&id).await {
                Ok(signal) if signal.is_pending() => {
                    let settings = self.settings.get(chat).await;
                    let keyboard = render::edit_keyboard(&id, &settings);
                    self.chat.edit_keyboard(chat, message_id, Some(&keyboard)).await
                }
                Ok(_) => self.reply(chat, SIGNAL_FINALIZED).await,
                Err(_) => self.reply(chat, SIGNAL_NOT_FOUND).await,
            },
            CallbackAction::SelectField { signal_id, field } => {
                self.select_field(chat, &signal_id, field).await
            }
            CallbackAction::Confirm(id) => match self.confirm(chat, &id).await {
                ConfirmOutcome::NotFound => self.reply(chat, SIGNAL_NOT_FOUND).await,
                ConfirmOutcome::AlreadyFinalized => self.reply(chat, SIGNAL_FINALIZED).await,
                ConfirmOutcome::MissingCredentials => self.reply(chat, NO_CREDENTIALS).await,
                ConfirmOutcome::Submitted(_) => Ok(()),
            },
            CallbackAction::Dismiss(id) => match self.signals.dismiss(&id).await {
                Ok(signal) => {
                    info!(signal = %id, "Signal dismissed");
                    self.refresh_message(&signal, &self.settings.get(chat).await).await
                }
                Err(StoreError::NotFound(_)) => self.reply(chat, SIGNAL_NOT_FOUND).await,
                Err(StoreError::Finalized(_)) => self.reply(chat, SIGNAL_FINALIZED).await,
            },
            CallbackAction::OpenSetting(key) => self.open_setting(chat, message_id, key).await,
            CallbackAction::ApplyChoice { key, value } => {
                match self.settings.update(chat, |s| s.apply_choice(key, &value)).await {
                    Ok((settings, ())) => self.after_settings_change(chat, key, &settings, Some(message_id)).await,
                    Err(e) => self.reply(chat, &e.to_string()).await,
                }
            }
            CallbackAction::ShowPerformance(period) => self.show_performance(chat, period).await,
            CallbackAction::Unknown(_) => Ok(()),
        }
    }

    // --- Signal edits ---

    async fn select_field(&self, chat: ChatId, signal_id: &str, field: SignalField) -> Result<()> {
        let settings = self.settings.get(chat).await;
        if field.is_reference() {
            let result = self
                .signals
                .update(signal_id, |s| {
                    let price = s.substitute_reference(field)?;
                    recalculate(s, &settings);
                    Ok(price)
                })
                .await;
            return match result {
                Ok((signal, price)) => {
                    self.reply(chat, &format!("Entry price set to {} ({}).", field, price))
                        .await?;
                    self.refresh_message(&signal, &settings).await
                }
                Err(e) => self.reply_edit_error(chat, e).await,
            };
        }

        match self.signals.get(signal_id).await {
            Ok(signal) if signal.is_pending() => {
                self.sessions
                    .set(
                        chat,
                        PendingEdit::SignalField {
                            signal_id: signal_id.to_string(),
                            field,
                        },
                    )
                    .await;
                self.reply(chat, &format!("Please enter the new value for {}.", field))
                    .await
            }
            Ok(_) => self.reply(chat, SIGNAL_FINALIZED).await,
            Err(_) => self.reply(chat, SIGNAL_NOT_FOUND).await,
        }
    }

    async fn apply_signal_field(&self, chat: ChatId, signal_id: &str, field: SignalField, text: &str) -> Result<()> {
        let Ok(value) = text.parse::<f64>() else {
            return self
                .reply(chat, "Invalid value. Please enter a numeric value.")
                .await;
        };
        let settings = self.settings.get(chat).await;
        let result = self
            .signals
            .update(signal_id, |s| {
                s.apply_field(field, value)?;
                if field == SignalField::EntryPrice {
                    recalculate(s, &settings);
                }
                Ok(())
            })
            .await;

        match result {
            Ok((signal, ())) => {
                self.sessions.delete(chat).await;
                info!(signal = %signal_id, %field, value, "Signal field updated");
                self.reply(chat, &format!("{} has been updated to {}.", field, value))
                    .await?;
                self.refresh_message(&signal, &settings).await
            }
            Err(e) => self.reply_edit_error(chat, e).await,
        }
    }

    /// Validation failures keep the pending edit; a missing or finalized
    /// signal ends it.
    async fn reply_edit_error(&self, chat: ChatId, err: EditError) -> Result<()> {
        let text = match &err {
            EditError::Invalid(e) => e.to_string(),
            EditError::Store(StoreError::NotFound(_)) => {
                self.sessions.delete(chat).await;
                SIGNAL_NOT_FOUND.to_string()
            }
            EditError::Store(StoreError::Finalized(_)) => {
                self.sessions.delete(chat).await;
                SIGNAL_FINALIZED.to_string()
            }
        };
        self.reply(chat, &text).await
    }

    async fn refresh_message(&self, signal: &Signal, settings: &Settings) -> Result<()> {
        let Some(msg) = self.messages.get(&signal.id).await else {
            debug!(signal = %signal.id, "No chat message recorded for signal");
            return Ok(());
        };
        let keyboard = render::keyboard_for(signal);
        self.chat
            .edit_message(
                msg.chat,
                msg.message_id,
                &render::signal_text(signal, settings),
                keyboard.as_ref(),
            )
            .await
    }

    // --- Confirmation ---

    /// Finalize a pending signal and start its trade in the background.
    pub async fn confirm(&self, chat: ChatId, signal_id: &str) -> ConfirmOutcome {
        match self.signals.get(signal_id).await {
            Err(_) => {
                warn!(signal = %signal_id, "Confirm for unknown signal");
                return ConfirmOutcome::NotFound;
            }
            Ok(s) if !s.is_pending() => return ConfirmOutcome::AlreadyFinalized,
            Ok(_) => {}
        }
        if self.exchange.account_id().await.is_none() {
            return ConfirmOutcome::MissingCredentials;
        }

        let settings = self.settings.get(chat).await;
        let signal = match self
            .signals
            .confirm_with(signal_id, |s| {
                recalculate(s, &settings);
            })
            .await
        {
            Ok(s) => s,
            Err(StoreError::NotFound(_)) => return ConfirmOutcome::NotFound,
            Err(StoreError::Finalized(_)) => return ConfirmOutcome::AlreadyFinalized,
        };
        info!(signal = %signal.id, symbol = %signal.symbol, "Signal confirmed");

        if let Err(e) = self.refresh_message(&signal, &settings).await {
            warn!(signal = %signal.id, "Failed to update confirmed signal message: {:#}", e);
        }

        let orchestrator = self.orchestrator.clone();
        let fills = self.fills.clone();
        let journal = self.journal.clone();
        let sink = self.sink.clone();
        let work = async move {
            let record = ConfirmedSignalRecord::from_signal(&signal, Utc::now());
            if let Err(e) = journal.record_signal(record).await {
                warn!(signal = %signal.id, "Failed to journal confirmed signal: {:#}", e);
            }
            match orchestrator.execute(&signal, &settings).await {
                Ok(report) => {
                    sink.notify(chat, &report.summary()).await;
                    fills.track(chat, &signal, &report).await;
                }
                Err(e) => {
                    error!(signal = %signal.id, error = %e, "Trade execution failed");
                    sink.notify(chat, &format!("❌ {}", e.user_message())).await;
                }
            }
            Ok::<_, anyhow::Error>(())
        };
        let handle = spawn_supervised(
            &format!("trade-{}", signal_id),
            work,
            self.sink.clone(),
            self.admin_chat,
        );
        ConfirmOutcome::Submitted(handle)
    }

    // --- Settings ---

    async fn open_setting(&self, chat: ChatId, message_id: MessageId, key: SettingKey) -> Result<()> {
        match key.kind() {
            SettingKind::Choice(options) => {
                self.chat
                    .send_message(
                        chat,
                        &format!("Select {}:", key.label()),
                        Some(&render::choice_keyboard(key, options)),
                    )
                    .await?;
                Ok(())
            }
            SettingKind::Toggle => match self.settings.update(chat, |s| s.toggle(key)).await {
                Ok((settings, _)) => self.after_settings_change(chat, key, &settings, Some(message_id)).await,
                Err(e) => self.reply(chat, &e.to_string()).await,
            },
            SettingKind::Numeric => {
                let settings = self.settings.get(chat).await;
                if let Some(idx) = key.leg_index().filter(|i| *i > 0) {
                    if matches!(key, SettingKey::Tp2Pct | SettingKey::Tp3Pct) && !settings.tp_enabled[idx] {
                        return self
                            .reply(
                                chat,
                                &format!("TP{} is disabled by the close percentages.", idx + 1),
                            )
                            .await;
                    }
                }
                self.sessions.set(chat, PendingEdit::Setting(key)).await;
                self.reply(chat, &key.prompt()).await
            }
            SettingKind::Action => {
                self.chat
                    .send_message(
                        chat,
                        "Select a period:",
                        Some(&render::performance_keyboard()),
                    )
                    .await?;
                Ok(())
            }
        }
    }

    async fn apply_setting_value(&self, chat: ChatId, key: SettingKey, text: &str) -> Result<()> {
        let Ok(value) = text.trim_end_matches('%').trim().parse::<f64>() else {
            return self.reply(chat, "Please enter a valid number.").await;
        };
        match self.settings.update(chat, |s| s.apply_numeric(key, value)).await {
            Ok((settings, ())) => {
                self.sessions.delete(chat).await;
                self.after_settings_change(chat, key, &settings, None).await
            }
            Err(e) => self.reply(chat, &e.to_string()).await,
        }
    }

    /// Confirm the change, redraw the settings view, then recalculate and
    /// redraw the newest pending signals.
    async fn after_settings_change(
        &self,
        chat: ChatId,
        key: SettingKey,
        settings: &Settings,
        origin: Option<MessageId>,
    ) -> Result<()> {
        info!(chat, setting = %key.as_str(), value = %settings.display_value(key), "Setting updated");
        let text = render::settings_text(settings);
        let keyboard = render::settings_keyboard(settings);
        match origin {
            Some(message_id) => {
                self.chat
                    .edit_message(chat, message_id, &text, Some(&keyboard))
                    .await?
            }
            None => {
                self.reply(chat, &format!("✅ {} updated to {}.", key.label(), settings.display_value(key)))
                    .await?;
                self.chat.send_message(chat, &text, Some(&keyboard)).await?;
            }
        }
        self.recalculate_pending(settings).await;
        Ok(())
    }

    /// Recalculate the newest pending signals under `settings` and redraw them.
    pub async fn recalculate_pending(&self, settings: &Settings) -> usize {
        let changed = self
            .signals
            .refresh_unconfirmed(self.recalc_limit, |s| recalculate(s, settings))
            .await;
        for signal in &changed {
            if let Err(e) = self.refresh_message(signal, settings).await {
                warn!(signal = %signal.id, "Failed to redraw recalculated signal: {:#}", e);
            }
        }
        if !changed.is_empty() {
            debug!(count = changed.len(), "Recalculated pending signals");
        }
        changed.len()
    }

    // --- Credentials ---

    async fn apply_credential(&self, chat: ChatId, step: CredentialStep, text: &str) -> Result<()> {
        if text.is_empty() || text.contains(char::is_whitespace) {
            return self.reply(chat, "That does not look like a key. Please try again.").await;
        }
        match step {
            CredentialStep::ApiKey => {
                self.sessions
                    .set(
                        chat,
                        PendingEdit::Credential(CredentialStep::ApiSecret {
                            api_key: text.to_string(),
                        }),
                    )
                    .await;
                self.reply(chat, "Please enter your Binance API secret.").await
            }
            CredentialStep::ApiSecret { api_key } => {
                self.sessions.delete(chat).await;
                let creds = Credentials::new(api_key, text);
                match self.exchange.validate_credentials(&creds).await {
                    Ok(()) => {
                        info!(account = %creds.account_label(), "Exchange credentials updated");
                        self.exchange.set_credentials(creds).await;
                        self.reply(chat, "✅ API credentials verified and saved.").await
                    }
                    Err(e) => {
                        warn!(account = %creds.account_label(), error = %e, "Credential validation failed");
                        self.reply(
                            chat,
                            "❌ Could not verify these API credentials. Use /setapi to try again.",
                        )
                        .await
                    }
                }
            }
        }
    }

    // --- Performance ---

    async fn show_performance(&self, chat: ChatId, period: Period) -> Result<()> {
        let trades = match self.journal.trades_since(period.since(Utc::now())).await {
            Ok(t) => t,
            Err(e) => {
                error!("Failed to read trade journal: {:#}", e);
                return self.reply(chat, "Could not load performance data.").await;
            }
        };
        let summary = PerformanceSummary::from_trades(&trades);
        self.reply(chat, &summary.render(period)).await
    }
}
