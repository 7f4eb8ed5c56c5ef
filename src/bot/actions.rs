use tracing::warn;

use crate::models::{SettingKey, SignalField};
use crate::trading::Period;

pub const EDIT: &str = "edit";
pub const FIELD: &str = "field";
pub const CONFIRM: &str = "conf";
pub const DISMISS: &str = "dismiss";
pub const SET_OPTION: &str = "setopt";
pub const CHANGE_OPTION: &str = "chgopt";
pub const PERFORMANCE: &str = "performance";

/// One parsed inline-button press. Wire format is `action|payload[|arg]`.
#[derive(Debug, Clone, PartialEq)]
pub enum CallbackAction {
    ShowEditOptions(String),
    SelectField { signal_id: String, field: SignalField },
    Confirm(String),
    Dismiss(String),
    OpenSetting(SettingKey),
    ApplyChoice { key: SettingKey, value: String },
    ShowPerformance(Period),
    Unknown(String),
}

/// Token for a field inside callback data; no spaces.
pub fn field_token(field: SignalField) -> &'static str {
    match field {
        SignalField::EntryPrice => "EntryPrice",
        SignalField::Tp1 => "TP1",
        SignalField::Tp2 => "TP2",
        SignalField::Tp3 => "TP3",
        SignalField::StopLoss => "SL",
        SignalField::HighPrice => "HighPrice",
        SignalField::LowPrice => "LowPrice",
        SignalField::Midpoint => "Midpoint",
    }
}

fn parse_field_token(token: &str) -> Option<SignalField> {
    let field = match token {
        "EntryPrice" => SignalField::EntryPrice,
        "TP1" => SignalField::Tp1,
        "TP2" => SignalField::Tp2,
        "TP3" => SignalField::Tp3,
        "SL" => SignalField::StopLoss,
        "HighPrice" => SignalField::HighPrice,
        "LowPrice" => SignalField::LowPrice,
        "Midpoint" => SignalField::Midpoint,
        _ => return None,
    };
    Some(field)
}

impl CallbackAction {
    pub fn parse(data: &str) -> Self {
        let parts: Vec<&str> = data.split('|').map(str::trim).collect();
        let unknown = || CallbackAction::Unknown(data.to_string());

        let (action, payload) = match parts.as_slice() {
            [action, payload, ..] if !payload.is_empty() => (*action, *payload),
            _ => return unknown(),
        };
        let arg = parts.get(2).copied().filter(|s| !s.is_empty());

        match action {
            EDIT => CallbackAction::ShowEditOptions(payload.to_string()),
            FIELD => match arg.and_then(parse_field_token) {
                Some(field) => CallbackAction::SelectField {
                    signal_id: payload.to_string(),
                    field,
                },
                None => unknown(),
            },
            CONFIRM => CallbackAction::Confirm(payload.to_string()),
            DISMISS => CallbackAction::Dismiss(payload.to_string()),
            SET_OPTION => payload
                .parse()
                .map(CallbackAction::OpenSetting)
                .unwrap_or_else(|_| unknown()),
            CHANGE_OPTION => match (payload.parse::<SettingKey>(), arg) {
                (Ok(key), Some(value)) => CallbackAction::ApplyChoice {
                    key,
                    value: value.to_string(),
                },
                _ => unknown(),
            },
            PERFORMANCE => payload
                .parse()
                .map(CallbackAction::ShowPerformance)
                .unwrap_or_else(|_| unknown()),
            _ => unknown(),
        }
    }

    pub fn log_if_unknown(&self) {
        if let CallbackAction::Unknown(data) = self {
            warn!("Ignoring unrecognized callback data '{}'", data);
        }
    }
}

pub fn edit_data(signal_id: &str) -> String {
    format!("{}|{}", EDIT, signal_id)
}

pub fn field_data(signal_id: &str, field: SignalField) -> String {
    format!("{}|{}|{}", FIELD, signal_id, field_token(field))
}

pub fn confirm_data(signal_id: &str) -> String {
    format!("{}|{}", CONFIRM, signal_id)
}

pub fn dismiss_data(signal_id: &str) -> String {
    format!("{}|{}", DISMISS, signal_id)
}

pub fn setting_data(key: SettingKey) -> String {
    format!("{}|{}", SET_OPTION, key.as_str())
}

pub fn choice_data(key: SettingKey, value: &str) -> String {
    format!("{}|{}|{}", CHANGE_OPTION, key.as_str(), value)
}

pub fn performance_data(period: Period) -> String {
    format!("{}|{}", PERFORMANCE, period.as_str())
}
