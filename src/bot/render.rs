use crate::bot::actions;
use crate::chat::{Button, Keyboard};
use crate::models::{Direction, SettingKey, SettingKind, Settings, Signal, SignalField};
use crate::trading::Period;

const NOT_SET: &str = "-";

/// Escape text for Telegram's HTML parse mode.
pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            _ => out.push(ch),
        }
    }
    out
}

fn price(value: f64) -> String {
    if value.is_finite() && value > 0.0 {
        value.to_string()
    } else {
        NOT_SET.to_string()
    }
}

fn text_or_dash(value: &str) -> String {
    if value.trim().is_empty() {
        NOT_SET.to_string()
    } else {
        escape_html(value)
    }
}

/// Whether a take-profit leg is surfaced to the operator.
pub fn shows_take_profit(settings: &Settings, idx: usize) -> bool {
    idx == 0 || (!settings.auto_take_profit && settings.tp_enabled[idx])
}

pub fn signal_text(signal: &Signal, settings: &Settings) -> String {
    let emoji = match signal.direction {
        Direction::Buy => "🟢",
        Direction::Sell => "🔴",
    };
    let mut text = format!(
        "{} <b>{} Signal</b>\n\n\
         <b>Symbol:</b> {}\n\
         <b>Timeframe:</b> {}\n\
         <b>Time:</b> {}\n\
         <b>Entry Price:</b> {}",
        emoji,
        signal.direction,
        text_or_dash(&signal.symbol),
        text_or_dash(&signal.timeframe),
        text_or_dash(&signal.time),
        price(signal.entry_price),
    );
    for (idx, tp) in signal.take_profits.iter().enumerate() {
        if shows_take_profit(settings, idx) {
            text.push_str(&format!("\n<b>TP{}:</b> {}", idx + 1, price(*tp)));
        }
    }
    let sl = if settings.use_stop_loss {
        price(signal.stop_loss)
    } else {
        "off".to_string()
    };
    text.push_str(&format!("\n<b>SL:</b> {}", sl));
    let reference = |v: Option<f64>| v.map(price).unwrap_or_else(|| NOT_SET.to_string());
    text.push_str(&format!(
        "\n<b>High Price:</b> {}\n<b>Low Price:</b> {}\n<b>Midpoint:</b> {}",
        reference(signal.high_price),
        reference(signal.low_price),
        reference(signal.midpoint),
    ));

    if signal.confirmed {
        text.push_str("\n\n<b>Status:</b> Confirmed ✅");
    } else if signal.dismissed {
        text.push_str("\n\n<b>Status:</b> Dismissed ❌");
    }
    text
}

pub fn signal_keyboard(signal_id: &str) -> Keyboard {
    Keyboard::new(vec![
        vec![
            Button::new("Edit", actions::edit_data(signal_id)),
            Button::new("Confirm", actions::confirm_data(signal_id)),
            Button::new("Dismiss", actions::dismiss_data(signal_id)),
        ],
        vec![
            Button::new("Set High Price", actions::field_data(signal_id, SignalField::HighPrice)),
            Button::new("Set Low Price", actions::field_data(signal_id, SignalField::LowPrice)),
            Button::new("Set Midpoint", actions::field_data(signal_id, SignalField::Midpoint)),
        ],
    ])
}

/// Keyboard for a signal message in its current state; terminal signals get none.
pub fn keyboard_for(signal: &Signal) -> Option<Keyboard> {
    signal.is_pending().then(|| signal_keyboard(&signal.id))
}

pub fn edit_keyboard(signal_id: &str, settings: &Settings) -> Keyboard {
    let mut first = vec![Button::new(
        SignalField::EntryPrice.as_str(),
        actions::field_data(signal_id, SignalField::EntryPrice),
    )];
    if settings.use_stop_loss {
        first.push(Button::new(
            SignalField::StopLoss.as_str(),
            actions::field_data(signal_id, SignalField::StopLoss),
        ));
    }
    let tps = [SignalField::Tp1, SignalField::Tp2, SignalField::Tp3]
        .into_iter()
        .enumerate()
        .filter(|(idx, _)| shows_take_profit(settings, *idx))
        .map(|(_, f)| Button::new(f.as_str(), actions::field_data(signal_id, f)))
        .collect();
    let refs = SignalField::REFERENCES
        .iter()
        .map(|f| Button::new(f.as_str(), actions::field_data(signal_id, *f)))
        .collect();
    Keyboard::new(vec![first, tps, refs])
}

pub fn settings_text(settings: &Settings) -> String {
    let mut text = String::from("<b>Settings</b>\n");
    for key in SettingKey::ALL {
        if key.kind() == SettingKind::Action {
            continue;
        }
        text.push_str(&format!("\n{}: <b>{}</b>", key.label(), settings.display_value(key)));
    }
    text
}

pub fn settings_keyboard(settings: &Settings) -> Keyboard {
    let buttons: Vec<Button> = SettingKey::ALL
        .iter()
        .map(|key| {
            let text = match key.kind() {
                SettingKind::Action => key.label().to_string(),
                _ => format!("{}: {}", key.label(), settings.display_value(*key)),
            };
            Button::new(text, actions::setting_data(*key))
        })
        .collect();
    Keyboard::new(buttons.chunks(2).map(|c| c.to_vec()).collect())
}

pub fn choice_keyboard(key: SettingKey, options: &[&str]) -> Keyboard {
    Keyboard::new(vec![options
        .iter()
        .map(|o| Button::new(*o, actions::choice_data(key, o)))
        .collect()])
}

pub fn performance_keyboard() -> Keyboard {
    Keyboard::new(
        Period::ALL
            .iter()
            .map(|p| vec![Button::new(p.label(), actions::performance_data(*p))])
            .collect(),
    )
}
