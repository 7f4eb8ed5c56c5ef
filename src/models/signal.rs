use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{AlertError, ValidationError};
use crate::models::Direction;

/// One inbound alert as reviewed by the operator.
///
/// `confirmed` and `dismissed` are mutually exclusive; the repository refuses
/// edits once either is set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub id: String,
    pub direction: Direction,
    pub symbol: String,
    pub timeframe: String,
    pub time: String,
    pub entry_price: f64,
    pub take_profits: [f64; 3],
    pub stop_loss: f64,
    pub high_price: Option<f64>,
    pub low_price: Option<f64>,
    pub midpoint: Option<f64>,
    pub confirmed: bool,
    pub dismissed: bool,
    pub manual_entry_edited: bool,
}

impl Signal {
    pub fn new(id: &str, direction: Direction, symbol: &str, entry_price: f64) -> Self {
        Self {
            id: id.to_string(),
            direction,
            symbol: symbol.to_string(),
            timeframe: String::new(),
            time: String::new(),
            entry_price,
            take_profits: [0.0; 3],
            stop_loss: 0.0,
            high_price: None,
            low_price: None,
            midpoint: None,
            confirmed: false,
            dismissed: false,
            manual_entry_edited: false,
        }
    }

    pub fn is_pending(&self) -> bool {
        !self.confirmed && !self.dismissed
    }

    pub fn reference_price(&self, field: SignalField) -> Option<f64> {
        let value = match field {
            SignalField::HighPrice => self.high_price,
            SignalField::LowPrice => self.low_price,
            SignalField::Midpoint => self.midpoint,
            _ => None,
        };
        value.filter(|v| v.is_finite() && *v > 0.0)
    }

    /// Replace the entry with one of the alert's reference prices.
    pub fn substitute_reference(&mut self, field: SignalField) -> Result<f64, ValidationError> {
        let price = self.reference_price(field).ok_or_else(|| {
            ValidationError::new(format!("{} is not available for this signal.", field))
        })?;
        self.entry_price = price;
        Ok(price)
    }

    /// Apply a value typed by the operator to a numeric field.
    pub fn apply_field(&mut self, field: SignalField, value: f64) -> Result<(), ValidationError> {
        if !value.is_finite() || value <= 0.0 {
            return Err(ValidationError::new(format!(
                "Invalid value for {}. Please enter a positive number.",
                field
            )));
        }

        match field {
            SignalField::EntryPrice => {
                self.entry_price = value;
                self.manual_entry_edited = true;
            }
            SignalField::Tp1 | SignalField::Tp2 | SignalField::Tp3 => {
                if self.entry_price > 0.0 && !self.beyond_entry_in_profit(value) {
                    return Err(ValidationError::new(format!(
                        "{} must be {} the entry price for a {} signal.",
                        field,
                        self.profit_side_word(),
                        self.direction
                    )));
                }
                let idx = field.take_profit_index().unwrap_or(0);
                self.take_profits[idx] = value;
            }
            SignalField::StopLoss => {
                if self.entry_price > 0.0 && self.beyond_entry_in_profit(value) {
                    return Err(ValidationError::new(format!(
                        "SL must be on the losing side of the entry price for a {} signal.",
                        self.direction
                    )));
                }
                self.stop_loss = value;
            }
            SignalField::HighPrice | SignalField::LowPrice | SignalField::Midpoint => {
                return Err(ValidationError::new(format!(
                    "{} is taken from the alert and cannot be typed.",
                    field
                )));
            }
        }
        Ok(())
    }

    fn beyond_entry_in_profit(&self, price: f64) -> bool {
        match self.direction {
            Direction::Buy => price > self.entry_price,
            Direction::Sell => price < self.entry_price,
        }
    }

    fn profit_side_word(&self) -> &'static str {
        match self.direction {
            Direction::Buy => "above",
            Direction::Sell => "below",
        }
    }
}

/// Fields an operator can act on from the edit keyboard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SignalField {
    EntryPrice,
    Tp1,
    Tp2,
    Tp3,
    StopLoss,
    HighPrice,
    LowPrice,
    Midpoint,
}

impl SignalField {
    pub const EDITABLE: [SignalField; 5] = [
        SignalField::EntryPrice,
        SignalField::StopLoss,
        SignalField::Tp1,
        SignalField::Tp2,
        SignalField::Tp3,
    ];

    pub const REFERENCES: [SignalField; 3] = [
        SignalField::HighPrice,
        SignalField::LowPrice,
        SignalField::Midpoint,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SignalField::EntryPrice => "Entry Price",
            SignalField::Tp1 => "TP1",
            SignalField::Tp2 => "TP2",
            SignalField::Tp3 => "TP3",
            SignalField::StopLoss => "SL",
            SignalField::HighPrice => "High Price",
            SignalField::LowPrice => "Low Price",
            SignalField::Midpoint => "Midpoint",
        }
    }

    pub fn is_reference(&self) -> bool {
        matches!(
            self,
            SignalField::HighPrice | SignalField::LowPrice | SignalField::Midpoint
        )
    }

    pub fn take_profit_index(&self) -> Option<usize> {
        match self {
            SignalField::Tp1 => Some(0),
            SignalField::Tp2 => Some(1),
            SignalField::Tp3 => Some(2),
            _ => None,
        }
    }
}

impl fmt::Display for SignalField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SignalField {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let field = match s.trim() {
            "Entry Price" | "EntryPrice" => SignalField::EntryPrice,
            "TP1" => SignalField::Tp1,
            "TP2" => SignalField::Tp2,
            "TP3" => SignalField::Tp3,
            "SL" => SignalField::StopLoss,
            "High Price" => SignalField::HighPrice,
            "Low Price" => SignalField::LowPrice,
            "Midpoint" => SignalField::Midpoint,
            other => return Err(format!("unknown signal field '{}'", other)),
        };
        Ok(field)
    }
}

/// JSON body posted by the alert source.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InboundAlert {
    #[serde(default)]
    pub signal_id: String,
    #[serde(default, rename = "signal")]
    pub direction: String,
    #[serde(default)]
    pub symbol: String,
    #[serde(default)]
    pub timeframe: String,
    #[serde(default)]
    pub time: String,
    #[serde(default)]
    pub entry_price: f64,
    #[serde(default)]
    pub tp1: f64,
    #[serde(default)]
    pub tp2: f64,
    #[serde(default)]
    pub tp3: f64,
    #[serde(default)]
    pub tp4: f64,
    #[serde(default)]
    pub sl: f64,
    #[serde(default)]
    pub high_price: f64,
    #[serde(default)]
    pub low_price: f64,
    #[serde(default)]
    pub midpoint: f64,
    #[serde(default)]
    pub confirmed: bool,
    #[serde(default)]
    pub dismissed: bool,
}

impl InboundAlert {
    pub fn validate(&self) -> Result<Direction, AlertError> {
        if self.signal_id.trim().is_empty() {
            return Err(AlertError::MissingField("signal_id"));
        }
        if self.symbol.trim().is_empty() {
            return Err(AlertError::MissingField("symbol"));
        }
        if self.time.trim().is_empty() {
            return Err(AlertError::MissingField("time"));
        }
        self.direction
            .parse::<Direction>()
            .map_err(|_| AlertError::UnknownDirection(self.direction.clone()))
    }

    /// Build the stored record under an already-sanitized id. A fourth take
    /// profit level, if the source sends one, is not tracked.
    pub fn into_signal(self, id: String) -> Result<Signal, AlertError> {
        let direction = self.validate()?;
        let positive = |v: f64| if v.is_finite() && v > 0.0 { Some(v) } else { None };
        // A terminal alert is accepted as pending: only the operator finalizes.
        Ok(Signal {
            id,
            direction,
            symbol: self.symbol.trim().to_ascii_uppercase(),
            timeframe: self.timeframe,
            time: self.time,
            entry_price: self.entry_price,
            take_profits: [self.tp1, self.tp2, self.tp3],
            stop_loss: self.sl,
            high_price: positive(self.high_price),
            low_price: positive(self.low_price),
            midpoint: positive(self.midpoint),
            confirmed: false,
            dismissed: false,
            manual_entry_edited: false,
        })
    }
}
