use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::ValidationError;
use crate::models::{AssetMode, MarginMode, OrderMode};

pub const MAX_LEVERAGE: u32 = 125;
pub const MAX_POSITION_SIZE: f64 = 1_000_000.0;

/// Per-operator trading preferences.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    pub margin_mode: MarginMode,
    pub leverage: u32,
    pub asset_mode: AssetMode,
    pub order_mode: OrderMode,
    /// Position size in quote currency (USDT).
    pub position_size: f64,
    pub use_stop_loss: bool,
    /// Auto mode derives TP1 and SL from one percentage pair.
    pub auto_take_profit: bool,
    pub tp_pcts: [f64; 3],
    pub manual_sl_pct: f64,
    pub auto_tp_pct: f64,
    pub auto_sl_pct: f64,
    pub close_pcts: [f64; 3],
    pub tp_enabled: [bool; 3],
    pub dynamic_recalc: bool,
    pub market_tolerance: bool,
    /// Allowed relative drift between entry and market price, as a fraction.
    pub price_tolerance: f64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            margin_mode: MarginMode::Cross,
            leverage: 5,
            asset_mode: AssetMode::Multi,
            order_mode: OrderMode::Market,
            position_size: 100.0,
            use_stop_loss: false,
            auto_take_profit: false,
            tp_pcts: [0.75, 1.5, 2.0],
            manual_sl_pct: 1.0,
            auto_tp_pct: 1.0,
            auto_sl_pct: 1.0,
            close_pcts: [60.0, 20.0, 20.0],
            tp_enabled: [true, true, true],
            dynamic_recalc: true,
            market_tolerance: true,
            price_tolerance: 0.005,
        }
    }
}

impl Settings {
    /// Whether the pre-trade drift check runs for this configuration.
    pub fn checks_price_drift(&self) -> bool {
        self.order_mode == OrderMode::Market && self.market_tolerance
    }

    /// Keep close weights summing to at most 100. The leg that reaches 100
    /// absorbs the remainder and disables the legs after it; TP3 takes
    /// whatever TP1 and TP2 leave.
    pub fn normalize_close_pcts(&mut self) {
        let clean = |v: f64| if v.is_finite() { v.clamp(0.0, 100.0) } else { 0.0 };
        let tp1 = clean(self.close_pcts[0]);
        let mut tp2 = clean(self.close_pcts[1]);
        let tp3;

        if tp1 >= 100.0 {
            self.close_pcts = [100.0, 0.0, 0.0];
            self.tp_enabled = [true, false, false];
            return;
        }

        let remaining = 100.0 - tp1;
        if tp2 >= remaining {
            tp2 = remaining;
            tp3 = 0.0;
        } else {
            tp3 = remaining - tp2;
        }

        self.close_pcts = [tp1, tp2, tp3];
        self.tp_enabled = [true, tp2 > 0.0, tp3 > 0.0];
    }

    pub fn close_pct_total(&self) -> f64 {
        self.close_pcts.iter().sum()
    }

    /// Apply a numeric value typed by the operator.
    pub fn apply_numeric(&mut self, key: SettingKey, value: f64) -> Result<(), ValidationError> {
        if !value.is_finite() {
            return Err(ValidationError::new("Please enter a valid number."));
        }

        match key {
            SettingKey::Leverage => {
                if value.fract() != 0.0 || value < 1.0 || value > MAX_LEVERAGE as f64 {
                    return Err(ValidationError::new(format!(
                        "Leverage must be a whole number between 1 and {}.",
                        MAX_LEVERAGE
                    )));
                }
                self.leverage = value as u32;
            }
            SettingKey::PositionSize => {
                if value <= 0.0 || value > MAX_POSITION_SIZE {
                    return Err(ValidationError::new(
                        "Position size must be greater than 0 and at most 1,000,000 USDT.",
                    ));
                }
                self.position_size = value;
            }
            SettingKey::Tp1Pct | SettingKey::Tp2Pct | SettingKey::Tp3Pct => {
                let idx = key.leg_index().unwrap_or(0);
                if idx > 0 && !self.tp_enabled[idx] {
                    return Err(ValidationError::new(format!(
                        "TP{} is disabled by the close percentages. Lower the earlier close percentages first.",
                        idx + 1
                    )));
                }
                if value <= 0.0 || value > 1000.0 {
                    return Err(ValidationError::new(
                        "TP percentage must be greater than 0 and at most 1000.",
                    ));
                }
                self.tp_pcts[idx] = value;
            }
            SettingKey::ManualSlPct | SettingKey::AutoTpPct | SettingKey::AutoSlPct => {
                if value <= 0.0 || value >= 100.0 {
                    return Err(ValidationError::new(
                        "Percentage must be greater than 0 and less than 100.",
                    ));
                }
                match key {
                    SettingKey::ManualSlPct => self.manual_sl_pct = value,
                    SettingKey::AutoTpPct => self.auto_tp_pct = value,
                    _ => self.auto_sl_pct = value,
                }
            }
            SettingKey::Tp1Close | SettingKey::Tp2Close | SettingKey::Tp3Close => {
                if !(0.0..=100.0).contains(&value) {
                    return Err(ValidationError::new(
                        "Close percentage must be between 0 and 100.",
                    ));
                }
                let idx = key.leg_index().unwrap_or(0);
                if idx == 1 && self.close_pcts[0] >= 100.0 {
                    return Err(ValidationError::new(
                        "TP1 already closes 100% of the position.",
                    ));
                }
                if idx == 2 && self.close_pcts[0] + self.close_pcts[1] >= 100.0 {
                    return Err(ValidationError::new(
                        "TP1 and TP2 already close 100% of the position.",
                    ));
                }
                self.close_pcts[idx] = value;
                self.normalize_close_pcts();
            }
            SettingKey::PriceTolerance => {
                if !(0.0..=100.0).contains(&value) {
                    return Err(ValidationError::new(
                        "Tolerance must be a percentage between 0 and 100.",
                    ));
                }
                self.price_tolerance = value / 100.0;
            }
            other => {
                return Err(ValidationError::new(format!(
                    "{} does not take a numeric value.",
                    other.label()
                )))
            }
        }
        Ok(())
    }

    pub fn toggle(&mut self, key: SettingKey) -> Result<bool, ValidationError> {
        let slot = match key {
            SettingKey::UseStopLoss => &mut self.use_stop_loss,
            SettingKey::AutoTakeProfit => &mut self.auto_take_profit,
            SettingKey::DynamicRecalc => &mut self.dynamic_recalc,
            SettingKey::MarketTolerance => &mut self.market_tolerance,
            other => {
                return Err(ValidationError::new(format!(
                    "{} is not an on/off setting.",
                    other.label()
                )))
            }
        };
        *slot = !*slot;
        Ok(*slot)
    }

    pub fn apply_choice(&mut self, key: SettingKey, value: &str) -> Result<(), ValidationError> {
        let invalid = |e: String| ValidationError::new(e);
        match key {
            SettingKey::MarginMode => self.margin_mode = value.parse().map_err(invalid)?,
            SettingKey::AssetMode => self.asset_mode = value.parse().map_err(invalid)?,
            SettingKey::OrderMode => self.order_mode = value.parse().map_err(invalid)?,
            other => {
                return Err(ValidationError::new(format!(
                    "{} has no fixed choices.",
                    other.label()
                )))
            }
        }
        Ok(())
    }

    pub fn display_value(&self, key: SettingKey) -> String {
        let on_off = |b: bool| (if b { "On" } else { "Off" }).to_string();
        match key {
            SettingKey::MarginMode => self.margin_mode.to_string(),
            SettingKey::Leverage => format!("{}x", self.leverage),
            SettingKey::AssetMode => self.asset_mode.to_string(),
            SettingKey::OrderMode => self.order_mode.to_string(),
            SettingKey::PositionSize => format!("{:.2} USDT", self.position_size),
            SettingKey::UseStopLoss => on_off(self.use_stop_loss),
            SettingKey::AutoTakeProfit => {
                (if self.auto_take_profit { "Auto" } else { "Manual" }).to_string()
            }
            SettingKey::DynamicRecalc => on_off(self.dynamic_recalc),
            SettingKey::MarketTolerance => on_off(self.market_tolerance),
            SettingKey::PriceTolerance => format!("{:.2}%", self.price_tolerance * 100.0),
            SettingKey::Tp1Pct | SettingKey::Tp2Pct | SettingKey::Tp3Pct => {
                let idx = key.leg_index().unwrap_or(0);
                if self.tp_enabled[idx] {
                    format!("{}%", self.tp_pcts[idx])
                } else {
                    "disabled".to_string()
                }
            }
            SettingKey::Tp1Close | SettingKey::Tp2Close | SettingKey::Tp3Close => {
                format!("{}%", self.close_pcts[key.leg_index().unwrap_or(0)])
            }
            SettingKey::ManualSlPct => format!("{}%", self.manual_sl_pct),
            SettingKey::AutoTpPct => format!("{}%", self.auto_tp_pct),
            SettingKey::AutoSlPct => format!("{}%", self.auto_sl_pct),
            SettingKey::ViewPerformance => String::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettingKind {
    Choice(&'static [&'static str]),
    Toggle,
    Numeric,
    Action,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SettingKey {
    MarginMode,
    Leverage,
    AssetMode,
    OrderMode,
    PositionSize,
    UseStopLoss,
    AutoTakeProfit,
    DynamicRecalc,
    MarketTolerance,
    PriceTolerance,
    Tp1Pct,
    Tp2Pct,
    Tp3Pct,
    Tp1Close,
    Tp2Close,
    Tp3Close,
    ManualSlPct,
    AutoTpPct,
    AutoSlPct,
    ViewPerformance,
}

impl SettingKey {
    pub const ALL: [SettingKey; 20] = [
        SettingKey::MarginMode,
        SettingKey::Leverage,
        SettingKey::AssetMode,
        SettingKey::OrderMode,
        SettingKey::PositionSize,
        SettingKey::UseStopLoss,
        SettingKey::AutoTakeProfit,
        SettingKey::DynamicRecalc,
        SettingKey::MarketTolerance,
        SettingKey::PriceTolerance,
        SettingKey::Tp1Pct,
        SettingKey::Tp2Pct,
        SettingKey::Tp3Pct,
        SettingKey::Tp1Close,
        SettingKey::Tp2Close,
        SettingKey::Tp3Close,
        SettingKey::ManualSlPct,
        SettingKey::AutoTpPct,
        SettingKey::AutoSlPct,
        SettingKey::ViewPerformance,
    ];

    /// Token used in callback data.
    pub fn as_str(&self) -> &'static str {
        match self {
            SettingKey::MarginMode => "margin",
            SettingKey::Leverage => "leverage",
            SettingKey::AssetMode => "asset",
            SettingKey::OrderMode => "order",
            SettingKey::PositionSize => "size",
            SettingKey::UseStopLoss => "use_sl",
            SettingKey::AutoTakeProfit => "auto_tp",
            SettingKey::DynamicRecalc => "dynamic",
            SettingKey::MarketTolerance => "mkt_tol",
            SettingKey::PriceTolerance => "tolerance",
            SettingKey::Tp1Pct => "tp1_pct",
            SettingKey::Tp2Pct => "tp2_pct",
            SettingKey::Tp3Pct => "tp3_pct",
            SettingKey::Tp1Close => "tp1_close",
            SettingKey::Tp2Close => "tp2_close",
            SettingKey::Tp3Close => "tp3_close",
            SettingKey::ManualSlPct => "sl_pct",
            SettingKey::AutoTpPct => "auto_tp_pct",
            SettingKey::AutoSlPct => "auto_sl_pct",
            SettingKey::ViewPerformance => "performance",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            SettingKey::MarginMode => "Margin Mode",
            SettingKey::Leverage => "Leverage",
            SettingKey::AssetMode => "Asset Mode",
            SettingKey::OrderMode => "Order Mode",
            SettingKey::PositionSize => "Position Size",
            SettingKey::UseStopLoss => "Stop Loss",
            SettingKey::AutoTakeProfit => "TP Mode",
            SettingKey::DynamicRecalc => "Dynamic Recalculation",
            SettingKey::MarketTolerance => "Tolerance in Market Mode",
            SettingKey::PriceTolerance => "Price Tolerance",
            SettingKey::Tp1Pct => "TP1 %",
            SettingKey::Tp2Pct => "TP2 %",
            SettingKey::Tp3Pct => "TP3 %",
            SettingKey::Tp1Close => "TP1 Close %",
            SettingKey::Tp2Close => "TP2 Close %",
            SettingKey::Tp3Close => "TP3 Close %",
            SettingKey::ManualSlPct => "SL %",
            SettingKey::AutoTpPct => "Auto TP %",
            SettingKey::AutoSlPct => "Auto SL %",
            SettingKey::ViewPerformance => "View Performance",
        }
    }

    pub fn kind(&self) -> SettingKind {
        match self {
            SettingKey::MarginMode => SettingKind::Choice(&["Cross", "Isolated"]),
            SettingKey::AssetMode => SettingKind::Choice(&["Multi", "Single"]),
            SettingKey::OrderMode => SettingKind::Choice(&["Market", "Limit"]),
            SettingKey::UseStopLoss
            | SettingKey::AutoTakeProfit
            | SettingKey::DynamicRecalc
            | SettingKey::MarketTolerance => SettingKind::Toggle,
            SettingKey::ViewPerformance => SettingKind::Action,
            _ => SettingKind::Numeric,
        }
    }

    pub fn leg_index(&self) -> Option<usize> {
        match self {
            SettingKey::Tp1Pct | SettingKey::Tp1Close => Some(0),
            SettingKey::Tp2Pct | SettingKey::Tp2Close => Some(1),
            SettingKey::Tp3Pct | SettingKey::Tp3Close => Some(2),
            _ => None,
        }
    }

    pub fn prompt(&self) -> String {
        match self {
            SettingKey::Leverage => format!("Enter leverage (1-{}):", MAX_LEVERAGE),
            SettingKey::PositionSize => "Enter position size in USDT:".to_string(),
            SettingKey::PriceTolerance => {
                "Enter allowed price tolerance in percent (e.g. 0.5):".to_string()
            }
            other => format!("Enter new value for {}:", other.label()),
        }
    }
}

impl fmt::Display for SettingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for SettingKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SettingKey::ALL
            .iter()
            .copied()
            .find(|k| k.as_str() == s.trim())
            .ok_or_else(|| format!("unknown setting '{}'", s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tp1_at_hundred_disables_later_legs() {
        let mut s = Settings::default();
        s.apply_numeric(SettingKey::Tp1Close, 100.0).unwrap();
        assert_eq!(s.close_pcts, [100.0, 0.0, 0.0]);
        assert_eq!(s.tp_enabled, [true, false, false]);
    }

    #[test]
    fn tp2_is_clamped_to_remainder() {
        let mut s = Settings::default();
        s.apply_numeric(SettingKey::Tp1Close, 70.0).unwrap();
        s.apply_numeric(SettingKey::Tp2Close, 50.0).unwrap();
        assert_eq!(s.close_pcts, [70.0, 30.0, 0.0]);
        assert_eq!(s.tp_enabled, [true, true, false]);
    }

    #[test]
    fn tp3_absorbs_remainder() {
        let mut s = Settings::default();
        s.apply_numeric(SettingKey::Tp1Close, 50.0).unwrap();
        s.apply_numeric(SettingKey::Tp2Close, 10.0).unwrap();
        assert_eq!(s.close_pcts, [50.0, 10.0, 40.0]);
        assert!(s.tp_enabled.iter().all(|e| *e));
    }

    #[test]
    fn close_weights_never_exceed_hundred() {
        let orders = [
            [SettingKey::Tp1Close, SettingKey::Tp2Close, SettingKey::Tp3Close],
            [SettingKey::Tp3Close, SettingKey::Tp2Close, SettingKey::Tp1Close],
            [SettingKey::Tp2Close, SettingKey::Tp3Close, SettingKey::Tp1Close],
        ];
        for order in orders {
            for values in [[80.0, 60.0, 40.0], [10.0, 20.0, 90.0], [100.0, 100.0, 100.0]] {
                let mut s = Settings::default();
                for (key, v) in order.iter().zip(values) {
                    let _ = s.apply_numeric(*key, v);
                    assert!(s.close_pct_total() <= 100.0 + 1e-9);
                    assert!(s.tp_enabled[0]);
                }
            }
        }
    }

    #[test]
    fn later_close_edits_rejected_when_earlier_legs_cover_position() {
        let mut s = Settings::default();
        s.apply_numeric(SettingKey::Tp1Close, 100.0).unwrap();
        assert!(s.apply_numeric(SettingKey::Tp2Close, 10.0).is_err());
        assert!(s.apply_numeric(SettingKey::Tp2Pct, 2.0).is_err());
    }

    #[test]
    fn leverage_bounds() {
        let mut s = Settings::default();
        assert!(s.apply_numeric(SettingKey::Leverage, 0.0).is_err());
        assert!(s.apply_numeric(SettingKey::Leverage, 126.0).is_err());
        assert!(s.apply_numeric(SettingKey::Leverage, 2.5).is_err());
        s.apply_numeric(SettingKey::Leverage, 20.0).unwrap();
        assert_eq!(s.leverage, 20);
    }

    #[test]
    fn tolerance_is_stored_as_fraction() {
        let mut s = Settings::default();
        s.apply_numeric(SettingKey::PriceTolerance, 2.0).unwrap();
        assert!((s.price_tolerance - 0.02).abs() < 1e-12);
    }

    #[test]
    fn toggles_and_choices() {
        let mut s = Settings::default();
        assert_eq!(s.toggle(SettingKey::UseStopLoss), Ok(true));
        s.apply_choice(SettingKey::OrderMode, "Limit").unwrap();
        assert_eq!(s.order_mode, OrderMode::Limit);
        assert!(!s.checks_price_drift());
        assert!(s.toggle(SettingKey::Leverage).is_err());
    }

    #[test]
    fn key_tokens_round_trip() {
        for key in SettingKey::ALL {
            assert_eq!(key.as_str().parse::<SettingKey>().unwrap(), key);
        }
    }
}
