use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{info, warn};

use crate::core::quantize::{floor_to_step, format_to_step, round_to_tick};
use crate::error::{ExchangeError, TradeError};
use crate::exchange::{FuturesExchange, OrderAck, OrderKind, OrderRequest, SymbolRules};
use crate::models::{Direction, OrderMode, Settings, Signal};

const UNKNOWN_ACCOUNT: &str = "default";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LegRole {
    Entry,
    TakeProfit(u8),
    StopLoss,
}

impl LegRole {
    pub fn is_protective(&self) -> bool {
        !matches!(self, LegRole::Entry)
    }
}

impl fmt::Display for LegRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LegRole::Entry => write!(f, "Entry"),
            LegRole::TakeProfit(n) => write!(f, "TP{}", n),
            LegRole::StopLoss => write!(f, "SL"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProtectiveLeg {
    pub role: LegRole,
    pub trigger_price: String,
    pub ack: OrderAck,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionReport {
    pub symbol: String,
    pub side: Direction,
    pub quantity: String,
    pub entry: OrderAck,
    pub protective: Vec<ProtectiveLeg>,
    pub warnings: Vec<String>,
}

impl ExecutionReport {
    pub fn summary(&self) -> String {
        let mut text = format!(
            "✅ {} {} order placed for {} (qty {}, order {}).",
            self.side, self.entry.status, self.symbol, self.quantity, self.entry.order_id
        );
        for leg in &self.protective {
            text.push_str(&format!("\n{} set at {}", leg.role, leg.trigger_price));
        }
        for w in &self.warnings {
            text.push_str(&format!("\n⚠️ {}", w));
        }
        text
    }
}

/// Sequences the exchange calls for one confirmed signal.
///
/// Calls for the same account and symbol never interleave; each holds a
/// per-(account, symbol) lock for the whole sequence, and every exchange call
/// inside it is bounded by `step_timeout`.
pub struct TradeOrchestrator {
    exchange: Arc<dyn FuturesExchange>,
    locks: Mutex<HashMap<(String, String), Arc<Mutex<()>>>>,
    step_timeout: Duration,
}

impl TradeOrchestrator {
    pub fn new(exchange: Arc<dyn FuturesExchange>, step_timeout: Duration) -> Self {
        Self {
            exchange,
            locks: Mutex::new(HashMap::new()),
            step_timeout,
        }
    }

    async fn lock_for(&self, account: &str, symbol: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks
            .entry((account.to_string(), symbol.to_string()))
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    async fn step<T, F>(&self, call: F) -> Result<T, ExchangeError>
    where
        F: Future<Output = Result<T, ExchangeError>>,
    {
        timeout(self.step_timeout, call)
            .await
            .map_err(|_| ExchangeError::Timeout(self.step_timeout))?
    }

    pub async fn execute(&self, signal: &Signal, settings: &Settings) -> Result<ExecutionReport, TradeError> {
        let symbol = signal.symbol.as_str();
        let entry_price = signal.entry_price;
        if !entry_price.is_finite() || entry_price <= 0.0 {
            return Err(TradeError::InvalidEntryPrice(entry_price));
        }

        let account = self
            .exchange
            .account_id()
            .await
            .unwrap_or_else(|| UNKNOWN_ACCOUNT.to_string());
        let lock = self.lock_for(&account, symbol).await;
        let _guard = lock.lock().await;
        info!(signal = %signal.id, %symbol, %account, "Executing trade");

        let mut warnings = Vec::new();

        // 1. Margin mode and leverage
        if let Err(e) = self
            .step(self.exchange.change_margin_type(symbol, settings.margin_mode))
            .await
        {
            warn!(%symbol, error = %e, "Margin type change rejected, continuing");
            warnings.push(format!(
                "Margin mode could not be set to {} for {}; the existing mode was kept.",
                settings.margin_mode, symbol
            ));
        }

        let effective = self
            .step(self.exchange.change_leverage(symbol, settings.leverage))
            .await
            .map_err(|source| TradeError::Leverage {
                symbol: symbol.to_string(),
                source,
            })?;
        if effective > settings.leverage {
            return Err(TradeError::LeverageNotAccepted {
                symbol: symbol.to_string(),
                requested: settings.leverage,
                effective,
            });
        }
        if effective < settings.leverage {
            warnings.push(format!(
                "Leverage capped at {}x by the exchange (requested {}x).",
                effective, settings.leverage
            ));
        }

        // 2. Sizing
        let rules = self
            .step(self.exchange.symbol_rules(symbol))
            .await
            .map_err(|source| TradeError::SymbolRules {
                symbol: symbol.to_string(),
                source,
            })?;
        let qty = floor_to_step(settings.position_size / entry_price, rules.step_size);
        if qty <= 0.0 || qty < rules.min_qty {
            return Err(TradeError::QuantityTooSmall {
                symbol: symbol.to_string(),
                quantity: qty,
                min_qty: rules.min_qty,
            });
        }
        let quantity = format_to_step(qty, rules.step_size);

        // 3. Drift check
        if settings.checks_price_drift() {
            let current = self
                .step(self.exchange.current_price(symbol))
                .await
                .map_err(|source| TradeError::PriceCheck {
                    symbol: symbol.to_string(),
                    source,
                })?;
            let deviation = (current - entry_price).abs() / entry_price;
            if deviation > settings.price_tolerance {
                warn!(%symbol, entry_price, current, deviation, "Price drift beyond tolerance");
                return Err(TradeError::PriceDrift {
                    symbol: symbol.to_string(),
                    entry: entry_price,
                    current,
                    deviation,
                    tolerance: settings.price_tolerance,
                });
            }
        }

        // 4. Entry
        let kind = match settings.order_mode {
            OrderMode::Market => OrderKind::Market,
            OrderMode::Limit => OrderKind::Limit {
                price: price_string(entry_price, &rules),
            },
        };
        let entry_req = OrderRequest::entry(symbol, signal.direction, kind, quantity.clone());
        let entry = self
            .step(self.exchange.place_order(&entry_req))
            .await
            .map_err(|source| TradeError::EntryOrder {
                symbol: symbol.to_string(),
                source,
            })?;
        info!(%symbol, order_id = entry.order_id, %quantity, "Entry order placed");

        // 5. Protective legs
        let close_side = signal.direction.opposite();
        let mut protective = Vec::new();
        for (role, price) in protective_legs(signal, settings) {
            let Some(trigger) = trigger_price(role, signal.direction, price, entry_price, rules.tick_size) else {
                warn!(%symbol, leg = %role, price, "No trigger price beyond entry on the tick grid, skipping leg");
                warnings.push(format!(
                    "{} was not placed: no valid trigger price beyond the entry for {}.",
                    role, symbol
                ));
                continue;
            };
            if trigger != round_to_tick(price, rules.tick_size) {
                warn!(%symbol, leg = %role, price, trigger, "Trigger moved one tick off the entry");
            }
            let stop = format_to_step(trigger, rules.tick_size);
            let kind = match role {
                LegRole::StopLoss => OrderKind::StopMarket {
                    stop_price: stop.clone(),
                },
                _ => OrderKind::TakeProfitMarket {
                    stop_price: stop.clone(),
                },
            };
            let req = OrderRequest::protective(symbol, close_side, kind);
            let ack = self
                .step(self.exchange.place_order(&req))
                .await
                .map_err(|source| TradeError::ProtectiveOrder {
                    symbol: symbol.to_string(),
                    leg: role.to_string(),
                    source,
                })?;
            info!(%symbol, leg = %role, order_id = ack.order_id, "Protective order placed");
            protective.push(ProtectiveLeg {
                role,
                trigger_price: stop,
                ack,
            });
        }

        Ok(ExecutionReport {
            symbol: symbol.to_string(),
            side: signal.direction,
            quantity,
            entry,
            protective,
            warnings,
        })
    }
}

fn price_string(price: f64, rules: &SymbolRules) -> String {
    format_to_step(round_to_tick(price, rules.tick_size), rules.tick_size)
}

/// Tick-rounded trigger for a protective leg, kept strictly on its side of
/// the entry. A trigger that rounds onto the entry moves one tick outward;
/// `None` when no positive price below the entry exists on the grid.
pub fn trigger_price(role: LegRole, direction: Direction, price: f64, entry: f64, tick: f64) -> Option<f64> {
    let above = matches!(role, LegRole::TakeProfit(_)) == (direction == Direction::Buy);
    let rounded = round_to_tick(price, tick);
    let trigger = if above {
        if rounded > entry {
            rounded
        } else {
            round_to_tick(floor_to_step(entry, tick) + tick, tick)
        }
    } else if rounded < entry {
        rounded
    } else {
        let nearest = round_to_tick(entry, tick);
        if nearest < entry {
            nearest
        } else {
            round_to_tick(nearest - tick, tick)
        }
    };
    (trigger > 0.0).then_some(trigger)
}

/// Which protective orders to place. TP2/TP3 need their leg enabled and
/// are skipped in auto mode; the stop needs stop-loss enabled.
pub fn protective_legs(signal: &Signal, settings: &Settings) -> Vec<(LegRole, f64)> {
    let mut legs = Vec::new();
    for (idx, price) in signal.take_profits.iter().copied().enumerate() {
        if !(price.is_finite() && price > 0.0) {
            continue;
        }
        if idx > 0 && (settings.auto_take_profit || !settings.tp_enabled[idx]) {
            continue;
        }
        legs.push((LegRole::TakeProfit(idx as u8 + 1), price));
    }
    if settings.use_stop_loss && signal.stop_loss.is_finite() && signal.stop_loss > 0.0 {
        legs.push((LegRole::StopLoss, signal.stop_loss));
    }
    legs
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{manual_settings, signal};

    #[test]
    fn legs_follow_enablement() {
        let mut s = signal("s1", Direction::Buy, 100.0);
        s.take_profits = [101.0, 102.0, 103.0];
        s.stop_loss = 99.0;
        let mut settings = manual_settings();
        settings.tp_enabled = [true, true, false];
        let roles: Vec<LegRole> = protective_legs(&s, &settings).into_iter().map(|(r, _)| r).collect();
        assert_eq!(roles, vec![LegRole::TakeProfit(1), LegRole::TakeProfit(2), LegRole::StopLoss]);

        settings.use_stop_loss = false;
        settings.auto_take_profit = true;
        let roles: Vec<LegRole> = protective_legs(&s, &settings).into_iter().map(|(r, _)| r).collect();
        assert_eq!(roles, vec![LegRole::TakeProfit(1)]);
    }

    #[test]
    fn zero_levels_place_nothing() {
        let s = signal("s1", Direction::Sell, 100.0);
        assert!(protective_legs(&s, &manual_settings()).is_empty());
    }

    #[test]
    fn triggers_never_round_onto_entry() {
        let tp = trigger_price(LegRole::TakeProfit(1), Direction::Buy, 100.04, 100.0, 0.1);
        assert_eq!(tp, Some(100.1));
        let sl = trigger_price(LegRole::StopLoss, Direction::Buy, 99.97, 100.0, 0.1);
        assert_eq!(sl, Some(99.9));

        let tp = trigger_price(LegRole::TakeProfit(2), Direction::Sell, 99.98, 100.0, 0.1);
        assert_eq!(tp, Some(99.9));
        let sl = trigger_price(LegRole::StopLoss, Direction::Sell, 100.02, 100.0, 0.1);
        assert_eq!(sl, Some(100.1));
    }

    #[test]
    fn triggers_clear_of_entry_are_only_rounded() {
        assert_eq!(
            trigger_price(LegRole::TakeProfit(1), Direction::Buy, 101.26, 100.0, 0.1),
            Some(101.3)
        );
        assert_eq!(
            trigger_price(LegRole::StopLoss, Direction::Buy, 98.94, 100.0, 0.1),
            Some(98.9)
        );
    }

    #[test]
    fn no_trigger_below_a_one_tick_entry() {
        assert_eq!(trigger_price(LegRole::StopLoss, Direction::Buy, 0.05, 0.1, 0.1), None);
    }

    #[test]
    fn leg_labels() {
        assert_eq!(LegRole::TakeProfit(2).to_string(), "TP2");
        assert!(LegRole::StopLoss.is_protective());
        assert!(!LegRole::Entry.is_protective());
    }
}
