use crate::models::{Direction, Settings, Signal};

const PRICE_SCALE: f64 = 1_000_000.0;
const GRID_EPSILON: f64 = 1e-6;

pub fn round6(value: f64) -> f64 {
    (value * PRICE_SCALE).round() / PRICE_SCALE
}

/// Price `pct` percent away from `entry`, in profit direction when
/// `favourable` is set.
///
/// The level always lands strictly on its side of the entry: if rounding to
/// six decimals collapses it onto the entry, it moves to the next grid point
/// outward. A level below the entry that cannot stay positive is dropped (0).
fn offset(entry: f64, pct: f64, direction: Direction, favourable: bool) -> f64 {
    let up = matches!(
        (direction, favourable),
        (Direction::Buy, true) | (Direction::Sell, false)
    );
    let factor = if up { 1.0 + pct / 100.0 } else { 1.0 - pct / 100.0 };
    let price = round6(entry * factor);
    let scaled_entry = entry * PRICE_SCALE;

    if up {
        if price > entry {
            price
        } else {
            ((scaled_entry + GRID_EPSILON).floor() + 1.0) / PRICE_SCALE
        }
    } else {
        let price = if price < entry {
            price
        } else {
            ((scaled_entry - GRID_EPSILON).ceil() - 1.0) / PRICE_SCALE
        };
        if price > 0.0 {
            price
        } else {
            0.0
        }
    }
}

/// Derive TP/SL levels for `signal` from its entry price.
///
/// Returns `false` without touching the signal when dynamic recalculation is
/// off or the entry price is not positive. The entry price itself is never
/// changed, so a manually edited entry survives bulk recalculation.
pub fn recalculate(signal: &mut Signal, settings: &Settings) -> bool {
    if !settings.dynamic_recalc {
        return false;
    }
    let entry = signal.entry_price;
    if !entry.is_finite() || entry <= 0.0 {
        return false;
    }
    let dir = signal.direction;

    if settings.auto_take_profit {
        signal.take_profits = [offset(entry, settings.auto_tp_pct, dir, true), 0.0, 0.0];
        if settings.use_stop_loss {
            signal.stop_loss = offset(entry, settings.auto_sl_pct, dir, false);
        }
    } else {
        // Disabled legs are still computed; enablement only gates display and placement.
        for (tp, pct) in signal.take_profits.iter_mut().zip(settings.tp_pcts) {
            *tp = offset(entry, pct, dir, true);
        }
        if settings.use_stop_loss {
            signal.stop_loss = offset(entry, settings.manual_sl_pct, dir, false);
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{manual_settings, signal};

    #[test]
    fn manual_buy_levels_bracket_entry() {
        let mut s = signal("sig1", Direction::Buy, 100.0);
        assert!(recalculate(&mut s, &manual_settings()));
        assert_eq!(s.take_profits, [101.0, 102.0, 103.0]);
        assert_eq!(s.stop_loss, 99.0);
    }

    #[test]
    fn manual_sell_levels_invert() {
        let mut s = signal("sig1", Direction::Sell, 2500.0);
        recalculate(&mut s, &manual_settings());
        assert!(s.take_profits.iter().all(|tp| *tp < 2500.0));
        assert!(s.stop_loss > 2500.0);
    }

    #[test]
    fn levels_hold_for_awkward_entries() {
        let settings = manual_settings();
        for entry in [0.000123, 0.5, 1.0, 37.77, 64_321.9] {
            for dir in [Direction::Buy, Direction::Sell] {
                let mut s = signal("x", dir, entry);
                recalculate(&mut s, &settings);
                for tp in s.take_profits {
                    match dir {
                        Direction::Buy => assert!(tp > entry, "{} vs {}", tp, entry),
                        Direction::Sell => assert!(tp < entry, "{} vs {}", tp, entry),
                    }
                }
                match dir {
                    Direction::Buy => assert!(s.stop_loss < entry),
                    Direction::Sell => assert!(s.stop_loss > entry),
                }
            }
        }
    }

    #[test]
    fn tiny_percentage_still_clears_entry() {
        let mut settings = manual_settings();
        settings.tp_pcts[0] = 0.0001;
        let mut s = signal("sig1", Direction::Buy, 0.1);
        recalculate(&mut s, &settings);
        assert_eq!(s.take_profits[0], 0.100001);
        assert!(s.stop_loss < 0.1);

        let mut s = signal("sig1", Direction::Sell, 0.1);
        recalculate(&mut s, &settings);
        assert_eq!(s.take_profits[0], 0.099999);
    }

    #[test]
    fn sub_grid_entry_never_yields_level_on_entry() {
        let settings = Settings::default();
        let entry = 0.0000001;

        let mut buy = signal("b", Direction::Buy, entry);
        recalculate(&mut buy, &settings);
        assert!(buy.take_profits.iter().all(|tp| *tp > entry), "{:?}", buy.take_profits);

        let mut settings = manual_settings();
        settings.use_stop_loss = true;
        let mut sell = signal("s", Direction::Sell, entry);
        recalculate(&mut sell, &settings);
        // Nothing representable below the entry: the targets are left unset.
        assert_eq!(sell.take_profits, [0.0; 3]);
        assert!(sell.stop_loss > entry);
    }

    #[test]
    fn auto_mode_only_sets_first_target() {
        let mut settings = manual_settings();
        settings.auto_take_profit = true;
        settings.auto_tp_pct = 2.0;
        settings.auto_sl_pct = 0.5;
        let mut s = signal("sig1", Direction::Buy, 200.0);
        s.take_profits = [1.0, 2.0, 3.0];
        recalculate(&mut s, &settings);
        assert_eq!(s.take_profits, [204.0, 0.0, 0.0]);
        assert_eq!(s.stop_loss, 199.0);
    }

    #[test]
    fn disabled_dynamic_recalc_is_noop() {
        let mut settings = manual_settings();
        settings.dynamic_recalc = false;
        let mut s = signal("sig1", Direction::Buy, 100.0);
        s.take_profits = [110.123456789, 0.0, 130.0];
        s.stop_loss = 90.5;
        let before = s.clone();
        assert!(!recalculate(&mut s, &settings));
        assert_eq!(s.take_profits.map(f64::to_bits), before.take_profits.map(f64::to_bits));
        assert_eq!(s.stop_loss.to_bits(), before.stop_loss.to_bits());
    }

    #[test]
    fn non_positive_entry_is_noop() {
        for entry in [0.0, -5.0] {
            let mut s = signal("sig1", Direction::Buy, entry);
            s.take_profits = [1.0, 2.0, 3.0];
            let before = s.clone();
            assert!(!recalculate(&mut s, &manual_settings()));
            assert_eq!(s, before);
        }
    }

    #[test]
    fn stop_loss_untouched_when_disabled() {
        let mut settings = manual_settings();
        settings.use_stop_loss = false;
        let mut s = signal("sig1", Direction::Buy, 100.0);
        s.stop_loss = 95.0;
        recalculate(&mut s, &settings);
        assert_eq!(s.stop_loss, 95.0);
    }
}
