//! Helpers that keep quantities and prices on the exchange's step/tick grid.

const MAX_DECIMALS: u32 = 12;
const EPSILON: f64 = 1e-9;

/// Number of decimals implied by a step such as `0.001` (3) or `10` (0).
pub fn decimals_for_step(step: f64) -> u32 {
    if !step.is_finite() || step <= 0.0 {
        return 0;
    }
    for d in 0..=MAX_DECIMALS {
        let scaled = step * 10f64.powi(d as i32);
        if (scaled - scaled.round()).abs() < EPSILON * scaled.max(1.0) {
            return d;
        }
    }
    MAX_DECIMALS
}

/// Largest multiple of `step` not above `value`.
pub fn floor_to_step(value: f64, step: f64) -> f64 {
    if !step.is_finite() || step <= 0.0 {
        return value;
    }
    // Nudge before flooring so 0.3 / 0.1 does not land on 2.9999.
    let units = (value / step + EPSILON).floor();
    round_decimals(units * step, decimals_for_step(step))
}

/// Nearest multiple of `tick`.
pub fn round_to_tick(value: f64, tick: f64) -> f64 {
    if !tick.is_finite() || tick <= 0.0 {
        return value;
    }
    let units = (value / tick).round();
    round_decimals(units * tick, decimals_for_step(tick))
}

/// Render `value` with exactly as many decimals as `step` implies.
pub fn format_to_step(value: f64, step: f64) -> String {
    format!("{:.*}", decimals_for_step(step) as usize, value)
}

fn round_decimals(value: f64, decimals: u32) -> f64 {
    let scale = 10f64.powi(decimals as i32);
    (value * scale).round() / scale
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decimals_follow_step() {
        assert_eq!(decimals_for_step(0.001), 3);
        assert_eq!(decimals_for_step(1.0), 0);
        assert_eq!(decimals_for_step(10.0), 0);
        assert_eq!(decimals_for_step(0.1), 1);
        assert_eq!(decimals_for_step(0.00000001), 8);
    }

    #[test]
    fn floor_survives_float_noise() {
        assert_eq!(floor_to_step(0.3, 0.1), 0.3);
        assert_eq!(floor_to_step(1.23456, 0.001), 1.234);
        assert_eq!(floor_to_step(0.0009, 0.001), 0.0);
        assert_eq!(floor_to_step(57.0, 10.0), 50.0);
    }

    #[test]
    fn tick_rounding_is_nearest() {
        assert_eq!(round_to_tick(100.126, 0.01), 100.13);
        assert_eq!(round_to_tick(100.124, 0.01), 100.12);
        assert_eq!(round_to_tick(27_123.46, 0.1), 27_123.5);
    }

    #[test]
    fn formatting_never_exceeds_step_precision() {
        assert_eq!(format_to_step(1.5, 0.001), "1.500");
        assert_eq!(format_to_step(3.0, 1.0), "3");
        assert_eq!(format_to_step(0.1 + 0.2, 0.01), "0.30");
    }
}
