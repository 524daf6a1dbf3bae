//! Lookahead setpoint controller
//!
//! Heuristic stand-in for a cost-based MPC: looks a few forecast steps
//! ahead, compares against the target inlet temperature, and nudges the
//! setpoints one notch in the corrective direction. Absolute limits are
//! applied here; rate limits belong to the safety layer, which always
//! runs last.

use crate::config::defaults::{LOOKAHEAD_STEPS, TARGET_TEMP_C};
use crate::config::{Limits, ObjectiveWeights};
use crate::types::Setpoints;

/// Fan step when the lookahead runs hot (RPM).
const FAN_STEP_UP: f64 = 150.0;
/// Fan step when the lookahead runs cool (RPM).
const FAN_STEP_DOWN: f64 = -100.0;
/// Supply-temperature step when hot (°C).
const TEMP_STEP_DOWN: f64 = -0.3;
/// Supply-temperature step when cool (°C).
const TEMP_STEP_UP: f64 = 0.2;

pub struct MpcController {
    limits: Limits,
    /// Objective weights; carried for the cost-based successor, unused by
    /// the heuristic.
    #[allow(dead_code)]
    weights: ObjectiveWeights,
}

impl MpcController {
    pub fn new(limits: Limits, weights: ObjectiveWeights) -> Self {
        Self { limits, weights }
    }

    /// Propose new setpoints from a temperature forecast and the current
    /// actuator state. Returns a 1-decimal supply temperature and an
    /// integral fan speed, clamped to absolute limits.
    pub fn propose(&self, forecast_temp: &[f64], current: &Setpoints) -> Setpoints {
        let lookahead = LOOKAHEAD_STEPS.min(forecast_temp.len().saturating_sub(1));
        let error = forecast_temp.get(lookahead).map_or(0.0, |f| f - TARGET_TEMP_C);

        let (delta_fan, delta_temp) = if error > 0.0 {
            (FAN_STEP_UP, TEMP_STEP_DOWN)
        } else {
            (FAN_STEP_DOWN, TEMP_STEP_UP)
        };

        let fan = clamp(
            current.fan_rpm as f64 + delta_fan,
            self.limits.fan_rpm.min,
            self.limits.fan_rpm.max,
        );
        let supply = clamp(
            current.supply_temp_c + delta_temp,
            self.limits.temp_c.min,
            self.limits.temp_c.max,
        );

        Setpoints {
            supply_temp_c: (supply * 10.0).round() / 10.0,
            fan_rpm: fan.round() as i64,
        }
    }
}

fn clamp(value: f64, lo: f64, hi: f64) -> f64 {
    value.max(lo).min(hi)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::defaults::DEFAULT_CURRENT;

    fn controller() -> MpcController {
        MpcController::new(Limits::default(), ObjectiveWeights::default())
    }

    #[test]
    fn hot_lookahead_raises_fan_and_lowers_supply() {
        let forecast = vec![27.5; 30];
        let set = controller().propose(&forecast, &DEFAULT_CURRENT);
        assert_eq!(set.fan_rpm, 1350);
        assert!((set.supply_temp_c - 17.7).abs() < 1e-9);
    }

    #[test]
    fn cool_lookahead_lowers_fan_and_raises_supply() {
        let forecast = vec![20.0; 30];
        let set = controller().propose(&forecast, &DEFAULT_CURRENT);
        assert_eq!(set.fan_rpm, 1100);
        assert!((set.supply_temp_c - 18.2).abs() < 1e-9);
    }

    #[test]
    fn proposal_respects_absolute_limits() {
        let current = Setpoints {
            supply_temp_c: 16.1,
            fan_rpm: 2150,
        };
        let forecast = vec![30.0; 30];
        let set = controller().propose(&forecast, &current);
        assert_eq!(set.fan_rpm, 2200);
        assert!((set.supply_temp_c - 16.0).abs() < 1e-9);
    }

    #[test]
    fn short_forecast_uses_last_step() {
        // Two steps → lookahead index 1.
        let forecast = vec![22.0, 27.0];
        let set = controller().propose(&forecast, &DEFAULT_CURRENT);
        assert_eq!(set.fan_rpm, 1350);
    }

    #[test]
    fn empty_forecast_reads_as_cool() {
        let set = controller().propose(&[], &DEFAULT_CURRENT);
        assert_eq!(set.fan_rpm, 1100);
    }
}
