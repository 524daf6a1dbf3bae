//! Trigger evaluation
//!
//! A trigger is a named predicate over the current metrics, the rolling
//! window, or the forecast. All triggers are evaluated on every telemetry
//! point; the full firing list is recorded on the action and the first
//! match by priority becomes its `reason`.

use crate::config::defaults::{LOOKAHEAD_STEPS, TREND_DELTA_C, TREND_SAMPLES};
use crate::config::Policy;
use crate::types::MetricReadings;

/// Everything a trigger may look at for one telemetry point.
pub struct TriggerContext<'a> {
    pub metrics: &'a MetricReadings,
    /// Dense temperature window
    pub window: &'a [f64],
    /// True sample count behind the window
    pub window_samples: usize,
    /// Forecast point estimates
    pub preds: &'a [f64],
    /// Anomaly alarm flag
    pub alarm: bool,
}

/// Evaluate all triggers, returning the firing names in priority order.
pub fn evaluate(policy: &Policy, ctx: &TriggerContext<'_>) -> Vec<&'static str> {
    let mut fired = Vec::new();
    let temp_max = policy.limits.temp_c.max;

    // 1. Hard inlet-temperature breach.
    if ctx.metrics.temp_c.is_some_and(|t| t >= temp_max) {
        fired.push("temperature_limit");
    }

    // 2. Sustained rise across the trend span. Needs real samples — a
    // padded window would fake a flat trend, not a rise, but the guard
    // keeps the predicate honest.
    if ctx.window_samples >= TREND_SAMPLES && ctx.window.len() >= TREND_SAMPLES {
        let newest = ctx.window[ctx.window.len() - 1];
        let oldest = ctx.window[ctx.window.len() - TREND_SAMPLES];
        if newest - oldest >= TREND_DELTA_C {
            fired.push("temperature_trend");
        }
    }

    // 3. Power draw above the alarm threshold.
    if ctx.metrics.power_kw.is_some_and(|p| p >= policy.power_alarm_kw) {
        fired.push("power_spike");
    }

    // 4. Humidity outside the policy band.
    if ctx
        .metrics
        .hum_pct
        .is_some_and(|h| h < policy.humidity.min || h > policy.humidity.max)
    {
        fired.push("humidity_out_of_range");
    }

    // 5. Forecast lookahead at or above the temperature limit.
    if !ctx.preds.is_empty() {
        let lookahead = LOOKAHEAD_STEPS.min(ctx.preds.len() - 1);
        if ctx.preds[lookahead] >= temp_max {
            fired.push("forecast_risk_high");
        }
    }

    // 6. Anomaly alarm.
    if ctx.alarm {
        fired.push("anomaly");
    }

    fired
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metrics(temp: Option<f64>, hum: Option<f64>, power: Option<f64>) -> MetricReadings {
        MetricReadings {
            temp_c: temp,
            hum_pct: hum,
            power_kw: power,
            airflow_cfm: None,
            extra: serde_json::Map::new(),
        }
    }

    fn ctx<'a>(
        m: &'a MetricReadings,
        window: &'a [f64],
        samples: usize,
        preds: &'a [f64],
        alarm: bool,
    ) -> TriggerContext<'a> {
        TriggerContext {
            metrics: m,
            window,
            window_samples: samples,
            preds,
            alarm,
        }
    }

    #[test]
    fn quiet_point_fires_nothing() {
        let policy = Policy::default();
        let m = metrics(Some(22.0), Some(45.0), Some(3.0));
        let window = [22.0; 10];
        let preds = [22.0; 30];
        assert!(evaluate(&policy, &ctx(&m, &window, 10, &preds, false)).is_empty());
    }

    #[test]
    fn temperature_limit_has_top_priority() {
        let policy = Policy::default();
        let m = metrics(Some(27.5), Some(90.0), Some(6.0));
        let window = [21.0, 21.0, 21.0, 21.0, 26.0, 27.5];
        let preds = [28.0; 30];
        let fired = evaluate(&policy, &ctx(&m, &window, 6, &preds, true));
        assert_eq!(fired[0], "temperature_limit");
        assert_eq!(
            fired,
            vec![
                "temperature_limit",
                "temperature_trend",
                "power_spike",
                "humidity_out_of_range",
                "forecast_risk_high",
                "anomaly",
            ]
        );
    }

    #[test]
    fn trend_requires_six_real_samples() {
        let policy = Policy::default();
        let m = metrics(Some(24.0), None, None);
        // Dense window shows a rise, but only 3 samples are real.
        let window = [23.0, 23.0, 23.0, 23.0, 23.9, 24.0];
        let preds = [24.0; 30];
        assert!(evaluate(&policy, &ctx(&m, &window, 3, &preds, false)).is_empty());
        let fired = evaluate(&policy, &ctx(&m, &window, 6, &preds, false));
        assert_eq!(fired, vec!["temperature_trend"]);
    }

    #[test]
    fn power_spike_uses_policy_threshold() {
        let policy = Policy::default();
        let m = metrics(Some(22.0), None, Some(5.5));
        let window = [22.0; 10];
        let preds = [22.0; 30];
        assert_eq!(
            evaluate(&policy, &ctx(&m, &window, 10, &preds, false)),
            vec!["power_spike"]
        );
    }

    #[test]
    fn humidity_band_is_inclusive() {
        let policy = Policy::default();
        let window = [22.0; 10];
        let preds = [22.0; 30];
        let edge = metrics(Some(22.0), Some(20.0), None);
        assert!(evaluate(&policy, &ctx(&edge, &window, 10, &preds, false)).is_empty());
        let low = metrics(Some(22.0), Some(19.9), None);
        assert_eq!(
            evaluate(&policy, &ctx(&low, &window, 10, &preds, false)),
            vec!["humidity_out_of_range"]
        );
    }

    #[test]
    fn forecast_risk_uses_lookahead_step() {
        let policy = Policy::default();
        let m = metrics(Some(25.0), None, None);
        let window = [25.0; 10];
        // Step 5 crosses the limit even though step 0 does not.
        let preds = [25.0, 25.5, 26.0, 26.5, 26.9, 27.2];
        assert_eq!(
            evaluate(&policy, &ctx(&m, &window, 10, &preds, false)),
            vec!["forecast_risk_high"]
        );
    }

    #[test]
    fn missing_metrics_never_fire() {
        let policy = Policy::default();
        let m = metrics(None, None, None);
        let window = [0.0; 10];
        let preds: [f64; 0] = [];
        assert!(evaluate(&policy, &ctx(&m, &window, 0, &preds, false)).is_empty());
    }
}
