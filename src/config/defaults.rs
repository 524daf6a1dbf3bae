//! Engine constants with no per-site override.

use crate::types::Setpoints;

/// Rolling-window length per (rack, metric).
pub const WINDOW_SIZE: usize = 120;

/// Forecast horizon in steps.
pub const FORECAST_HORIZON: usize = 30;

/// Seconds covered by the persisted first-step forecast.
pub const FORECAST_HORIZON_S: i64 = 60;

/// Anomaly alarm threshold on the [0, 1] risk score.
pub const ANOMALY_THRESHOLD: f64 = 0.97;

/// Controller target inlet temperature (°C).
pub const TARGET_TEMP_C: f64 = 23.0;

/// Forecast step the controller and the risk trigger look at.
pub const LOOKAHEAD_STEPS: usize = 5;

/// Symmetric forecast confidence width (°C).
pub const CONFIDENCE_WIDTH_C: f64 = 0.8;

/// Samples the temperature-trend trigger spans.
pub const TREND_SAMPLES: usize = 6;

/// Rise across [`TREND_SAMPLES`] that fires the trend trigger (°C).
pub const TREND_DELTA_C: f64 = 0.8;

/// Discovery history ring size (keep tail).
pub const DISCOVERY_HISTORY_CAP: usize = 50;

/// Model identifier stamped on actions while the statistical proxies are
/// in service.
pub const MODEL_VERSION: &str = "bootstrap";

/// Modes accepted at `POST /mode`. Any member with an `auto` prefix
/// publishes directly when the auto flag is set.
pub const ALLOWED_MODES: &[&str] = &["propose", "auto_low", "auto_full"];

/// Actuator state assumed when no applied receipt exists for a device.
pub const DEFAULT_CURRENT: Setpoints = Setpoints {
    supply_temp_c: 18.0,
    fan_rpm: 1200,
};

/// Whether a mode string is an auto-publish mode.
pub fn is_auto_mode(mode: &str) -> bool {
    mode.starts_with("auto")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auto_prefix_detection() {
        assert!(is_auto_mode("auto_low"));
        assert!(is_auto_mode("auto_full"));
        assert!(!is_auto_mode("propose"));
    }
}
