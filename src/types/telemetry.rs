//! Telemetry point types
//!
//! A `TelemetryPoint` is one periodic sample from a field device, delivered
//! over the bus on `site/<site>/rack/<rack>/telemetry`. Points are never
//! mutated after ingest; the raw JSON is kept alongside the parsed columns
//! for forensics.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Metric readings carried by a telemetry point.
///
/// Any metric may be null (sensor dropout). Unknown metrics are preserved
/// in `extra` rather than dropped.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetricReadings {
    /// Rack inlet temperature (°C)
    #[serde(default)]
    pub temp_c: Option<f64>,
    /// Relative humidity (%)
    #[serde(default)]
    pub hum_pct: Option<f64>,
    /// Rack power draw (kW)
    #[serde(default)]
    pub power_kw: Option<f64>,
    /// Airflow (CFM)
    #[serde(default)]
    pub airflow_cfm: Option<f64>,
    /// Additional metrics from heterogeneous devices, preserved verbatim
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

fn unknown_rack() -> String {
    "unknown".to_string()
}

/// One telemetry sample as delivered by the bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryPoint {
    /// Sample timestamp (RFC-3339 UTC)
    pub ts: DateTime<Utc>,
    /// Site identifier
    #[serde(default)]
    pub site: String,
    /// Telemetry-group identifier within the site
    #[serde(default = "unknown_rack")]
    pub rack: String,
    /// Originating field device, when the poller knows it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
    /// Metric readings (nullable per metric)
    #[serde(default)]
    pub metrics: MetricReadings,
}

/// Persisted telemetry row: parsed columns plus the raw JSON.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryRecord {
    pub id: u64,
    pub ts: DateTime<Utc>,
    pub site: String,
    pub rack: String,
    pub temp_c: Option<f64>,
    pub hum_pct: Option<f64>,
    pub power_kw: Option<f64>,
    pub airflow_cfm: Option<f64>,
    pub raw_json: String,
}

/// Latest-known snapshot for one rack, served on `/tiles` and the WS feed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RackTile {
    pub ts: DateTime<Utc>,
    pub metrics: MetricReadings,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_point_with_null_metrics() {
        let json = r#"{
            "ts": "2026-01-05T12:00:00Z",
            "site": "dc-west",
            "rack": "r07",
            "metrics": {"temp_c": null, "hum_pct": 41.5, "power_kw": 4.2}
        }"#;
        let point: TelemetryPoint = serde_json::from_str(json).unwrap();
        assert_eq!(point.rack, "r07");
        assert!(point.metrics.temp_c.is_none());
        assert_eq!(point.metrics.hum_pct, Some(41.5));
        assert!(point.device_id.is_none());
    }

    #[test]
    fn preserves_unknown_metric_fields() {
        let json = r#"{
            "ts": "2026-01-05T12:00:00Z",
            "site": "dc-west",
            "rack": "r07",
            "metrics": {"temp_c": 24.0, "valve_pos_pct": 62.0}
        }"#;
        let point: TelemetryPoint = serde_json::from_str(json).unwrap();
        assert_eq!(
            point.metrics.extra.get("valve_pos_pct"),
            Some(&serde_json::json!(62.0))
        );
    }

    #[test]
    fn missing_rack_defaults_to_unknown() {
        let json = r#"{"ts": "2026-01-05T12:00:00Z", "site": "dc-west"}"#;
        let point: TelemetryPoint = serde_json::from_str(json).unwrap();
        assert_eq!(point.rack, "unknown");
    }
}
