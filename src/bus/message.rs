//! Inbound message parsing
//!
//! Dynamic bus payloads become a small set of tagged variants here, at
//! the boundary. Unknown topics parse to `None`; malformed payloads on
//! known topics are errors the dispatcher logs and drops; they never
//! reach the engine.

use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::types::{DiscoveredDevice, Receipt, TelemetryPoint};

/// Raw sightings reported mid-scan by the edge bridge.
#[derive(Debug, Clone, Deserialize)]
pub struct DiscoverRawBatch {
    pub ts: DateTime<Utc>,
    #[serde(default)]
    pub subnet: Option<String>,
    #[serde(default)]
    pub duration_s: Option<f64>,
    #[serde(default)]
    pub raw: Vec<serde_json::Value>,
}

/// Final identified-device list closing a scan.
#[derive(Debug, Clone, Deserialize)]
pub struct DiscoverResultsBatch {
    pub ts: DateTime<Utc>,
    #[serde(default)]
    pub subnet: Option<String>,
    #[serde(default)]
    pub duration_s: Option<f64>,
    #[serde(default)]
    pub devices: Vec<DiscoveredDevice>,
}

/// A parsed bus message, dispatched into the engine one at a time.
#[derive(Debug, Clone)]
pub enum BusMessage {
    /// `site/<site>/rack/<rack>/telemetry`; raw JSON kept for the ledger
    Telemetry {
        point: TelemetryPoint,
        raw_json: String,
    },
    /// `ctrl/<device_id>/receipt`
    Receipt(Receipt),
    /// `discover/raw`
    DiscoverRaw(DiscoverRawBatch),
    /// `discover/results`
    DiscoverResults(DiscoverResultsBatch),
    /// `discover/approved` / `discover/removed`: registry re-pull signal
    RegistryChanged { topic: String },
}

impl BusMessage {
    /// Parse a (topic, payload) pair. `Ok(None)` means the topic is not
    /// one the engine consumes.
    pub fn parse(topic: &str, payload: &[u8]) -> Result<Option<Self>, serde_json::Error> {
        if topic.starts_with("site/") && topic.ends_with("/telemetry") {
            let point: TelemetryPoint = serde_json::from_slice(payload)?;
            let raw_json = String::from_utf8_lossy(payload).into_owned();
            return Ok(Some(Self::Telemetry { point, raw_json }));
        }
        if topic.starts_with("ctrl/") && topic.ends_with("/receipt") {
            return Ok(Some(Self::Receipt(serde_json::from_slice(payload)?)));
        }
        match topic {
            "discover/raw" => Ok(Some(Self::DiscoverRaw(serde_json::from_slice(payload)?))),
            "discover/results" => Ok(Some(Self::DiscoverResults(serde_json::from_slice(
                payload,
            )?))),
            "discover/approved" | "discover/removed" => Ok(Some(Self::RegistryChanged {
                topic: topic.to_string(),
            })),
            _ => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn telemetry_topic_parses() {
        let payload = br#"{"ts":"2026-01-05T12:00:00Z","site":"dc-west","rack":"r07","metrics":{"temp_c":24.5}}"#;
        let msg = BusMessage::parse("site/dc-west/rack/r07/telemetry", payload)
            .unwrap()
            .unwrap();
        match msg {
            BusMessage::Telemetry { point, raw_json } => {
                assert_eq!(point.rack, "r07");
                assert!(raw_json.contains("24.5"));
            }
            other => panic!("wrong variant: {other:?}"),
        }
    }

    #[test]
    fn receipt_topic_parses() {
        let payload = br#"{"ts":"2026-01-05T12:00:01Z","device_id":"crah-07","status":"ok","applied":{"supply_temp_c":17.7,"fan_rpm":1350},"latency_ms":41}"#;
        let msg = BusMessage::parse("ctrl/crah-07/receipt", payload)
            .unwrap()
            .unwrap();
        match msg {
            BusMessage::Receipt(receipt) => {
                assert_eq!(receipt.device_id, "crah-07");
                assert_eq!(receipt.latency_ms, Some(41));
            }
            other => panic!("wrong variant: {other:?}"),
        }
    }

    #[test]
    fn discover_results_parse() {
        let payload =
            br#"{"ts":"2026-01-05T12:00:00Z","subnet":"10.0.0.0/24","duration_s":4.2,"devices":[{"ip":"10.0.0.5","proto":"modbus"}]}"#;
        let msg = BusMessage::parse("discover/results", payload).unwrap().unwrap();
        match msg {
            BusMessage::DiscoverResults(batch) => {
                assert_eq!(batch.devices.len(), 1);
                assert_eq!(batch.duration_s, Some(4.2));
            }
            other => panic!("wrong variant: {other:?}"),
        }
    }

    #[test]
    fn unknown_topic_is_none() {
        assert!(BusMessage::parse("device/x/status", b"{}").unwrap().is_none());
        assert!(BusMessage::parse("ctrl/proposals", b"{}").unwrap().is_none());
    }

    #[test]
    fn malformed_payload_on_known_topic_is_error() {
        assert!(BusMessage::parse("site/a/rack/b/telemetry", b"not json").is_err());
        assert!(BusMessage::parse("discover/results", b"[1,2]").is_err());
    }
}
