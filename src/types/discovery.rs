//! Discovery state machine types
//!
//! One `DiscoveryState` instance exists per engine. Scans are driven by the
//! edge bridge: the engine publishes `ctrl/discover/start` and waits for
//! `discover/raw` sightings and a final `discover/results` list, with a
//! polled deadline promoting stuck scans to `error`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// FSM status: `idle → running → done | error`, re-armable from
/// `done`/`error` by a new scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscoveryStatus {
    Idle,
    Running,
    Done,
    Error,
}

/// A device sighted by a discovery scan. Field devices are heterogeneous,
/// so everything beyond the address/protocol pair is carried loosely.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveredDevice {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proto: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// A registry entry in `devices.yaml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceEntry {
    #[serde(default)]
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rack: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub site: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proto: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    /// Register-map name for the protocol shim
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub map: Option<String>,
}

impl DeviceEntry {
    /// Fill in a missing `id` from the protocol/host pair, mirroring how
    /// the edge bridge names unidentified devices.
    pub fn ensure_id(&mut self) {
        if self.id.is_empty() {
            let proto = self.proto.as_deref().unwrap_or("dev");
            let host = self.host.as_deref().unwrap_or("device");
            self.id = format!("{proto}_{host}");
        }
    }

    /// Two entries address the same endpoint when host, proto, and port
    /// all match.
    pub fn same_endpoint(&self, other: &Self) -> bool {
        self.host == other.host && self.proto == other.proto && self.port == other.port
    }
}

/// One history item: how many raw sightings a scan pass produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryHistoryEntry {
    pub ts: DateTime<Utc>,
    pub raw_count: usize,
}

/// The discovery FSM state, serialized as-is on `/discover` and `/status`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryState {
    pub status: DiscoveryStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subnet: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actor: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    /// Non-null iff `status == Running`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deadline: Option<DateTime<Utc>>,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Default for DiscoveryState {
    fn default() -> Self {
        Self {
            status: DiscoveryStatus::Idle,
            subnet: None,
            actor: None,
            started_at: None,
            completed_at: None,
            deadline: None,
            message: "Idle".to_string(),
            error: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ensure_id_builds_from_proto_and_host() {
        let mut entry = DeviceEntry {
            id: String::new(),
            rack: None,
            site: None,
            proto: Some("modbus".to_string()),
            host: Some("10.0.0.5".to_string()),
            port: Some(502),
            map: None,
        };
        entry.ensure_id();
        assert_eq!(entry.id, "modbus_10.0.0.5");
    }

    #[test]
    fn ensure_id_keeps_existing() {
        let mut entry = DeviceEntry {
            id: "crah-07".to_string(),
            rack: None,
            site: None,
            proto: Some("snmp".to_string()),
            host: Some("10.0.0.9".to_string()),
            port: None,
            map: None,
        };
        entry.ensure_id();
        assert_eq!(entry.id, "crah-07");
    }

    #[test]
    fn default_state_is_idle_without_deadline() {
        let state = DiscoveryState::default();
        assert_eq!(state.status, DiscoveryStatus::Idle);
        assert!(state.deadline.is_none());
        assert_eq!(state.message, "Idle");
    }
}
