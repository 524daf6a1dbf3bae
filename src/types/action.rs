//! Action ledger types
//!
//! An `Action` is a bounded setpoint command proposed by the decision
//! engine. Its lifecycle is a DAG:
//!
//! ```text
//! queued ──────────────▶ sent ──▶ applied
//!   │                     ▲  └──▶ rejected
//!   └──▶ pending_manual ──┘
//! ```
//!
//! Any other edge is refused by the ledger. The ledger row is append-only
//! except for `status` and `cmd_json`, which only move forward along the
//! DAG.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::Limits;

/// Commanded actuator values.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Setpoints {
    /// Supply air temperature (°C), one decimal
    pub supply_temp_c: f64,
    /// Fan speed (RPM), integral
    pub fan_rpm: i64,
}

/// Lifecycle state of an action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionStatus {
    Queued,
    PendingManual,
    Sent,
    Applied,
    Rejected,
}

impl ActionStatus {
    /// Whether `self → next` is an edge of the lifecycle DAG.
    pub fn can_transition_to(self, next: Self) -> bool {
        use ActionStatus::{Applied, PendingManual, Queued, Rejected, Sent};
        matches!(
            (self, next),
            (Queued, Sent)
                | (Queued, PendingManual)
                | (PendingManual, Sent)
                | (Sent, Applied)
                | (Sent, Rejected)
        )
    }

    /// Stable wire name, matching the serde representation.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::PendingManual => "pending_manual",
            Self::Sent => "sent",
            Self::Applied => "applied",
            Self::Rejected => "rejected",
        }
    }
}

impl std::fmt::Display for ActionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Operator-facing explanation attached to every action.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionExplain {
    pub rack: String,
    /// First forecast step (°C)
    pub forecast_temp: f64,
    /// Anomaly risk score in [0, 1]
    pub risk_score: f64,
    /// All triggers that fired, in priority order
    pub triggers: Vec<String>,
    pub message: String,
}

/// The publishable command payload, stored verbatim in `cmd_json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionPayload {
    pub ts: DateTime<Utc>,
    pub device_id: String,
    /// Always `"setpoints"` for this command family
    pub cmd: String,
    pub set: Setpoints,
    pub mode: String,
    pub reason: String,
    pub model_version: String,
    /// Policy limits in force when the action was built
    pub constraints: Limits,
    pub safety_summary: String,
    pub explain: ActionExplain,
}

/// Ledger row for an action. `id` is assigned on insert and is the stable
/// handle for approval and receipt correlation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionRecord {
    pub id: u64,
    pub ts: DateTime<Utc>,
    pub device_id: String,
    /// Full `ActionPayload` as JSON
    pub cmd_json: String,
    pub mode: String,
    pub status: ActionStatus,
    pub reason: String,
    pub model_version: String,
    pub safety_summary: String,
}

/// Field-side acknowledgement as delivered on `ctrl/<device_id>/receipt`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Receipt {
    pub ts: DateTime<Utc>,
    pub device_id: String,
    #[serde(default)]
    pub status: String,
    /// Setpoints the device actually applied, when reported
    #[serde(default)]
    pub applied: Option<Setpoints>,
    #[serde(default)]
    pub latency_ms: Option<i64>,
    #[serde(default)]
    pub notes: Option<String>,
}

/// Persisted receipt row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReceiptRecord {
    pub id: u64,
    pub ts: DateTime<Utc>,
    pub device_id: String,
    pub status: String,
    pub applied_json: Option<String>,
    pub latency_ms: Option<i64>,
    pub notes: Option<String>,
}

/// Forecast row, written once per telemetry event per rack.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForecastRecord {
    pub id: u64,
    pub ts: DateTime<Utc>,
    pub horizon_s: i64,
    pub rack: String,
    pub temp_pred: Option<f64>,
    pub temp_lo: Option<f64>,
    pub temp_hi: Option<f64>,
    pub power_pred: Option<f64>,
}

/// Anomaly row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnomalyRecord {
    pub id: u64,
    pub ts: DateTime<Utc>,
    pub rack: String,
    pub score: f64,
    pub threshold: f64,
    pub is_alarm: bool,
}

/// Append-only audit row recording operator- and system-initiated
/// transitions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    pub id: u64,
    pub ts: DateTime<Utc>,
    pub actor: String,
    pub action: String,
    pub payload: serde_json::Value,
}

#[cfg(test)]
mod tests {
    use super::*;
    use ActionStatus::{Applied, PendingManual, Queued, Rejected, Sent};

    #[test]
    fn dag_allows_only_specified_edges() {
        let all = [Queued, PendingManual, Sent, Applied, Rejected];
        let allowed = [
            (Queued, Sent),
            (Queued, PendingManual),
            (PendingManual, Sent),
            (Sent, Applied),
            (Sent, Rejected),
        ];
        for from in all {
            for to in all {
                let expected = allowed.contains(&(from, to));
                assert_eq!(
                    from.can_transition_to(to),
                    expected,
                    "{from} -> {to}"
                );
            }
        }
    }

    #[test]
    fn status_serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&PendingManual).unwrap(),
            "\"pending_manual\""
        );
        let parsed: ActionStatus = serde_json::from_str("\"queued\"").unwrap();
        assert_eq!(parsed, Queued);
    }

    #[test]
    fn action_payload_round_trips() {
        let payload = ActionPayload {
            ts: Utc::now(),
            device_id: "crah-07".to_string(),
            cmd: "setpoints".to_string(),
            set: Setpoints {
                supply_temp_c: 17.7,
                fan_rpm: 1350,
            },
            mode: "propose".to_string(),
            reason: "temperature_limit".to_string(),
            model_version: "bootstrap".to_string(),
            constraints: Limits::default(),
            safety_summary: "limits, rate limits applied".to_string(),
            explain: ActionExplain {
                rack: "r07".to_string(),
                forecast_temp: 27.6,
                risk_score: 0.42,
                triggers: vec!["temperature_limit".to_string()],
                message: "rack r07 breached 27.0C".to_string(),
            },
        };
        let json = serde_json::to_string(&payload).unwrap();
        let back: ActionPayload = serde_json::from_str(&json).unwrap();
        let json2 = serde_json::to_string(&back).unwrap();
        assert_eq!(json, json2);
    }
}
