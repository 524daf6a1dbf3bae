//! The action ledger and its sibling tables
//!
//! The ledger is append-only except for action `status`, which only moves
//! along the lifecycle DAG; transitions are read-modify-write and
//! serialize through a process-wide mutex. Receipts are deduplicated by
//! `(device_id, ts)` via a secondary key tree so at-least-once bus
//! delivery cannot double-record an acknowledgement.

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

use crate::types::{
    ActionRecord, ActionStatus, AnomalyRecord, AuditRecord, ForecastRecord, Receipt,
    ReceiptRecord, Setpoints, TelemetryPoint, TelemetryRecord,
};

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("ledger i/o: {0}")]
    Db(#[from] sled::Error),
    #[error("ledger row encoding: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("action {0} not found")]
    ActionNotFound(u64),
    #[error("illegal action transition {from} -> {to}")]
    InvalidTransition {
        from: ActionStatus,
        to: ActionStatus,
    },
}

/// Handle to the embedded store. Cheap to clone; all writers serialize
/// through the shared mutex.
#[derive(Clone)]
pub struct Ledger {
    telemetry: sled::Tree,
    forecasts: sled::Tree,
    anomalies: sled::Tree,
    actions: sled::Tree,
    receipts: sled::Tree,
    receipt_keys: sled::Tree,
    audits: sled::Tree,
    write_lock: Arc<Mutex<()>>,
    _db: Arc<sled::Db>,
}

impl Ledger {
    /// Open or create the store at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, LedgerError> {
        let db = sled::open(path.as_ref())?;
        let ledger = Self {
            telemetry: db.open_tree("telemetry")?,
            forecasts: db.open_tree("forecasts")?,
            anomalies: db.open_tree("anomalies")?,
            actions: db.open_tree("actions")?,
            receipts: db.open_tree("receipts")?,
            receipt_keys: db.open_tree("receipt_keys")?,
            audits: db.open_tree("audits")?,
            write_lock: Arc::new(Mutex::new(())),
            _db: Arc::new(db),
        };
        tracing::info!(path = %path.as_ref().display(), "Ledger opened");
        Ok(ledger)
    }

    fn lock(&self) -> MutexGuard<'_, ()> {
        match self.write_lock.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Next autoincrement id for a tree (1-based). Caller holds the lock.
    fn next_id(tree: &sled::Tree) -> Result<u64, LedgerError> {
        let last = tree
            .last()?
            .map(|(key, _)| decode_id(&key))
            .unwrap_or(0);
        Ok(last + 1)
    }

    fn append<T: Serialize>(&self, tree: &sled::Tree, make: impl FnOnce(u64) -> T) -> Result<u64, LedgerError> {
        let _guard = self.lock();
        let id = Self::next_id(tree)?;
        let row = make(id);
        tree.insert(id.to_be_bytes(), serde_json::to_vec(&row)?)?;
        Ok(id)
    }

    fn read_newest<T: DeserializeOwned>(tree: &sled::Tree, limit: usize) -> Vec<T> {
        let mut rows = Vec::with_capacity(limit);
        for item in tree.iter().rev() {
            if rows.len() >= limit {
                break;
            }
            let Ok((_key, value)) = item else { continue };
            match serde_json::from_slice::<T>(&value) {
                Ok(row) => rows.push(row),
                Err(e) => tracing::warn!(error = %e, "Skipping undecodable ledger row"),
            }
        }
        rows
    }

    // ── telemetry ───────────────────────────────────────────────────────

    pub fn insert_telemetry(
        &self,
        point: &TelemetryPoint,
        raw_json: &str,
    ) -> Result<u64, LedgerError> {
        self.append(&self.telemetry, |id| TelemetryRecord {
            id,
            ts: point.ts,
            site: point.site.clone(),
            rack: point.rack.clone(),
            temp_c: point.metrics.temp_c,
            hum_pct: point.metrics.hum_pct,
            power_kw: point.metrics.power_kw,
            airflow_cfm: point.metrics.airflow_cfm,
            raw_json: raw_json.to_string(),
        })
    }

    /// Newest-first telemetry for one rack.
    pub fn telemetry_history(&self, rack: &str, limit: usize) -> Vec<TelemetryRecord> {
        let mut rows = Vec::with_capacity(limit);
        for item in self.telemetry.iter().rev() {
            if rows.len() >= limit {
                break;
            }
            let Ok((_key, value)) = item else { continue };
            if let Ok(row) = serde_json::from_slice::<TelemetryRecord>(&value) {
                if row.rack == rack {
                    rows.push(row);
                }
            }
        }
        rows
    }

    /// Newest telemetry row for one rack.
    pub fn latest_point(&self, rack: &str) -> Option<TelemetryRecord> {
        self.telemetry_history(rack, 1).into_iter().next()
    }

    // ── forecasts & anomalies ───────────────────────────────────────────

    pub fn insert_forecast(&self, row: ForecastRecord) -> Result<u64, LedgerError> {
        self.append(&self.forecasts, |id| ForecastRecord { id, ..row })
    }

    pub fn latest_forecasts(&self, limit: usize) -> Vec<ForecastRecord> {
        Self::read_newest(&self.forecasts, limit)
    }

    pub fn insert_anomaly(&self, row: AnomalyRecord) -> Result<u64, LedgerError> {
        self.append(&self.anomalies, |id| AnomalyRecord { id, ..row })
    }

    pub fn latest_anomalies(&self, limit: usize) -> Vec<AnomalyRecord> {
        Self::read_newest(&self.anomalies, limit)
    }

    // ── actions ─────────────────────────────────────────────────────────

    /// Insert a new action; `row.id` is replaced with the assigned handle.
    pub fn insert_action(&self, row: ActionRecord) -> Result<u64, LedgerError> {
        self.append(&self.actions, |id| ActionRecord { id, ..row })
    }

    pub fn get_action(&self, id: u64) -> Result<Option<ActionRecord>, LedgerError> {
        match self.actions.get(id.to_be_bytes())? {
            Some(value) => Ok(Some(serde_json::from_slice(&value)?)),
            None => Ok(None),
        }
    }

    pub fn latest_actions(&self, limit: usize) -> Vec<ActionRecord> {
        Self::read_newest(&self.actions, limit)
    }

    /// Move an action along the lifecycle DAG. Refuses any edge the DAG
    /// does not contain.
    pub fn transition_action(
        &self,
        id: u64,
        next: ActionStatus,
    ) -> Result<ActionRecord, LedgerError> {
        let _guard = self.lock();
        let Some(mut row) = self.get_action_unlocked(id)? else {
            return Err(LedgerError::ActionNotFound(id));
        };
        if !row.status.can_transition_to(next) {
            return Err(LedgerError::InvalidTransition {
                from: row.status,
                to: next,
            });
        }
        row.status = next;
        self.actions
            .insert(id.to_be_bytes(), serde_json::to_vec(&row)?)?;
        Ok(row)
    }

    fn get_action_unlocked(&self, id: u64) -> Result<Option<ActionRecord>, LedgerError> {
        match self.actions.get(id.to_be_bytes())? {
            Some(value) => Ok(Some(serde_json::from_slice(&value)?)),
            None => Ok(None),
        }
    }

    /// The sent action exactly matching a receipt's `(device_id, ts)`.
    pub fn sent_action_matching(
        &self,
        device_id: &str,
        ts: DateTime<Utc>,
    ) -> Option<ActionRecord> {
        for item in self.actions.iter().rev() {
            let Ok((_key, value)) = item else { continue };
            let Ok(row) = serde_json::from_slice::<ActionRecord>(&value) else {
                continue;
            };
            if row.device_id == device_id && row.ts == ts && row.status == ActionStatus::Sent {
                return Some(row);
            }
        }
        None
    }

    // ── receipts ────────────────────────────────────────────────────────

    /// Record a receipt, deduplicating by `(device_id, ts)`. Returns the
    /// row id, or `None` when this receipt was already recorded.
    pub fn record_receipt(&self, receipt: &Receipt) -> Result<Option<u64>, LedgerError> {
        let dedupe_key = format!("{}|{}", receipt.device_id, receipt.ts.to_rfc3339());
        let _guard = self.lock();
        if self.receipt_keys.contains_key(dedupe_key.as_bytes())? {
            return Ok(None);
        }
        let id = Self::next_id(&self.receipts)?;
        let applied_json = receipt
            .applied
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        let row = ReceiptRecord {
            id,
            ts: receipt.ts,
            device_id: receipt.device_id.clone(),
            status: receipt.status.clone(),
            applied_json,
            latency_ms: receipt.latency_ms,
            notes: receipt.notes.clone(),
        };
        self.receipts
            .insert(id.to_be_bytes(), serde_json::to_vec(&row)?)?;
        self.receipt_keys
            .insert(dedupe_key.as_bytes(), &id.to_be_bytes())?;
        Ok(Some(id))
    }

    /// Setpoints last reported applied by a device, for seeding the
    /// controller's notion of "current".
    pub fn last_applied_setpoints(&self, device_id: &str) -> Option<Setpoints> {
        for item in self.receipts.iter().rev() {
            let Ok((_key, value)) = item else { continue };
            let Ok(row) = serde_json::from_slice::<ReceiptRecord>(&value) else {
                continue;
            };
            if row.device_id != device_id {
                continue;
            }
            if let Some(applied) = row
                .applied_json
                .as_deref()
                .and_then(|raw| serde_json::from_str::<Setpoints>(raw).ok())
            {
                return Some(applied);
            }
        }
        None
    }

    // ── audit ───────────────────────────────────────────────────────────

    /// Append an audit entry for an operator- or system-initiated
    /// transition.
    pub fn record_audit(
        &self,
        actor: &str,
        action: &str,
        payload: serde_json::Value,
    ) -> Result<u64, LedgerError> {
        self.append(&self.audits, |id| AuditRecord {
            id,
            ts: Utc::now(),
            actor: actor.to_string(),
            action: action.to_string(),
            payload,
        })
    }

    pub fn latest_audits(&self, limit: usize) -> Vec<AuditRecord> {
        Self::read_newest(&self.audits, limit)
    }
}

fn decode_id(key: &[u8]) -> u64 {
    let mut bytes = [0u8; 8];
    let len = key.len().min(8);
    bytes[8 - len..].copy_from_slice(&key[..len]);
    u64::from_be_bytes(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ledger() -> (tempfile::TempDir, Ledger) {
        let dir = tempfile::tempdir().unwrap();
        let ledger = Ledger::open(dir.path().join("ledger")).unwrap();
        (dir, ledger)
    }

    fn action(ts: DateTime<Utc>, status: ActionStatus) -> ActionRecord {
        ActionRecord {
            id: 0,
            ts,
            device_id: "crah-07".to_string(),
            cmd_json: "{}".to_string(),
            mode: "propose".to_string(),
            status,
            reason: "temperature_limit".to_string(),
            model_version: "bootstrap".to_string(),
            safety_summary: "limits, rate limits applied".to_string(),
        }
    }

    #[test]
    fn ids_autoincrement_per_tree() {
        let (_dir, ledger) = ledger();
        let ts = Utc::now();
        assert_eq!(ledger.insert_action(action(ts, ActionStatus::Queued)).unwrap(), 1);
        assert_eq!(ledger.insert_action(action(ts, ActionStatus::Queued)).unwrap(), 2);
        let row = AnomalyRecord {
            id: 0,
            ts,
            rack: "r01".to_string(),
            score: 0.5,
            threshold: 0.97,
            is_alarm: false,
        };
        assert_eq!(ledger.insert_anomaly(row).unwrap(), 1);
    }

    #[test]
    fn latest_actions_are_newest_first() {
        let (_dir, ledger) = ledger();
        for _ in 0..5 {
            ledger.insert_action(action(Utc::now(), ActionStatus::Queued)).unwrap();
        }
        let rows = ledger.latest_actions(3);
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].id, 5);
        assert_eq!(rows[2].id, 3);
    }

    #[test]
    fn transitions_follow_the_dag() {
        let (_dir, ledger) = ledger();
        let id = ledger
            .insert_action(action(Utc::now(), ActionStatus::PendingManual))
            .unwrap();
        let row = ledger.transition_action(id, ActionStatus::Sent).unwrap();
        assert_eq!(row.status, ActionStatus::Sent);
        let row = ledger.transition_action(id, ActionStatus::Applied).unwrap();
        assert_eq!(row.status, ActionStatus::Applied);

        assert!(matches!(
            ledger.transition_action(id, ActionStatus::Sent),
            Err(LedgerError::InvalidTransition { .. })
        ));
        assert!(matches!(
            ledger.transition_action(999, ActionStatus::Sent),
            Err(LedgerError::ActionNotFound(999))
        ));
    }

    #[test]
    fn receipts_dedupe_on_device_and_ts() {
        let (_dir, ledger) = ledger();
        let ts = Utc.with_ymd_and_hms(2026, 1, 5, 12, 0, 0).unwrap();
        let receipt = Receipt {
            ts,
            device_id: "crah-07".to_string(),
            status: "ok".to_string(),
            applied: Some(Setpoints {
                supply_temp_c: 17.7,
                fan_rpm: 1350,
            }),
            latency_ms: Some(40),
            notes: None,
        };
        assert!(ledger.record_receipt(&receipt).unwrap().is_some());
        assert!(ledger.record_receipt(&receipt).unwrap().is_none());
        assert_eq!(
            ledger.last_applied_setpoints("crah-07"),
            Some(Setpoints {
                supply_temp_c: 17.7,
                fan_rpm: 1350,
            })
        );
        assert_eq!(ledger.last_applied_setpoints("other"), None);
    }

    #[test]
    fn receipt_matches_sent_action_exactly() {
        let (_dir, ledger) = ledger();
        let ts = Utc.with_ymd_and_hms(2026, 1, 5, 12, 0, 0).unwrap();
        let id = ledger.insert_action(action(ts, ActionStatus::Queued)).unwrap();
        assert!(ledger.sent_action_matching("crah-07", ts).is_none());
        ledger.transition_action(id, ActionStatus::Sent).unwrap();
        let found = ledger.sent_action_matching("crah-07", ts).unwrap();
        assert_eq!(found.id, id);
        assert!(ledger
            .sent_action_matching("crah-07", ts + chrono::Duration::seconds(1))
            .is_none());
    }

    #[test]
    fn telemetry_history_filters_by_rack() {
        let (_dir, ledger) = ledger();
        for (rack, temp) in [("r01", 21.0), ("r02", 24.0), ("r01", 22.0)] {
            let point = TelemetryPoint {
                ts: Utc::now(),
                site: "dc-west".to_string(),
                rack: rack.to_string(),
                device_id: None,
                metrics: crate::types::MetricReadings {
                    temp_c: Some(temp),
                    ..Default::default()
                },
            };
            ledger.insert_telemetry(&point, "{}").unwrap();
        }
        let rows = ledger.telemetry_history("r01", 10);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].temp_c, Some(22.0));
        assert_eq!(ledger.latest_point("r02").unwrap().temp_c, Some(24.0));
    }

    #[test]
    fn audit_log_appends() {
        let (_dir, ledger) = ledger();
        ledger
            .record_audit("operator", "discover_start", serde_json::json!({"subnet": "10.0.0.0/24"}))
            .unwrap();
        let rows = ledger.latest_audits(10);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].action, "discover_start");
    }
}
