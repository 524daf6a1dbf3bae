//! Discovery FSM
//!
//! Scan orchestration against the edge bridge:
//!
//! ```text
//! idle ──start_discovery──▶ running ──results──▶ done
//!                             │
//!                             └──deadline passed──▶ error
//! done|error ──start_discovery──▶ running (results reset)
//! ```
//!
//! The timeout is polled, not interrupted: `list_discoveries` promotes an
//! overdue `running` scan to `error` before returning, so a stuck bridge
//! surfaces on the next operator read.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};

use crate::bus::{
    DiscoverRawBatch, DiscoverResultsBatch, TOPIC_DISCOVER_APPROVED, TOPIC_DISCOVER_REMOVED,
    TOPIC_DISCOVER_START,
};
use crate::config::defaults::DISCOVERY_HISTORY_CAP;
use crate::types::{DeviceEntry, DiscoveryHistoryEntry, DiscoveryState, DiscoveryStatus};

use super::DecisionEngine;

/// `GET /discover` response body.
#[derive(Debug, Clone, Serialize)]
pub struct DiscoverySnapshot {
    pub devices: Vec<crate::types::DiscoveredDevice>,
    pub state: DiscoveryState,
    pub history: Vec<DiscoveryHistoryEntry>,
}

impl DecisionEngine {
    /// Kick off a scan: publish the request, arm the deadline, reset the
    /// result set, and audit the transition.
    pub async fn start_discovery(&mut self, subnet: &str, actor: &str) {
        let now = Utc::now();
        let payload = serde_json::json!({"ts": now, "subnet": subnet, "actor": actor});
        if let Err(e) = self.bus.publish(TOPIC_DISCOVER_START, &payload).await {
            // The deadline still arms; a silent bridge reads as a timeout.
            warn!(subnet, error = %e, "Discovery start publish failed");
        }

        self.discovery_results.clear();
        self.discovery = DiscoveryState {
            status: DiscoveryStatus::Running,
            subnet: Some(subnet.to_string()),
            actor: Some(actor.to_string()),
            started_at: Some(now),
            completed_at: None,
            deadline: Some(now + chrono::Duration::seconds(self.discovery_timeout_s as i64)),
            message: format!("Scanning {subnet}"),
            error: None,
        };
        self.metrics.inc_discover_scans();
        if let Err(e) = self.ledger.record_audit(actor, "discover_start", payload) {
            warn!(error = %e, "Audit append failed");
        }
        info!(subnet, actor, timeout_s = self.discovery_timeout_s, "Discovery started");
    }

    /// Read the discovery view. Doubles as the FSM tick: an overdue
    /// running scan is promoted to `error` first.
    pub fn list_discoveries(&mut self) -> DiscoverySnapshot {
        self.tick_discovery(Utc::now());
        DiscoverySnapshot {
            devices: self.discovery_results.clone(),
            state: self.discovery.clone(),
            history: self.discovery_history.iter().cloned().collect(),
        }
    }

    /// Promote `running` past its deadline to `error`.
    pub fn tick_discovery(&mut self, now: DateTime<Utc>) {
        if self.discovery.status != DiscoveryStatus::Running {
            return;
        }
        let Some(deadline) = self.discovery.deadline else {
            return;
        };
        if now > deadline {
            warn!(
                subnet = self.discovery.subnet.as_deref().unwrap_or(""),
                timeout_s = self.discovery_timeout_s,
                "Discovery timed out"
            );
            self.discovery.status = DiscoveryStatus::Error;
            self.discovery.message = "Edge bridge did not respond".to_string();
            self.discovery.error = Some(format!("timeout>{}s", self.discovery_timeout_s));
            self.discovery.deadline = None;
        }
    }

    /// Mid-scan raw sightings: history bookkeeping plus a live message.
    pub(crate) fn handle_discover_raw(&mut self, batch: DiscoverRawBatch) {
        let count = batch.raw.len();
        self.push_history(batch.ts, count);
        if self.discovery.status == DiscoveryStatus::Running {
            self.discovery.message = format!("{count} raw endpoint(s) seen");
        }
    }

    /// Final results close the scan.
    pub(crate) fn handle_discover_results(&mut self, batch: DiscoverResultsBatch) {
        let count = batch.devices.len();
        self.discovery_results = batch.devices;
        self.discovery.status = DiscoveryStatus::Done;
        self.discovery.message = if count > 0 {
            format!("Found {count} device(s)")
        } else {
            "No devices discovered".to_string()
        };
        self.discovery.completed_at = Some(Utc::now());
        self.discovery.deadline = None;
        self.discovery.error = None;

        if let Some(duration) = batch.duration_s {
            self.metrics.discover_duration_seconds.observe(duration);
        }
        self.metrics.add_devices_found(count as u64);
        self.push_history(batch.ts, count);
        info!(count, "Discovery completed");
    }

    fn push_history(&mut self, ts: DateTime<Utc>, raw_count: usize) {
        if self.discovery_history.len() == DISCOVERY_HISTORY_CAP {
            self.discovery_history.pop_front();
        }
        self.discovery_history
            .push_back(DiscoveryHistoryEntry { ts, raw_count });
    }

    /// Approve a device into the registry: dedup append, snapshot bump,
    /// audit, then notify the bus. Returns `"added"` or `"updated"`.
    pub async fn approve_device(&mut self, entry: DeviceEntry) -> anyhow::Result<&'static str> {
        let mut entry = entry;
        entry.ensure_id();
        let action = self.registry.append(entry.clone())?;
        self.metrics.inc_devices_approved();
        if let Err(e) = self.ledger.record_audit(
            "operator",
            "discover_approve",
            serde_json::to_value(&entry)?,
        ) {
            warn!(error = %e, "Audit append failed");
        }

        let payload = serde_json::json!({
            "ts": Utc::now(),
            "device": entry,
            "action": action,
        });
        if let Err(e) = self.bus.publish(TOPIC_DISCOVER_APPROVED, &payload).await {
            warn!(device_id = %entry.id, error = %e, "Approved notification publish failed");
        }
        info!(device_id = %entry.id, action, "Device approved");
        Ok(action)
    }

    /// Remove a registry entry by id. False when the id is unknown.
    pub async fn remove_device_entry(&mut self, id: &str) -> anyhow::Result<bool> {
        if !self.registry.remove(id)? {
            return Ok(false);
        }
        if let Err(e) = self.ledger.record_audit(
            "operator",
            "device_remove",
            serde_json::json!({"device_id": id}),
        ) {
            warn!(error = %e, "Audit append failed");
        }
        let payload = serde_json::json!({"ts": Utc::now(), "device_id": id});
        if let Err(e) = self.bus.publish(TOPIC_DISCOVER_REMOVED, &payload).await {
            warn!(device_id = id, error = %e, "Removed notification publish failed");
        }
        info!(device_id = id, "Device removed");
        Ok(true)
    }
}
