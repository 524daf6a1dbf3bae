//! Decision engine
//!
//! The engine is the single consumer of the bus dispatch loop. Each
//! inbound message mutates engine state under the dispatcher's write
//! lock: telemetry fans into persistence, window updates, the
//! forecast/anomaly/control pipeline, and gated action emission;
//! discovery messages advance the scan FSM; receipts close the loop on
//! sent commands. HTTP handlers share the same engine for reads, mode
//! changes, manual approval, and discovery control.

mod discovery;
mod triggers;

pub use discovery::DiscoverySnapshot;

use std::collections::HashMap;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::bus::{set_topic, Bus, BusMessage, TOPIC_PROPOSALS};
use crate::config::defaults::{
    is_auto_mode, ALLOWED_MODES, ANOMALY_THRESHOLD, DEFAULT_CURRENT, FORECAST_HORIZON,
    FORECAST_HORIZON_S, MODEL_VERSION, WINDOW_SIZE,
};
use crate::config::{DeviceRegistry, Policy, Settings};
use crate::control::{MpcController, Safety};
use crate::features::FeatureStore;
use crate::metrics::Metrics;
use crate::models::{AnomalyScorer, Forecaster};
use crate::storage::Ledger;
use crate::types::{
    ActionExplain, ActionPayload, ActionRecord, ActionStatus, AnomalyRecord, DiscoveredDevice,
    DiscoveryHistoryEntry, DiscoveryState, ForecastRecord, RackTile, Receipt, TelemetryPoint,
};

/// Tunables fixed at engine construction.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub policy: Policy,
    pub mode: String,
    pub auto_enabled: bool,
    pub discovery_timeout_s: u64,
    pub window_size: usize,
    pub forecast_horizon: usize,
    pub anomaly_threshold: f64,
}

impl EngineConfig {
    pub fn from_settings(settings: &Settings, policy: Policy) -> Self {
        let auto_enabled = is_auto_mode(&settings.mode);
        Self {
            policy,
            mode: settings.mode.clone(),
            auto_enabled,
            discovery_timeout_s: settings.discovery_timeout_s,
            window_size: WINDOW_SIZE,
            forecast_horizon: FORECAST_HORIZON,
            anomaly_threshold: ANOMALY_THRESHOLD,
        }
    }
}

/// Outcome of a manual approval request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApproveOutcome {
    /// Published and transitioned to `sent`
    Sent,
    /// Already past `pending`; approval is an idempotent no-op
    AlreadySent,
    /// Publish failed; the action stays where it was
    PublishFailed,
    NotFound,
}

/// `/status` response body.
#[derive(Debug, Clone, Serialize)]
pub struct EngineStatus {
    pub mode: String,
    pub auto_enabled: bool,
    pub site: String,
    pub ingest_count: u64,
    pub last_ingest_ts: Option<DateTime<Utc>>,
    pub tracked_racks: usize,
    pub uptime_s: i64,
    pub discovery: DiscoveryState,
}

pub struct DecisionEngine {
    ledger: Ledger,
    bus: Arc<dyn Bus>,
    registry: DeviceRegistry,
    metrics: Arc<Metrics>,
    policy: Policy,

    features: FeatureStore,
    forecaster: Forecaster,
    anomaly: AnomalyScorer,
    controller: MpcController,
    safety: Safety,

    mode: String,
    auto_enabled: bool,

    latest_tiles: HashMap<String, RackTile>,
    /// rack → device_id learned from telemetry points that carry one
    rack_devices: HashMap<String, String>,

    pub(crate) discovery: DiscoveryState,
    pub(crate) discovery_results: Vec<DiscoveredDevice>,
    pub(crate) discovery_history: VecDeque<DiscoveryHistoryEntry>,
    pub(crate) discovery_timeout_s: u64,

    ingest_count: u64,
    last_ingest_ts: Option<DateTime<Utc>>,
    started_at: DateTime<Utc>,
}

impl DecisionEngine {
    pub fn new(
        config: EngineConfig,
        ledger: Ledger,
        bus: Arc<dyn Bus>,
        registry: DeviceRegistry,
        metrics: Arc<Metrics>,
    ) -> Self {
        if let Err(e) = config.policy.limits.validate() {
            warn!(error = %e, "Policy limits are inconsistent; commands will be rejected");
        }
        let controller = MpcController::new(config.policy.limits, config.policy.weights);
        let safety = Safety::new(config.policy.limits);
        Self {
            ledger,
            bus,
            registry,
            metrics,
            features: FeatureStore::new(config.window_size),
            forecaster: Forecaster::new(config.forecast_horizon),
            anomaly: AnomalyScorer::new(config.anomaly_threshold),
            controller,
            safety,
            mode: config.mode,
            auto_enabled: config.auto_enabled,
            policy: config.policy,
            latest_tiles: HashMap::new(),
            rack_devices: HashMap::new(),
            discovery: DiscoveryState::default(),
            discovery_results: Vec::new(),
            discovery_history: VecDeque::new(),
            discovery_timeout_s: config.discovery_timeout_s,
            ingest_count: 0,
            last_ingest_ts: None,
            started_at: Utc::now(),
        }
    }

    // ── dispatch ────────────────────────────────────────────────────────

    /// Handle one parsed bus message. Called synchronously from the
    /// dispatcher; must never panic on hostile input.
    pub async fn handle_message(&mut self, msg: BusMessage) {
        match msg {
            BusMessage::Telemetry { point, raw_json } => {
                self.handle_telemetry(point, &raw_json).await;
            }
            BusMessage::Receipt(receipt) => self.handle_receipt(&receipt),
            BusMessage::DiscoverRaw(batch) => self.handle_discover_raw(batch),
            BusMessage::DiscoverResults(batch) => self.handle_discover_results(batch),
            BusMessage::RegistryChanged { topic } => {
                debug!(topic, "Registry change notification, re-pulling");
                self.registry.pull();
            }
        }
    }

    // ── telemetry ───────────────────────────────────────────────────────

    async fn handle_telemetry(&mut self, point: TelemetryPoint, raw_json: &str) {
        let started = Instant::now();
        let rack = point.rack.clone();

        if let Some(device_id) = &point.device_id {
            self.rack_devices.insert(rack.clone(), device_id.clone());
        }

        if let Err(e) = self
            .ledger
            .insert_telemetry(&point, raw_json)
            .or_else(|_| self.ledger.insert_telemetry(&point, raw_json))
        {
            warn!(%rack, error = %e, "Telemetry persist failed twice, continuing without row");
        }

        self.latest_tiles.insert(
            rack.clone(),
            RackTile {
                ts: point.ts,
                metrics: point.metrics.clone(),
            },
        );
        self.ingest_count += 1;
        self.last_ingest_ts = Some(point.ts);
        self.metrics.inc_telemetry_ingest();

        // Sensor dropout: no window update and no decision this cycle.
        let Some(temp) = point.metrics.temp_c else {
            debug!(%rack, "temp_c missing; tiles updated, decision skipped");
            return;
        };
        self.features.push(&rack, "temp_c", temp);

        let window = self.features.window(&rack, "temp_c");
        let samples = self.features.samples(&rack, "temp_c");
        let forecast = self.forecaster.predict(&window);
        let (score, alarm) = self.anomaly.score(&window);
        let now = Utc::now();

        if let Err(e) = self.ledger.insert_forecast(ForecastRecord {
            id: 0,
            ts: now,
            horizon_s: FORECAST_HORIZON_S,
            rack: rack.clone(),
            temp_pred: forecast.preds.first().copied(),
            temp_lo: forecast.lo.first().copied(),
            temp_hi: forecast.hi.first().copied(),
            power_pred: None,
        }) {
            warn!(%rack, error = %e, "Forecast persist failed");
        }
        if let Err(e) = self.ledger.insert_anomaly(AnomalyRecord {
            id: 0,
            ts: now,
            rack: rack.clone(),
            score,
            threshold: self.anomaly.threshold(),
            is_alarm: alarm,
        }) {
            warn!(%rack, error = %e, "Anomaly persist failed");
        }

        let fired = triggers::evaluate(
            &self.policy,
            &triggers::TriggerContext {
                metrics: &point.metrics,
                window: &window,
                window_samples: samples,
                preds: &forecast.preds,
                alarm,
            },
        );
        if !fired.is_empty() {
            self.emit_action(&rack, &forecast.preds, score, fired).await;
        }

        self.metrics
            .engine_decision_latency_seconds
            .observe(started.elapsed().as_secs_f64());
    }

    /// Steps 7–10: propose, enforce, persist, publish per gating.
    async fn emit_action(&mut self, rack: &str, preds: &[f64], score: f64, fired: Vec<&'static str>) {
        let device_id = self.device_id_for(rack);
        let current = self
            .ledger
            .last_applied_setpoints(&device_id)
            .unwrap_or(DEFAULT_CURRENT);

        let proposal = self.controller.propose(preds, &current);
        let safe = match self.safety.enforce(&current, &proposal) {
            Ok(safe) => safe,
            Err(e) => {
                // Never coerce outside absolute limits on a broken policy.
                error!(rack, %device_id, error = %e, "Safety rejected command: invalid policy");
                return;
            }
        };

        let reason = fired[0].to_string();
        let now = Utc::now();
        let message = format!(
            "rack {rack}: {reason} (forecast {:.1}C, risk {:.2})",
            preds.first().copied().unwrap_or(0.0),
            score
        );
        let payload = ActionPayload {
            ts: now,
            device_id: device_id.clone(),
            cmd: "setpoints".to_string(),
            set: safe.set,
            mode: self.mode.clone(),
            reason: reason.clone(),
            model_version: MODEL_VERSION.to_string(),
            constraints: self.policy.limits,
            safety_summary: safe.summary.clone(),
            explain: ActionExplain {
                rack: rack.to_string(),
                forecast_temp: preds.first().copied().unwrap_or(0.0),
                risk_score: score,
                triggers: fired.iter().map(ToString::to_string).collect(),
                message,
            },
        };

        let auto = self.auto_enabled && is_auto_mode(&self.mode);
        let status = if auto {
            ActionStatus::Queued
        } else {
            ActionStatus::PendingManual
        };

        let payload_json = match serde_json::to_string(&payload) {
            Ok(json) => json,
            Err(e) => {
                error!(rack, error = %e, "Action payload encoding failed");
                return;
            }
        };
        let record = ActionRecord {
            id: 0,
            ts: now,
            device_id: device_id.clone(),
            cmd_json: payload_json,
            mode: self.mode.clone(),
            status,
            reason: reason.clone(),
            model_version: MODEL_VERSION.to_string(),
            safety_summary: safe.summary,
        };

        // Fail closed: one retry, then drop (no untracked side effects).
        let id = match self
            .ledger
            .insert_action(record.clone())
            .or_else(|_| self.ledger.insert_action(record))
        {
            Ok(id) => id,
            Err(e) => {
                error!(rack, %device_id, error = %e, "Action persist failed twice, not publishing");
                return;
            }
        };
        self.metrics.inc_action(status);
        info!(rack, %device_id, id, %reason, status = %status, "Action recorded");

        let value = match serde_json::to_value(&payload) {
            Ok(value) => value,
            Err(e) => {
                error!(id, error = %e, "Action payload encoding failed");
                return;
            }
        };
        if auto {
            match self.bus.publish(&set_topic(&device_id), &value).await {
                Ok(()) => self.mark_sent(id),
                Err(e) => {
                    // Stays queued; the next approval pass resends it.
                    warn!(id, error = %e, "Publish failed, action remains queued");
                }
            }
        } else if let Err(e) = self.bus.publish(TOPIC_PROPOSALS, &value).await {
            warn!(id, error = %e, "Proposal publish failed, action remains pending");
        }
    }

    fn mark_sent(&self, id: u64) {
        match self.ledger.transition_action(id, ActionStatus::Sent) {
            Ok(_) => self.metrics.inc_action(ActionStatus::Sent),
            Err(e) => error!(id, error = %e, "Failed to mark action sent"),
        }
    }

    // ── receipts ────────────────────────────────────────────────────────

    fn handle_receipt(&mut self, receipt: &Receipt) {
        match self.ledger.record_receipt(receipt) {
            Ok(Some(id)) => debug!(device_id = %receipt.device_id, id, "Receipt recorded"),
            Ok(None) => {
                debug!(device_id = %receipt.device_id, "Duplicate receipt ignored");
                return;
            }
            Err(e) => {
                warn!(device_id = %receipt.device_id, error = %e, "Receipt persist failed");
                return;
            }
        }

        // Exact (device_id, ts) match closes the loop on a sent action.
        if let Some(action) = self
            .ledger
            .sent_action_matching(&receipt.device_id, receipt.ts)
        {
            match self.ledger.transition_action(action.id, ActionStatus::Applied) {
                Ok(_) => {
                    self.metrics.inc_action(ActionStatus::Applied);
                    info!(id = action.id, device_id = %receipt.device_id, "Action applied");
                }
                Err(e) => warn!(id = action.id, error = %e, "Apply transition failed"),
            }
        }
    }

    // ── operator surface ────────────────────────────────────────────────

    /// Manually approve an action: publish to the device topic and mark
    /// it sent. Idempotent: approving an already-sent action succeeds
    /// without side effects. Also the retry path for queued actions whose
    /// auto publish failed.
    pub async fn approve_action(&self, id: u64) -> ApproveOutcome {
        let record = match self.ledger.get_action(id) {
            Ok(Some(record)) => record,
            Ok(None) => return ApproveOutcome::NotFound,
            Err(e) => {
                error!(id, error = %e, "Action lookup failed");
                return ApproveOutcome::NotFound;
            }
        };

        match record.status {
            ActionStatus::PendingManual | ActionStatus::Queued => {
                let value: serde_json::Value = match serde_json::from_str(&record.cmd_json) {
                    Ok(value) => value,
                    Err(e) => {
                        error!(id, error = %e, "Stored cmd_json is unreadable");
                        return ApproveOutcome::PublishFailed;
                    }
                };
                if let Err(e) = self.bus.publish(&set_topic(&record.device_id), &value).await {
                    warn!(id, error = %e, "Approval publish failed, status unchanged");
                    return ApproveOutcome::PublishFailed;
                }
                self.mark_sent(id);
                if let Err(e) = self.ledger.record_audit(
                    "operator",
                    "action_approve",
                    serde_json::json!({"id": id, "device_id": record.device_id}),
                ) {
                    warn!(id, error = %e, "Audit append failed");
                }
                ApproveOutcome::Sent
            }
            ActionStatus::Sent | ActionStatus::Applied | ActionStatus::Rejected => {
                ApproveOutcome::AlreadySent
            }
        }
    }

    /// Change the engine mode. Unknown modes are refused.
    pub fn set_mode(&mut self, mode: &str) -> Result<(), String> {
        if !ALLOWED_MODES.contains(&mode) {
            return Err(format!(
                "unknown mode {mode:?}; allowed: {}",
                ALLOWED_MODES.join(", ")
            ));
        }
        if self.mode != mode {
            info!(from = %self.mode, to = mode, "Mode changed");
            if let Err(e) = self.ledger.record_audit(
                "operator",
                "mode_change",
                serde_json::json!({"from": self.mode, "to": mode}),
            ) {
                warn!(error = %e, "Audit append failed");
            }
            self.mode = mode.to_string();
        }
        Ok(())
    }

    pub fn set_auto(&mut self, enabled: bool) {
        if self.auto_enabled != enabled {
            info!(enabled, "Auto flag changed");
            if let Err(e) = self.ledger.record_audit(
                "operator",
                "auto_change",
                serde_json::json!({"auto_enabled": enabled}),
            ) {
                warn!(error = %e, "Audit append failed");
            }
            self.auto_enabled = enabled;
        }
    }

    pub fn mode(&self) -> &str {
        &self.mode
    }

    pub fn auto_enabled(&self) -> bool {
        self.auto_enabled
    }

    // ── reads ───────────────────────────────────────────────────────────

    pub fn tiles(&self) -> &HashMap<String, RackTile> {
        &self.latest_tiles
    }

    pub fn recent_actions(&self, limit: usize) -> Vec<ActionRecord> {
        self.ledger.latest_actions(limit)
    }

    pub fn recent_anomalies(&self, limit: usize) -> Vec<AnomalyRecord> {
        self.ledger.latest_anomalies(limit)
    }

    pub fn status(&self) -> EngineStatus {
        EngineStatus {
            mode: self.mode.clone(),
            auto_enabled: self.auto_enabled,
            site: self.site(),
            ingest_count: self.ingest_count,
            last_ingest_ts: self.last_ingest_ts,
            tracked_racks: self.latest_tiles.len(),
            uptime_s: (Utc::now() - self.started_at).num_seconds(),
            discovery: self.discovery.clone(),
        }
    }

    fn site(&self) -> String {
        if self.policy.site.is_empty() {
            "unknown".to_string()
        } else {
            self.policy.site.clone()
        }
    }

    /// Resolve the actuator for a rack: dynamic telemetry map first, then
    /// the YAML registry, then the site-wide fallback.
    fn device_id_for(&self, rack: &str) -> String {
        if let Some(id) = self.rack_devices.get(rack) {
            return id.clone();
        }
        if let Some(id) = self.registry.device_for_rack(rack) {
            return id;
        }
        if !self.policy.site.is_empty() {
            return self.policy.site.clone();
        }
        "device".to_string()
    }
}
