//! API route handlers
//!
//! Request handling for the operator surface. Handlers share the engine
//! with the bus dispatcher through an `Arc<RwLock<_>>`: reads take the
//! read lock, discovery control and approvals take the write lock, and
//! every response is a plain JSON body (or the Prometheus text body).

use std::path::Path;
use std::sync::Arc;

use axum::extract::{Path as UrlPath, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::RwLock;
use tracing::warn;

use crate::config::{DeviceRegistry, Settings};
use crate::engine::{ApproveOutcome, DecisionEngine};
use crate::metrics::Metrics;
use crate::storage::Ledger;
use crate::types::DeviceEntry;

use super::ApiError;

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiContext {
    pub engine: Arc<RwLock<DecisionEngine>>,
    pub ledger: Ledger,
    pub registry: DeviceRegistry,
    pub metrics: Arc<Metrics>,
    pub settings: Arc<Settings>,
    pub http: reqwest::Client,
}

impl ApiContext {
    pub fn new(
        engine: Arc<RwLock<DecisionEngine>>,
        ledger: Ledger,
        registry: DeviceRegistry,
        metrics: Arc<Metrics>,
        settings: Arc<Settings>,
    ) -> Self {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(2))
            .build()
            .unwrap_or_default();
        Self {
            engine,
            ledger,
            registry,
            metrics,
            settings,
            http,
        }
    }
}

// ============================================================================
// Observability
// ============================================================================

/// GET /health
pub async fn get_health() -> Json<serde_json::Value> {
    Json(json!({"ok": true, "ts": Utc::now()}))
}

/// GET /tiles: latest per-rack snapshot
pub async fn get_tiles(State(state): State<ApiContext>) -> Json<serde_json::Value> {
    let engine = state.engine.read().await;
    Json(json!(engine.tiles()))
}

/// GET /status
pub async fn get_status(State(state): State<ApiContext>) -> Json<crate::engine::EngineStatus> {
    let engine = state.engine.read().await;
    Json(engine.status())
}

/// GET /metrics: Prometheus exposition
pub async fn get_metrics(State(state): State<ApiContext>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(
            axum::http::header::CONTENT_TYPE,
            "text/plain; version=0.0.4; charset=utf-8",
        )],
        state.metrics.render(),
    )
}

// ============================================================================
// Ledger reads
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct LimitQuery {
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_limit() -> usize {
    20
}

/// GET /actions?limit=N: newest first, `cmd_json` decoded into `cmd`
pub async fn get_actions(
    State(state): State<ApiContext>,
    Query(query): Query<LimitQuery>,
) -> Json<serde_json::Value> {
    let engine = state.engine.read().await;
    let rows: Vec<serde_json::Value> = engine
        .recent_actions(query.limit)
        .into_iter()
        .map(|record| {
            let cmd: serde_json::Value =
                serde_json::from_str(&record.cmd_json).unwrap_or_else(|_| json!({}));
            let mut row = json!(record);
            if let Some(map) = row.as_object_mut() {
                map.insert("cmd".to_string(), cmd);
            }
            row
        })
        .collect();
    Json(json!({"actions": rows}))
}

/// GET /anomalies?limit=N
pub async fn get_anomalies(
    State(state): State<ApiContext>,
    Query(query): Query<LimitQuery>,
) -> Json<serde_json::Value> {
    let engine = state.engine.read().await;
    Json(json!({"anomalies": engine.recent_anomalies(query.limit)}))
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub rack: String,
    #[serde(default = "default_history_limit")]
    pub limit: usize,
}

fn default_history_limit() -> usize {
    120
}

/// GET /telemetry/history?rack=R&limit=N: newest first
pub async fn get_telemetry_history(
    State(state): State<ApiContext>,
    Query(query): Query<HistoryQuery>,
) -> Json<serde_json::Value> {
    let points = state.ledger.telemetry_history(&query.rack, query.limit);
    Json(json!({"rack": query.rack, "points": points}))
}

// ============================================================================
// Actions
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ApproveActionBody {
    pub id: u64,
}

/// POST /actions/approve: send a pending action to its device
pub async fn approve_action(
    State(state): State<ApiContext>,
    Json(body): Json<ApproveActionBody>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let engine = state.engine.read().await;
    match engine.approve_action(body.id).await {
        ApproveOutcome::Sent | ApproveOutcome::AlreadySent => {
            Ok(Json(json!({"status": "sent", "id": body.id})))
        }
        ApproveOutcome::PublishFailed => Err(ApiError::unavailable("bus publish failed")),
        ApproveOutcome::NotFound => Err(ApiError::not_found("action not found")),
    }
}

// ============================================================================
// Mode control
// ============================================================================

/// GET /mode
pub async fn get_mode(State(state): State<ApiContext>) -> Json<serde_json::Value> {
    let engine = state.engine.read().await;
    Json(json!({"mode": engine.mode(), "auto_enabled": engine.auto_enabled()}))
}

#[derive(Debug, Deserialize)]
pub struct ModeBody {
    #[serde(default)]
    pub mode: Option<String>,
    #[serde(default)]
    pub auto_enabled: Option<bool>,
}

/// POST /mode: set mode and/or the auto flag
pub async fn set_mode(
    State(state): State<ApiContext>,
    Json(body): Json<ModeBody>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let mut engine = state.engine.write().await;
    if let Some(mode) = &body.mode {
        engine.set_mode(mode).map_err(ApiError::bad_request)?;
    }
    if let Some(auto) = body.auto_enabled {
        engine.set_auto(auto);
    }
    Ok(Json(json!({
        "mode": engine.mode(),
        "auto_enabled": engine.auto_enabled(),
    })))
}

// ============================================================================
// Discovery
// ============================================================================

#[derive(Debug, Default, Deserialize)]
pub struct DiscoverStartBody {
    #[serde(default)]
    pub subnet: Option<String>,
    #[serde(default)]
    pub actor: Option<String>,
}

/// POST /discover/start
pub async fn discover_start(
    State(state): State<ApiContext>,
    body: Option<Json<DiscoverStartBody>>,
) -> Json<serde_json::Value> {
    let body = body.map(|Json(body)| body).unwrap_or_default();
    let subnet = body
        .subnet
        .unwrap_or_else(|| state.settings.discovery_subnet.clone());
    let actor = body.actor.unwrap_or_else(|| "operator".to_string());

    let mut engine = state.engine.write().await;
    engine.start_discovery(&subnet, &actor).await;
    Json(json!({"status": "started", "subnet": subnet, "actor": actor}))
}

/// GET /discover: devices, state, history (ticks the timeout)
pub async fn get_discover(State(state): State<ApiContext>) -> Json<crate::engine::DiscoverySnapshot> {
    let mut engine = state.engine.write().await;
    Json(engine.list_discoveries())
}

/// POST /discover/approve: append/update the device registry
pub async fn approve_device(
    State(state): State<ApiContext>,
    Json(device): Json<DeviceEntry>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let mut engine = state.engine.write().await;
    match engine.approve_device(device.clone()).await {
        Ok(action) => Ok(Json(
            json!({"status": "approved", "device": device, "action": action}),
        )),
        Err(e) => {
            warn!(error = %e, "Device approval failed");
            Err(ApiError::unavailable("registry write failed"))
        }
    }
}

// ============================================================================
// Device registry
// ============================================================================

/// GET /devices: registry file contents
pub async fn get_devices(State(state): State<ApiContext>) -> Json<crate::config::DevicesFile> {
    Json((*state.registry.current()).clone())
}

/// GET /devices/summary: registry entries with their latest telemetry
pub async fn get_devices_summary(State(state): State<ApiContext>) -> Json<serde_json::Value> {
    let snapshot = state.registry.current();
    let enriched: Vec<serde_json::Value> = snapshot
        .devices
        .iter()
        .map(|device| {
            let latest = device
                .rack
                .as_deref()
                .and_then(|rack| state.ledger.latest_point(rack));
            let mut row = json!(device);
            if let Some(map) = row.as_object_mut() {
                map.insert("latest".to_string(), json!(latest));
            }
            row
        })
        .collect();
    Json(json!({"devices": enriched}))
}

/// DELETE /devices/:id
pub async fn delete_device(
    State(state): State<ApiContext>,
    UrlPath(id): UrlPath<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let mut engine = state.engine.write().await;
    match engine.remove_device_entry(&id).await {
        Ok(true) => Ok(Json(json!({"status": "removed", "device_id": id}))),
        Ok(false) => Err(ApiError::not_found("device not found")),
        Err(e) => {
            warn!(error = %e, "Device removal failed");
            Err(ApiError::unavailable("registry write failed"))
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ValidateBody {
    pub host: String,
    pub port: u16,
}

/// POST /devices/validate: TCP dial within 1 s
pub async fn validate_device(
    Json(body): Json<ValidateBody>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if body.host.is_empty() || body.port == 0 {
        return Err(ApiError::bad_request("host and port required"));
    }
    let address = format!("{}:{}", body.host, body.port);
    let dial = tokio::net::TcpStream::connect(&address);
    match tokio::time::timeout(std::time::Duration::from_secs(1), dial).await {
        Ok(Ok(_stream)) => Ok(Json(json!({
            "ok": true,
            "message": format!("Connection to {address} succeeded"),
        }))),
        Ok(Err(e)) => Err(ApiError::bad_request(format!("Connection failed: {e}"))),
        Err(_) => Err(ApiError::bad_request(format!(
            "Connection to {address} timed out"
        ))),
    }
}

/// GET /templates: discovery templates from the template dir
pub async fn get_templates(State(state): State<ApiContext>) -> Json<serde_json::Value> {
    Json(json!({"templates": load_templates(Path::new(&state.settings.template_dir))}))
}

fn load_templates(dir: &Path) -> Vec<serde_json::Value> {
    let mut templates = Vec::new();
    let Ok(entries) = std::fs::read_dir(dir) else {
        return templates;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("yaml") {
            continue;
        }
        let Ok(raw) = std::fs::read_to_string(&path) else {
            continue;
        };
        match serde_yaml::from_str::<serde_json::Value>(&raw) {
            Ok(mut item) if !item.is_null() => {
                if let Some(map) = item.as_object_mut() {
                    map.insert(
                        "file".to_string(),
                        json!(entry.file_name().to_string_lossy()),
                    );
                }
                templates.push(item);
            }
            Ok(_) => {}
            Err(e) => warn!(path = %path.display(), error = %e, "Skipping malformed template"),
        }
    }
    templates
}

// ============================================================================
// Simulator proxy
// ============================================================================

/// GET /simulator/scenarios
pub async fn simulator_scenarios(
    State(state): State<ApiContext>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let url = format!("{}/scenarios", state.settings.simulator_url);
    let response = state
        .http
        .get(&url)
        .send()
        .await
        .map_err(|e| ApiError::unavailable(format!("Simulator unavailable: {e}")))?;
    let body = response
        .json()
        .await
        .map_err(|e| ApiError::unavailable(format!("Simulator unavailable: {e}")))?;
    Ok(Json(body))
}

/// POST /simulator/scenarios
pub async fn simulator_set_scenario(
    State(state): State<ApiContext>,
    Json(payload): Json<serde_json::Value>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let url = format!("{}/scenarios", state.settings.simulator_url);
    let response = state
        .http
        .post(&url)
        .json(&payload)
        .send()
        .await
        .map_err(|e| ApiError::unavailable(format!("Simulator unavailable: {e}")))?;
    let body = response
        .json()
        .await
        .map_err(|e| ApiError::unavailable(format!("Simulator unavailable: {e}")))?;
    Ok(Json(body))
}

// ============================================================================
// Test support
// ============================================================================
