//! Core data model shared across the engine, ledger, bus, and API layers.

mod action;
mod discovery;
mod telemetry;

pub use action::{
    ActionExplain, ActionPayload, ActionRecord, ActionStatus, AnomalyRecord, AuditRecord,
    ForecastRecord, Receipt, ReceiptRecord, Setpoints,
};
pub use discovery::{
    DeviceEntry, DiscoveredDevice, DiscoveryHistoryEntry, DiscoveryState, DiscoveryStatus,
};
pub use telemetry::{MetricReadings, RackTile, TelemetryPoint, TelemetryRecord};
