//! Borealis: closed-loop supervisory control for data-center cooling
//!
//! Rack telemetry flows in over MQTT, through rolling feature windows and
//! the forecast/anomaly/control pipeline, and back out as bounded
//! setpoint commands — auto-published or held for operator approval
//! depending on the engine mode.
//!
//! ## Architecture
//!
//! - **Feature Store**: per-(rack, metric) rolling windows
//! - **Models**: trend forecaster and anomaly scorer (statistical proxies)
//! - **Control**: lookahead controller plus the safety envelope
//! - **Decision Engine**: bus dispatch, triggers, gating, discovery FSM
//! - **Ledger**: embedded store for telemetry, actions, receipts, audits
//! - **API**: axum HTTP/WebSocket operator surface

pub mod api;
pub mod bus;
pub mod config;
pub mod control;
pub mod engine;
pub mod features;
pub mod metrics;
pub mod models;
pub mod storage;
pub mod types;

// Re-export the types most callers touch
pub use engine::{ApproveOutcome, DecisionEngine, EngineConfig, EngineStatus};
pub use storage::Ledger;
pub use types::{ActionRecord, ActionStatus, Setpoints, TelemetryPoint};
