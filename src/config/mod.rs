//! Configuration layer
//!
//! Three sources compose the runtime configuration:
//!
//! 1. Environment variables, collected once into [`Settings`].
//! 2. `policy.yaml` — site policy: setpoint limits, alarm thresholds.
//! 3. `devices.yaml` — the device registry, hot-reloaded on mtime change
//!    and on `discover/approved|removed` events.

pub mod defaults;
mod policy;
mod registry;

pub use policy::{HumidityBand, Limits, ObjectiveWeights, Policy, PolicyError, SetpointLimit};
pub use registry::{DeviceRegistry, DevicesFile};

use std::env;

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Process-wide settings sourced from the environment.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Broker URL, `mqtt://host:port`
    pub mqtt_url: String,
    pub mqtt_user: String,
    pub mqtt_pass: String,
    /// Ledger directory (sled)
    pub db_path: String,
    pub policy_path: String,
    pub devices_path: String,
    /// Initial engine mode
    pub mode: String,
    pub discovery_subnet: String,
    pub discovery_topic: String,
    pub discovery_timeout_s: u64,
    pub discovery_interval_hours: u64,
    pub template_dir: String,
    pub simulator_url: String,
    /// HTTP bind address
    pub bind_addr: String,
}

impl Settings {
    pub fn from_env() -> Self {
        Self {
            mqtt_url: env_or("MQTT_URL", "mqtt://localhost:1883"),
            mqtt_user: env_or("MQTT_USER", ""),
            mqtt_pass: env_or("MQTT_PASS", ""),
            db_path: env_or("DB_PATH", "./data/borealis-ledger"),
            policy_path: env_or("POLICY_PATH", "./config/policy.yaml"),
            devices_path: env_or("DEVICES_PATH", "./config/devices.yaml"),
            mode: env_or("MODE", "propose"),
            discovery_subnet: env_or("DISCOVERY_SUBNET", "10.0.0.0/24"),
            discovery_topic: env_or("DISCOVERY_TOPIC", "ctrl/discover"),
            discovery_timeout_s: env_parse("DISCOVERY_TIMEOUT_S", 180),
            discovery_interval_hours: env_parse("DISCOVERY_INTERVAL_HOURS", 6),
            template_dir: env_or("DISCOVERY_TEMPLATE_DIR", "./config/templates"),
            simulator_url: env_or("SIMULATOR_URL", "http://localhost:9100"),
            bind_addr: env_or("BIND_ADDR", "0.0.0.0:8080"),
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self::from_env()
    }
}
