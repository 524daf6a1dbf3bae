//! Site policy loaded from `policy.yaml`
//!
//! Policy defines the safety envelope (absolute min/max and per-minute
//! rate limit on each setpoint) plus alarm thresholds for the trigger
//! evaluation. Missing keys fall back to built-in defaults; a present but
//! inconsistent envelope is a policy error that makes the safety layer
//! reject commands rather than coerce outside absolute limits.

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PolicyError {
    #[error("{setpoint}: min {min} must be below max {max}")]
    InvertedRange {
        setpoint: &'static str,
        min: f64,
        max: f64,
    },
    #[error("{setpoint}: max_delta_per_min must be positive, got {delta}")]
    NonPositiveRate { setpoint: &'static str, delta: f64 },
}

/// Envelope for a single setpoint.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SetpointLimit {
    pub min: f64,
    pub max: f64,
    pub max_delta_per_min: f64,
}

impl SetpointLimit {
    fn validate(&self, setpoint: &'static str) -> Result<(), PolicyError> {
        if self.min >= self.max {
            return Err(PolicyError::InvertedRange {
                setpoint,
                min: self.min,
                max: self.max,
            });
        }
        if self.max_delta_per_min <= 0.0 {
            return Err(PolicyError::NonPositiveRate {
                setpoint,
                delta: self.max_delta_per_min,
            });
        }
        Ok(())
    }
}

fn default_temp_limit() -> SetpointLimit {
    SetpointLimit {
        min: 16.0,
        max: 27.0,
        max_delta_per_min: 1.0,
    }
}

fn default_fan_limit() -> SetpointLimit {
    SetpointLimit {
        min: 800.0,
        max: 2200.0,
        max_delta_per_min: 200.0,
    }
}

/// Safety-envelope limits for both setpoints.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Limits {
    #[serde(default = "default_temp_limit")]
    pub temp_c: SetpointLimit,
    #[serde(default = "default_fan_limit")]
    pub fan_rpm: SetpointLimit,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            temp_c: default_temp_limit(),
            fan_rpm: default_fan_limit(),
        }
    }
}

impl Limits {
    pub fn validate(&self) -> Result<(), PolicyError> {
        self.temp_c.validate("temp_c")?;
        self.fan_rpm.validate("fan_rpm")?;
        Ok(())
    }
}

/// Acceptable relative-humidity band.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HumidityBand {
    pub min: f64,
    pub max: f64,
}

impl Default for HumidityBand {
    fn default() -> Self {
        Self {
            min: 20.0,
            max: 80.0,
        }
    }
}

fn default_power_alarm() -> f64 {
    5.5
}

/// Objective weights for the controller. The current controller is a
/// heuristic and only thermal error steers it; the weights ride along so
/// policy files stay stable when a cost-based controller lands.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ObjectiveWeights {
    pub thermal_risk: f64,
    pub energy: f64,
    pub wear: f64,
}

impl Default for ObjectiveWeights {
    fn default() -> Self {
        Self {
            thermal_risk: 1.0,
            energy: 0.35,
            wear: 0.15,
        }
    }
}

/// The full site policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Policy {
    #[serde(default)]
    pub site: String,
    #[serde(default)]
    pub limits: Limits,
    #[serde(default = "default_power_alarm")]
    pub power_alarm_kw: f64,
    #[serde(default)]
    pub humidity: HumidityBand,
    #[serde(default)]
    pub weights: ObjectiveWeights,
}

impl Default for Policy {
    fn default() -> Self {
        Self {
            site: String::new(),
            limits: Limits::default(),
            power_alarm_kw: default_power_alarm(),
            humidity: HumidityBand::default(),
            weights: ObjectiveWeights::default(),
        }
    }
}

impl Policy {
    /// Load policy from a YAML file. A missing file yields the defaults;
    /// a malformed file is an error (we refuse to guess a safety
    /// envelope from a half-readable policy).
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            tracing::info!(path = %path.display(), "No policy file, using defaults");
            return Ok(Self {
                site: "site".to_string(),
                ..Self::default()
            });
        }
        let raw = std::fs::read_to_string(path)?;
        let policy: Self = serde_yaml::from_str(&raw)?;
        Ok(policy)
    }
}
