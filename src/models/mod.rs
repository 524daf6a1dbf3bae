//! Statistical proxy models
//!
//! Trend forecasting and anomaly scoring behind narrow contracts, so the
//! learned replacements can slot in without touching the engine.

mod anomaly;
mod forecaster;

pub use anomaly::AnomalyScorer;
pub use forecaster::{Forecast, Forecaster};
