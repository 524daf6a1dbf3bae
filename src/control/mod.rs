//! Setpoint control
//!
//! The controller proposes, the safety envelope disposes: `MpcController`
//! turns a forecast into a setpoint proposal, and `Safety` coerces every
//! proposal into the absolute and rate-limit envelope before anything is
//! persisted or published.

mod mpc;
mod safety;

pub use mpc::MpcController;
pub use safety::{SafeCommand, Safety};
