//! Durable state
//!
//! A single embedded sled store holds every persisted table: telemetry,
//! forecasts, anomalies, the action ledger, receipts, and the audit log.
//! One tree per table, big-endian `u64` autoincrement keys, JSON rows —
//! reverse iteration gives newest-first reads for free.

mod ledger;

pub use ledger::{Ledger, LedgerError};
