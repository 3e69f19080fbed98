//! # cargoledger-observability
//!
//! Structured logging for CargoLedger binaries.
//!
//! JSON-structured logs compatible with ELK, Loki, CloudWatch, or
//! human-readable text for local runs. Log levels configurable per
//! component (crate name).

pub mod tracing_setup;

pub use tracing_setup::{init_tracing, LogConfig};
