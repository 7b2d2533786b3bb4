//! Domain layer for watchman-log-shipper.
//!
//! Contains the canonical types shared across all modules:
//! - `LogEvent`: the record that travels through the pipeline
//! - `Severity`: the static severity table (DEBUG..CRITICAL)
//! - `ShipperError`: top-level error type

pub mod error;
pub mod log_event;
pub mod log_level;

pub use error::ShipperError;
pub use log_event::{LogEvent, Payload};
pub use log_level::{InvalidSeverity, SEVERITY_TABLE, Severity};
