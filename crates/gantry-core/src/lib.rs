//! Gantry Core - Shared types and telemetry decoding
//!
//! This crate provides the foundational types for the Gantry system:
//! - Printer configuration records and status snapshots
//! - Discovery result types
//! - Pure decoding of printer telemetry reports

pub mod decode;
pub mod types;

pub use decode::{detect_model, merge_report, GENERIC_MODEL};
pub use types::{
    DiscoveredPrinter, DiscoveryMethod, PrinterConfig, PrinterState, StatusSnapshot, SERVICE_PORT,
};
