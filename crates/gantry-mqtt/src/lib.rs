//! Gantry MQTT - Printer session management
//!
//! This crate wraps a printer's MQTT control channel: the TLS
//! connection (with relaxed certificate validation, since printers use
//! self-signed certificates), the report subscription, and the reader
//! task that folds the telemetry stream into a status snapshot.

pub mod session;
pub mod tls;

pub use session::{report_topic, request_topic, PrinterSession, SessionError, MQTT_USERNAME};
