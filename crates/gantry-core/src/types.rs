//! Printer types shared across the Gantry system

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use uuid::Uuid;

/// TCP port printers expose for their MQTT control channel.
///
/// The same port doubles as the reachability probe target during
/// discovery, since printers accept plain TCP connects on it.
pub const SERVICE_PORT: u16 = 8883;

/// Durable configuration record for one printer.
///
/// The `id` is the stable handle for the printer and never changes once
/// assigned; host and access code may be edited, which invalidates any
/// live session for the printer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrinterConfig {
    /// Stable identity key, generated at creation time
    pub id: String,
    /// Human-readable name
    pub name: String,
    /// Network address (hostname or IP)
    pub host: String,
    /// Pre-shared access code used as the MQTT password
    pub access_code: String,
    /// Printer serial number, used to derive its MQTT topics
    pub serial: String,
    /// Disabled printers are never contacted
    pub enabled: bool,
    /// When the record was created
    pub created_at: DateTime<Utc>,
    /// Last model string detected from telemetry
    #[serde(default)]
    pub model: Option<String>,
    /// Last firmware string detected from telemetry
    #[serde(default)]
    pub firmware: Option<String>,
}

impl PrinterConfig {
    /// Create a new record with a freshly generated identity key
    pub fn new(name: String, host: String, access_code: String, serial: String, enabled: bool) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name,
            host,
            access_code,
            serial,
            enabled,
            created_at: Utc::now(),
            model: None,
            firmware: None,
        }
    }
}

/// Operating state reported by a printer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrinterState {
    Idle,
    Printing,
    Paused,
    Finished,
    Failed,
    /// Stage code the decoder does not recognize
    Stage(i64),
}

impl PrinterState {
    /// Map a wire stage code to its state
    pub fn from_stage(code: i64) -> Self {
        match code {
            0 => Self::Idle,
            1 => Self::Printing,
            2 => Self::Paused,
            3 => Self::Finished,
            4 => Self::Failed,
            other => Self::Stage(other),
        }
    }

    /// Display label for the state
    pub fn label(&self) -> String {
        match self {
            Self::Idle => "Idle".to_string(),
            Self::Printing => "Printing".to_string(),
            Self::Paused => "Paused".to_string(),
            Self::Finished => "Finished".to_string(),
            Self::Failed => "Failed".to_string(),
            Self::Stage(code) => format!("Stage {}", code),
        }
    }
}

impl Default for PrinterState {
    fn default() -> Self {
        Self::Idle
    }
}

/// Latest merged view of a printer's telemetry fields.
///
/// All fields start at their zero value until the first successful
/// decode; `reachable` is the only freshness signal callers may trust.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    /// Operating state
    pub state: PrinterState,
    /// Sub-state code, if the printer reports one
    pub sub_state: Option<i64>,
    /// Print progress percent (0-100)
    pub progress: u8,
    /// Name of the current task
    pub task: String,
    /// Bed temperature in degrees Celsius
    pub bed_temp: f64,
    /// Tool (nozzle) temperature in degrees Celsius
    pub tool_temp: f64,
    /// File currently being printed
    pub file: String,
    /// Firmware version string
    pub firmware: String,
    /// Detected printer model
    pub model: String,
    /// Whether the printer could be reached on the last attempt
    pub reachable: bool,
    /// When telemetry last updated this snapshot
    pub updated_at: Option<DateTime<Utc>>,
}

/// How a printer was discovered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiscoveryMethod {
    /// Heard announcing itself on the multicast group
    Broadcast,
    /// Accepted a TCP connect on the service port
    Probe,
}

/// A printer found on the local network.
///
/// Never persisted; the network address is the dedup key when results
/// from both strategies are merged.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveredPrinter {
    /// Network address the printer was seen at
    pub ip: IpAddr,
    /// Best-effort display name
    pub name: String,
    /// Device type string the printer declared, if any
    pub device_type: String,
    /// Serial number, if recoverable
    pub serial: Option<String>,
    /// Model guess
    pub model: String,
    /// When the printer was seen
    pub seen_at: DateTime<Utc>,
    /// Which strategy produced this record
    pub method: DiscoveryMethod,
}
