//! Payload types shared by several messages

use serde::{Deserialize, Serialize};

/// Host telemetry carried by `auth` and `heartbeat` messages.
///
/// Collection failures are reported in-band as the `Error` form, matching
/// the `{"error": "..."}` shape servers already accept.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SystemInfo {
    /// A successful telemetry snapshot
    Report(TelemetryReport),
    /// Collection failed; the error text stands in for the snapshot
    Error {
        /// Human-readable collection error
        error: String,
    },
}

/// One telemetry snapshot. Keys are snake_case on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryReport {
    /// Aggregate CPU utilisation, 0..100
    pub cpu_percent: f32,
    /// Memory utilisation, 0..100
    pub memory_percent: f32,
    /// Memory in use, gigabytes rounded to two decimals
    pub memory_used_gb: f64,
    /// Total memory, gigabytes rounded to two decimals
    pub memory_total_gb: f64,
    /// Root-volume utilisation, 0..100
    pub disk_percent: f32,
    /// Root-volume usage, gigabytes rounded to two decimals
    pub disk_used_gb: f64,
    /// Root-volume capacity, gigabytes rounded to two decimals
    pub disk_total_gb: f64,
    /// Host boot time, seconds since the Unix epoch
    pub boot_time: u64,
    /// Primary outbound IP address
    pub ip_address: String,
}

/// One available package update, in the record shape the server renders.
///
/// The capitalised keys are the wire format; servers index these fields by
/// exact name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateRecord {
    /// Package or update title
    #[serde(rename = "Title")]
    pub title: String,
    /// Free-text description (usually the candidate version)
    #[serde(rename = "Description")]
    pub description: String,
    /// Knowledge-base article ids, comma separated; empty outside Windows
    #[serde(rename = "KB")]
    pub kb: String,
    /// Download size in megabytes; 0 when unknown
    #[serde(rename = "Size")]
    pub size: f64,
    /// Marked important by the platform update source
    #[serde(rename = "IsImportant")]
    pub important: bool,
    /// Marked critical by the platform update source
    #[serde(rename = "IsCritical")]
    pub critical: bool,
}

/// Remote input event delivered inside `vnc_input`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InputEvent {
    /// Move the pointer to absolute coordinates
    MouseMove {
        /// Target x coordinate
        #[serde(default)]
        x: i32,
        /// Target y coordinate
        #[serde(default)]
        y: i32,
    },
    /// Click at absolute coordinates
    MouseClick {
        /// Target x coordinate
        #[serde(default)]
        x: i32,
        /// Target y coordinate
        #[serde(default)]
        y: i32,
        /// Button name: "left", "right" or "middle"
        #[serde(default = "default_button")]
        button: String,
    },
    /// Press and release a single key
    Key {
        /// Key name as the server spells it
        key: String,
    },
    /// Any event kind this agent does not know; ignored by the injector
    #[serde(other)]
    Unknown,
}

fn default_button() -> String {
    "left".to_string()
}

/// Requested screen-share quality tier.
///
/// Unrecognised tier names decode to [`VncQuality::Unknown`] rather than
/// failing the whole message; the streaming controller resolves `Unknown`
/// to the medium preset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VncQuality {
    /// Smallest frames, fastest cadence
    Low,
    /// Balanced default
    #[default]
    Medium,
    /// Largest frames
    High,
    /// Any tier name this agent does not know
    #[serde(other)]
    Unknown,
}
