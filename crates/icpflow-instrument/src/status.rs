/*!
 * Status types reported by the instrument.
 *
 * Codes follow the vendor remote-control interface. Codes outside the known
 * range are kept verbatim so newer instrument firmware does not break the
 * cache.
 */
use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Connection-status code meaning "connected"
pub const CONNECTED_CODE: i32 = 1;

/// Label used for codes the driver has no name for
pub const UNKNOWN_LABEL: &str = "Unknown";

/// Plasma state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PlasmaStatus {
    /// Plasma is lit
    On,
    /// Plasma is off
    Off,
    /// Ignition sequence in progress
    Igniting,
    /// Extinguish sequence in progress
    Extinguishing,
    /// Code not known to this driver
    Unknown(i32),
}

impl PlasmaStatus {
    /// Decode a vendor plasma-status code
    pub fn from_code(code: i32) -> Self {
        match code {
            0 => PlasmaStatus::On,
            1 => PlasmaStatus::Off,
            2 => PlasmaStatus::Igniting,
            3 => PlasmaStatus::Extinguishing,
            other => PlasmaStatus::Unknown(other),
        }
    }

    /// Vendor code for this status
    pub fn code(&self) -> i32 {
        match self {
            PlasmaStatus::On => 0,
            PlasmaStatus::Off => 1,
            PlasmaStatus::Igniting => 2,
            PlasmaStatus::Extinguishing => 3,
            PlasmaStatus::Unknown(code) => *code,
        }
    }

    /// Human-readable label
    pub fn label(&self) -> &'static str {
        match self {
            PlasmaStatus::On => "Plasma is On",
            PlasmaStatus::Off => "Plasma is Off",
            PlasmaStatus::Igniting => "Plasma Igniting",
            PlasmaStatus::Extinguishing => "Plasma Extinguishing",
            PlasmaStatus::Unknown(_) => UNKNOWN_LABEL,
        }
    }
}

/// Analysis state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AnalysisStatus {
    /// No analysis in progress
    Idle,
    /// Analysis running
    Running,
    /// Analysis paused
    Paused,
    /// Code not known to this driver
    Unknown(i32),
}

impl AnalysisStatus {
    /// Decode a vendor analysis-status code
    pub fn from_code(code: i32) -> Self {
        match code {
            0 => AnalysisStatus::Idle,
            1 => AnalysisStatus::Running,
            2 => AnalysisStatus::Paused,
            other => AnalysisStatus::Unknown(other),
        }
    }

    /// Vendor code for this status
    pub fn code(&self) -> i32 {
        match self {
            AnalysisStatus::Idle => 0,
            AnalysisStatus::Running => 1,
            AnalysisStatus::Paused => 2,
            AnalysisStatus::Unknown(code) => *code,
        }
    }

    /// Human-readable label
    pub fn label(&self) -> &'static str {
        match self {
            AnalysisStatus::Idle => "Idle",
            AnalysisStatus::Running => "Analysis Running",
            AnalysisStatus::Paused => "Analysis Paused",
            AnalysisStatus::Unknown(_) => UNKNOWN_LABEL,
        }
    }

    /// True while an analysis occupies the instrument (running or paused)
    pub fn is_active(&self) -> bool {
        matches!(self, AnalysisStatus::Running | AnalysisStatus::Paused)
    }
}

/// A cached status value: the raw code, its label and when it arrived
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusReading {
    /// Raw vendor code
    pub code: i32,
    /// Human-readable label
    pub label: String,
    /// Time the callback was received
    pub updated_at: DateTime<Utc>,
}

impl StatusReading {
    /// Create a reading stamped with the current time
    pub fn new<S: Into<String>>(code: i32, label: S) -> Self {
        Self {
            code,
            label: label.into(),
            updated_at: Utc::now(),
        }
    }
}

impl fmt::Display for StatusReading {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.label)
    }
}

/// An error reported by the instrument through the error callback
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstrumentError {
    /// Vendor error message
    pub message: String,
    /// Vendor severity level
    pub severity: i32,
    /// Time the callback was received
    pub reported_at: DateTime<Utc>,
}

/// A free-text status message from the status callback
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusMessage {
    /// Message text
    pub text: String,
    /// Time the callback was received
    pub received_at: DateTime<Utc>,
}

/// Point-in-time copy of everything the session knows about the instrument
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    /// `Some(true)` when the last connection callback reported "connected"
    pub connection_status: Option<bool>,
    /// Last plasma status
    pub plasma_status: Option<StatusReading>,
    /// Last instrument status
    pub instrument_status: Option<StatusReading>,
    /// Last analysis status
    pub analysis_status: Option<StatusReading>,
    /// Last autosampler status
    pub autosampler_status: Option<StatusReading>,
    /// Last analysed sample id
    pub current_sample_id: Option<String>,
    /// Retained status messages, oldest first
    pub status_log: Vec<StatusMessage>,
    /// Instrument errors keyed by vendor error code
    pub error_log: BTreeMap<i32, InstrumentError>,
}

impl StatusSnapshot {
    /// Decoded analysis status, if one has been reported
    pub fn analysis(&self) -> Option<AnalysisStatus> {
        self.analysis_status
            .as_ref()
            .map(|reading| AnalysisStatus::from_code(reading.code))
    }

    /// Decoded plasma status, if one has been reported
    pub fn plasma(&self) -> Option<PlasmaStatus> {
        self.plasma_status
            .as_ref()
            .map(|reading| PlasmaStatus::from_code(reading.code))
    }
}
