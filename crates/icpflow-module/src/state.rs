/*!
 * Module state reported to the orchestrator.
 */
use serde::{Deserialize, Serialize};

use icpflow_instrument::StatusSnapshot;

/// Coarse module status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ModuleStatus {
    /// Idle and able to take an action
    Ready,
    /// An action is in flight
    Busy,
    /// The last action failed
    Error,
}

/// Module status plus the cached instrument status
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleState {
    /// Coarse module status
    pub status: ModuleStatus,
    /// Error of the last failed action
    pub error: Option<String>,
    /// Instrument status as `code: label`
    pub instrument_status: Option<String>,
    /// Plasma status as `code: label`
    pub plasma_status: Option<String>,
    /// Analysis status as `code: label`
    pub analysis_status: Option<String>,
    /// Autosampler status as `code: label`
    pub autosampler_status: Option<String>,
    /// Whether the vendor service reports the session as connected
    pub connection_status: Option<bool>,
    /// Stored methods, when the instrument listed them
    #[serde(skip_serializing_if = "Option::is_none")]
    pub methods: Option<Vec<String>>,
}

impl ModuleState {
    /// Combine the module status with a cache snapshot
    pub fn from_snapshot(
        status: ModuleStatus,
        error: Option<String>,
        snapshot: &StatusSnapshot,
        methods: Option<Vec<String>>,
    ) -> Self {
        let text = |reading: &Option<icpflow_instrument::StatusReading>| {
            reading.as_ref().map(ToString::to_string)
        };
        Self {
            status,
            error,
            instrument_status: text(&snapshot.instrument_status),
            plasma_status: text(&snapshot.plasma_status),
            analysis_status: text(&snapshot.analysis_status),
            autosampler_status: text(&snapshot.autosampler_status),
            connection_status: snapshot.connection_status,
            methods,
        }
    }
}
