/*!
 * icpflow Instrument
 *
 * The session layer for a PerkinElmer Syngistix ICP-OES: the vendor
 * remote-control seam, the status cache fed by its callbacks, and the
 * session that issues commands and reads back responses.
 */

#![warn(missing_docs)]

// Re-export core types
pub use icpflow_core::prelude;

pub mod cache;
pub mod mock;
pub mod remote;
pub mod session;
pub mod simulator;
pub mod status;

pub use cache::StatusCache;
pub use remote::{
    AutoAnalysisParams, Command, ConnectOptions, Notification, NotificationHandler, RemoteControl,
};
pub use session::{AutoAnalysis, InstrumentSession, ManualTarget};
pub use simulator::{SimulatedInstrument, SimulationTiming};
pub use status::{
    AnalysisStatus, InstrumentError, PlasmaStatus, StatusMessage, StatusReading, StatusSnapshot,
};

/// icpflow instrument crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Initialize the instrument layer
pub fn init() -> Result<(), icpflow_core::error::Error> {
    tracing::info!("icpflow instrument {} initialized", VERSION);
    Ok(())
}
