/*!
 * icpflow Engine
 *
 * The action façade over an instrument session: typed action requests,
 * the catalog the module advertises, and the analysis completion wait.
 */

#![warn(missing_docs)]

// Re-export core types
pub use icpflow_core::prelude;

pub mod facade;
pub mod request;
pub mod wait;

pub use facade::{ActionFacade, ActionOutcome, Interrupt};
pub use request::{
    catalog, ActionArgument, ActionDefinition, ActionRequest, AutoAnalysisRequest,
    ManualAnalysisRequest,
};
pub use wait::{wait_for_completion, WaitSettings};

/// icpflow engine crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Initialize the engine
pub fn init() -> icpflow_core::error::Result<()> {
    tracing::info!("icpflow engine {} initialized", VERSION);
    Ok(())
}
