/*!
 * icpflow Module
 *
 * Exposes an ICP-OES as a REST module for a laboratory orchestrator:
 * lifecycle hooks, module state, the action endpoint and admin commands.
 */

#![warn(missing_docs)]

pub mod module;
pub mod router;
pub mod state;
pub mod step;

pub use module::{IcpModule, ModuleAbout, ADMIN_COMMANDS};
pub use router::{router, ActionCall, AppState};
pub use state::{ModuleState, ModuleStatus};
pub use step::{StepResponse, StepStatus};

/// icpflow module crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
