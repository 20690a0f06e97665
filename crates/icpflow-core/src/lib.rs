/*!
 * icpflow Core
 *
 * Shared plumbing for the icpflow crates: the error type, layered
 * configuration, logging setup and a few async helpers.
 */

#![warn(missing_docs)]

pub mod config;
pub mod error;
pub mod logging;
pub mod prelude;
pub mod utils;

/// Re-export of dependencies that are part of the public API
pub mod deps {
    pub use tokio;
    pub use tracing;
}

/// icpflow core crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library initialization with the default log filter
pub fn init() -> Result<(), error::Error> {
    logging::init()?;
    tracing::info!("icpflow core {} initialized", VERSION);
    Ok(())
}
