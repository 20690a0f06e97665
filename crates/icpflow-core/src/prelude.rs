/*!
 * Prelude module for icpflow core.
 *
 * Re-exports the items most crates in the workspace import together.
 */

// Re-export error types
pub use crate::error::{Error, Result};

// Re-export config types
pub use crate::config::{
    AnalysisConfig, Config, ConfigBuilder, InstrumentConfig, SharedConfig,
};

// Re-export utility functions
pub use crate::utils::{spawn_and_log, with_optional_timeout, with_timeout};

// Re-export logging helpers
pub use crate::logging::{component_span, operation_span};
pub use tracing::{debug, error, info, trace, warn};
