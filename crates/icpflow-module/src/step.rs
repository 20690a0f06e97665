/*!
 * Step responses returned to the orchestrator.
 */
use serde::{Deserialize, Serialize};

use icpflow_core::error::{Error, Result};
use icpflow_engine::ActionOutcome;

/// Outcome of one step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    /// The action completed
    Succeeded,
    /// The action failed
    Failed,
}

/// The orchestrator's record of one action call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepResponse {
    /// Whether the action succeeded
    pub action_response: StepStatus,
    /// Vendor response text
    pub action_msg: Option<String>,
    /// Error description for failed steps
    pub action_log: Option<String>,
}

impl StepResponse {
    /// A succeeded step carrying the vendor response
    pub fn succeeded<S: Into<String>>(msg: S) -> Self {
        Self {
            action_response: StepStatus::Succeeded,
            action_msg: Some(msg.into()),
            action_log: None,
        }
    }

    /// A failed step for `error`, keeping the vendor response when there is one
    pub fn failed(error: &Error) -> Self {
        Self {
            action_response: StepStatus::Failed,
            action_msg: error.response().map(str::to_string),
            action_log: Some(error.to_string()),
        }
    }

    /// Convert an action result
    pub fn from_result(result: &Result<ActionOutcome>) -> Self {
        match result {
            Ok(outcome) => Self::succeeded(outcome.response.clone()),
            Err(error) => Self::failed(error),
        }
    }

    /// True for succeeded steps
    pub fn is_success(&self) -> bool {
        self.action_response == StepStatus::Succeeded
    }
}
