use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Why a tool call produced no usable output.
///
/// These are reported back to the reasoning service as results; they never
/// abort a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Error)]
#[serde(tag = "kind", content = "message", rename_all = "snake_case")]
pub enum ToolError {
    #[error("tool not found: {0}")]
    NotFound(String),
    #[error("invalid input: {0}")]
    InvalidInput(String),
    /// The tool ran and reported failure itself.
    #[error("tool reported an error: {0}")]
    Host(String),
    #[error("timeout after {0}ms")]
    Timeout(u64),
    #[error("execution failed: {0}")]
    Execution(String),
}

impl ToolError {
    /// Short machine-readable tag for the error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::InvalidInput(_) => "invalid_input",
            Self::Host(_) => "host",
            Self::Timeout(_) => "timeout",
            Self::Execution(_) => "execution",
        }
    }
}
