use crate::host::ProcessError;
use crate::model::ModelError;
use thiserror::Error;

/// Errors that abort an agent task.
///
/// Failures of individual tool calls are not here: they are reported back to
/// the reasoning service as [`ToolError`](crate::ToolError) results.
#[derive(Debug, Error)]
pub enum Error {
    /// Missing or malformed launch specification or credential.
    #[error("config error: {0}")]
    Config(String),

    /// The tool host never became reachable or offered no tools.
    #[error("tool discovery failed: {0}")]
    Discovery(String),

    /// The reasoning backend failed.
    #[error("reasoning service error: {0}")]
    Reasoning(#[from] ModelError),

    /// The tool host process could not be launched or died during startup.
    #[error(transparent)]
    Process(#[from] ProcessError),

    /// The reasoning service kept requesting tools past the configured limit.
    #[error("turn limit exceeded: more than {limit} tool rounds")]
    TurnLimitExceeded { limit: usize },

    /// The caller cancelled the task before it finished.
    #[error("task cancelled")]
    Cancelled,

    #[error("invalid state: {0}")]
    InvalidState(String),
}

pub type Result<T> = std::result::Result<T, Error>;
