//! CLI error types.

use crate::config::ConfigError;
use thiserror::Error;

/// CLI errors.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Configuration is invalid or incomplete.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// An error occurred in the runtime layer.
    #[error(transparent)]
    Runtime(#[from] runtime::Error),

    /// An I/O error occurred.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
