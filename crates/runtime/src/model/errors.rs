use std::time::Duration;
use thiserror::Error;

/// Errors from reasoning-service calls.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new variants
/// in future versions without breaking downstream code.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ModelError {
    /// A network error occurred during the API call.
    #[error("network: {0}")]
    Network(String),

    /// The provider returned an error response.
    #[error("provider api: {0}")]
    Api(String),

    /// The provider response could not be parsed or was unusable.
    #[error("invalid provider response: {0}")]
    InvalidResponse(String),

    /// The provider did not answer in time.
    #[error("no response after {0:?}")]
    Timeout(Duration),

    /// A turn was submitted before the tool catalog was built.
    #[error("tool catalog has not been built")]
    CatalogMissing,
}
