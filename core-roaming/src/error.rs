//! Error types for roaming settings

use bridge_traits::error::BridgeError;
use core_auth::AuthError;
use thiserror::Error;

/// Roaming settings errors
#[derive(Error, Debug)]
pub enum RoamingError {
    /// Rejected before any remote call was made
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("No authentication provider is available")]
    ProviderUnavailable,

    #[error("The authentication provider is not signed in")]
    NotAuthenticated,

    /// The remote container (extension or file) does not exist
    #[error("Remote store not found: {0}")]
    RemoteNotFound(String),

    #[error("Graph API error (status {status}): {message}")]
    Remote { status: u16, message: String },

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error(transparent)]
    Bridge(#[from] BridgeError),
}

impl RoamingError {
    /// Whether the caller may create the remote container and retry.
    pub fn is_remote_missing(&self) -> bool {
        matches!(self, RoamingError::RemoteNotFound(_))
    }
}

impl From<serde_json::Error> for RoamingError {
    fn from(error: serde_json::Error) -> Self {
        RoamingError::Serialization(error.to_string())
    }
}

/// Result type for roaming operations
pub type Result<T> = std::result::Result<T, RoamingError>;
