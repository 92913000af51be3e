use thiserror::Error;

#[derive(Error, Debug)]
pub enum AuthError {
    #[error("Provider {provider} authentication failed: {reason}")]
    AuthenticationFailed { provider: String, reason: String },

    /// The backend needs the user to interact before it can issue a token.
    #[error("User interaction required: {0}")]
    InteractionRequired(String),

    #[error("Sign-in cancelled by user")]
    Cancelled,

    #[error("Not authenticated")]
    NotAuthenticated,

    #[error("Token refresh failed: {0}")]
    TokenRefreshFailed(String),

    #[error("Secure storage unavailable: {0}")]
    SecureStorageUnavailable(String),

    #[error("Settings storage error: {0}")]
    Settings(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("OAuth state mismatch (expected {expected}, got {actual})")]
    StateMismatch { expected: String, actual: String },

    #[error("Invalid provider configuration: {0}")]
    InvalidConfig(String),

    #[error("Required capability missing: {capability} - {message}")]
    CapabilityMissing { capability: String, message: String },

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl AuthError {
    /// Failure reported by a backend while acquiring a token.
    pub fn failed(provider: impl Into<String>, reason: impl Into<String>) -> Self {
        AuthError::AuthenticationFailed {
            provider: provider.into(),
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, AuthError>;
