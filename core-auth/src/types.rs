use crate::error::{AuthError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

pub use core_runtime::events::ProviderState;

/// Scopes requested when a configuration does not name any.
pub const DEFAULT_SCOPES: &[&str] = &["User.Read"];

/// Returns [`DEFAULT_SCOPES`] as owned strings.
pub fn default_scopes() -> Vec<String> {
    DEFAULT_SCOPES.iter().map(|s| s.to_string()).collect()
}

/// Trims every scope and rejects empty lists or blank entries.
///
/// # Examples
///
/// ```
/// use core_auth::types::normalize_scopes;
///
/// let scopes = normalize_scopes(vec![" User.Read ".to_string()]).unwrap();
/// assert_eq!(scopes, vec!["User.Read"]);
/// assert!(normalize_scopes(vec![]).is_err());
/// ```
pub fn normalize_scopes(scopes: Vec<String>) -> Result<Vec<String>> {
    if scopes.is_empty() {
        return Err(AuthError::InvalidConfig(
            "at least one scope is required".to_string(),
        ));
    }

    scopes
        .into_iter()
        .map(|scope| {
            let trimmed = scope.trim();
            if trimmed.is_empty() {
                Err(AuthError::InvalidConfig("scopes must not be blank".to_string()))
            } else {
                Ok(trimmed.to_string())
            }
        })
        .collect()
}

/// An (old, new) pair published whenever a provider's state actually changes.
///
/// # Examples
///
/// ```
/// use core_auth::{ProviderState, ProviderStateChange};
///
/// let change = ProviderStateChange::new(ProviderState::SignedOut, ProviderState::Loading);
/// assert_eq!(change.to_string(), "SignedOut -> Loading");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderStateChange {
    pub old_state: ProviderState,
    pub new_state: ProviderState,
}

impl ProviderStateChange {
    pub fn new(old_state: ProviderState, new_state: ProviderState) -> Self {
        Self {
            old_state,
            new_state,
        }
    }
}

impl fmt::Display for ProviderStateChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.old_state, self.new_state)
    }
}

/// OAuth 2.0 token set cached by the public client.
///
/// # Security
///
/// Tokens should be stored securely and never logged. The `Debug` implementation
/// redacts sensitive information.
///
/// # Examples
///
/// ```
/// use core_auth::OAuthTokens;
///
/// let tokens = OAuthTokens::new(
///     "access".to_string(),
///     Some("refresh".to_string()),
///     3600,
///     vec!["User.Read".to_string()],
/// );
/// assert!(!tokens.is_expired());
/// assert!(tokens.covers(&["user.read".to_string()]));
/// ```
#[derive(Clone, Serialize, Deserialize)]
pub struct OAuthTokens {
    /// The access token used for API requests
    pub access_token: String,
    /// The refresh token used to obtain new access tokens
    pub refresh_token: Option<String>,
    /// When the access token expires (UTC)
    pub expires_at: chrono::DateTime<chrono::Utc>,
    /// Scopes the access token was granted for
    #[serde(default)]
    pub scopes: Vec<String>,
}

impl OAuthTokens {
    /// Create a new token set expiring `expires_in` seconds from now.
    pub fn new(
        access_token: String,
        refresh_token: Option<String>,
        expires_in: i64,
        scopes: Vec<String>,
    ) -> Self {
        Self {
            access_token,
            refresh_token,
            expires_at: chrono::Utc::now() + chrono::Duration::seconds(expires_in),
            scopes,
        }
    }

    /// Check if the access token is expired or will expire within five minutes.
    pub fn is_expired(&self) -> bool {
        self.is_expired_with_buffer(300)
    }

    /// Check if the access token is expired with a custom buffer
    pub fn is_expired_with_buffer(&self, buffer_seconds: i64) -> bool {
        let now = chrono::Utc::now();
        let buffer = chrono::Duration::seconds(buffer_seconds);
        now >= self.expires_at - buffer
    }

    /// Whether every requested scope was granted (case-insensitive).
    pub fn covers(&self, requested: &[String]) -> bool {
        requested.iter().all(|wanted| {
            self.scopes
                .iter()
                .any(|granted| granted.eq_ignore_ascii_case(wanted))
        })
    }
}

// Custom Debug implementation to avoid logging tokens
impl fmt::Debug for OAuthTokens {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OAuthTokens")
            .field("access_token", &"[REDACTED]")
            .field(
                "refresh_token",
                &self.refresh_token.as_ref().map(|_| "[REDACTED]"),
            )
            .field("expires_at", &self.expires_at)
            .field("scopes", &self.scopes)
            .finish()
    }
}
