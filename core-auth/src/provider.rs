//! # Provider Contract
//!
//! [`AuthProvider`] is the capability every authentication provider exposes:
//! its current [`ProviderState`], the signed-in account, token acquisition and
//! the sign-in/sign-out operations that drive the state machine.
//!
//! ```text
//!              sign_in / try_silent_sign_in
//!  SignedOut ──────────────> Loading ──────────> SignedIn
//!      ^                        │                   │
//!      └────── no token ────────┘                   │
//!      └────────────────── sign_out ────────────────┘
//! ```
//!
//! [`ProviderCore`] holds the shared state storage and change notification so
//! concrete providers only implement token logic.

use crate::error::{AuthError, Result};
use crate::types::{ProviderState, ProviderStateChange};
use async_trait::async_trait;
use bridge_traits::http::HttpRequest;
use std::sync::RwLock;
use tokio::sync::broadcast;
use tracing::debug;

/// Header carrying the client identification string.
pub const SDK_VERSION_HEADER: &str = "SdkVersion";

const STATE_CHANNEL_CAPACITY: usize = 32;

/// Authentication provider capability.
#[async_trait]
pub trait AuthProvider: Send + Sync {
    /// Short provider name used in logs and errors.
    fn name(&self) -> &str;

    /// Current state of the provider.
    fn state(&self) -> ProviderState;

    /// Id of the signed-in account, present while `SignedIn`.
    fn current_account_id(&self) -> Option<String>;

    /// Subscribe to state changes. Only actual changes are published.
    fn subscribe(&self) -> broadcast::Receiver<ProviderStateChange>;

    /// Value appended to the `SdkVersion` header.
    fn sdk_version(&self) -> &str;

    /// Acquire an access token, silently first and then interactively unless
    /// `silent_only` is set. `Ok(None)` means no token could be obtained
    /// without an error (no account, interaction required, user cancelled).
    async fn get_token(&self, silent_only: bool) -> Result<Option<String>>;

    /// Interactive sign-in. A no-op unless the provider is `SignedOut`.
    ///
    /// Returns whether the provider ended up signed in.
    async fn sign_in(&self) -> Result<bool>;

    /// Sign out. Always reaches `SignedOut`; backend revocation is best-effort.
    async fn sign_out(&self);

    /// Attempt a silent sign-in. Never fails; returns whether it signed in.
    async fn try_silent_sign_in(&self) -> bool;

    /// Decorate an outgoing request with the `SdkVersion` header and a
    /// bearer token.
    async fn authenticate_request(&self, request: &mut HttpRequest) -> Result<()> {
        add_sdk_version(request, self.sdk_version());

        match self.get_token(false).await? {
            Some(token) => {
                request.set_header("Authorization", format!("Bearer {}", token));
                Ok(())
            }
            None => Err(AuthError::NotAuthenticated),
        }
    }
}

/// Adds `sdk_version` to the request's `SdkVersion` header.
///
/// Existing values are kept after ours; the value is never added twice.
///
/// # Examples
///
/// ```
/// use bridge_traits::http::{HttpMethod, HttpRequest};
/// use core_auth::provider::add_sdk_version;
///
/// let mut request = HttpRequest::new(HttpMethod::Get, "https://graph.microsoft.com/v1.0/me")
///     .header("SdkVersion", "graph-dotnet/5.0");
/// add_sdk_version(&mut request, "graph-toolkit-rs/0.1.0");
/// add_sdk_version(&mut request, "graph-toolkit-rs/0.1.0");
///
/// assert_eq!(
///     request.header_value("SdkVersion"),
///     Some("graph-toolkit-rs/0.1.0, graph-dotnet/5.0")
/// );
/// ```
pub fn add_sdk_version(request: &mut HttpRequest, sdk_version: &str) {
    let value = match request.header_value(SDK_VERSION_HEADER) {
        Some(existing) if existing.split(',').any(|part| part.trim() == sdk_version) => return,
        Some(existing) if !existing.trim().is_empty() => {
            format!("{}, {}", sdk_version, existing.trim())
        }
        _ => sdk_version.to_string(),
    };
    request.set_header(SDK_VERSION_HEADER, value);
}

/// State storage and change notification shared by all providers.
pub struct ProviderCore {
    name: &'static str,
    sdk_version: String,
    state: RwLock<ProviderState>,
    notifier: broadcast::Sender<ProviderStateChange>,
}

impl ProviderCore {
    pub fn new(name: &'static str, initial: ProviderState, sdk_version: impl Into<String>) -> Self {
        let (notifier, _) = broadcast::channel(STATE_CHANNEL_CAPACITY);
        Self {
            name,
            sdk_version: sdk_version.into(),
            state: RwLock::new(initial),
            notifier,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn sdk_version(&self) -> &str {
        &self.sdk_version
    }

    pub fn state(&self) -> ProviderState {
        match self.state.read() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    /// Moves to `new_state` and publishes the change.
    ///
    /// Returns `false` (and publishes nothing) when the state is unchanged.
    pub fn set_state(&self, new_state: ProviderState) -> bool {
        self.apply(None, new_state)
    }

    /// Moves from `expected` to `new_state`; does nothing in any other state.
    pub fn transition(&self, expected: ProviderState, new_state: ProviderState) -> bool {
        self.apply(Some(expected), new_state)
    }

    fn apply(&self, expected: Option<ProviderState>, new_state: ProviderState) -> bool {
        let mut guard = match self.state.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        let old_state = *guard;
        if old_state == new_state || expected.map_or(false, |expected| expected != old_state) {
            return false;
        }
        *guard = new_state;

        debug!(
            provider = self.name,
            old_state = %old_state,
            new_state = %new_state,
            "Provider state changed"
        );
        // Sent under the lock so subscribers observe changes in order.
        let _ = self
            .notifier
            .send(ProviderStateChange::new(old_state, new_state));
        true
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ProviderStateChange> {
        self.notifier.subscribe()
    }
}

impl std::fmt::Debug for ProviderCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderCore")
            .field("name", &self.name)
            .field("state", &self.state())
            .finish()
    }
}
