//! Mock provider for samples and tests.
//!
//! Signs in without a backend and routes Graph requests through the public
//! sandbox proxy, which answers with demo tenant data.

use crate::error::{AuthError, Result};
use crate::provider::{add_sdk_version, AuthProvider, ProviderCore};
use crate::types::{ProviderState, ProviderStateChange};
use async_trait::async_trait;
use bridge_traits::http::HttpRequest;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, info};

/// Token returned by [`MockProvider::get_token`].
pub const MOCK_TOKEN: &str = "<mock-provider-token>";

/// Account id reported while signed in.
pub const MOCK_ACCOUNT_ID: &str = "mock-account-id";

/// Bearer value understood by the sandbox proxy.
pub const MOCK_AUTHORIZATION: &str = "Bearer {token:https://graph.microsoft.com/}";

/// Graph sandbox proxy endpoint.
pub const GRAPH_PROXY_URL: &str = "https://proxy.apisandbox.msdn.microsoft.com/svc";

/// Simulated sign-in latency used by [`MockConfig::default`](crate::config::MockConfig).
pub const DEFAULT_SIGN_IN_DELAY: Duration = Duration::from_millis(500);

/// Provider that is always able to sign in.
///
/// # Examples
///
/// ```
/// use core_auth::{AuthProvider, MockProvider, ProviderState};
/// use std::time::Duration;
///
/// # #[tokio::main]
/// # async fn main() {
/// let provider = MockProvider::new(false, Duration::ZERO, "graph-toolkit-rs/0.1.0");
/// assert!(provider.sign_in().await.unwrap());
/// assert_eq!(provider.state(), ProviderState::SignedIn);
/// # }
/// ```
pub struct MockProvider {
    core: ProviderCore,
    sign_in_delay: Duration,
}

impl MockProvider {
    pub fn new(signed_in: bool, sign_in_delay: Duration, sdk_version: impl Into<String>) -> Self {
        let initial = if signed_in {
            ProviderState::SignedIn
        } else {
            ProviderState::SignedOut
        };
        Self {
            core: ProviderCore::new("mock", initial, sdk_version),
            sign_in_delay,
        }
    }

    /// Rewrites `url` to go through the sandbox proxy. Already proxied URLs are
    /// returned unchanged.
    pub fn proxy_url(url: &str) -> String {
        if url.starts_with(GRAPH_PROXY_URL) {
            return url.to_string();
        }
        let encoded: String = url::form_urlencoded::byte_serialize(url.as_bytes()).collect();
        format!("{}?url={}", GRAPH_PROXY_URL, encoded)
    }
}

#[async_trait]
impl AuthProvider for MockProvider {
    fn name(&self) -> &str {
        self.core.name()
    }

    fn state(&self) -> ProviderState {
        self.core.state()
    }

    fn current_account_id(&self) -> Option<String> {
        (self.core.state() == ProviderState::SignedIn).then(|| MOCK_ACCOUNT_ID.to_string())
    }

    fn subscribe(&self) -> broadcast::Receiver<ProviderStateChange> {
        self.core.subscribe()
    }

    fn sdk_version(&self) -> &str {
        self.core.sdk_version()
    }

    async fn get_token(&self, _silent_only: bool) -> Result<Option<String>> {
        Ok((self.core.state() == ProviderState::SignedIn).then(|| MOCK_TOKEN.to_string()))
    }

    async fn sign_in(&self) -> Result<bool> {
        let state = self.core.state();
        if state != ProviderState::SignedOut {
            return Ok(state == ProviderState::SignedIn);
        }

        self.core.set_state(ProviderState::Loading);
        if !self.sign_in_delay.is_zero() {
            tokio::time::sleep(self.sign_in_delay).await;
        }
        if !self.core.transition(ProviderState::Loading, ProviderState::SignedIn) {
            debug!("Mock sign-in superseded by sign-out");
            return Ok(false);
        }
        info!("Mock provider signed in");
        Ok(true)
    }

    async fn sign_out(&self) {
        self.core.set_state(ProviderState::SignedOut);
        info!("Mock provider signed out");
    }

    async fn try_silent_sign_in(&self) -> bool {
        if self.core.state() == ProviderState::SignedIn {
            return true;
        }
        // Nothing is cached, so a silent attempt always ends signed out.
        self.core.set_state(ProviderState::Loading);
        self.core.set_state(ProviderState::SignedOut);
        false
    }

    async fn authenticate_request(&self, request: &mut HttpRequest) -> Result<()> {
        add_sdk_version(request, self.core.sdk_version());

        if self.core.state() != ProviderState::SignedIn {
            return Err(AuthError::NotAuthenticated);
        }

        request.set_header("Authorization", MOCK_AUTHORIZATION);
        request.url = Self::proxy_url(&request.url);
        debug!(url = %request.url, "Routed request through Graph proxy");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bridge_traits::http::HttpMethod;
    use std::sync::Arc;

    #[test]
    fn test_proxy_url_encodes_once() {
        let once = MockProvider::proxy_url("https://graph.microsoft.com/v1.0/me?$select=id");
        assert_eq!(
            once,
            "https://proxy.apisandbox.msdn.microsoft.com/svc?url=https%3A%2F%2Fgraph.microsoft.com%2Fv1.0%2Fme%3F%24select%3Did"
        );
        assert_eq!(MockProvider::proxy_url(&once), once);
    }

    #[tokio::test]
    async fn test_token_only_while_signed_in() {
        let provider = MockProvider::new(false, Duration::ZERO, "sdk/1");
        assert!(provider.get_token(false).await.unwrap().is_none());
        assert!(provider.current_account_id().is_none());

        provider.sign_in().await.unwrap();
        assert_eq!(provider.get_token(true).await.unwrap().as_deref(), Some(MOCK_TOKEN));
        assert_eq!(provider.current_account_id().as_deref(), Some(MOCK_ACCOUNT_ID));
    }

    #[tokio::test]
    async fn test_authenticate_request_when_signed_out() {
        let provider = MockProvider::new(false, Duration::ZERO, "sdk/1");
        let mut request = HttpRequest::new(HttpMethod::Get, "https://graph.microsoft.com/v1/me");

        let result = provider.authenticate_request(&mut request).await;

        assert!(matches!(result, Err(AuthError::NotAuthenticated)));
        assert!(request.header_value("Authorization").is_none());
        assert_eq!(request.url, "https://graph.microsoft.com/v1/me");
    }

    #[tokio::test]
    async fn test_sign_out_during_sign_in_delay() {
        let provider = Arc::new(MockProvider::new(false, Duration::from_millis(100), "sdk/1"));

        let pending = tokio::spawn({
            let provider = provider.clone();
            async move { provider.sign_in().await }
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(provider.state(), ProviderState::Loading);

        provider.sign_out().await;
        let signed_in = pending.await.unwrap().unwrap();

        assert!(!signed_in);
        assert_eq!(provider.state(), ProviderState::SignedOut);
        assert!(provider.get_token(true).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_try_silent_sign_in_when_signed_out() {
        let provider = MockProvider::new(false, Duration::ZERO, "sdk/1");
        let mut rx = provider.subscribe();

        assert!(!provider.try_silent_sign_in().await);

        assert_eq!(rx.try_recv().unwrap().new_state, ProviderState::Loading);
        assert_eq!(rx.try_recv().unwrap().new_state, ProviderState::SignedOut);
        assert_eq!(provider.state(), ProviderState::SignedOut);
    }
}
