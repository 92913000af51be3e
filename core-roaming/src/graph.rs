//! Authenticated Microsoft Graph calls through the active provider.

use crate::error::{Result, RoamingError};
use bridge_traits::http::{HttpClient, HttpMethod, HttpRequest, HttpResponse};
use core_auth::{ProviderManager, ProviderState};
use core_runtime::config::CoreConfig;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument, warn};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Deserialize)]
struct User {
    id: String,
}

/// Graph client bound to whichever provider is currently active.
#[derive(Clone)]
pub struct GraphClient {
    http_client: Arc<dyn HttpClient>,
    providers: ProviderManager,
    base_url: String,
}

impl GraphClient {
    pub fn new(
        http_client: Arc<dyn HttpClient>,
        providers: ProviderManager,
        base_url: impl Into<String>,
    ) -> Self {
        Self {
            http_client,
            providers,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn from_config(config: &CoreConfig, providers: ProviderManager) -> Self {
        Self::new(
            config.http_client.clone(),
            providers,
            config.graph_base_url.clone(),
        )
    }

    pub fn providers(&self) -> &ProviderManager {
        &self.providers
    }

    /// Absolute URL for a path relative to the Graph version root.
    pub fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    /// Start a request for `path`.
    pub fn request(&self, method: HttpMethod, path: &str) -> HttpRequest {
        HttpRequest::new(method, self.url(path))
            .header("Accept", "application/json")
            .timeout(REQUEST_TIMEOUT)
    }

    /// Authenticate and execute `request`.
    ///
    /// Non-2xx responses are returned as-is so callers can map them.
    #[instrument(skip(self, request), fields(method = ?request.method, url = %request.url))]
    pub async fn send(&self, mut request: HttpRequest) -> Result<HttpResponse> {
        let provider = self
            .providers
            .global_provider()
            .ok_or(RoamingError::ProviderUnavailable)?;
        if provider.state() != ProviderState::SignedIn {
            debug!(state = %provider.state(), "Provider not signed in");
            return Err(RoamingError::NotAuthenticated);
        }

        provider.authenticate_request(&mut request).await?;
        let response = self.http_client.execute(request).await?;
        debug!(status = response.status, "Graph response");
        Ok(response)
    }

    /// Like [`send`](Self::send), mapping non-2xx responses to errors.
    pub async fn send_checked(&self, request: HttpRequest, resource: &str) -> Result<HttpResponse> {
        let response = self.send(request).await?;
        check_status(response, resource)
    }

    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let response = self
            .send_checked(self.request(HttpMethod::Get, path), path)
            .await?;
        Ok(response.json()?)
    }

    /// Id of the signed-in user (`GET /me`).
    pub async fn me_id(&self) -> Result<String> {
        let user: User = self.get_json("me").await?;
        Ok(user.id)
    }
}

impl std::fmt::Debug for GraphClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraphClient")
            .field("base_url", &self.base_url)
            .finish()
    }
}

/// Map a Graph response to `Ok` (2xx) or the matching error.
pub(crate) fn check_status(response: HttpResponse, resource: &str) -> Result<HttpResponse> {
    if response.is_success() {
        return Ok(response);
    }
    if response.status == 404 {
        return Err(RoamingError::RemoteNotFound(resource.to_string()));
    }

    let message = graph_error_message(&response);
    warn!(status = response.status, %message, "Graph request failed");
    Err(RoamingError::Remote {
        status: response.status,
        message,
    })
}

/// Extract `error.message` from a Graph error body, falling back to the raw text.
fn graph_error_message(response: &HttpResponse) -> String {
    #[derive(Deserialize)]
    struct Envelope {
        error: Detail,
    }
    #[derive(Deserialize)]
    struct Detail {
        message: String,
    }

    match serde_json::from_slice::<Envelope>(&response.body) {
        Ok(envelope) => envelope.error.message,
        Err(_) => String::from_utf8_lossy(&response.body).to_string(),
    }
}
