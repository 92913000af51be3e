//! OAuth 2.0 Public Client with PKCE Support
//!
//! [`OAuthPublicClient`] implements [`PublicClientApplication`] against the
//! Microsoft identity platform (RFC 6749 authorization code grant with
//! RFC 7636 PKCE), caching accounts and tokens in the host secure store.
//!
//! # Flows
//!
//! - **Silent**: cached unexpired access token covering the scopes, else a
//!   refresh-token grant. A rejected refresh token surfaces as
//!   [`AuthError::InteractionRequired`].
//! - **Interactive**: the host [`AuthorizationPrompt`] shows the authorize URL
//!   (system browser, embedded web view) and returns the redirect. `None`
//!   means the user cancelled.
//!
//! # Security
//!
//! - Uses PKCE with the S256 challenge method
//! - Validates the state parameter to prevent CSRF attacks
//! - Never logs sensitive values (tokens, codes, verifiers)

use crate::error::{AuthError, Result};
use crate::providers::msal::{AuthenticationResult, MsalAccount, PublicClientApplication};
use crate::token_store::TokenStore;
use crate::types::OAuthTokens;
use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use bridge_traits::http::{HttpClient, HttpMethod, HttpRequest, HttpResponse};
use bytes::Bytes;
use rand::Rng;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};
use url::Url;

/// Microsoft identity platform host.
pub const DEFAULT_AUTHORITY_HOST: &str = "https://login.microsoftonline.com";

/// Scopes always requested so the response carries an id_token and a refresh token.
const OIDC_SCOPES: &[&str] = &["openid", "profile", "offline_access"];

/// Token endpoint error codes that mean the user must sign in again.
const INTERACTION_ERRORS: &[&str] = &["invalid_grant", "interaction_required", "consent_required"];

const MAX_REFRESH_ATTEMPTS: u32 = 3;

/// Public client registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OAuthClientConfig {
    pub client_id: String,
    /// Tenant id or one of `common`, `organizations`, `consumers`
    pub tenant: String,
    pub redirect_uri: String,
    /// Defaults to [`DEFAULT_AUTHORITY_HOST`]
    pub authority_host: String,
}

impl OAuthClientConfig {
    pub fn authorize_endpoint(&self) -> String {
        format!("{}/{}/oauth2/v2.0/authorize", self.authority_host, self.tenant)
    }

    pub fn token_endpoint(&self) -> String {
        format!("{}/{}/oauth2/v2.0/token", self.authority_host, self.tenant)
    }

    fn environment(&self) -> String {
        Url::parse(&self.authority_host)
            .ok()
            .and_then(|url| url.host_str().map(str::to_string))
            .unwrap_or_else(|| self.authority_host.clone())
    }
}

/// Redirect parameters returned by the authorization endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizationResponse {
    pub code: String,
    pub state: String,
}

impl AuthorizationResponse {
    /// Parses a redirect URL.
    ///
    /// `Ok(None)` when the user declined (`error=access_denied`); other
    /// `error` values are failures.
    ///
    /// # Examples
    ///
    /// ```
    /// use core_auth::oauth::AuthorizationResponse;
    ///
    /// let response = AuthorizationResponse::from_redirect("http://localhost/cb?code=abc&state=xyz")
    ///     .unwrap()
    ///     .unwrap();
    /// assert_eq!(response.code, "abc");
    ///
    /// let declined = AuthorizationResponse::from_redirect("http://localhost/cb?error=access_denied");
    /// assert!(declined.unwrap().is_none());
    /// ```
    pub fn from_redirect(redirect: &str) -> Result<Option<Self>> {
        let url = Url::parse(redirect)
            .map_err(|e| AuthError::failed("msal", format!("Invalid redirect URL: {}", e)))?;

        let mut code = None;
        let mut state = None;
        let mut error = None;
        let mut description = None;
        for (key, value) in url.query_pairs() {
            match key.as_ref() {
                "code" => code = Some(value.into_owned()),
                "state" => state = Some(value.into_owned()),
                "error" => error = Some(value.into_owned()),
                "error_description" => description = Some(value.into_owned()),
                _ => {}
            }
        }

        match (error.as_deref(), code) {
            (Some("access_denied"), _) => Ok(None),
            (Some(error), _) => Err(AuthError::failed(
                "msal",
                format!("{}: {}", error, description.unwrap_or_default()),
            )),
            (None, Some(code)) => Ok(Some(Self {
                code,
                state: state.unwrap_or_default(),
            })),
            (None, None) => Err(AuthError::failed("msal", "Redirect carried no authorization code")),
        }
    }
}

/// Host UI that lets the user authorize the application.
#[async_trait]
pub trait AuthorizationPrompt: Send + Sync {
    /// Show `authorize_url` and wait for the redirect to `redirect_uri`.
    /// Returns `None` when the user cancels.
    async fn authorize(
        &self,
        authorize_url: &str,
        redirect_uri: &str,
    ) -> Result<Option<AuthorizationResponse>>;
}

/// PKCE (Proof Key for Code Exchange) verifier.
///
/// The verifier must be kept secret and never transmitted to the authorization
/// server. Only the challenge (derived from the verifier) is sent during
/// authorization.
#[derive(Debug, Clone)]
pub struct PkceVerifier {
    verifier: String,
    state: String,
}

impl PkceVerifier {
    /// A 32-byte code verifier and 16-byte state, both base64-url without padding.
    pub fn new() -> Self {
        let mut rng = rand::thread_rng();

        let mut verifier_bytes = [0u8; 32];
        rng.fill(&mut verifier_bytes);
        let verifier = URL_SAFE_NO_PAD.encode(verifier_bytes);

        let mut state_bytes = [0u8; 16];
        rng.fill(&mut state_bytes);
        let state = URL_SAFE_NO_PAD.encode(state_bytes);

        Self { verifier, state }
    }

    pub fn verifier(&self) -> &str {
        &self.verifier
    }

    pub fn state(&self) -> &str {
        &self.state
    }

    /// BASE64URL(SHA256(code_verifier))
    pub fn challenge(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.verifier.as_bytes());
        URL_SAFE_NO_PAD.encode(hasher.finalize())
    }
}

impl Default for PkceVerifier {
    fn default() -> Self {
        Self::new()
    }
}

/// Built-in [`PublicClientApplication`].
pub struct OAuthPublicClient {
    config: OAuthClientConfig,
    http_client: Arc<dyn HttpClient>,
    token_store: TokenStore,
    prompt: Arc<dyn AuthorizationPrompt>,
}

impl OAuthPublicClient {
    pub fn new(
        config: OAuthClientConfig,
        http_client: Arc<dyn HttpClient>,
        token_store: TokenStore,
        prompt: Arc<dyn AuthorizationPrompt>,
    ) -> Self {
        Self {
            config,
            http_client,
            token_store,
            prompt,
        }
    }

    fn request_scopes(scopes: &[String]) -> Vec<String> {
        let mut all: Vec<String> = scopes.to_vec();
        for scope in OIDC_SCOPES {
            if !all.iter().any(|s| s.eq_ignore_ascii_case(scope)) {
                all.push(scope.to_string());
            }
        }
        all
    }

    /// Build the authorization URL with PKCE challenge.
    #[instrument(skip(self, verifier, login_hint))]
    pub fn build_auth_url(
        &self,
        scopes: &[String],
        verifier: &PkceVerifier,
        login_hint: Option<&str>,
    ) -> Result<String> {
        let mut url = Url::parse(&self.config.authorize_endpoint())
            .map_err(|e| AuthError::InvalidConfig(format!("Invalid authority: {}", e)))?;

        {
            let mut query = url.query_pairs_mut();
            query.append_pair("client_id", &self.config.client_id);
            query.append_pair("redirect_uri", &self.config.redirect_uri);
            query.append_pair("response_type", "code");
            query.append_pair("response_mode", "query");
            query.append_pair("scope", &Self::request_scopes(scopes).join(" "));
            query.append_pair("state", verifier.state());
            query.append_pair("code_challenge", &verifier.challenge());
            query.append_pair("code_challenge_method", "S256");
            match login_hint {
                Some(hint) => query.append_pair("login_hint", hint),
                None => query.append_pair("prompt", "select_account"),
            };
        }

        debug!("Built authorization URL");
        Ok(url.to_string())
    }

    /// Exchange an authorization code for tokens, after verifying `state`.
    #[instrument(skip(self, code, state, verifier))]
    pub async fn exchange_code(
        &self,
        code: &str,
        state: &str,
        verifier: &PkceVerifier,
        scopes: &[String],
    ) -> Result<AuthenticationResult> {
        if state != verifier.state() {
            warn!("OAuth state mismatch");
            return Err(AuthError::StateMismatch {
                expected: verifier.state().to_string(),
                actual: state.to_string(),
            });
        }

        let scope = Self::request_scopes(scopes).join(" ");
        let params = [
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", self.config.redirect_uri.as_str()),
            ("client_id", self.config.client_id.as_str()),
            ("code_verifier", verifier.verifier()),
            ("scope", scope.as_str()),
        ];

        debug!("Exchanging authorization code for tokens");
        let response = self.post_token_request(&params).await?;
        if !response.is_success() {
            let error = TokenErrorResponse::parse(&response);
            warn!(status = response.status, error = %error.error, "Code exchange failed");
            return Err(AuthError::failed(
                "msal",
                format!("Token endpoint returned {}: {}", response.status, error),
            ));
        }

        let token_response: TokenResponse = response
            .json()
            .map_err(|e| AuthError::Serialization(format!("Invalid token response: {}", e)))?;
        let account = self.account_from_id_token(token_response.id_token.as_deref())?;
        let tokens = token_response.into_tokens(scopes, None);

        self.token_store.store(&account, &tokens).await?;
        info!(account = %account.home_account_id, "Signed in interactively");
        Ok(Self::result(account, tokens))
    }

    /// Refresh an access token, retrying server errors with exponential backoff.
    #[instrument(skip(self, refresh_token))]
    pub async fn refresh_access_token(
        &self,
        refresh_token: &str,
        scopes: &[String],
    ) -> Result<OAuthTokens> {
        let scope = Self::request_scopes(scopes).join(" ");
        let params = [
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
            ("client_id", self.config.client_id.as_str()),
            ("scope", scope.as_str()),
        ];

        let mut attempts = 0;
        loop {
            attempts += 1;
            let response = self.post_token_request(&params).await?;

            if response.is_success() {
                let token_response: TokenResponse = response.json().map_err(|e| {
                    AuthError::Serialization(format!("Invalid token response: {}", e))
                })?;
                debug!(expires_in = token_response.expires_in, "Refreshed access token");
                return Ok(token_response.into_tokens(scopes, Some(refresh_token)));
            }

            let status = response.status;
            if response.is_client_error() {
                let error = TokenErrorResponse::parse(&response);
                if INTERACTION_ERRORS.contains(&error.error.as_str()) {
                    debug!(error = %error.error, "Refresh token rejected");
                    return Err(AuthError::InteractionRequired(error.to_string()));
                }
                warn!(status = status, error = %error.error, "Token refresh failed without retry");
                return Err(AuthError::TokenRefreshFailed(format!(
                    "Token endpoint returned {}: {}",
                    status, error
                )));
            }

            if attempts >= MAX_REFRESH_ATTEMPTS {
                return Err(AuthError::TokenRefreshFailed(format!(
                    "Token refresh failed after {} attempts (last status {})",
                    attempts, status
                )));
            }

            let delay = Duration::from_millis(100 * 2u64.pow(attempts - 1));
            warn!(
                status = status,
                attempts = attempts,
                delay_ms = delay.as_millis() as u64,
                "Token refresh failed, retrying"
            );
            tokio::time::sleep(delay).await;
        }
    }

    async fn post_token_request(&self, params: &[(&str, &str)]) -> Result<HttpResponse> {
        let encoded = serde_urlencoded::to_string(params)
            .map_err(|e| AuthError::Serialization(format!("Failed to encode token request: {}", e)))?;

        let request = HttpRequest::new(HttpMethod::Post, self.config.token_endpoint())
            .header("Content-Type", "application/x-www-form-urlencoded")
            .body(Bytes::from(encoded));

        self.http_client
            .execute(request)
            .await
            .map_err(|e| AuthError::Network(e.to_string()))
    }

    fn account_from_id_token(&self, id_token: Option<&str>) -> Result<MsalAccount> {
        let id_token = id_token
            .ok_or_else(|| AuthError::failed("msal", "Token response carried no id_token"))?;
        let claims = IdTokenClaims::decode(id_token)?;

        let home_account_id = match &claims.tid {
            Some(tid) => format!("{}.{}", claims.oid, tid),
            None => claims.oid.clone(),
        };
        Ok(MsalAccount {
            home_account_id,
            username: claims
                .preferred_username
                .or(claims.email)
                .unwrap_or_default(),
            environment: self.config.environment(),
            tenant_id: claims.tid,
        })
    }

    fn result(account: MsalAccount, tokens: OAuthTokens) -> AuthenticationResult {
        AuthenticationResult {
            access_token: tokens.access_token,
            account,
            expires_on: tokens.expires_at,
            scopes: tokens.scopes,
        }
    }
}

#[async_trait]
impl PublicClientApplication for OAuthPublicClient {
    async fn get_accounts(&self) -> Result<Vec<MsalAccount>> {
        self.token_store.accounts().await
    }

    async fn acquire_token_silent(
        &self,
        scopes: &[String],
        account: &MsalAccount,
    ) -> Result<AuthenticationResult> {
        let entry = self
            .token_store
            .load(&account.home_account_id)
            .await?
            .ok_or_else(|| AuthError::InteractionRequired("no cached tokens".to_string()))?;

        if !entry.tokens.is_expired() && entry.tokens.covers(scopes) {
            debug!(account = %account.home_account_id, "Using cached access token");
            return Ok(Self::result(entry.account, entry.tokens));
        }

        let refresh_token = entry
            .tokens
            .refresh_token
            .clone()
            .ok_or_else(|| AuthError::InteractionRequired("no refresh token".to_string()))?;

        let tokens = self.refresh_access_token(&refresh_token, scopes).await?;
        self.token_store.store(&entry.account, &tokens).await?;
        Ok(Self::result(entry.account, tokens))
    }

    async fn acquire_token_interactive(
        &self,
        scopes: &[String],
        login_hint: Option<String>,
    ) -> Result<AuthenticationResult> {
        let verifier = PkceVerifier::new();
        let url = self.build_auth_url(scopes, &verifier, login_hint.as_deref())?;

        let response = self
            .prompt
            .authorize(&url, &self.config.redirect_uri)
            .await?
            .ok_or(AuthError::Cancelled)?;

        self.exchange_code(&response.code, &response.state, &verifier, scopes)
            .await
    }

    async fn remove_account(&self, account: &MsalAccount) -> Result<()> {
        self.token_store.remove(&account.home_account_id).await
    }
}

/// Token response from the token endpoint.
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: Option<String>,
    #[serde(default = "default_expires_in")]
    expires_in: i64,
    scope: Option<String>,
    id_token: Option<String>,
}

fn default_expires_in() -> i64 {
    3600
}

impl TokenResponse {
    fn into_tokens(self, requested: &[String], previous_refresh: Option<&str>) -> OAuthTokens {
        let scopes = match &self.scope {
            Some(granted) => granted.split_whitespace().map(str::to_string).collect(),
            None => requested.to_vec(),
        };
        OAuthTokens::new(
            self.access_token,
            self.refresh_token
                .or_else(|| previous_refresh.map(str::to_string)),
            self.expires_in,
            scopes,
        )
    }
}

#[derive(Debug, Default, Deserialize)]
struct TokenErrorResponse {
    #[serde(default)]
    error: String,
    #[serde(default)]
    error_description: Option<String>,
}

impl TokenErrorResponse {
    fn parse(response: &HttpResponse) -> Self {
        response.json().unwrap_or_else(|_| Self {
            error: format!("http_{}", response.status),
            error_description: None,
        })
    }
}

impl std::fmt::Display for TokenErrorResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.error_description {
            Some(description) => write!(f, "{} ({})", self.error, description),
            None => f.write_str(&self.error),
        }
    }
}

#[derive(Debug, Deserialize)]
struct IdTokenClaims {
    oid: String,
    tid: Option<String>,
    preferred_username: Option<String>,
    email: Option<String>,
}

impl IdTokenClaims {
    /// Reads the payload segment. The token came straight from the token
    /// endpoint over TLS, so the signature is not checked.
    fn decode(id_token: &str) -> Result<Self> {
        let payload = id_token
            .split('.')
            .nth(1)
            .ok_or_else(|| AuthError::failed("msal", "Malformed id_token"))?;
        let bytes = URL_SAFE_NO_PAD
            .decode(payload.trim_end_matches('='))
            .map_err(|e| AuthError::failed("msal", format!("Malformed id_token: {}", e)))?;
        serde_json::from_slice(&bytes)
            .map_err(|e| AuthError::Serialization(format!("Invalid id_token claims: {}", e)))
    }
}
