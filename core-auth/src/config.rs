//! Declarative provider selection.
//!
//! A [`ProviderConfig`] names one of the known provider variants; [`build`]
//! matches on it and wires the provider to the host capabilities in
//! [`ProviderDeps`].
//!
//! [`build`]: ProviderConfig::build

use crate::error::{AuthError, Result};
use crate::oauth::{AuthorizationPrompt, OAuthClientConfig, OAuthPublicClient, DEFAULT_AUTHORITY_HOST};
use crate::provider::AuthProvider;
use crate::providers::mock::{MockProvider, DEFAULT_SIGN_IN_DELAY};
use crate::providers::msal::{MsalProvider, PublicClientApplication};
use crate::providers::windows::{AccountManager, WebAccountProviderType, WindowsProvider};
use crate::token_store::TokenStore;
use crate::types::{default_scopes, normalize_scopes};
use bridge_traits::{HttpClient, SecureStore, SettingsStore};
use core_runtime::config::CoreConfig;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockConfig {
    pub signed_in: bool,
    pub sign_in_delay: Duration,
}

impl Default for MockConfig {
    fn default() -> Self {
        Self {
            signed_in: true,
            sign_in_delay: DEFAULT_SIGN_IN_DELAY,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MsalConfig {
    pub client_id: String,
    pub tenant: String,
    pub redirect_uri: String,
    pub authority_host: String,
    pub scopes: Vec<String>,
    /// Attempt a silent sign-in right after construction
    pub auto_sign_in: bool,
}

impl MsalConfig {
    pub fn new(client_id: impl Into<String>, redirect_uri: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            tenant: "common".to_string(),
            redirect_uri: redirect_uri.into(),
            authority_host: DEFAULT_AUTHORITY_HOST.to_string(),
            scopes: default_scopes(),
            auto_sign_in: true,
        }
    }

    fn client_config(&self) -> OAuthClientConfig {
        OAuthClientConfig {
            client_id: self.client_id.clone(),
            tenant: self.tenant.clone(),
            redirect_uri: self.redirect_uri.clone(),
            authority_host: self.authority_host.trim_end_matches('/').to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowsConfig {
    /// Required unless only personal accounts are offered
    pub client_id: Option<String>,
    pub account_providers: WebAccountProviderType,
    pub scopes: Vec<String>,
    pub auto_sign_in: bool,
}

impl Default for WindowsConfig {
    fn default() -> Self {
        Self {
            client_id: None,
            account_providers: WebAccountProviderType::Msa,
            scopes: default_scopes(),
            auto_sign_in: true,
        }
    }
}

/// The known provider variants.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderConfig {
    Mock(MockConfig),
    Msal(MsalConfig),
    Windows(WindowsConfig),
}

/// Host capabilities a provider may need.
#[derive(Clone)]
pub struct ProviderDeps {
    pub http_client: Arc<dyn HttpClient>,
    pub secure_store: Arc<dyn SecureStore>,
    pub settings_store: Arc<dyn SettingsStore>,
    pub sdk_version: String,
    /// Browser or web view used by the built-in OAuth client
    pub authorization_prompt: Option<Arc<dyn AuthorizationPrompt>>,
    /// Replaces the built-in OAuth client
    pub public_client: Option<Arc<dyn PublicClientApplication>>,
    pub account_manager: Option<Arc<dyn AccountManager>>,
}

impl ProviderDeps {
    pub fn from_config(config: &CoreConfig) -> Self {
        Self {
            http_client: config.http_client.clone(),
            secure_store: config.secure_store.clone(),
            settings_store: config.settings_store.clone(),
            sdk_version: config.sdk_version.clone(),
            authorization_prompt: None,
            public_client: None,
            account_manager: None,
        }
    }

    pub fn with_authorization_prompt(mut self, prompt: Arc<dyn AuthorizationPrompt>) -> Self {
        self.authorization_prompt = Some(prompt);
        self
    }

    pub fn with_public_client(mut self, client: Arc<dyn PublicClientApplication>) -> Self {
        self.public_client = Some(client);
        self
    }

    pub fn with_account_manager(mut self, manager: Arc<dyn AccountManager>) -> Self {
        self.account_manager = Some(manager);
        self
    }
}

fn missing(capability: &str, message: &str) -> AuthError {
    AuthError::CapabilityMissing {
        capability: capability.to_string(),
        message: message.to_string(),
    }
}

impl ProviderConfig {
    /// Check the configuration without touching any host capability.
    pub fn validate(&self) -> Result<()> {
        match self {
            ProviderConfig::Mock(_) => Ok(()),
            ProviderConfig::Msal(config) => {
                if config.client_id.trim().is_empty() {
                    return Err(AuthError::InvalidConfig("client id is required".into()));
                }
                if config.tenant.trim().is_empty() {
                    return Err(AuthError::InvalidConfig("tenant is required".into()));
                }
                url::Url::parse(&config.redirect_uri).map_err(|e| {
                    AuthError::InvalidConfig(format!("invalid redirect URI: {}", e))
                })?;
                url::Url::parse(&config.authority_host).map_err(|e| {
                    AuthError::InvalidConfig(format!("invalid authority host: {}", e))
                })?;
                normalize_scopes(config.scopes.clone()).map(|_| ())
            }
            ProviderConfig::Windows(config) => {
                if config.account_providers.includes_aad()
                    && config.client_id.as_deref().map_or(true, |id| id.trim().is_empty())
                {
                    return Err(AuthError::InvalidConfig(
                        "a client id is required for work or school accounts".into(),
                    ));
                }
                normalize_scopes(config.scopes.clone()).map(|_| ())
            }
        }
    }

    /// Construct the provider, then attempt silent sign-in when configured.
    pub async fn build(self, deps: ProviderDeps) -> Result<Arc<dyn AuthProvider>> {
        self.validate()?;

        let (provider, auto_sign_in): (Arc<dyn AuthProvider>, bool) = match self {
            ProviderConfig::Mock(config) => {
                let provider: Arc<dyn AuthProvider> = Arc::new(MockProvider::new(
                    config.signed_in,
                    config.sign_in_delay,
                    deps.sdk_version,
                ));
                (provider, false)
            }
            ProviderConfig::Msal(config) => {
                let client: Arc<dyn PublicClientApplication> = match deps.public_client {
                    Some(client) => client,
                    None => {
                        let prompt = deps.authorization_prompt.ok_or_else(|| {
                            missing(
                                "authorization_prompt",
                                "MSAL sign-in needs a host prompt or a public client",
                            )
                        })?;
                        Arc::new(OAuthPublicClient::new(
                            config.client_config(),
                            deps.http_client,
                            TokenStore::new(deps.secure_store),
                            prompt,
                        ))
                    }
                };
                let provider: Arc<dyn AuthProvider> =
                    Arc::new(MsalProvider::new(client, config.scopes, deps.sdk_version)?);
                (provider, config.auto_sign_in)
            }
            ProviderConfig::Windows(config) => {
                let manager = deps.account_manager.ok_or_else(|| {
                    missing("account_manager", "Windows sign-in needs the OS account manager")
                })?;
                let provider: Arc<dyn AuthProvider> = Arc::new(WindowsProvider::new(
                    manager,
                    deps.settings_store,
                    config.client_id,
                    config.account_providers,
                    config.scopes,
                    deps.sdk_version,
                )?);
                (provider, config.auto_sign_in)
            }
        };

        info!(provider = provider.name(), "Provider created");
        if auto_sign_in {
            provider.try_silent_sign_in().await;
        }
        Ok(provider)
    }
}
