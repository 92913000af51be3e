//! Windows account manager provider.
//!
//! [`AccountManager`] mirrors the OS web account manager: provider and account
//! lookup, silent token requests, the interactive account settings pane and
//! account sign-out. The host implementation owns dispatching the interactive
//! call onto the UI thread.
//!
//! The signed-in account is remembered in the app-local settings store so a
//! later process can sign in silently.

use crate::error::{AuthError, Result};
use crate::flow::{AccountProvider, Acquisition, NoTokenReason, TokenBackend, TokenGrant};
use async_trait::async_trait;
use bridge_traits::storage::SettingsStore;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

pub const SETTINGS_KEY_ACCOUNT_ID: &str = "WindowsProvider_AccountId";
pub const SETTINGS_KEY_PROVIDER_ID: &str = "WindowsProvider_ProviderId";
pub const SETTINGS_KEY_AUTHORITY: &str = "WindowsProvider_Authority";

/// Web account provider id shared by personal and work accounts.
pub const MICROSOFT_PROVIDER_ID: &str = "https://login.microsoft.com";
pub const MSA_AUTHORITY: &str = "consumers";
pub const AAD_AUTHORITY: &str = "organizations";

/// Which account types the sign-in pane offers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum WebAccountProviderType {
    /// Personal and work/school accounts
    #[default]
    Any,
    /// Personal Microsoft accounts
    Msa,
    /// Work or school accounts
    Aad,
}

impl WebAccountProviderType {
    /// Authorities to offer, in display order.
    pub fn authorities(self) -> &'static [&'static str] {
        match self {
            WebAccountProviderType::Any => &[MSA_AUTHORITY, AAD_AUTHORITY],
            WebAccountProviderType::Msa => &[MSA_AUTHORITY],
            WebAccountProviderType::Aad => &[AAD_AUTHORITY],
        }
    }

    pub fn includes_aad(self) -> bool {
        self != WebAccountProviderType::Msa
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebAccountProvider {
    pub id: String,
    pub authority: String,
    pub display_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebAccount {
    pub id: String,
    pub user_name: String,
    pub provider: WebAccountProvider,
}

/// Status of a web token request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebTokenStatus {
    Success,
    UserCancel,
    UserInteractionRequired,
    AccountSwitch,
    ProviderError,
}

#[derive(Clone)]
pub struct WebTokenResponse {
    pub token: String,
    /// The account the token was issued for, when the broker reports it
    pub account: Option<WebAccount>,
}

impl std::fmt::Debug for WebTokenResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebTokenResponse")
            .field("token", &"[REDACTED]")
            .field("account", &self.account)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebProviderError {
    pub code: u32,
    pub message: String,
}

#[derive(Debug, Clone)]
pub struct WebTokenResult {
    pub status: WebTokenStatus,
    pub responses: Vec<WebTokenResponse>,
    pub error: Option<WebProviderError>,
}

impl WebTokenResult {
    pub fn success(token: impl Into<String>, account: Option<WebAccount>) -> Self {
        Self {
            status: WebTokenStatus::Success,
            responses: vec![WebTokenResponse {
                token: token.into(),
                account,
            }],
            error: None,
        }
    }

    pub fn with_status(status: WebTokenStatus) -> Self {
        Self {
            status,
            responses: Vec::new(),
            error: None,
        }
    }
}

/// A token request for one provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebTokenRequest {
    pub provider: WebAccountProvider,
    /// Space separated scope list
    pub scope: String,
    pub client_id: Option<String>,
}

/// OS web account manager.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AccountManager: Send + Sync {
    async fn find_account_provider(
        &self,
        provider_id: &str,
        authority: &str,
    ) -> Result<Option<WebAccountProvider>>;

    async fn find_account(
        &self,
        provider: &WebAccountProvider,
        account_id: &str,
    ) -> Result<Option<WebAccount>>;

    async fn get_token_silently(
        &self,
        request: &WebTokenRequest,
        account: &WebAccount,
    ) -> Result<WebTokenResult>;

    /// Show the account settings pane offering `providers`, then request a
    /// token from the one the user picks. A dismissed pane reports
    /// [`WebTokenStatus::UserCancel`].
    async fn request_token_interactive(
        &self,
        providers: Vec<WebAccountProvider>,
        scope: String,
        client_id: Option<String>,
    ) -> Result<WebTokenResult>;

    async fn sign_out_account(&self, account: &WebAccount) -> Result<()>;
}

/// [`TokenBackend`] over the OS account manager.
pub struct WindowsBackend {
    manager: Arc<dyn AccountManager>,
    settings: Arc<dyn SettingsStore>,
    client_id: Option<String>,
    provider_type: WebAccountProviderType,
}

impl WindowsBackend {
    pub fn new(
        manager: Arc<dyn AccountManager>,
        settings: Arc<dyn SettingsStore>,
        client_id: Option<String>,
        provider_type: WebAccountProviderType,
    ) -> Result<Self> {
        if provider_type.includes_aad() && client_id.as_deref().map_or(true, str::is_empty) {
            return Err(AuthError::InvalidConfig(
                "a client id is required for work or school accounts".to_string(),
            ));
        }
        Ok(Self {
            manager,
            settings,
            client_id,
            provider_type,
        })
    }

    async fn setting(&self, key: &str) -> Result<Option<String>> {
        self.settings
            .get_string(key)
            .await
            .map_err(|e| AuthError::Settings(e.to_string()))
    }

    fn request(&self, provider: &WebAccountProvider, scopes: &[String]) -> WebTokenRequest {
        WebTokenRequest {
            provider: provider.clone(),
            scope: scopes.join(" "),
            client_id: self.client_id.clone(),
        }
    }

    async fn offered_providers(&self) -> Result<Vec<WebAccountProvider>> {
        let mut providers = Vec::new();
        for authority in self.provider_type.authorities() {
            match self
                .manager
                .find_account_provider(MICROSOFT_PROVIDER_ID, authority)
                .await?
            {
                Some(provider) => providers.push(provider),
                None => warn!(authority = %authority, "Account provider not available"),
            }
        }
        Ok(providers)
    }

    fn provider_failure(result: &WebTokenResult) -> AuthError {
        let reason = match &result.error {
            Some(error) => format!("{:?} ({}): {}", result.status, error.code, error.message),
            None => format!("{:?}", result.status),
        };
        AuthError::failed("windows", reason)
    }

    /// Maps a broker result, falling back to `requested` when the response
    /// names no account.
    fn outcome(result: WebTokenResult, requested: Option<&WebAccount>) -> Acquisition<WebAccount> {
        match result.status {
            WebTokenStatus::Success => {
                let Some(response) = result.responses.into_iter().next() else {
                    return Acquisition::Failed(AuthError::failed(
                        "windows",
                        "Broker reported success without a token",
                    ));
                };
                match response.account.or_else(|| requested.cloned()) {
                    Some(account) => Acquisition::Token(TokenGrant::new(response.token, account)),
                    None => Acquisition::Failed(AuthError::failed(
                        "windows",
                        "Broker did not report the signed-in account",
                    )),
                }
            }
            WebTokenStatus::UserCancel => Acquisition::NoToken(NoTokenReason::Cancelled),
            WebTokenStatus::UserInteractionRequired | WebTokenStatus::AccountSwitch => {
                Acquisition::NoToken(NoTokenReason::InteractionRequired)
            }
            WebTokenStatus::ProviderError => Acquisition::Failed(Self::provider_failure(&result)),
        }
    }
}

#[async_trait]
impl TokenBackend for WindowsBackend {
    type Account = WebAccount;

    fn name(&self) -> &'static str {
        "windows"
    }

    fn account_id(account: &WebAccount) -> String {
        account.id.clone()
    }

    async fn resolve_account(&self) -> Result<Option<WebAccount>> {
        let Some(account_id) = self.setting(SETTINGS_KEY_ACCOUNT_ID).await? else {
            return Ok(None);
        };
        let Some(provider_id) = self.setting(SETTINGS_KEY_PROVIDER_ID).await? else {
            return Ok(None);
        };
        let authority = self
            .setting(SETTINGS_KEY_AUTHORITY)
            .await?
            .unwrap_or_default();

        let Some(provider) = self
            .manager
            .find_account_provider(&provider_id, &authority)
            .await?
        else {
            debug!(provider_id = %provider_id, "Remembered account provider no longer available");
            return Ok(None);
        };

        self.manager.find_account(&provider, &account_id).await
    }

    async fn acquire_silent(&self, account: &WebAccount, scopes: &[String]) -> Acquisition<WebAccount> {
        let request = self.request(&account.provider, scopes);
        match self.manager.get_token_silently(&request, account).await {
            Ok(result) => Self::outcome(result, Some(account)),
            Err(e) => Acquisition::Failed(e),
        }
    }

    async fn acquire_interactive(
        &self,
        _account: Option<&WebAccount>,
        scopes: &[String],
    ) -> Acquisition<WebAccount> {
        let providers = match self.offered_providers().await {
            Ok(providers) if providers.is_empty() => {
                return Acquisition::Failed(AuthError::failed(
                    "windows",
                    "No web account provider is available",
                ));
            }
            Ok(providers) => providers,
            Err(e) => return Acquisition::Failed(e),
        };

        match self
            .manager
            .request_token_interactive(providers, scopes.join(" "), self.client_id.clone())
            .await
        {
            Ok(result) => Self::outcome(result, None),
            Err(e) => Acquisition::Failed(e),
        }
    }

    async fn remember(&self, account: &WebAccount) -> Result<()> {
        let entries = [
            (SETTINGS_KEY_ACCOUNT_ID, account.id.as_str()),
            (SETTINGS_KEY_PROVIDER_ID, account.provider.id.as_str()),
            (SETTINGS_KEY_AUTHORITY, account.provider.authority.as_str()),
        ];
        for (key, value) in entries {
            self.settings
                .set_string(key, value)
                .await
                .map_err(|e| AuthError::Settings(e.to_string()))?;
        }
        Ok(())
    }

    async fn forget(&self, account: Option<&WebAccount>) -> Result<()> {
        let mut first_error = None;

        if let Some(account) = account {
            if let Err(e) = self.manager.sign_out_account(account).await {
                first_error = Some(e);
            }
        }

        for key in [
            SETTINGS_KEY_ACCOUNT_ID,
            SETTINGS_KEY_PROVIDER_ID,
            SETTINGS_KEY_AUTHORITY,
        ] {
            if let Err(e) = self.settings.delete(key).await {
                first_error.get_or_insert(AuthError::Settings(e.to_string()));
            }
        }

        first_error.map_or(Ok(()), Err)
    }
}

/// Provider backed by the Windows account manager.
pub type WindowsProvider = AccountProvider<WindowsBackend>;

impl AccountProvider<WindowsBackend> {
    pub fn new(
        manager: Arc<dyn AccountManager>,
        settings: Arc<dyn SettingsStore>,
        client_id: Option<String>,
        provider_type: WebAccountProviderType,
        scopes: Vec<String>,
        sdk_version: impl Into<String>,
    ) -> Result<Self> {
        let backend = WindowsBackend::new(manager, settings, client_id, provider_type)?;
        Self::with_backend(backend, scopes, sdk_version)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::provider::AuthProvider;
    use crate::types::ProviderState;
    use bridge_traits::error::Result as BridgeResult;
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    /// In-memory settings store shared by the crate's tests.
    #[derive(Default)]
    pub(crate) struct MemorySettings {
        values: Mutex<BTreeMap<String, String>>,
    }

    impl MemorySettings {
        pub(crate) fn get(&self, key: &str) -> Option<String> {
            self.values.lock().unwrap().get(key).cloned()
        }
    }

    #[async_trait]
    impl SettingsStore for MemorySettings {
        async fn set_string(&self, key: &str, value: &str) -> BridgeResult<()> {
            self.values
                .lock()
                .unwrap()
                .insert(key.to_string(), value.to_string());
            Ok(())
        }

        async fn get_string(&self, key: &str) -> BridgeResult<Option<String>> {
            Ok(self.get(key))
        }

        async fn set_bool(&self, key: &str, value: bool) -> BridgeResult<()> {
            self.set_string(key, &value.to_string()).await
        }

        async fn get_bool(&self, key: &str) -> BridgeResult<Option<bool>> {
            Ok(self.get(key).and_then(|v| v.parse().ok()))
        }

        async fn delete(&self, key: &str) -> BridgeResult<()> {
            self.values.lock().unwrap().remove(key);
            Ok(())
        }

        async fn has_key(&self, key: &str) -> BridgeResult<bool> {
            Ok(self.get(key).is_some())
        }

        async fn list_keys(&self) -> BridgeResult<Vec<String>> {
            Ok(self.values.lock().unwrap().keys().cloned().collect())
        }

        async fn clear_all(&self) -> BridgeResult<()> {
            self.values.lock().unwrap().clear();
            Ok(())
        }
    }

    fn msa() -> WebAccountProvider {
        WebAccountProvider {
            id: MICROSOFT_PROVIDER_ID.to_string(),
            authority: MSA_AUTHORITY.to_string(),
            display_name: "Microsoft account".to_string(),
        }
    }

    fn account() -> WebAccount {
        WebAccount {
            id: "web-acc-1".to_string(),
            user_name: "megan@outlook.com".to_string(),
            provider: msa(),
        }
    }

    fn provider(manager: MockAccountManager, settings: Arc<MemorySettings>) -> WindowsProvider {
        WindowsProvider::new(
            Arc::new(manager),
            settings,
            None,
            WebAccountProviderType::Msa,
            vec!["User.Read".into()],
            "sdk/1",
        )
        .unwrap()
    }

    #[test]
    fn test_aad_requires_client_id() {
        let result = WindowsBackend::new(
            Arc::new(MockAccountManager::new()),
            Arc::new(MemorySettings::default()),
            None,
            WebAccountProviderType::Any,
        );
        assert!(matches!(result, Err(AuthError::InvalidConfig(_))));
    }

    #[tokio::test]
    async fn test_interactive_sign_in_persists_account() {
        let mut manager = MockAccountManager::new();
        manager
            .expect_find_account_provider()
            .withf(|id, authority| id == MICROSOFT_PROVIDER_ID && authority == MSA_AUTHORITY)
            .returning(|_, _| Ok(Some(msa())));
        manager
            .expect_request_token_interactive()
            .withf(|providers, scope, _| providers.len() == 1 && scope == "User.Read")
            .times(1)
            .returning(|_, _, _| Ok(WebTokenResult::success("wam-token", Some(account()))));
        let settings = Arc::new(MemorySettings::default());
        let provider = provider(manager, settings.clone());

        assert!(provider.sign_in().await.unwrap());

        assert_eq!(provider.current_account_id().as_deref(), Some("web-acc-1"));
        assert_eq!(settings.get(SETTINGS_KEY_ACCOUNT_ID).as_deref(), Some("web-acc-1"));
        assert_eq!(
            settings.get(SETTINGS_KEY_PROVIDER_ID).as_deref(),
            Some(MICROSOFT_PROVIDER_ID)
        );
        assert_eq!(settings.get(SETTINGS_KEY_AUTHORITY).as_deref(), Some(MSA_AUTHORITY));
    }

    #[tokio::test]
    async fn test_silent_sign_in_from_remembered_account() {
        let settings = Arc::new(MemorySettings::default());
        settings.set_string(SETTINGS_KEY_ACCOUNT_ID, "web-acc-1").await.unwrap();
        settings
            .set_string(SETTINGS_KEY_PROVIDER_ID, MICROSOFT_PROVIDER_ID)
            .await
            .unwrap();
        settings.set_string(SETTINGS_KEY_AUTHORITY, MSA_AUTHORITY).await.unwrap();

        let mut manager = MockAccountManager::new();
        manager
            .expect_find_account_provider()
            .returning(|_, _| Ok(Some(msa())));
        manager
            .expect_find_account()
            .withf(|_, id| id == "web-acc-1")
            .returning(|_, _| Ok(Some(account())));
        manager
            .expect_get_token_silently()
            .times(1)
            .returning(|_, _| Ok(WebTokenResult::success("silent", None)));
        manager.expect_request_token_interactive().never();

        let provider = provider(manager, settings);

        assert!(provider.try_silent_sign_in().await);
        assert_eq!(provider.state(), ProviderState::SignedIn);
        assert_eq!(provider.current_account_id().as_deref(), Some("web-acc-1"));
    }

    #[tokio::test]
    async fn test_dismissed_pane_is_not_an_error() {
        let mut manager = MockAccountManager::new();
        manager
            .expect_find_account_provider()
            .returning(|_, _| Ok(Some(msa())));
        manager
            .expect_request_token_interactive()
            .returning(|_, _, _| Ok(WebTokenResult::with_status(WebTokenStatus::UserCancel)));

        let provider = provider(manager, Arc::new(MemorySettings::default()));

        assert!(!provider.sign_in().await.unwrap());
        assert_eq!(provider.state(), ProviderState::SignedOut);
    }

    #[tokio::test]
    async fn test_provider_error_propagates_from_interactive() {
        let mut manager = MockAccountManager::new();
        manager
            .expect_find_account_provider()
            .returning(|_, _| Ok(Some(msa())));
        manager.expect_request_token_interactive().returning(|_, _, _| {
            Ok(WebTokenResult {
                status: WebTokenStatus::ProviderError,
                responses: vec![],
                error: Some(WebProviderError {
                    code: 0x8007_0005,
                    message: "access denied".to_string(),
                }),
            })
        });

        let provider = provider(manager, Arc::new(MemorySettings::default()));

        let err = provider.sign_in().await.unwrap_err();
        assert!(err.to_string().contains("access denied"));
    }

    #[tokio::test]
    async fn test_sign_out_clears_settings_even_if_broker_fails() {
        let mut manager = MockAccountManager::new();
        manager
            .expect_find_account_provider()
            .returning(|_, _| Ok(Some(msa())));
        manager
            .expect_request_token_interactive()
            .returning(|_, _, _| Ok(WebTokenResult::success("wam-token", Some(account()))));
        manager
            .expect_sign_out_account()
            .times(1)
            .returning(|_| Err(AuthError::failed("windows", "broker unavailable")));
        let settings = Arc::new(MemorySettings::default());
        let provider = provider(manager, settings.clone());
        provider.sign_in().await.unwrap();

        provider.sign_out().await;

        assert_eq!(provider.state(), ProviderState::SignedOut);
        assert!(settings.get(SETTINGS_KEY_ACCOUNT_ID).is_none());
        assert!(settings.get(SETTINGS_KEY_AUTHORITY).is_none());
    }
}
