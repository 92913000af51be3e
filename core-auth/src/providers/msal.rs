//! MSAL-style public client provider.
//!
//! [`PublicClientApplication`] is the seam to the token library: account
//! enumeration, silent and interactive acquisition, and account removal.
//! [`OAuthPublicClient`](crate::oauth::OAuthPublicClient) is the built-in
//! implementation; hosts embedding a native MSAL can supply their own.

use crate::error::{AuthError, Result};
use crate::flow::{AccountProvider, Acquisition, NoTokenReason, TokenBackend, TokenGrant};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

/// An account known to the public client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MsalAccount {
    /// `<object id>.<tenant id>`
    pub home_account_id: String,
    /// Sign-in name, usually the UPN or email
    pub username: String,
    /// Authority host the account signed in against
    pub environment: String,
    pub tenant_id: Option<String>,
}

/// A successful token acquisition.
#[derive(Clone)]
pub struct AuthenticationResult {
    pub access_token: String,
    pub account: MsalAccount,
    pub expires_on: chrono::DateTime<chrono::Utc>,
    pub scopes: Vec<String>,
}

impl std::fmt::Debug for AuthenticationResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthenticationResult")
            .field("access_token", &"[REDACTED]")
            .field("account", &self.account)
            .field("expires_on", &self.expires_on)
            .field("scopes", &self.scopes)
            .finish()
    }
}

/// Public client token library.
///
/// Expected errors: `acquire_token_silent` fails with
/// [`AuthError::InteractionRequired`] when the cache cannot satisfy the
/// request; `acquire_token_interactive` fails with [`AuthError::Cancelled`]
/// when the user dismisses the prompt.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PublicClientApplication: Send + Sync {
    async fn get_accounts(&self) -> Result<Vec<MsalAccount>>;

    async fn acquire_token_silent(
        &self,
        scopes: &[String],
        account: &MsalAccount,
    ) -> Result<AuthenticationResult>;

    async fn acquire_token_interactive(
        &self,
        scopes: &[String],
        login_hint: Option<String>,
    ) -> Result<AuthenticationResult>;

    async fn remove_account(&self, account: &MsalAccount) -> Result<()>;
}

/// [`TokenBackend`] over a [`PublicClientApplication`].
pub struct MsalBackend {
    client: Arc<dyn PublicClientApplication>,
}

impl MsalBackend {
    pub fn new(client: Arc<dyn PublicClientApplication>) -> Self {
        Self { client }
    }
}

fn grant(result: AuthenticationResult) -> Acquisition<MsalAccount> {
    Acquisition::Token(TokenGrant::new(result.access_token, result.account))
}

#[async_trait]
impl TokenBackend for MsalBackend {
    type Account = MsalAccount;

    fn name(&self) -> &'static str {
        "msal"
    }

    fn account_id(account: &MsalAccount) -> String {
        account.home_account_id.clone()
    }

    async fn resolve_account(&self) -> Result<Option<MsalAccount>> {
        let accounts = self.client.get_accounts().await?;
        debug!(count = accounts.len(), "Enumerated cached accounts");
        Ok(accounts.into_iter().next())
    }

    async fn acquire_silent(&self, account: &MsalAccount, scopes: &[String]) -> Acquisition<MsalAccount> {
        match self.client.acquire_token_silent(scopes, account).await {
            Ok(result) => grant(result),
            Err(AuthError::InteractionRequired(_)) => {
                Acquisition::NoToken(NoTokenReason::InteractionRequired)
            }
            Err(e) => Acquisition::Failed(e),
        }
    }

    async fn acquire_interactive(
        &self,
        account: Option<&MsalAccount>,
        scopes: &[String],
    ) -> Acquisition<MsalAccount> {
        let login_hint = account.map(|a| a.username.clone());
        match self.client.acquire_token_interactive(scopes, login_hint).await {
            Ok(result) => grant(result),
            Err(AuthError::Cancelled) => Acquisition::NoToken(NoTokenReason::Cancelled),
            Err(e) => Acquisition::Failed(e),
        }
    }

    async fn remember(&self, _account: &MsalAccount) -> Result<()> {
        // The client's own cache already holds the account.
        Ok(())
    }

    async fn forget(&self, account: Option<&MsalAccount>) -> Result<()> {
        match account {
            Some(account) => self.client.remove_account(account).await,
            None => Ok(()),
        }
    }
}

/// Provider backed by an MSAL-style public client.
pub type MsalProvider = AccountProvider<MsalBackend>;

impl AccountProvider<MsalBackend> {
    pub fn new(
        client: Arc<dyn PublicClientApplication>,
        scopes: Vec<String>,
        sdk_version: impl Into<String>,
    ) -> Result<Self> {
        Self::with_backend(MsalBackend::new(client), scopes, sdk_version)
    }
}
