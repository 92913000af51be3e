//! # Token Acquisition Flow
//!
//! [`AccountProvider`] runs the silent-then-interactive acquisition routine
//! against any [`TokenBackend`]. The routine is guarded by one async mutex per
//! provider so that at most one flow (and therefore at most one sign-in
//! prompt) is in progress at a time; concurrent callers queue in arrival order.
//!
//! Each backend attempt reports an explicit [`Acquisition`]:
//!
//! | Outcome | Silent attempt | Interactive attempt |
//! |---------|----------------|---------------------|
//! | `Token` | used | used |
//! | `NoToken` | fall through to interactive | `Ok(None)` |
//! | `Failed` | logged, treated as `NoToken` | returned as `Err` |

use crate::error::{AuthError, Result};
use crate::provider::{AuthProvider, ProviderCore};
use crate::types::{normalize_scopes, ProviderState, ProviderStateChange};
use async_trait::async_trait;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex as StdMutex;
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, info, instrument, warn};

/// A token together with the account it was issued for.
#[derive(Clone)]
pub struct TokenGrant<A> {
    pub token: String,
    pub account: A,
}

impl<A> TokenGrant<A> {
    pub fn new(token: impl Into<String>, account: A) -> Self {
        Self {
            token: token.into(),
            account,
        }
    }
}

impl<A: fmt::Debug> fmt::Debug for TokenGrant<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenGrant")
            .field("token", &"[REDACTED]")
            .field("account", &self.account)
            .finish()
    }
}

/// Why an attempt ended without a token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoTokenReason {
    /// No account could be resolved
    NoAccount,
    /// The backend needs the user to interact
    InteractionRequired,
    /// The user dismissed the prompt
    Cancelled,
}

impl fmt::Display for NoTokenReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            NoTokenReason::NoAccount => "no account",
            NoTokenReason::InteractionRequired => "interaction required",
            NoTokenReason::Cancelled => "cancelled by user",
        };
        f.write_str(text)
    }
}

/// Outcome of one backend token attempt.
#[derive(Debug)]
pub enum Acquisition<A> {
    Token(TokenGrant<A>),
    NoToken(NoTokenReason),
    Failed(AuthError),
}

/// Backend-specific half of a provider.
#[async_trait]
pub trait TokenBackend: Send + Sync + 'static {
    type Account: Clone + fmt::Debug + Send + Sync + 'static;

    /// Provider name used in logs and errors.
    fn name(&self) -> &'static str;

    /// Stable identifier of an account.
    fn account_id(account: &Self::Account) -> String;

    /// Look up a previously signed-in account (persisted settings, backend
    /// account enumeration). `Ok(None)` when there is none.
    async fn resolve_account(&self) -> Result<Option<Self::Account>>;

    async fn acquire_silent(
        &self,
        account: &Self::Account,
        scopes: &[String],
    ) -> Acquisition<Self::Account>;

    async fn acquire_interactive(
        &self,
        account: Option<&Self::Account>,
        scopes: &[String],
    ) -> Acquisition<Self::Account>;

    /// Persist what a later process needs for silent sign-in.
    async fn remember(&self, account: &Self::Account) -> Result<()>;

    /// Remove the account from the backend and persisted settings.
    async fn forget(&self, account: Option<&Self::Account>) -> Result<()>;
}

/// Provider running the silent-then-interactive flow against a backend.
pub struct AccountProvider<B: TokenBackend> {
    core: ProviderCore,
    backend: B,
    scopes: Vec<String>,
    account: StdMutex<Option<B::Account>>,
    flight: Mutex<()>,
    /// Bumped by every sign-out; a flow started earlier must not commit.
    epoch: AtomicU64,
}

impl<B: TokenBackend> AccountProvider<B> {
    /// Creates a signed-out provider requesting `scopes` by default.
    pub fn with_backend(
        backend: B,
        scopes: Vec<String>,
        sdk_version: impl Into<String>,
    ) -> Result<Self> {
        let scopes = normalize_scopes(scopes)?;
        Ok(Self {
            core: ProviderCore::new(backend.name(), ProviderState::SignedOut, sdk_version),
            backend,
            scopes,
            account: StdMutex::new(None),
            flight: Mutex::new(()),
            epoch: AtomicU64::new(0),
        })
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn scopes(&self) -> &[String] {
        &self.scopes
    }

    /// The signed-in account handle, if any.
    pub fn current_account(&self) -> Option<B::Account> {
        self.lock_account().clone()
    }

    /// [`AuthProvider::get_token`] with an explicit scope list.
    #[instrument(skip(self), fields(provider = self.core.name()))]
    pub async fn get_token_with_scopes(
        &self,
        scopes: &[String],
        silent_only: bool,
    ) -> Result<Option<String>> {
        let _flight = self.flight.lock().await;
        let epoch = self.epoch.load(Ordering::SeqCst);

        let account = match self.current_account() {
            Some(account) => Some(account),
            None => match self.backend.resolve_account().await {
                Ok(found) => found,
                Err(e) => {
                    warn!(error = %e, "Failed to resolve a previous account");
                    None
                }
            },
        };

        let mut grant = None;
        match &account {
            Some(account) => match self.backend.acquire_silent(account, scopes).await {
                Acquisition::Token(found) => grant = Some(found),
                Acquisition::NoToken(reason) => {
                    debug!(reason = %reason, "Silent acquisition returned no token");
                }
                Acquisition::Failed(e) => {
                    warn!(error = %e, "Silent acquisition failed");
                }
            },
            None => debug!("No account available for silent acquisition"),
        }

        if grant.is_none() && !silent_only {
            match self
                .backend
                .acquire_interactive(account.as_ref(), scopes)
                .await
            {
                Acquisition::Token(found) => grant = Some(found),
                Acquisition::NoToken(reason) => {
                    info!(reason = %reason, "Interactive acquisition ended without a token");
                }
                Acquisition::Failed(e) => return Err(e),
            }
        }

        let Some(grant) = grant else {
            return Ok(None);
        };

        if self.epoch.load(Ordering::SeqCst) != epoch {
            info!("Signed out while acquiring a token; discarding it");
            return Ok(None);
        }
        if let Err(e) = self.backend.remember(&grant.account).await {
            warn!(error = %e, "Failed to persist signed-in account");
        }

        let committed = {
            let mut slot = self.lock_account();
            if self.epoch.load(Ordering::SeqCst) == epoch {
                *slot = Some(grant.account.clone());
                self.core.set_state(ProviderState::SignedIn);
                true
            } else {
                false
            }
        };
        if !committed {
            info!("Signed out while acquiring a token; discarding it");
            if let Err(e) = self.backend.forget(Some(&grant.account)).await {
                warn!(error = %e, "Failed to remove discarded account");
            }
            return Ok(None);
        }

        Ok(Some(grant.token))
    }

    fn lock_account(&self) -> std::sync::MutexGuard<'_, Option<B::Account>> {
        match self.account.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[async_trait]
impl<B: TokenBackend> AuthProvider for AccountProvider<B> {
    fn name(&self) -> &str {
        self.core.name()
    }

    fn state(&self) -> ProviderState {
        self.core.state()
    }

    fn current_account_id(&self) -> Option<String> {
        self.lock_account().as_ref().map(B::account_id)
    }

    fn subscribe(&self) -> broadcast::Receiver<ProviderStateChange> {
        self.core.subscribe()
    }

    fn sdk_version(&self) -> &str {
        self.core.sdk_version()
    }

    async fn get_token(&self, silent_only: bool) -> Result<Option<String>> {
        self.get_token_with_scopes(&self.scopes, silent_only).await
    }

    async fn sign_in(&self) -> Result<bool> {
        let state = self.core.state();
        if state != ProviderState::SignedOut {
            debug!(provider = self.core.name(), state = %state, "Sign-in skipped");
            return Ok(state == ProviderState::SignedIn);
        }

        self.core.set_state(ProviderState::Loading);
        match self.get_token(false).await {
            Ok(Some(_)) => Ok(true),
            Ok(None) => {
                self.core.set_state(ProviderState::SignedOut);
                Ok(false)
            }
            Err(e) => {
                self.core.set_state(ProviderState::SignedOut);
                Err(e)
            }
        }
    }

    async fn sign_out(&self) {
        let account = {
            let mut slot = self.lock_account();
            self.epoch.fetch_add(1, Ordering::SeqCst);
            slot.take()
        };
        if let Err(e) = self.backend.forget(account.as_ref()).await {
            warn!(provider = self.core.name(), error = %e, "Account removal failed");
        }
        self.core.set_state(ProviderState::SignedOut);
        info!(provider = self.core.name(), "Signed out");
    }

    async fn try_silent_sign_in(&self) -> bool {
        if self.core.state() == ProviderState::SignedIn && self.current_account().is_some() {
            return true;
        }

        self.core.set_state(ProviderState::Loading);
        match self.get_token(true).await {
            Ok(Some(_)) => true,
            Ok(None) => {
                self.core.set_state(ProviderState::SignedOut);
                false
            }
            Err(e) => {
                warn!(provider = self.core.name(), error = %e, "Silent sign-in failed");
                self.core.set_state(ProviderState::SignedOut);
                false
            }
        }
    }
}

impl<B: TokenBackend> fmt::Debug for AccountProvider<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccountProvider")
            .field("core", &self.core)
            .field("scopes", &self.scopes)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    type Script = StdMutex<VecDeque<Acquisition<String>>>;

    /// Backend replaying scripted outcomes and counting calls.
    #[derive(Default)]
    struct ScriptedBackend {
        persisted: StdMutex<Option<String>>,
        silent: Script,
        interactive: Script,
        silent_calls: AtomicUsize,
        interactive_calls: AtomicUsize,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
        forget_fails: bool,
    }

    impl ScriptedBackend {
        fn silent(self, outcome: Acquisition<String>) -> Self {
            self.silent.lock().unwrap().push_back(outcome);
            self
        }

        fn interactive(self, outcome: Acquisition<String>) -> Self {
            self.interactive.lock().unwrap().push_back(outcome);
            self
        }

        fn persisted(self, account: &str) -> Self {
            *self.persisted.lock().unwrap() = Some(account.to_string());
            self
        }
    }

    fn token(value: &str, account: &str) -> Acquisition<String> {
        Acquisition::Token(TokenGrant::new(value, account.to_string()))
    }

    #[async_trait]
    impl TokenBackend for ScriptedBackend {
        type Account = String;

        fn name(&self) -> &'static str {
            "scripted"
        }

        fn account_id(account: &String) -> String {
            account.clone()
        }

        async fn resolve_account(&self) -> Result<Option<String>> {
            Ok(self.persisted.lock().unwrap().clone())
        }

        async fn acquire_silent(&self, _account: &String, _scopes: &[String]) -> Acquisition<String> {
            self.silent_calls.fetch_add(1, Ordering::SeqCst);
            self.silent
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Acquisition::NoToken(NoTokenReason::InteractionRequired))
        }

        async fn acquire_interactive(
            &self,
            _account: Option<&String>,
            _scopes: &[String],
        ) -> Acquisition<String> {
            self.interactive_calls.fetch_add(1, Ordering::SeqCst);
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            self.interactive
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| token("interactive-token", "acc-1"))
        }

        async fn remember(&self, account: &String) -> Result<()> {
            *self.persisted.lock().unwrap() = Some(account.clone());
            Ok(())
        }

        async fn forget(&self, _account: Option<&String>) -> Result<()> {
            *self.persisted.lock().unwrap() = None;
            if self.forget_fails {
                return Err(AuthError::failed("scripted", "revoke failed"));
            }
            Ok(())
        }
    }

    fn provider(backend: ScriptedBackend) -> AccountProvider<ScriptedBackend> {
        AccountProvider::with_backend(backend, vec!["User.Read".into()], "sdk/1").unwrap()
    }

    fn drain(rx: &mut broadcast::Receiver<ProviderStateChange>) -> Vec<ProviderStateChange> {
        let mut changes = Vec::new();
        while let Ok(change) = rx.try_recv() {
            changes.push(change);
        }
        changes
    }

    #[test]
    fn test_empty_scopes_rejected() {
        let result = AccountProvider::with_backend(ScriptedBackend::default(), vec![], "sdk/1");
        assert!(matches!(result, Err(AuthError::InvalidConfig(_))));
    }

    #[tokio::test]
    async fn test_silent_only_never_prompts() {
        let provider = provider(ScriptedBackend::default().persisted("acc-1"));

        let token = provider.get_token(true).await.unwrap();

        assert!(token.is_none());
        assert_eq!(provider.backend().silent_calls.load(Ordering::SeqCst), 1);
        assert_eq!(provider.backend().interactive_calls.load(Ordering::SeqCst), 0);
        assert_eq!(provider.state(), ProviderState::SignedOut);
    }

    #[tokio::test]
    async fn test_silent_failure_falls_back_to_interactive() {
        let backend = ScriptedBackend::default()
            .persisted("acc-1")
            .silent(Acquisition::Failed(AuthError::Network("offline".into())));
        let provider = provider(backend);

        let token = provider.get_token(false).await.unwrap();

        assert_eq!(token.as_deref(), Some("interactive-token"));
        assert_eq!(provider.current_account_id().as_deref(), Some("acc-1"));
        assert_eq!(provider.state(), ProviderState::SignedIn);
    }

    #[tokio::test]
    async fn test_interactive_failure_propagates() {
        let backend = ScriptedBackend::default().interactive(Acquisition::Failed(
            AuthError::failed("scripted", "broker crashed"),
        ));
        let provider = provider(backend);

        let result = provider.sign_in().await;

        assert!(matches!(result, Err(AuthError::AuthenticationFailed { .. })));
        assert_eq!(provider.state(), ProviderState::SignedOut);
        assert!(provider.current_account_id().is_none());
    }

    #[tokio::test]
    async fn test_cancelled_sign_in_returns_to_signed_out() {
        let backend = ScriptedBackend::default()
            .interactive(Acquisition::NoToken(NoTokenReason::Cancelled));
        let provider = provider(backend);
        let mut rx = provider.subscribe();

        assert!(!provider.sign_in().await.unwrap());

        assert_eq!(
            drain(&mut rx),
            vec![
                ProviderStateChange::new(ProviderState::SignedOut, ProviderState::Loading),
                ProviderStateChange::new(ProviderState::Loading, ProviderState::SignedOut),
            ]
        );
    }

    #[tokio::test]
    async fn test_sign_in_while_signed_in_is_noop() {
        let provider = provider(ScriptedBackend::default());
        assert!(provider.sign_in().await.unwrap());
        let mut rx = provider.subscribe();

        assert!(provider.sign_in().await.unwrap());

        assert!(drain(&mut rx).is_empty());
        assert_eq!(provider.backend().interactive_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_try_silent_sign_in_uses_persisted_account() {
        let backend = ScriptedBackend::default()
            .persisted("acc-7")
            .silent(token("silent-token", "acc-7"));
        let provider = provider(backend);

        assert!(provider.try_silent_sign_in().await);
        assert_eq!(provider.current_account_id().as_deref(), Some("acc-7"));
        assert_eq!(provider.backend().interactive_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_sign_out_succeeds_when_revoke_fails() {
        let backend = ScriptedBackend {
            forget_fails: true,
            ..Default::default()
        };
        let provider = provider(backend);
        provider.sign_in().await.unwrap();

        provider.sign_out().await;

        assert_eq!(provider.state(), ProviderState::SignedOut);
        assert!(provider.current_account_id().is_none());
    }

    #[tokio::test]
    async fn test_sign_out_wins_over_in_flight_sign_in() {
        let provider = Arc::new(provider(ScriptedBackend::default()));
        let signing_in = {
            let provider = provider.clone();
            tokio::spawn(async move { provider.sign_in().await })
        };
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert_eq!(provider.backend().in_flight.load(Ordering::SeqCst), 1);

        provider.sign_out().await;
        let signed_in = signing_in.await.unwrap().unwrap();

        assert!(!signed_in);
        assert_eq!(provider.state(), ProviderState::SignedOut);
        assert!(provider.current_account_id().is_none());
        assert!(provider.backend().persisted.lock().unwrap().is_none());
    }

    #[tokio::test]
    async fn test_concurrent_requests_are_single_flight() {
        let provider = Arc::new(provider(ScriptedBackend::default()));

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let provider = provider.clone();
                tokio::spawn(async move { provider.get_token(false).await })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(provider.backend().interactive_calls.load(Ordering::SeqCst), 4);
        assert_eq!(provider.backend().max_in_flight.load(Ordering::SeqCst), 1);
    }
}
