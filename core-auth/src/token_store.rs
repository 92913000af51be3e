//! Secure Token Storage
//!
//! Persists the public client's account cache (account identity plus its
//! OAuth token set) through the host [`SecureStore`].
//!
//! ## Security Features
//!
//! - Tokens are never logged or exposed in error messages
//! - Storage uses platform-specific secure stores (via `SecureStore` trait)
//! - Corrupted entries are erased instead of being returned
//!
//! ## Example
//!
//! ```no_run
//! use core_auth::{MsalAccount, OAuthTokens, TokenStore};
//! use std::sync::Arc;
//! # use bridge_traits::storage::SecureStore;
//! # async fn example(secure_store: Arc<dyn SecureStore>) -> core_auth::Result<()> {
//! let token_store = TokenStore::new(secure_store);
//!
//! let account = MsalAccount {
//!     home_account_id: "oid.tid".to_string(),
//!     username: "adele@contoso.com".to_string(),
//!     environment: "login.microsoftonline.com".to_string(),
//!     tenant_id: Some("tid".to_string()),
//! };
//! let tokens = OAuthTokens::new("access".into(), Some("refresh".into()), 3600, vec![]);
//!
//! token_store.store(&account, &tokens).await?;
//! let cached = token_store.load("oid.tid").await?;
//! token_store.remove("oid.tid").await?;
//! # Ok(())
//! # }
//! ```

use crate::error::{AuthError, Result};
use crate::providers::msal::MsalAccount;
use crate::types::OAuthTokens;
use bridge_traits::storage::SecureStore;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

const KEY_PREFIX: &str = "msal_account:";

/// An account together with its cached tokens.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedAccount {
    pub account: MsalAccount,
    pub tokens: OAuthTokens,
}

/// Secure storage for the public client's account cache.
#[derive(Clone)]
pub struct TokenStore {
    secure_store: Arc<dyn SecureStore>,
}

impl TokenStore {
    pub fn new(secure_store: Arc<dyn SecureStore>) -> Self {
        debug!("Initializing TokenStore");
        Self { secure_store }
    }

    fn storage_key(home_account_id: &str) -> String {
        format!("{}{}", KEY_PREFIX, home_account_id)
    }

    /// Store (or overwrite) the tokens for an account.
    pub async fn store(&self, account: &MsalAccount, tokens: &OAuthTokens) -> Result<()> {
        let key = Self::storage_key(&account.home_account_id);
        let entry = CachedAccount {
            account: account.clone(),
            tokens: tokens.clone(),
        };

        let json = serde_json::to_vec(&entry).map_err(|e| {
            warn!(account = %account.home_account_id, error = %e, "Failed to serialize tokens");
            AuthError::Serialization(e.to_string())
        })?;

        self.secure_store.set_secret(&key, &json).await.map_err(|e| {
            warn!(
                account = %account.home_account_id,
                error = %e,
                "Failed to store tokens in secure storage"
            );
            AuthError::SecureStorageUnavailable(e.to_string())
        })?;

        info!(
            account = %account.home_account_id,
            has_refresh_token = tokens.refresh_token.is_some(),
            "Tokens stored securely"
        );
        Ok(())
    }

    /// Load the cached entry for an account.
    ///
    /// Corrupted entries are deleted and reported as absent.
    pub async fn load(&self, home_account_id: &str) -> Result<Option<CachedAccount>> {
        let key = Self::storage_key(home_account_id);

        let data = self.secure_store.get_secret(&key).await.map_err(|e| {
            warn!(account = %home_account_id, error = %e, "Failed to read secure storage");
            AuthError::SecureStorageUnavailable(e.to_string())
        })?;

        let Some(data) = data else {
            debug!(account = %home_account_id, "No tokens found in storage");
            return Ok(None);
        };

        match serde_json::from_slice::<CachedAccount>(&data) {
            Ok(entry) => Ok(Some(entry)),
            Err(e) => {
                warn!(
                    account = %home_account_id,
                    error = %e,
                    "Failed to deserialize tokens, they may be corrupted"
                );
                if let Err(delete_err) = self.secure_store.delete_secret(&key).await {
                    warn!(error = %delete_err, "Failed to delete corrupted token data");
                }
                Ok(None)
            }
        }
    }

    /// Every account with a readable cache entry.
    pub async fn accounts(&self) -> Result<Vec<MsalAccount>> {
        let keys = self
            .secure_store
            .list_keys()
            .await
            .map_err(|e| AuthError::SecureStorageUnavailable(e.to_string()))?;

        let mut accounts = Vec::new();
        for key in keys {
            if let Some(id) = key.strip_prefix(KEY_PREFIX) {
                if let Some(entry) = self.load(id).await? {
                    accounts.push(entry.account);
                }
            }
        }
        Ok(accounts)
    }

    /// Erase an account's entry. Idempotent.
    pub async fn remove(&self, home_account_id: &str) -> Result<()> {
        let key = Self::storage_key(home_account_id);
        self.secure_store
            .delete_secret(&key)
            .await
            .map_err(|e| AuthError::SecureStorageUnavailable(e.to_string()))?;

        info!(account = %home_account_id, "Tokens deleted securely");
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use async_trait::async_trait;
    use bridge_traits::error::Result as BridgeResult;
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    /// In-memory secure store shared by the crate's tests.
    #[derive(Default)]
    pub(crate) struct MemorySecureStore {
        entries: Mutex<BTreeMap<String, Vec<u8>>>,
    }

    #[async_trait]
    impl SecureStore for MemorySecureStore {
        async fn set_secret(&self, key: &str, value: &[u8]) -> BridgeResult<()> {
            self.entries
                .lock()
                .unwrap()
                .insert(key.to_string(), value.to_vec());
            Ok(())
        }

        async fn get_secret(&self, key: &str) -> BridgeResult<Option<Vec<u8>>> {
            Ok(self.entries.lock().unwrap().get(key).cloned())
        }

        async fn delete_secret(&self, key: &str) -> BridgeResult<()> {
            self.entries.lock().unwrap().remove(key);
            Ok(())
        }

        async fn list_keys(&self) -> BridgeResult<Vec<String>> {
            Ok(self.entries.lock().unwrap().keys().cloned().collect())
        }

        async fn clear_all(&self) -> BridgeResult<()> {
            self.entries.lock().unwrap().clear();
            Ok(())
        }
    }

    pub(crate) fn account(id: &str) -> MsalAccount {
        MsalAccount {
            home_account_id: id.to_string(),
            username: format!("{}@contoso.com", id),
            environment: "login.microsoftonline.com".to_string(),
            tenant_id: None,
        }
    }

    #[tokio::test]
    async fn test_store_load_remove() {
        let store = TokenStore::new(Arc::new(MemorySecureStore::default()));
        let tokens = OAuthTokens::new("a".into(), Some("r".into()), 3600, vec![]);

        store.store(&account("one"), &tokens).await.unwrap();
        let entry = store.load("one").await.unwrap().unwrap();
        assert_eq!(entry.account, account("one"));
        assert_eq!(entry.tokens.access_token, "a");

        store.remove("one").await.unwrap();
        assert!(store.load("one").await.unwrap().is_none());
        store.remove("one").await.unwrap();
    }

    #[tokio::test]
    async fn test_accounts_skip_foreign_keys() {
        let secure = Arc::new(MemorySecureStore::default());
        secure.set_secret("unrelated", b"x").await.unwrap();
        let store = TokenStore::new(secure);
        let tokens = OAuthTokens::new("a".into(), None, 3600, vec![]);
        store.store(&account("one"), &tokens).await.unwrap();
        store.store(&account("two"), &tokens).await.unwrap();

        let ids: Vec<_> = store
            .accounts()
            .await
            .unwrap()
            .into_iter()
            .map(|a| a.home_account_id)
            .collect();
        assert_eq!(ids, vec!["one", "two"]);
    }

    #[tokio::test]
    async fn test_corrupted_entry_is_erased() {
        let secure = Arc::new(MemorySecureStore::default());
        secure
            .set_secret("msal_account:broken", b"not json")
            .await
            .unwrap();
        let store = TokenStore::new(secure.clone());

        assert!(store.load("broken").await.unwrap().is_none());
        assert!(secure.get_secret("msal_account:broken").await.unwrap().is_none());
    }
}
