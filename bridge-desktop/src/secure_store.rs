//! Secure Credential Storage using OS Keychain

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use bridge_traits::{
    error::{BridgeError, Result},
    storage::SecureStore,
};
use keyring::Entry;
use tokio::sync::Mutex;
use tracing::{debug, error, warn};

/// Entry holding the JSON list of keys written through this store.
const INDEX_KEY: &str = "__graph_toolkit_index__";

/// Keyring-based secure storage implementation
///
/// Uses platform-specific secure storage:
/// - macOS: Keychain
/// - Windows: Credential Manager (DPAPI)
/// - Linux: Secret Service (libsecret)
///
/// Keyrings cannot be enumerated, so the store keeps its own index entry to
/// support `list_keys` and `clear_all`.
pub struct KeyringSecureStore {
    service_name: String,
    index_lock: Mutex<()>,
}

impl KeyringSecureStore {
    /// Create a new secure store with default service name
    pub fn new() -> Self {
        Self::with_service_name("graph-toolkit-core")
    }

    /// Create a new secure store with custom service name
    pub fn with_service_name(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            index_lock: Mutex::new(()),
        }
    }

    fn entry(&self, key: &str) -> Result<Entry> {
        Entry::new(&self.service_name, key).map_err(Self::map_keyring_error)
    }

    fn map_keyring_error(e: keyring::Error) -> BridgeError {
        BridgeError::OperationFailed(format!("Keyring error: {}", e))
    }

    fn read_index(&self) -> Result<Vec<String>> {
        match self.entry(INDEX_KEY)?.get_password() {
            Ok(raw) => serde_json::from_str(&raw).or_else(|e| {
                warn!(error = %e, "Discarding unreadable keyring index");
                Ok(Vec::new())
            }),
            Err(keyring::Error::NoEntry) => Ok(Vec::new()),
            Err(e) => Err(Self::map_keyring_error(e)),
        }
    }

    fn write_index(&self, keys: &[String]) -> Result<()> {
        let entry = self.entry(INDEX_KEY)?;
        if keys.is_empty() {
            return match entry.delete_credential() {
                Ok(_) | Err(keyring::Error::NoEntry) => Ok(()),
                Err(e) => Err(Self::map_keyring_error(e)),
            };
        }

        let raw = serde_json::to_string(keys)
            .map_err(|e| BridgeError::OperationFailed(format!("Index encode failed: {}", e)))?;
        entry.set_password(&raw).map_err(Self::map_keyring_error)
    }

    fn remove_entry(&self, key: &str) -> Result<()> {
        match self.entry(key)?.delete_credential() {
            Ok(_) => {
                debug!(key = key, "Deleted secret from keyring");
                Ok(())
            }
            Err(keyring::Error::NoEntry) => {
                debug!(key = key, "Secret not found (already deleted)");
                Ok(())
            }
            Err(e) => Err(Self::map_keyring_error(e)),
        }
    }
}

impl Default for KeyringSecureStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SecureStore for KeyringSecureStore {
    async fn set_secret(&self, key: &str, value: &[u8]) -> Result<()> {
        // Keyring only stores strings
        let encoded = STANDARD.encode(value);

        let _guard = self.index_lock.lock().await;
        self.entry(key)?
            .set_password(&encoded)
            .map_err(Self::map_keyring_error)?;

        let mut index = self.read_index()?;
        if !index.iter().any(|k| k == key) {
            index.push(key.to_string());
            self.write_index(&index)?;
        }

        debug!(key = key, "Stored secret in keyring");
        Ok(())
    }

    async fn get_secret(&self, key: &str) -> Result<Option<Vec<u8>>> {
        match self.entry(key)?.get_password() {
            Ok(encoded) => {
                let decoded = STANDARD.decode(&encoded).map_err(|e| {
                    error!(key = key, error = %e, "Failed to decode secret");
                    BridgeError::OperationFailed(format!("Failed to decode secret: {}", e))
                })?;
                Ok(Some(decoded))
            }
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(Self::map_keyring_error(e)),
        }
    }

    async fn delete_secret(&self, key: &str) -> Result<()> {
        let _guard = self.index_lock.lock().await;
        self.remove_entry(key)?;

        let mut index = self.read_index()?;
        let before = index.len();
        index.retain(|k| k != key);
        if index.len() != before {
            self.write_index(&index)?;
        }
        Ok(())
    }

    async fn has_secret(&self, key: &str) -> Result<bool> {
        match self.entry(key)?.get_password() {
            Ok(_) => Ok(true),
            Err(keyring::Error::NoEntry) => Ok(false),
            Err(e) => Err(Self::map_keyring_error(e)),
        }
    }

    async fn list_keys(&self) -> Result<Vec<String>> {
        let _guard = self.index_lock.lock().await;
        self.read_index()
    }

    async fn clear_all(&self) -> Result<()> {
        let _guard = self.index_lock.lock().await;
        for key in self.read_index()? {
            self.remove_entry(&key)?;
        }
        self.write_index(&[])
    }
}
