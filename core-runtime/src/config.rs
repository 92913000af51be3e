//! # Core Configuration Module
//!
//! Collects the host capabilities and settings the authentication and
//! roaming-settings core needs.
//!
//! ## Overview
//!
//! The configuration system uses a builder pattern to construct a `CoreConfig`
//! instance. It enforces fail-fast validation so a missing bridge is reported
//! at startup with an actionable message instead of surfacing later as a
//! failed token request.
//!
//! ## Required Dependencies
//!
//! - `HttpClient` - Graph and token endpoint calls
//! - `SettingsStore` - Remembers the signed-in account between runs
//! - `SecureStore` - Token cache for the OAuth public client
//!
//! When the `desktop-shims` feature is enabled, desktop defaults
//! (`ReqwestHttpClient`, `SqliteSettingsStore`, `KeyringSecureStore`) are
//! injected for any of these that were not provided.
//!
//! ## Usage
//!
//! ```ignore
//! use core_runtime::config::CoreConfig;
//! use std::sync::Arc;
//!
//! let config = CoreConfig::builder()
//!     .http_client(Arc::new(MyHttpClient))
//!     .settings_store(Arc::new(MySettingsStore))
//!     .secure_store(Arc::new(MySecureStore))
//!     .roaming_auto_sync(true)
//!     .build()?;
//! ```

use crate::error::{Error, Result};
use crate::events::{EventBus, DEFAULT_EVENT_BUFFER_SIZE};
use bridge_traits::{HttpClient, SecureStore, SettingsStore};
use std::path::PathBuf;
use std::sync::Arc;

/// Microsoft Graph v1.0 endpoint.
pub const DEFAULT_GRAPH_BASE_URL: &str = "https://graph.microsoft.com/v1.0";

/// Microsoft Graph beta endpoint.
pub const GRAPH_BETA_BASE_URL: &str = "https://graph.microsoft.com/beta";

/// Value sent in the `SdkVersion` header unless overridden.
pub const DEFAULT_SDK_VERSION: &str = concat!("graph-toolkit-rs/", env!("CARGO_PKG_VERSION"));

/// Core configuration.
///
/// Use [`CoreConfigBuilder`] to construct instances.
#[derive(Clone)]
pub struct CoreConfig {
    pub http_client: Arc<dyn HttpClient>,
    pub settings_store: Arc<dyn SettingsStore>,
    pub secure_store: Arc<dyn SecureStore>,

    /// Graph root used by roaming helpers, without a trailing slash
    pub graph_base_url: String,

    /// Client-identifying token added to the `SdkVersion` header
    pub sdk_version: String,

    /// Whether roaming stores sync after every `save`
    pub roaming_auto_sync: bool,

    /// Capacity of the event bus channel
    pub event_buffer_size: usize,
}

impl std::fmt::Debug for CoreConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoreConfig")
            .field("http_client", &"HttpClient { ... }")
            .field("settings_store", &"SettingsStore { ... }")
            .field("secure_store", &"SecureStore { ... }")
            .field("graph_base_url", &self.graph_base_url)
            .field("sdk_version", &self.sdk_version)
            .field("roaming_auto_sync", &self.roaming_auto_sync)
            .field("event_buffer_size", &self.event_buffer_size)
            .finish()
    }
}

impl CoreConfig {
    /// Creates a new builder for constructing a `CoreConfig`.
    pub fn builder() -> CoreConfigBuilder {
        CoreConfigBuilder::default()
    }

    /// Creates an event bus sized for this configuration.
    pub fn event_bus(&self) -> EventBus {
        EventBus::new(self.event_buffer_size)
    }

    /// Validates the configuration and returns an error if invalid.
    ///
    /// This checks:
    /// - The Graph base URL is an absolute http(s) URL
    /// - The SDK version token is non-empty and contains no separators
    /// - The event buffer holds at least one event
    pub fn validate(&self) -> Result<()> {
        if !(self.graph_base_url.starts_with("https://")
            || self.graph_base_url.starts_with("http://"))
        {
            return Err(Error::Config(format!(
                "Graph base URL must be absolute, got '{}'",
                self.graph_base_url
            )));
        }

        if self.graph_base_url.ends_with('/') {
            return Err(Error::Config(
                "Graph base URL must not end with '/'".to_string(),
            ));
        }

        if self.sdk_version.trim().is_empty() || self.sdk_version.contains(',') {
            return Err(Error::Config(
                "SDK version must be a single non-empty token".to_string(),
            ));
        }

        if self.event_buffer_size == 0 {
            return Err(Error::Config(
                "Event buffer size must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(not(feature = "desktop-shims"))]
fn capability_missing(capability: &str, message: &str) -> Error {
    Error::CapabilityMissing {
        capability: capability.to_string(),
        message: message.to_string(),
    }
}

#[cfg(feature = "desktop-shims")]
fn provide_default_http_client() -> Result<Arc<dyn HttpClient>> {
    let client: Arc<dyn HttpClient> = Arc::new(bridge_desktop::ReqwestHttpClient::new());
    Ok(client)
}

#[cfg(not(feature = "desktop-shims"))]
fn provide_default_http_client() -> Result<Arc<dyn HttpClient>> {
    Err(capability_missing(
        "HttpClient",
        "HttpClient implementation is required for Graph and token requests. \
         Desktop: enable the 'desktop-shims' feature to use ReqwestHttpClient. \
         Other hosts: inject the platform HTTP stack.",
    ))
}

#[cfg(feature = "desktop-shims")]
fn provide_default_secure_store() -> Result<Arc<dyn SecureStore>> {
    let store: Arc<dyn SecureStore> = Arc::new(bridge_desktop::KeyringSecureStore::new());
    Ok(store)
}

#[cfg(not(feature = "desktop-shims"))]
fn provide_default_secure_store() -> Result<Arc<dyn SecureStore>> {
    Err(capability_missing(
        "SecureStore",
        "SecureStore implementation is required for the token cache. \
         Desktop: enable the 'desktop-shims' feature to use KeyringSecureStore. \
         Windows hosts: inject a DPAPI-backed store.",
    ))
}

#[cfg(feature = "desktop-shims")]
fn provide_default_settings_store(path: Option<PathBuf>) -> Result<Arc<dyn SettingsStore>> {
    use bridge_desktop::SqliteSettingsStore;
    use std::thread;
    use tokio::runtime::{Builder, Handle};

    let path = path.unwrap_or_else(SqliteSettingsStore::default_path);

    let init_store = |path: PathBuf| -> Result<SqliteSettingsStore> {
        let runtime = Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| {
                Error::Internal(format!(
                    "Failed to create Tokio runtime for default settings store: {}",
                    e
                ))
            })?;

        runtime
            .block_on(SqliteSettingsStore::new(path))
            .map_err(|e| {
                Error::Internal(format!("Failed to initialize default SettingsStore: {}", e))
            })
    };

    // block_on panics inside a runtime, so hop to a plain thread there
    let store = match Handle::try_current() {
        Ok(_) => thread::spawn(move || init_store(path))
            .join()
            .map_err(|_| {
                Error::Internal(
                    "Worker thread panicked while creating default SettingsStore".to_string(),
                )
            })??,
        Err(_) => init_store(path)?,
    };

    let store: Arc<dyn SettingsStore> = Arc::new(store);
    Ok(store)
}

#[cfg(not(feature = "desktop-shims"))]
fn provide_default_settings_store(_path: Option<PathBuf>) -> Result<Arc<dyn SettingsStore>> {
    Err(capability_missing(
        "SettingsStore",
        "SettingsStore implementation is required to remember the signed-in account. \
         Desktop: enable the 'desktop-shims' feature to use SqliteSettingsStore. \
         Windows hosts: inject ApplicationData.LocalSettings.",
    ))
}

/// Builder for constructing [`CoreConfig`] instances.
#[derive(Default)]
pub struct CoreConfigBuilder {
    http_client: Option<Arc<dyn HttpClient>>,
    settings_store: Option<Arc<dyn SettingsStore>>,
    secure_store: Option<Arc<dyn SecureStore>>,
    settings_path: Option<PathBuf>,
    graph_base_url: Option<String>,
    sdk_version: Option<String>,
    roaming_auto_sync: bool,
    event_buffer_size: Option<usize>,
}

impl CoreConfigBuilder {
    pub fn http_client(mut self, client: Arc<dyn HttpClient>) -> Self {
        self.http_client = Some(client);
        self
    }

    pub fn settings_store(mut self, store: Arc<dyn SettingsStore>) -> Self {
        self.settings_store = Some(store);
        self
    }

    pub fn secure_store(mut self, store: Arc<dyn SecureStore>) -> Self {
        self.secure_store = Some(store);
        self
    }

    /// Location of the default SQLite settings database.
    ///
    /// Ignored when a settings store is injected.
    pub fn settings_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.settings_path = Some(path.into());
        self
    }

    /// Graph root, e.g. [`GRAPH_BETA_BASE_URL`]. A trailing slash is trimmed.
    pub fn graph_base_url(mut self, url: impl Into<String>) -> Self {
        let url: String = url.into();
        self.graph_base_url = Some(url.trim_end_matches('/').to_string());
        self
    }

    pub fn sdk_version(mut self, version: impl Into<String>) -> Self {
        self.sdk_version = Some(version.into());
        self
    }

    pub fn roaming_auto_sync(mut self, enabled: bool) -> Self {
        self.roaming_auto_sync = enabled;
        self
    }

    pub fn event_buffer_size(mut self, size: usize) -> Self {
        self.event_buffer_size = Some(size);
        self
    }

    /// Builds the final `CoreConfig` instance.
    ///
    /// Returns `Error::CapabilityMissing` when a required bridge was neither
    /// injected nor available as a desktop default, or `Error::Config` when
    /// a value is invalid.
    pub fn build(self) -> Result<CoreConfig> {
        let http_client = match self.http_client {
            Some(client) => client,
            None => provide_default_http_client()?,
        };

        let settings_store = match self.settings_store {
            Some(store) => store,
            None => provide_default_settings_store(self.settings_path)?,
        };

        let secure_store = match self.secure_store {
            Some(store) => store,
            None => provide_default_secure_store()?,
        };

        let config = CoreConfig {
            http_client,
            settings_store,
            secure_store,
            graph_base_url: self
                .graph_base_url
                .unwrap_or_else(|| DEFAULT_GRAPH_BASE_URL.to_string()),
            sdk_version: self
                .sdk_version
                .unwrap_or_else(|| DEFAULT_SDK_VERSION.to_string()),
            roaming_auto_sync: self.roaming_auto_sync,
            event_buffer_size: self.event_buffer_size.unwrap_or(DEFAULT_EVENT_BUFFER_SIZE),
        };

        config.validate()?;

        Ok(config)
    }
}
