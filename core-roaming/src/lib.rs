//! # Roaming Settings
//!
//! User-scoped key/value settings that follow the user across devices.
//!
//! ## Overview
//!
//! A [`RoamingSettingsStore`] keeps settings in an in-memory cache and
//! reconciles it with a remote container on `sync`:
//! - [`UserExtensionStorageHelper`]: a Graph open extension on the user
//! - [`OneDriveStorageHelper`]: a file in the user's OneDrive app folder
//!
//! Remote calls go through a [`GraphClient`], which authenticates each
//! request with the provider currently held by the `ProviderManager`.
//!
//! ## Usage
//!
//! ```no_run
//! use core_auth::ProviderManager;
//! use core_roaming::{GraphClient, RoamingSettingsStore, UserExtensionStorageHelper};
//! use core_runtime::config::CoreConfig;
//! use std::sync::Arc;
//!
//! # async fn example(config: CoreConfig, providers: ProviderManager) -> core_roaming::Result<()> {
//! let graph = GraphClient::from_config(&config, providers.clone());
//! let remote = UserExtensionStorageHelper::new(graph, "com.contoso.settings")?;
//! let settings = RoamingSettingsStore::new(Arc::new(remote), providers.event_bus().clone())
//!     .with_auto_sync(config.roaming_auto_sync);
//!
//! settings.save("theme", "dark")?;
//! if let Err(e) = settings.sync().await {
//!     if e.is_remote_missing() {
//!         settings.create_remote().await?;
//!         settings.sync().await?;
//!     }
//! }
//! let theme: String = settings.read("theme", "light".to_string());
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod extension;
pub mod graph;
pub mod onedrive;
pub mod remote;
pub mod serializer;
pub mod store;

pub use error::{Result, RoamingError};
pub use extension::UserExtensionStorageHelper;
pub use graph::GraphClient;
pub use onedrive::{DriveItem, OneDriveStorageHelper, DEFAULT_SETTINGS_FILE};
pub use remote::{is_reserved_key, RemoteSettingsStore, RemoteValues, RESERVED_KEYS};
pub use serializer::{JsonObjectSerializer, ObjectSerializer};
pub use store::{RoamingSettingsStore, SyncReport};
