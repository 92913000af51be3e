//! # Desktop Bridge Implementations
//!
//! Default implementations of bridge traits for desktop platforms
//! (macOS, Windows, Linux).
//!
//! ## Overview
//!
//! Hosts that do not supply their own capabilities get these:
//! - `HttpClient` using `reqwest`, with retry on throttling and server errors
//! - `SecureStore` using the `keyring` crate, for the token cache
//! - `SettingsStore` using a SQLite-backed key-value table, for the remembered account
//!
//! ## Feature Flags
//!
//! - `secure-store`: Enable OS keychain integration (default)
//!
//! ## Usage
//!
//! ```ignore
//! use bridge_desktop::{ReqwestHttpClient, SqliteSettingsStore};
//!
//! #[tokio::main]
//! async fn main() {
//!     let http_client = ReqwestHttpClient::new();
//!     let settings = SqliteSettingsStore::new(SqliteSettingsStore::default_path()).await?;
//!
//!     // Use in core configuration
//! }
//! ```

mod http;
mod settings;

#[cfg(feature = "secure-store")]
mod secure_store;

pub use http::ReqwestHttpClient;
pub use settings::SqliteSettingsStore;

#[cfg(feature = "secure-store")]
pub use secure_store::KeyringSecureStore;
