//! # Host Bridge Traits
//!
//! Platform abstraction traits that each host must implement for the
//! authentication and roaming-settings core.
//!
//! ## Overview
//!
//! The core never talks to the network, the OS credential vault or the
//! app-local settings container directly. Every such capability is expressed
//! as a trait here and injected by the host (see `bridge-desktop` for the
//! desktop defaults).
//!
//! ## Traits
//!
//! ### Networking
//! - [`HttpClient`](http::HttpClient) - Async HTTP used for Graph and token endpoints
//!
//! ### Security & Storage
//! - [`SecureStore`](storage::SecureStore) - Token cache persistence (Keychain/DPAPI/libsecret)
//! - [`SettingsStore`](storage::SettingsStore) - App-local key/value settings, used to
//!   remember the signed-in account across restarts
//!
//! ### Utilities
//! - [`LoggerSink`](logging::LoggerSink) - Forward structured logs to host logging
//!
//! ## Error Handling
//!
//! All bridge traits use [`BridgeError`](error::BridgeError). Implementations
//! should convert platform errors into it with an actionable message.
//!
//! ## Thread Safety
//!
//! All bridge traits require `Send + Sync` so they can be shared behind `Arc`
//! across async tasks.
//!
//! ## Examples
//!
//! ### Implementing HttpClient
//!
//! ```ignore
//! use bridge_traits::http::{HttpClient, HttpRequest, HttpResponse};
//! use bridge_traits::error::Result;
//! use async_trait::async_trait;
//!
//! pub struct MyHttpClient {
//!     client: reqwest::Client,
//! }
//!
//! #[async_trait]
//! impl HttpClient for MyHttpClient {
//!     async fn execute(&self, request: HttpRequest) -> Result<HttpResponse> {
//!         todo!()
//!     }
//! }
//! ```

pub mod error;
pub mod http;
pub mod logging;
pub mod storage;

pub use error::BridgeError;

// Re-export commonly used types
pub use http::{HttpClient, HttpMethod, HttpRequest, HttpResponse, RetryPolicy};
pub use storage::{SecureStore, SettingsStore};
pub use logging::{ConsoleLogger, LogEntry, LogLevel, LoggerSink};
