//! # Authentication Providers
//!
//! Authentication providers for Microsoft Graph with a shared state machine
//! and a single-flight silent-then-interactive token protocol.
//!
//! ## Overview
//!
//! - [`AuthProvider`] is the capability every provider exposes: state,
//!   current account, token acquisition, sign-in and sign-out.
//! - [`AccountProvider`] implements the acquisition protocol once for any
//!   [`TokenBackend`]. [`MsalProvider`] and [`WindowsProvider`] are its two
//!   backends; [`MockProvider`] needs no backend at all.
//! - [`ProviderConfig`] selects and builds a provider from a declarative
//!   variant.
//! - [`ProviderManager`] holds the application's active provider and
//!   publishes its changes on the event bus.
//!
//! ## Features
//!
//! - OAuth 2.0 authorization code flow with PKCE ([`OAuthPublicClient`])
//! - Token cache persisted through the host secure store ([`TokenStore`])
//! - Silent sign-in across restarts from remembered account settings
//! - `SdkVersion` header decoration without duplication

pub mod config;
pub mod error;
pub mod flow;
pub mod manager;
pub mod oauth;
pub mod provider;
pub mod providers;
pub mod token_store;
pub mod types;

pub use config::{MockConfig, MsalConfig, ProviderConfig, ProviderDeps, WindowsConfig};
pub use error::{AuthError, Result};
pub use flow::{AccountProvider, Acquisition, NoTokenReason, TokenBackend, TokenGrant};
pub use manager::ProviderManager;
pub use oauth::{AuthorizationPrompt, AuthorizationResponse, OAuthClientConfig, OAuthPublicClient, PkceVerifier};
pub use provider::{add_sdk_version, AuthProvider, ProviderCore, SDK_VERSION_HEADER};
pub use providers::{
    AccountManager, MockProvider, MsalAccount, MsalProvider, PublicClientApplication,
    WebAccountProviderType, WindowsProvider,
};
pub use token_store::TokenStore;
pub use types::{OAuthTokens, ProviderState, ProviderStateChange, DEFAULT_SCOPES};
