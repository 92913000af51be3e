//! Concrete providers.

pub mod mock;
pub mod msal;
pub mod windows;

pub use mock::MockProvider;
pub use msal::{AuthenticationResult, MsalAccount, MsalBackend, MsalProvider, PublicClientApplication};
pub use windows::{
    AccountManager, WebAccount, WebAccountProvider, WebAccountProviderType, WebTokenRequest,
    WebTokenResult, WebTokenStatus, WindowsBackend, WindowsProvider,
};
