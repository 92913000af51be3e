//! Workspace umbrella crate.
//!
//! Exposes feature flags that map to the individual workspace crates
//! (`core-runtime`, `core-auth`, `core-roaming`) so host applications can
//! depend on a single crate and enable what they need.

#[cfg(feature = "auth")]
pub use core_auth as auth;
#[cfg(feature = "roaming")]
pub use core_roaming as roaming;
#[cfg(feature = "auth")]
pub use core_runtime as runtime;
