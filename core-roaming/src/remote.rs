//! Remote key/value container behind a roaming store.

use crate::error::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;

/// Snapshot of a remote container.
pub type RemoteValues = HashMap<String, Value>;

/// Keys that carry protocol metadata rather than settings.
///
/// They are never pushed and never pulled during sync.
pub const RESERVED_KEYS: &[&str] = &[
    "responseHeaders",
    "statusCode",
    "@odata.context",
    "@odata.type",
    "id",
    "extensionName",
];

pub fn is_reserved_key(key: &str) -> bool {
    RESERVED_KEYS.contains(&key)
}

/// A per-user remote store addressed by a store id.
#[async_trait]
pub trait RemoteSettingsStore: Send + Sync {
    /// Extension id or file name.
    fn store_id(&self) -> &str;

    /// Current remote values, `None` when the container does not exist yet.
    async fn fetch(&self) -> Result<Option<RemoteValues>>;

    /// Replace the remote values with `values`.
    ///
    /// Fails with `RoamingError::RemoteNotFound` when the container has not
    /// been created.
    async fn write(&self, values: &RemoteValues) -> Result<()>;

    /// Create the container. Succeeds when it already exists.
    async fn create(&self) -> Result<()>;

    /// Delete the container. Succeeds when it is already gone.
    async fn delete(&self) -> Result<()>;
}
