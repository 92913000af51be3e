//! # Roaming Settings Store
//!
//! In-memory key/value cache mirrored to a [`RemoteSettingsStore`].
//!
//! ## Sync
//!
//! `sync` holds a per-store lock for its whole duration, then:
//!
//! 1. Fetches the remote snapshot. A container that does not exist yet counts
//!    as empty.
//! 2. Pushes every local key (reserved keys excepted) whose remote value is
//!    missing or different. Local values win on conflict.
//! 3. Copies every remote key that is absent locally into the cache. Remote
//!    values never replace local ones.
//!
//! The cache is only modified after the remote write succeeded, so a failed
//! sync leaves it untouched. Every sync publishes
//! `RoamingEvent::SyncCompleted` or `RoamingEvent::SyncFailed`.
//!
//! A write against a missing container fails with
//! `RoamingError::RemoteNotFound`; callers create it with
//! [`create_remote`](RoamingSettingsStore::create_remote) and sync again.
//!
//! ## Auto-sync
//!
//! With auto-sync enabled, every `save` schedules a background sync on the
//! current tokio runtime without waiting for it.

use crate::error::{Result, RoamingError};
use crate::remote::{is_reserved_key, RemoteSettingsStore, RemoteValues};
use crate::serializer::{self, JsonObjectSerializer, ObjectSerializer};
use core_runtime::events::{CoreEvent, EventBus, RoamingEvent};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info, instrument, warn};

/// Outcome of a successful sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SyncReport {
    /// Keys written to the remote
    pub pushed: usize,
    /// Keys copied into the local cache
    pub pulled: usize,
}

#[derive(Default)]
struct Cache {
    values: HashMap<String, Value>,
    dirty: bool,
    /// Bumped on every local mutation
    version: u64,
}

impl Cache {
    fn touch(&mut self) {
        self.dirty = true;
        self.version += 1;
    }
}

struct StoreInner {
    remote: Arc<dyn RemoteSettingsStore>,
    serializer: Arc<dyn ObjectSerializer>,
    event_bus: EventBus,
    cache: Mutex<Cache>,
    sync_lock: tokio::sync::Mutex<()>,
    auto_sync: AtomicBool,
}

impl StoreInner {
    fn cache(&self) -> MutexGuard<'_, Cache> {
        match self.cache.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn publish(&self, event: RoamingEvent) {
        let _ = self.event_bus.emit(CoreEvent::Roaming(event));
    }

    async fn sync(&self) -> Result<SyncReport> {
        let _guard = self.sync_lock.lock().await;
        let store_id = self.remote.store_id().to_string();

        match self.reconcile().await {
            Ok(report) => {
                info!(
                    store = %store_id,
                    pushed = report.pushed,
                    pulled = report.pulled,
                    "Roaming settings synced"
                );
                self.publish(RoamingEvent::SyncCompleted {
                    store_id,
                    pushed: report.pushed,
                    pulled: report.pulled,
                });
                Ok(report)
            }
            Err(e) => {
                warn!(store = %store_id, error = %e, "Roaming settings sync failed");
                self.publish(RoamingEvent::SyncFailed {
                    store_id,
                    message: e.to_string(),
                    remote_missing: e.is_remote_missing(),
                });
                Err(e)
            }
        }
    }

    async fn reconcile(&self) -> Result<SyncReport> {
        let remote = self.remote.fetch().await?.unwrap_or_default();
        let (local, version) = {
            let cache = self.cache();
            (cache.values.clone(), cache.version)
        };

        let mut merged: RemoteValues = remote
            .iter()
            .filter(|(key, _)| !is_reserved_key(key))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();

        let mut pushed = 0;
        for (key, value) in local.iter().filter(|(key, _)| !is_reserved_key(key)) {
            if remote.get(key) != Some(value) {
                merged.insert(key.clone(), value.clone());
                pushed += 1;
            }
        }

        let pulled: Vec<(String, Value)> = remote
            .into_iter()
            .filter(|(key, _)| !is_reserved_key(key) && !local.contains_key(key))
            .collect();

        if pushed > 0 {
            debug!(pushed, "Writing local changes to remote");
            self.remote.write(&merged).await?;
        }

        let mut cache = self.cache();
        let pulled_count = pulled.len();
        for (key, value) in pulled {
            // Keys saved while the sync was in flight stay as written.
            cache.values.entry(key).or_insert(value);
        }
        if cache.version == version {
            cache.dirty = false;
        }

        Ok(SyncReport {
            pushed,
            pulled: pulled_count,
        })
    }
}

/// Roaming key/value settings backed by a remote container.
///
/// Cheap to clone; clones share the cache.
#[derive(Clone)]
pub struct RoamingSettingsStore {
    inner: Arc<StoreInner>,
}

impl RoamingSettingsStore {
    /// Store over `remote` with JSON payloads and auto-sync disabled.
    pub fn new(remote: Arc<dyn RemoteSettingsStore>, event_bus: EventBus) -> Self {
        Self::with_serializer(remote, Arc::new(JsonObjectSerializer), event_bus)
    }

    /// Store over `remote` encoding complex values with `serializer`.
    pub fn with_serializer(
        remote: Arc<dyn RemoteSettingsStore>,
        serializer: Arc<dyn ObjectSerializer>,
        event_bus: EventBus,
    ) -> Self {
        Self {
            inner: Arc::new(StoreInner {
                remote,
                serializer,
                event_bus,
                cache: Mutex::new(Cache::default()),
                sync_lock: tokio::sync::Mutex::new(()),
                auto_sync: AtomicBool::new(false),
            }),
        }
    }

    pub fn with_auto_sync(self, enabled: bool) -> Self {
        self.set_auto_sync(enabled);
        self
    }

    pub fn set_auto_sync(&self, enabled: bool) {
        self.inner.auto_sync.store(enabled, Ordering::SeqCst);
    }

    pub fn auto_sync(&self) -> bool {
        self.inner.auto_sync.load(Ordering::SeqCst)
    }

    pub fn store_id(&self) -> &str {
        self.inner.remote.store_id()
    }

    /// Whether local changes have not been synced yet.
    pub fn is_dirty(&self) -> bool {
        self.inner.cache().dirty
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.inner.cache().values.contains_key(key)
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.inner.cache().values.keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Cached value for `key`, `None` when absent.
    pub fn try_read<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let value = self.inner.cache().values.get(key).cloned();
        value
            .map(|value| serializer::decode(self.inner.serializer.as_ref(), &value))
            .transpose()
    }

    /// Cached value for `key`, or `default` when absent or undecodable.
    pub fn read<T: DeserializeOwned>(&self, key: &str, default: T) -> T {
        match self.try_read(key) {
            Ok(Some(value)) => value,
            Ok(None) => default,
            Err(e) => {
                warn!(key, error = %e, "Cached roaming value could not be decoded");
                default
            }
        }
    }

    /// Store `value` under `key` in the cache.
    pub fn save<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<()> {
        if key.is_empty() {
            return Err(RoamingError::InvalidArgument("key must not be empty".into()));
        }
        let value = serializer::encode(self.inner.serializer.as_ref(), value)?;

        {
            let mut cache = self.inner.cache();
            cache.values.insert(key.to_string(), value);
            cache.touch();
        }

        if self.auto_sync() {
            self.spawn_sync();
        }
        Ok(())
    }

    /// Remove `key` from the cache. Returns whether it was present.
    ///
    /// Remote values are never deleted by sync, so a key that still exists
    /// remotely comes back on the next sync.
    pub fn try_delete(&self, key: &str) -> bool {
        let mut cache = self.inner.cache();
        let removed = cache.values.remove(key).is_some();
        if removed {
            cache.touch();
        }
        removed
    }

    /// Remove every cached value.
    pub fn clear(&self) {
        let mut cache = self.inner.cache();
        cache.values.clear();
        cache.touch();
    }

    /// Reconcile the cache with the remote.
    ///
    /// The outcome is also published on the event bus.
    #[instrument(skip(self), fields(store = %self.store_id()))]
    pub async fn sync(&self) -> Result<SyncReport> {
        self.inner.sync().await
    }

    /// Create the remote container if it does not exist.
    pub async fn create_remote(&self) -> Result<()> {
        self.inner.remote.create().await
    }

    /// Empty the cache, then delete the remote container.
    ///
    /// The cache is cleared even when the remote delete fails.
    #[instrument(skip(self), fields(store = %self.store_id()))]
    pub async fn delete(&self) -> Result<()> {
        // Held through the remote delete so a running sync cannot repopulate.
        let _sync = self.inner.sync_lock.lock().await;
        {
            let mut cache = self.inner.cache();
            cache.values.clear();
            cache.dirty = false;
            cache.version += 1;
        }

        self.inner.remote.delete().await?;
        info!("Roaming settings deleted");
        self.inner.publish(RoamingEvent::StoreDeleted {
            store_id: self.store_id().to_string(),
        });
        Ok(())
    }

    fn spawn_sync(&self) {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            warn!("No tokio runtime; auto-sync skipped");
            return;
        };

        let inner = Arc::clone(&self.inner);
        handle.spawn(async move {
            // Failures are published by `sync`.
            let _ = inner.sync().await;
        });
    }
}

impl std::fmt::Debug for RoamingSettingsStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let cache = self.inner.cache();
        f.debug_struct("RoamingSettingsStore")
            .field("store_id", &self.store_id())
            .field("keys", &cache.values.len())
            .field("dirty", &cache.dirty)
            .finish()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use async_trait::async_trait;
    use core_runtime::events::EventStream;
    use serde::Deserialize;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    /// Remote held in memory.
    #[derive(Default)]
    pub(crate) struct MemoryRemote {
        pub values: Mutex<Option<RemoteValues>>,
        pub writes: AtomicUsize,
        pub fail_delete: bool,
        pub fetch_delay: Duration,
    }

    impl MemoryRemote {
        pub fn with(values: serde_json::Value) -> Self {
            let values = match values {
                Value::Object(map) => map.into_iter().collect(),
                _ => RemoteValues::new(),
            };
            Self {
                values: Mutex::new(Some(values)),
                ..Default::default()
            }
        }

        pub fn snapshot(&self) -> Option<RemoteValues> {
            self.values.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl RemoteSettingsStore for MemoryRemote {
        fn store_id(&self) -> &str {
            "com.contoso.settings"
        }

        async fn fetch(&self) -> Result<Option<RemoteValues>> {
            if !self.fetch_delay.is_zero() {
                tokio::time::sleep(self.fetch_delay).await;
            }
            Ok(self.snapshot())
        }

        async fn write(&self, values: &RemoteValues) -> Result<()> {
            let mut remote = self.values.lock().unwrap();
            match remote.as_mut() {
                Some(remote) => {
                    *remote = values.clone();
                    self.writes.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
                None => Err(RoamingError::RemoteNotFound(self.store_id().into())),
            }
        }

        async fn create(&self) -> Result<()> {
            self.values.lock().unwrap().get_or_insert_with(RemoteValues::new);
            Ok(())
        }

        async fn delete(&self) -> Result<()> {
            if self.fail_delete {
                return Err(RoamingError::Remote {
                    status: 503,
                    message: "unavailable".into(),
                });
            }
            *self.values.lock().unwrap() = None;
            Ok(())
        }
    }

    fn store(remote: &Arc<MemoryRemote>) -> (RoamingSettingsStore, EventStream) {
        let bus = EventBus::new(32);
        let events = EventStream::new(bus.subscribe());
        (RoamingSettingsStore::new(remote.clone(), bus), events)
    }

    fn local_values(store: &RoamingSettingsStore) -> RemoteValues {
        store.inner.cache().values.clone()
    }

    #[tokio::test]
    async fn test_merge_local_wins_remote_fills_gaps() {
        let remote = Arc::new(MemoryRemote::with(json!({ "A": 2, "B": 3 })));
        let (store, _events) = store(&remote);
        store.save("A", &1).unwrap();

        let report = store.sync().await.unwrap();

        let expected: RemoteValues = [("A".to_string(), json!(1)), ("B".to_string(), json!(3))]
            .into_iter()
            .collect();
        assert_eq!(local_values(&store), expected);
        assert_eq!(remote.snapshot().unwrap(), expected);
        assert_eq!(report, SyncReport { pushed: 1, pulled: 1 });
        assert!(!store.is_dirty());
    }

    #[tokio::test]
    async fn test_second_sync_is_a_fixed_point() {
        let remote = Arc::new(MemoryRemote::with(json!({ "B": 3 })));
        let (store, _events) = store(&remote);
        store.save("A", "one").unwrap();

        store.sync().await.unwrap();
        let local_after_first = local_values(&store);
        let remote_after_first = remote.snapshot();

        let report = store.sync().await.unwrap();

        assert_eq!(report, SyncReport::default());
        assert_eq!(local_values(&store), local_after_first);
        assert_eq!(remote.snapshot(), remote_after_first);
        assert_eq!(remote.writes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_reserved_keys_are_not_pushed() {
        let remote = Arc::new(MemoryRemote::with(json!({ "@odata.context": "ctx", "id": "x" })));
        let (store, _events) = store(&remote);
        store.save("statusCode", &200).unwrap();
        store.save("@odata.context", "local").unwrap();
        store.save("theme", "dark").unwrap();

        store.sync().await.unwrap();

        let pushed = remote.snapshot().unwrap();
        assert!(!pushed.contains_key("statusCode"));
        assert!(!pushed.contains_key("@odata.context"));
        assert_eq!(pushed.get("theme"), Some(&json!("dark")));
        assert!(!store.contains_key("id"));
    }

    #[tokio::test]
    async fn test_missing_remote_fails_and_keeps_cache() {
        let remote = Arc::new(MemoryRemote::default());
        let (store, mut events) = store(&remote);
        store.save("theme", "dark").unwrap();

        let error = store.sync().await.unwrap_err();
        assert!(error.is_remote_missing());
        assert_eq!(store.keys(), vec!["theme".to_string()]);
        assert!(store.is_dirty());

        match events.recv().await.unwrap() {
            CoreEvent::Roaming(RoamingEvent::SyncFailed { remote_missing, .. }) => {
                assert!(remote_missing)
            }
            other => panic!("unexpected event {:?}", other),
        }

        store.create_remote().await.unwrap();
        assert_eq!(store.sync().await.unwrap().pushed, 1);
        assert!(matches!(
            events.recv().await.unwrap(),
            CoreEvent::Roaming(RoamingEvent::SyncCompleted { pushed: 1, pulled: 0, .. })
        ));
    }

    #[tokio::test]
    async fn test_delete_clears_cache_even_when_remote_fails() {
        let remote = Arc::new(MemoryRemote {
            fail_delete: true,
            ..MemoryRemote::with(json!({ "B": 3 }))
        });
        let (store, _events) = store(&remote);
        store.save("A", &1).unwrap();

        assert!(store.delete().await.is_err());
        assert!(store.keys().is_empty());
    }

    #[tokio::test]
    async fn test_delete_publishes_event() {
        let remote = Arc::new(MemoryRemote::with(json!({ "B": 3 })));
        let (store, mut events) = store(&remote);

        store.delete().await.unwrap();

        assert!(remote.snapshot().is_none());
        assert_eq!(
            events.recv().await.unwrap(),
            CoreEvent::Roaming(RoamingEvent::StoreDeleted {
                store_id: "com.contoso.settings".into()
            })
        );
    }

    #[tokio::test]
    async fn test_delete_waits_for_running_sync() {
        let remote = Arc::new(MemoryRemote {
            fetch_delay: Duration::from_millis(100),
            ..MemoryRemote::with(json!({ "B": 3 }))
        });
        let (store, _events) = store(&remote);

        let syncing = tokio::spawn({
            let store = store.clone();
            async move { store.sync().await }
        });
        tokio::time::sleep(Duration::from_millis(20)).await;

        store.delete().await.unwrap();
        syncing.await.unwrap().unwrap();

        assert!(store.keys().is_empty());
        assert!(remote.snapshot().is_none());
    }

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Window {
        width: u32,
        height: u32,
    }

    #[test]
    fn test_read_and_save_values() {
        let remote = Arc::new(MemoryRemote::default());
        let (store, _events) = store(&remote);

        store
            .save("window", &Window { width: 800, height: 600 })
            .unwrap();
        store.save("volume", &7).unwrap();

        assert_eq!(
            store.try_read::<Window>("window").unwrap(),
            Some(Window { width: 800, height: 600 })
        );
        assert_eq!(store.read("volume", 0u32), 7);
        assert_eq!(store.read("missing", 5u32), 5);
        assert_eq!(store.read("volume", String::from("fallback")), "fallback");
        assert!(store.is_dirty());
    }

    #[test]
    fn test_key_operations() {
        let remote = Arc::new(MemoryRemote::default());
        let (store, _events) = store(&remote);

        assert!(matches!(store.save("", &1), Err(RoamingError::InvalidArgument(_))));

        store.save("b", &1).unwrap();
        store.save("a", &2).unwrap();
        assert_eq!(store.keys(), vec!["a".to_string(), "b".to_string()]);
        assert!(store.try_delete("a"));
        assert!(!store.try_delete("a"));
        assert!(!store.contains_key("a"));

        store.clear();
        assert!(store.keys().is_empty());
    }

    #[tokio::test]
    async fn test_auto_sync_after_save() {
        let remote = Arc::new(MemoryRemote::with(json!({})));
        let (store, mut events) = store(&remote);
        let store = store.with_auto_sync(true);

        store.save("theme", "dark").unwrap();

        let event = tokio::time::timeout(Duration::from_secs(1), events.recv())
            .await
            .expect("timed out waiting for sync")
            .unwrap();
        assert!(matches!(
            event,
            CoreEvent::Roaming(RoamingEvent::SyncCompleted { .. })
        ));
        assert_eq!(remote.snapshot().unwrap().get("theme"), Some(&json!("dark")));
    }
}
