//! # Provider Manager
//!
//! Holds the application's active ("global") authentication provider and
//! re-publishes its state changes on the [`EventBus`].
//!
//! ## Overview
//!
//! `ProviderManager` is an explicit, cloneable handle created once at the
//! composition root and passed to whatever needs the active provider. Every
//! clone shares the same slot.
//!
//! Replacing the provider is replace-not-mutate: the forwarding task of the
//! previous provider is aborted before the new one is subscribed, and events
//! from a replaced provider are never published.
//!
//! ## Events
//!
//! - Setting the provider publishes `ProviderStateChanged` (when the state
//!   differs) followed by `ProviderUpdated { ProviderChanged }`.
//! - A state change of the active provider publishes `ProviderStateChanged`
//!   followed by `ProviderUpdated { ProviderStateChanged }`.
//!
//! ## Usage
//!
//! ```no_run
//! use core_auth::{AuthProvider, MockProvider, ProviderManager};
//! use core_runtime::events::EventBus;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # #[tokio::main]
//! # async fn main() {
//! let manager = ProviderManager::new(EventBus::new(100));
//! let mut events = manager.subscribe();
//!
//! manager.set_global_provider(Some(Arc::new(MockProvider::new(
//!     false,
//!     Duration::ZERO,
//!     "graph-toolkit-rs/0.1.0",
//! ))));
//!
//! if let Some(provider) = manager.global_provider() {
//!     provider.sign_in().await.unwrap();
//! }
//! # }
//! ```

use crate::provider::AuthProvider;
use crate::types::{ProviderState, ProviderStateChange};
use core_runtime::events::{CoreEvent, EventBus, EventStream, ProviderEvent, ProviderUpdateReason};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

#[derive(Default)]
struct Slot {
    provider: Option<Arc<dyn AuthProvider>>,
    forwarder: Option<JoinHandle<()>>,
    generation: u64,
}

struct ManagerInner {
    event_bus: EventBus,
    slot: Mutex<Slot>,
}

impl ManagerInner {
    fn lock(&self) -> MutexGuard<'_, Slot> {
        match self.slot.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn publish_state_change(
        &self,
        old: Option<ProviderState>,
        new: Option<ProviderState>,
        reason: ProviderUpdateReason,
    ) {
        if old != new {
            let _ = self
                .event_bus
                .emit(CoreEvent::Provider(ProviderEvent::ProviderStateChanged {
                    old_state: old,
                    new_state: new,
                }));
        }
        let _ = self
            .event_bus
            .emit(CoreEvent::Provider(ProviderEvent::ProviderUpdated { reason }));
    }
}

/// Handle to the active authentication provider.
#[derive(Clone)]
pub struct ProviderManager {
    inner: Arc<ManagerInner>,
}

impl ProviderManager {
    pub fn new(event_bus: EventBus) -> Self {
        Self {
            inner: Arc::new(ManagerInner {
                event_bus,
                slot: Mutex::new(Slot::default()),
            }),
        }
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.inner.event_bus
    }

    /// The active provider, if any.
    pub fn global_provider(&self) -> Option<Arc<dyn AuthProvider>> {
        self.inner.lock().provider.clone()
    }

    /// State of the active provider, `None` without one.
    pub fn state(&self) -> Option<ProviderState> {
        self.global_provider().map(|p| p.state())
    }

    /// Replace (or clear) the active provider.
    ///
    /// Must be called from within a tokio runtime for state changes to be
    /// forwarded.
    pub fn set_global_provider(&self, provider: Option<Arc<dyn AuthProvider>>) {
        let mut slot = self.inner.lock();

        if let Some(forwarder) = slot.forwarder.take() {
            forwarder.abort();
        }
        slot.generation += 1;

        let old_state = slot.provider.as_ref().map(|p| p.state());
        let new_state = provider.as_ref().map(|p| p.state());

        if let Some(provider) = &provider {
            slot.forwarder = self.spawn_forwarder(provider.as_ref(), slot.generation);
            info!(provider = provider.name(), state = ?new_state, "Global provider set");
        } else {
            info!("Global provider cleared");
        }
        slot.provider = provider;

        self.inner
            .publish_state_change(old_state, new_state, ProviderUpdateReason::ProviderChanged);
    }

    /// Subscribe to provider events only.
    pub fn subscribe(&self) -> EventStream {
        EventStream::new(self.inner.event_bus.subscribe())
            .filter(|event| matches!(event, CoreEvent::Provider(_)))
    }

    fn spawn_forwarder(
        &self,
        provider: &dyn AuthProvider,
        generation: u64,
    ) -> Option<JoinHandle<()>> {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            warn!("No tokio runtime; provider state changes will not be forwarded");
            return None;
        };

        let mut changes = provider.subscribe();
        let weak: Weak<ManagerInner> = Arc::downgrade(&self.inner);

        Some(handle.spawn(async move {
            loop {
                let change: ProviderStateChange = match changes.recv().await {
                    Ok(change) => change,
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Provider state forwarder lagged");
                        continue;
                    }
                    Err(RecvError::Closed) => break,
                };

                let Some(inner) = weak.upgrade() else {
                    break;
                };
                // Hold the slot so a concurrent replacement cannot interleave.
                let slot = inner.lock();
                if slot.generation != generation {
                    break;
                }
                debug!(change = %change, "Forwarding provider state change");
                inner.publish_state_change(
                    Some(change.old_state),
                    Some(change.new_state),
                    ProviderUpdateReason::ProviderStateChanged,
                );
                drop(slot);
            }
        }))
    }
}

impl std::fmt::Debug for ProviderManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let slot = self.inner.lock();
        f.debug_struct("ProviderManager")
            .field("provider", &slot.provider.as_ref().map(|p| p.name().to_string()))
            .field("generation", &slot.generation)
            .finish()
    }
}
