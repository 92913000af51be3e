//! # Event Bus System
//!
//! Provides the observable side of the authentication context using
//! `tokio::sync::broadcast`. Providers, the provider manager and roaming
//! settings stores publish typed events here; UI layers subscribe.
//!
//! ## Overview
//!
//! The event bus system consists of:
//! - **Event Types**: Strongly-typed enum hierarchies for each domain
//! - **EventBus**: Central broadcast channel for publishing events
//! - **EventStream**: Wrapper for consuming events with filtering
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────┐   emit    ┌───────────┐
//! │ ProviderManager ├──────────>│           │
//! └─────────────────┘           │ EventBus  │   subscribe   ┌────────────┐
//!                               │ (broadcast├──────────────>│ Subscriber │
//! ┌─────────────────┐   emit    │  channel) │               └────────────┘
//! │ Roaming store   ├──────────>│           │
//! └─────────────────┘           └───────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust
//! use core_runtime::events::{CoreEvent, EventBus, ProviderEvent, ProviderUpdateReason};
//!
//! let event_bus = EventBus::new(100);
//! let mut stream = event_bus.subscribe();
//!
//! event_bus
//!     .emit(CoreEvent::Provider(ProviderEvent::ProviderUpdated {
//!         reason: ProviderUpdateReason::ProviderChanged,
//!     }))
//!     .ok();
//!
//! assert!(stream.try_recv().is_ok());
//! ```
//!
//! ## Error Handling
//!
//! - **`RecvError::Lagged(n)`**: Subscriber was too slow and missed `n` events.
//!   Non-fatal; the subscriber keeps receiving new events.
//! - **`RecvError::Closed`**: All senders have been dropped. Treat as shutdown.
//!
//! `emit` fails only when nobody is listening, which publishers ignore.

use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::broadcast;

pub use tokio::sync::broadcast::error::{RecvError, SendError};
pub use tokio::sync::broadcast::Receiver;

/// Default buffer size for the event bus channel.
///
/// Subscribers that can't keep up will receive `RecvError::Lagged`.
pub const DEFAULT_EVENT_BUFFER_SIZE: usize = 100;

// ============================================================================
// Core Event Types
// ============================================================================

/// Top-level event enum encompassing all event categories.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "payload")]
pub enum CoreEvent {
    /// Authentication provider events
    Provider(ProviderEvent),
    /// Roaming settings events
    Roaming(RoamingEvent),
}

impl CoreEvent {
    /// Returns a human-readable description of the event.
    pub fn description(&self) -> &str {
        match self {
            CoreEvent::Provider(e) => e.description(),
            CoreEvent::Roaming(e) => e.description(),
        }
    }

    /// Returns the severity level of the event.
    pub fn severity(&self) -> EventSeverity {
        match self {
            CoreEvent::Roaming(RoamingEvent::SyncFailed { .. }) => EventSeverity::Warning,
            CoreEvent::Provider(ProviderEvent::ProviderStateChanged {
                new_state: Some(ProviderState::SignedIn),
                ..
            }) => EventSeverity::Info,
            CoreEvent::Roaming(RoamingEvent::SyncCompleted { .. }) => EventSeverity::Info,
            _ => EventSeverity::Debug,
        }
    }
}

/// Event severity levels for filtering and logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EventSeverity {
    Debug,
    Info,
    Warning,
    Error,
}

// ============================================================================
// Provider Events
// ============================================================================

/// Authentication state of a provider.
///
/// A provider starts in `Loading` (or `SignedOut` when it can construct
/// synchronously) and only moves between states as the outcome of token
/// operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProviderState {
    /// A token operation is in progress
    Loading,
    /// No account is signed in
    SignedOut,
    /// An account is signed in and tokens can be acquired
    SignedIn,
}

impl fmt::Display for ProviderState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ProviderState::Loading => "Loading",
            ProviderState::SignedOut => "SignedOut",
            ProviderState::SignedIn => "SignedIn",
        };
        f.write_str(name)
    }
}

/// Why the provider manager reports an update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProviderUpdateReason {
    /// The global provider was replaced (or cleared)
    ProviderChanged,
    /// The global provider's state changed
    ProviderStateChanged,
}

/// Events re-broadcast by the provider manager.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum ProviderEvent {
    /// Something about the global provider changed.
    ProviderUpdated { reason: ProviderUpdateReason },
    /// The global provider's state changed, or the provider was replaced by
    /// one in a different state. `None` means no provider was set.
    ProviderStateChanged {
        old_state: Option<ProviderState>,
        new_state: Option<ProviderState>,
    },
}

impl ProviderEvent {
    fn description(&self) -> &str {
        match self {
            ProviderEvent::ProviderUpdated {
                reason: ProviderUpdateReason::ProviderChanged,
            } => "Global provider changed",
            ProviderEvent::ProviderUpdated {
                reason: ProviderUpdateReason::ProviderStateChanged,
            } => "Global provider updated",
            ProviderEvent::ProviderStateChanged { .. } => "Provider state changed",
        }
    }
}

// ============================================================================
// Roaming Events
// ============================================================================

/// Events published by roaming settings stores.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum RoamingEvent {
    /// A sync finished and local and remote now agree.
    SyncCompleted {
        /// Store identifier (extension id or file name)
        store_id: String,
        /// Number of keys written to the remote
        pushed: usize,
        /// Number of keys copied into the local cache
        pulled: usize,
    },
    /// A sync was abandoned. The local cache is unchanged.
    SyncFailed {
        store_id: String,
        message: String,
        /// The remote container does not exist; the caller may create it and retry
        remote_missing: bool,
    },
    /// The remote container and the local cache were deleted.
    StoreDeleted { store_id: String },
}

impl RoamingEvent {
    fn description(&self) -> &str {
        match self {
            RoamingEvent::SyncCompleted { .. } => "Roaming settings synced",
            RoamingEvent::SyncFailed { .. } => "Roaming settings sync failed",
            RoamingEvent::StoreDeleted { .. } => "Roaming settings deleted",
        }
    }
}

// ============================================================================
// Event Bus
// ============================================================================

/// Central event bus for broadcasting events to multiple subscribers.
///
/// Cloning is cheap; every clone publishes into the same channel.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<CoreEvent>,
}

impl EventBus {
    /// Creates a new event bus with the specified buffer size.
    ///
    /// A subscriber that falls behind by more than `capacity` events receives
    /// `RecvError::Lagged`.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publishes an event to all subscribers.
    ///
    /// Returns the number of subscribers that received the event, or an error
    /// if there are no active subscribers.
    pub fn emit(&self, event: CoreEvent) -> Result<usize, SendError<CoreEvent>> {
        self.sender.send(event)
    }

    /// Creates a new subscriber. Past events are not replayed.
    pub fn subscribe(&self) -> Receiver<CoreEvent> {
        self.sender.subscribe()
    }

    /// Returns the number of active subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_BUFFER_SIZE)
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}

// ============================================================================
// Event Stream Wrapper
// ============================================================================

type EventFilter = Box<dyn Fn(&CoreEvent) -> bool + Send + Sync>;

/// A wrapper around `broadcast::Receiver` with optional filtering.
///
/// ```rust
/// use core_runtime::events::{CoreEvent, EventBus, EventStream};
///
/// let event_bus = EventBus::new(100);
/// let roaming_only = EventStream::new(event_bus.subscribe())
///     .filter(|event| matches!(event, CoreEvent::Roaming(_)));
/// ```
pub struct EventStream {
    receiver: Receiver<CoreEvent>,
    filter: Option<EventFilter>,
}

impl EventStream {
    pub fn new(receiver: Receiver<CoreEvent>) -> Self {
        Self {
            receiver,
            filter: None,
        }
    }

    /// Only events that match `predicate` will be returned by `recv()`.
    pub fn filter<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&CoreEvent) -> bool + Send + Sync + 'static,
    {
        self.filter = Some(Box::new(predicate));
        self
    }

    fn accepts(&self, event: &CoreEvent) -> bool {
        self.filter.as_ref().map_or(true, |filter| filter(event))
    }

    /// Receives the next event that passes the filter.
    ///
    /// # Errors
    ///
    /// Returns `RecvError::Lagged(n)` if the subscriber fell behind by `n` events.
    /// Returns `RecvError::Closed` if all senders have been dropped.
    pub async fn recv(&mut self) -> Result<CoreEvent, RecvError> {
        loop {
            let event = self.receiver.recv().await?;
            if self.accepts(&event) {
                return Ok(event);
            }
        }
    }

    /// Attempts to receive an event without waiting.
    ///
    /// Returns `None` if no matching events are currently available.
    pub fn try_recv(&mut self) -> Option<Result<CoreEvent, RecvError>> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => {
                    if self.accepts(&event) {
                        return Some(Ok(event));
                    }
                }
                Err(broadcast::error::TryRecvError::Empty) => return None,
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    return Some(Err(RecvError::Lagged(n)))
                }
                Err(broadcast::error::TryRecvError::Closed) => return Some(Err(RecvError::Closed)),
            }
        }
    }
}

impl fmt::Debug for EventStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventStream")
            .field("has_filter", &self.filter.is_some())
            .finish()
    }
}
