//! Observer registry.
//!
//! An explicit table of callbacks keyed by registration handle. Delivery is in
//! registration order. Callbacks are cloned out of the table and invoked after
//! the lock is released, so a callback may register, unregister or disconnect
//! the client without deadlocking.

use std::{
    fmt,
    sync::{
        Arc, Mutex, MutexGuard, PoisonError,
        atomic::{AtomicU64, Ordering},
    },
};

use serde_json::Value;

use crate::error::ClientError;

/// Which events an observer receives.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EventFilter {
    /// Events with exactly this name
    Named(String),
    /// Every event
    Any,
}

impl EventFilter {
    /// Wildcard spelling accepted by the `From<&str>` conversion
    pub const WILDCARD: &'static str = "*";

    /// Filter for one event name
    pub fn named(name: impl Into<String>) -> Self {
        Self::Named(name.into())
    }

    /// True if an event called `name` passes the filter
    pub fn matches(&self, name: &str) -> bool {
        match self {
            Self::Named(wanted) => wanted == name,
            Self::Any => true,
        }
    }
}

impl From<&str> for EventFilter {
    fn from(name: &str) -> Self {
        if name == Self::WILDCARD { Self::Any } else { Self::named(name) }
    }
}

/// Why a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DisconnectReason {
    /// The application called `disconnect`
    Requested,
    /// The server closed the event socket
    ServerClosed,
    /// A command failed on a broken control channel
    ControlBroken,
    /// The event socket failed with an error
    EventBroken,
    /// A command deadline passed
    Timeout,
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::Requested => "requested",
            Self::ServerClosed => "server closed the event channel",
            Self::ControlBroken => "control channel broken",
            Self::EventBroken => "event channel broken",
            Self::Timeout => "command timed out",
        };
        f.write_str(text)
    }
}

/// Identifies one registration, for [`Observers::off`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObserverHandle(u64);

type EventCallback = Arc<dyn Fn(&str, &Value) + Send + Sync>;
type ConnectedCallback = Arc<dyn Fn(&str) + Send + Sync>;
type DisconnectedCallback = Arc<dyn Fn(DisconnectReason) + Send + Sync>;
type ErrorCallback = Arc<dyn Fn(&ClientError) + Send + Sync>;

enum Slot {
    Event(EventFilter, EventCallback),
    Connected(ConnectedCallback),
    Disconnected(DisconnectedCallback),
    Error(ErrorCallback),
}

/// Registration table for event and lifecycle callbacks.
pub struct Observers {
    next_id: AtomicU64,
    slots: Mutex<Vec<(ObserverHandle, Slot)>>,
}

impl Default for Observers {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Observers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Observers").field("registered", &self.len()).finish()
    }
}

impl Observers {
    /// Empty registry
    pub fn new() -> Self {
        Self { next_id: AtomicU64::new(1), slots: Mutex::new(Vec::new()) }
    }

    /// Observe events passing `filter`
    pub fn on<F>(&self, filter: impl Into<EventFilter>, callback: F) -> ObserverHandle
    where
        F: Fn(&str, &Value) + Send + Sync + 'static,
    {
        let filter = filter.into();
        tracing::debug!(?filter, "event observer registered");
        self.register(Slot::Event(filter, Arc::new(callback)))
    }

    /// Observe successful connects; receives the server version
    pub fn on_connected<F>(&self, callback: F) -> ObserverHandle
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.register(Slot::Connected(Arc::new(callback)))
    }

    /// Observe session ends
    pub fn on_disconnected<F>(&self, callback: F) -> ObserverHandle
    where
        F: Fn(DisconnectReason) + Send + Sync + 'static,
    {
        self.register(Slot::Disconnected(Arc::new(callback)))
    }

    /// Observe errors that forced a session teardown
    pub fn on_error<F>(&self, callback: F) -> ObserverHandle
    where
        F: Fn(&ClientError) + Send + Sync + 'static,
    {
        self.register(Slot::Error(Arc::new(callback)))
    }

    /// Remove a registration. Returns `false` if it was already gone.
    pub fn off(&self, handle: ObserverHandle) -> bool {
        let mut slots = self.lock();
        let before = slots.len();
        slots.retain(|(h, _)| *h != handle);
        let removed = slots.len() != before;
        tracing::debug!(?handle, removed, "observer unregistered");
        removed
    }

    /// Number of registrations of any kind
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// True with no registrations
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Deliver an event to every matching observer. Returns how many ran.
    pub fn dispatch_event(&self, name: &str, value: &Value) -> usize {
        let targets: Vec<EventCallback> = self
            .lock()
            .iter()
            .filter_map(|(_, slot)| match slot {
                Slot::Event(filter, cb) if filter.matches(name) => Some(Arc::clone(cb)),
                _ => None,
            })
            .collect();

        for cb in &targets {
            cb(name, value);
        }
        targets.len()
    }

    /// Tell connect observers the session is up
    pub fn notify_connected(&self, server_version: &str) -> usize {
        let targets: Vec<ConnectedCallback> = self
            .lock()
            .iter()
            .filter_map(|(_, slot)| match slot {
                Slot::Connected(cb) => Some(Arc::clone(cb)),
                _ => None,
            })
            .collect();

        for cb in &targets {
            cb(server_version);
        }
        targets.len()
    }

    /// Tell disconnect observers the session ended
    pub fn notify_disconnected(&self, reason: DisconnectReason) -> usize {
        let targets: Vec<DisconnectedCallback> = self
            .lock()
            .iter()
            .filter_map(|(_, slot)| match slot {
                Slot::Disconnected(cb) => Some(Arc::clone(cb)),
                _ => None,
            })
            .collect();

        for cb in &targets {
            cb(reason);
        }
        targets.len()
    }

    /// Report an error to error observers
    pub fn notify_error(&self, error: &ClientError) -> usize {
        let targets: Vec<ErrorCallback> = self
            .lock()
            .iter()
            .filter_map(|(_, slot)| match slot {
                Slot::Error(cb) => Some(Arc::clone(cb)),
                _ => None,
            })
            .collect();

        for cb in &targets {
            cb(error);
        }
        targets.len()
    }

    fn register(&self, slot: Slot) -> ObserverHandle {
        let handle = ObserverHandle(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.lock().push((handle, slot));
        handle
    }

    fn lock(&self) -> MutexGuard<'_, Vec<(ObserverHandle, Slot)>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
