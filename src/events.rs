//! Engine event bus
//!
//! Host callbacks (connectivity, background wakes) and engine outcomes (sync passes,
//! failed and evicted actions) all flow through one bus. Applications subscribe with a
//! callback and get back a `Subscription` handle; async consumers can take a broadcast
//! receiver instead.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::sync::SyncSession;

const BROADCAST_CAPACITY: usize = 256;

/// Why an action ended up FAILED
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FailureReason {
    /// The remote refused the request outright (4xx); retrying cannot help
    Rejected { status: u16, message: String },
    /// Every allowed attempt failed with a retriable error
    RetryBudgetExhausted { attempts: u32, last_error: String },
    /// The request could not be built (bad endpoint or URL)
    InvalidRequest { message: String },
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::Rejected { status, message } => {
                write!(f, "rejected by remote ({}): {}", status, message)
            }
            FailureReason::RetryBudgetExhausted {
                attempts,
                last_error,
            } => write!(
                f,
                "retry budget exhausted after {} attempts: {}",
                attempts, last_error
            ),
            FailureReason::InvalidRequest { message } => write!(f, "invalid request: {}", message),
        }
    }
}

/// Everything observable that happens inside the engine
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    SyncStarted,
    SyncCompleted(SyncSession),
    ActionSynced { id: String },
    ActionFailed { id: String, reason: FailureReason },
    ActionEvicted { id: String },
    /// A settled (debounced) connectivity change
    ConnectivityChanged { online: bool },
    BackgroundWake,
}

/// Handle for a registered callback. Dropping it unsubscribes.
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    pub fn new(cancel: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    /// Remove the callback now
    pub fn unsubscribe(mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.cancel.is_some())
            .finish()
    }
}

type Callback<T> = Arc<dyn Fn(&T) + Send + Sync>;

/// A registry of callbacks keyed by subscription id
pub(crate) struct Listeners<T> {
    callbacks: Mutex<BTreeMap<u64, Callback<T>>>,
    next_id: AtomicU64,
}

impl<T: 'static> Listeners<T> {
    pub(crate) fn new() -> Self {
        Self {
            callbacks: Mutex::new(BTreeMap::new()),
            next_id: AtomicU64::new(0),
        }
    }

    /// Register a callback. The subscription holds only a weak reference back.
    pub(crate) fn add(self: &Arc<Self>, callback: Callback<T>) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.callbacks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id, callback);

        let weak: Weak<Self> = Arc::downgrade(self);
        Subscription::new(move || {
            if let Some(listeners) = weak.upgrade() {
                listeners
                    .callbacks
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .remove(&id);
            }
        })
    }

    /// Invoke every callback. Callbacks run outside the lock so they may subscribe.
    pub(crate) fn notify(&self, value: &T) {
        let callbacks: Vec<Callback<T>> = self
            .callbacks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .cloned()
            .collect();
        for callback in callbacks {
            callback(value);
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.callbacks.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

/// Shared event bus; clones publish to the same listeners
#[derive(Clone)]
pub struct EventBus {
    listeners: Arc<Listeners<EngineEvent>>,
    sender: broadcast::Sender<EngineEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(BROADCAST_CAPACITY);
        Self {
            listeners: Arc::new(Listeners::new()),
            sender,
        }
    }

    /// Register a callback for every event
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&EngineEvent) + Send + Sync + 'static,
    {
        self.listeners.add(Arc::new(callback))
    }

    /// Receiver for async consumers. Slow receivers may observe `Lagged`.
    pub fn receiver(&self) -> broadcast::Receiver<EngineEvent> {
        self.sender.subscribe()
    }

    pub fn publish(&self, event: EngineEvent) {
        log::trace!("event: {:?}", event);
        self.listeners.notify(&event);
        // No receivers is fine
        let _ = self.sender.send(event);
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }
}
