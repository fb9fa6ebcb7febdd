//! Connectivity tracking
//!
//! The host runtime reports raw connectivity through a [`NetworkSignal`]. The
//! [`NetworkMonitor`] debounces those reports so that a burst of flaps settles into a
//! single transition on the event bus.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::events::{EngineEvent, EventBus, Listeners, Subscription};

/// Raw connectivity callback from the host
pub type ConnectivityCallback = Arc<dyn Fn(&bool) + Send + Sync>;

/// Source of raw connectivity reports
pub trait NetworkSignal: Send + Sync {
    /// Connectivity as of right now
    fn is_online(&self) -> bool;

    /// Register for raw transitions
    fn on_change(&self, callback: ConnectivityCallback) -> Subscription;
}

/// Connectivity pushed in by the embedding application
pub struct HostSignal {
    online: AtomicBool,
    listeners: Arc<Listeners<bool>>,
}

impl HostSignal {
    pub fn new(online: bool) -> Self {
        Self {
            online: AtomicBool::new(online),
            listeners: Arc::new(Listeners::new()),
        }
    }

    /// Report current connectivity. Repeats of the current value are ignored.
    pub fn set_online(&self, online: bool) {
        let previous = self.online.swap(online, Ordering::SeqCst);
        if previous != online {
            log::debug!("Host reported {}", if online { "online" } else { "offline" });
            self.listeners.notify(&online);
        }
    }
}

impl NetworkSignal for HostSignal {
    fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    fn on_change(&self, callback: ConnectivityCallback) -> Subscription {
        self.listeners.add(callback)
    }
}

/// Debounced view of a [`NetworkSignal`]
pub struct NetworkMonitor {
    settled: watch::Receiver<bool>,
    task: JoinHandle<()>,
    _subscription: Subscription,
}

impl NetworkMonitor {
    /// Start watching `signal`. Must be called inside a tokio runtime.
    pub fn start(signal: Arc<dyn NetworkSignal>, debounce: Duration, events: EventBus) -> Self {
        let (settled_tx, settled) = watch::channel(signal.is_online());
        let (raw_tx, raw_rx) = mpsc::unbounded_channel();

        let subscription = signal.on_change(Arc::new(move |online: &bool| {
            let _ = raw_tx.send(*online);
        }));
        let task = tokio::spawn(debounce_loop(raw_rx, debounce, settled_tx, events));

        Self {
            settled,
            task,
            _subscription: subscription,
        }
    }

    /// Last settled connectivity state
    pub fn is_online(&self) -> bool {
        *self.settled.borrow()
    }

    /// Receiver that observes every settled transition
    pub fn transitions(&self) -> watch::Receiver<bool> {
        self.settled.clone()
    }
}

impl Drop for NetworkMonitor {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn debounce_loop(
    mut raw: mpsc::UnboundedReceiver<bool>,
    debounce: Duration,
    settled: watch::Sender<bool>,
    events: EventBus,
) {
    while let Some(mut latest) = raw.recv().await {
        // Keep absorbing reports until the signal has been quiet for a full window
        loop {
            match tokio::time::timeout(debounce, raw.recv()).await {
                Ok(Some(next)) => latest = next,
                Ok(None) | Err(_) => break,
            }
        }

        if *settled.borrow() == latest {
            log::debug!("Connectivity flapped back to {}, ignoring", latest);
            continue;
        }

        settled.send_replace(latest);
        log::info!(
            "Connectivity settled: {}",
            if latest { "online" } else { "offline" }
        );
        events.publish(EngineEvent::ConnectivityChanged { online: latest });
    }
}
