//! Periodic wake-ups
//!
//! The host decides when background work may run; the engine only hands it a callback
//! and an interval. [`TokioScheduler`] is the in-process host used when the engine runs
//! as a long-lived service.

use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use futures::future::BoxFuture;
use tokio::time::{Instant, MissedTickBehavior};

use crate::cache::ReadCache;
use crate::config::EngineConfig;
use crate::events::{EngineEvent, EventBus, Subscription};
use crate::queue::ActionQueue;
use crate::sync::SyncCoordinator;

/// Work run on each wake
pub type WakeCallback = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

/// A host facility for periodic callbacks
pub trait BackgroundScheduler: Send + Sync {
    fn register(&self, name: &str, interval: Duration, callback: WakeCallback) -> Subscription;
}

/// Runs callbacks on tokio interval timers
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioScheduler;

impl BackgroundScheduler for TokioScheduler {
    fn register(&self, name: &str, interval: Duration, callback: WakeCallback) -> Subscription {
        let name = name.to_string();
        let period = interval.max(Duration::from_millis(1));

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            // A process resumed after suspension wakes once, not once per missed tick
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                log::debug!("Background wake: {}", name);
                callback().await;
            }
        });

        let abort = handle.abort_handle();
        Subscription::new(move || abort.abort())
    }
}

/// Registrations for background sync and store maintenance
pub struct BackgroundTrigger {
    _registrations: Vec<Subscription>,
}

impl BackgroundTrigger {
    pub fn register(
        scheduler: &dyn BackgroundScheduler,
        config: &EngineConfig,
        coordinator: SyncCoordinator,
        cache: ReadCache,
        queue: Arc<ActionQueue>,
        events: EventBus,
    ) -> Self {
        let budget = config.background.budget();
        let sync_wake: WakeCallback = Arc::new(move || {
            let coordinator = coordinator.clone();
            let events = events.clone();
            async move {
                events.publish(EngineEvent::BackgroundWake);
                run_within_budget(&coordinator, budget).await;
            }
            .boxed()
        });

        let maintenance: WakeCallback = Arc::new(move || {
            let cache = cache.clone();
            let queue = queue.clone();
            async move {
                if let Err(e) = cache.sweep().await {
                    log::error!("Cache sweep failed: {}", e);
                }
                if let Err(e) = queue.purge_synced().await {
                    log::error!("Purging synced actions failed: {}", e);
                }
            }
            .boxed()
        });

        let registrations = vec![
            scheduler.register("sync", config.background.interval(), sync_wake),
            scheduler.register("maintenance", config.cache.sweep_interval(), maintenance),
        ];
        log::debug!(
            "Background sync every {:?} (budget {:?})",
            config.background.interval(),
            budget
        );

        Self {
            _registrations: registrations,
        }
    }
}

/// Sync, giving up the wake once the budget is spent.
///
/// An abandoned pass stays registered with the coordinator and resumes on the next
/// trigger.
async fn run_within_budget(coordinator: &SyncCoordinator, budget: Duration) {
    match tokio::time::timeout(budget, coordinator.sync()).await {
        Ok(Ok(session)) => log::debug!(
            "Background sync done: {} of {} actions synced",
            session.items_succeeded,
            session.items_attempted
        ),
        Ok(Err(e)) => log::error!("Background sync failed: {}", e),
        Err(_) => log::warn!("Background sync exceeded its {:?} budget, yielding", budget),
    }
}
