//! Sync coordinator
//!
//! Drains the action queue against the remote API. Every trigger (connectivity
//! restored, background wake, explicit call) goes through [`SyncCoordinator::sync`],
//! which runs at most one pass at a time: a caller arriving while a pass is running
//! awaits that pass and receives the same [`SyncSession`].
//!
//! Actions are attempted one at a time in FIFO order. Once an action of some resource
//! is deferred or scheduled for retry, later actions on the same resource wait for the
//! next pass so they never overtake it.

pub mod outcome;
pub mod retry;

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use serde::{Deserialize, Serialize};

use crate::clock::Clock;
use crate::config::AuthExpiryPolicy;
use crate::error::{Error, Result};
use crate::events::{EngineEvent, EventBus, FailureReason};
use crate::network::NetworkSignal;
use crate::queue::{ActionQueue, PendingAction};
use crate::remote::rate_limit::resource_of;
use crate::remote::{RemoteApi, RemoteRequest};
use crate::store::{self, DurableStore, Namespace};

pub use outcome::{Outcome, classify};
pub use retry::RetryPolicy;

const LAST_SESSION_KEY: &str = "sync.last_session";

/// Summary of one drain pass
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncSession {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Actions moved to SYNCING and sent
    pub items_attempted: usize,
    pub items_succeeded: usize,
    /// Actions moved to FAILED this pass
    pub items_failed: usize,
    /// Attempted actions returned to PENDING with backoff
    pub items_retried: usize,
    /// PENDING actions left untouched (backoff or an earlier action on the same resource)
    pub items_deferred: usize,
    /// Capacity evictions that happened while the pass ran
    pub items_evicted: u64,
    /// The pass stopped early because the network was unavailable
    pub halted: bool,
}

impl SyncSession {
    fn new(started_at: DateTime<Utc>) -> Self {
        Self {
            started_at,
            finished_at: started_at,
            items_attempted: 0,
            items_succeeded: 0,
            items_failed: 0,
            items_retried: 0,
            items_deferred: 0,
            items_evicted: 0,
            halted: false,
        }
    }
}

type PassResult = std::result::Result<SyncSession, Arc<Error>>;
type SharedPass = Shared<BoxFuture<'static, PassResult>>;

/// Single-flight queue drainer. Clones share the same in-flight pass.
#[derive(Clone)]
pub struct SyncCoordinator {
    inner: Arc<Inner>,
}

struct Inner {
    queue: Arc<ActionQueue>,
    store: Arc<dyn DurableStore>,
    remote: Arc<dyn RemoteApi>,
    clock: Arc<dyn Clock>,
    events: EventBus,
    network: Option<Arc<dyn NetworkSignal>>,
    policy: RetryPolicy,
    auth_expiry: AuthExpiryPolicy,
    inflight: Mutex<Option<SharedPass>>,
}

/// Collaborators of a [`SyncCoordinator`]
pub struct CoordinatorParts {
    pub queue: Arc<ActionQueue>,
    pub store: Arc<dyn DurableStore>,
    pub remote: Arc<dyn RemoteApi>,
    pub clock: Arc<dyn Clock>,
    pub events: EventBus,
    /// Without a signal the network is assumed reachable until a request says otherwise
    pub network: Option<Arc<dyn NetworkSignal>>,
    pub policy: RetryPolicy,
    pub auth_expiry: AuthExpiryPolicy,
}

impl SyncCoordinator {
    pub fn new(parts: CoordinatorParts) -> Self {
        Self {
            inner: Arc::new(Inner {
                queue: parts.queue,
                store: parts.store,
                remote: parts.remote,
                clock: parts.clock,
                events: parts.events,
                network: parts.network,
                policy: parts.policy,
                auth_expiry: parts.auth_expiry,
                inflight: Mutex::new(None),
            }),
        }
    }

    /// Run a drain pass, or join the one already running.
    ///
    /// Individual action failures are reported through events and the session
    /// counters. Only durable store failures come back as `Err`.
    pub async fn sync(&self) -> Result<SyncSession> {
        let pass = {
            let mut inflight = self.inner.inflight.lock().unwrap_or_else(|e| e.into_inner());
            match inflight.as_ref() {
                Some(pass) => {
                    log::debug!("Sync pass already running, joining it");
                    pass.clone()
                }
                None => {
                    let inner = self.inner.clone();
                    let pass = async move {
                        let result = inner.drain().await.map_err(Arc::new);
                        *inner.inflight.lock().unwrap_or_else(|e| e.into_inner()) = None;
                        result
                    }
                    .boxed()
                    .shared();
                    *inflight = Some(pass.clone());
                    pass
                }
            }
        };

        pass.await.map_err(Error::from_shared)
    }

    /// Whether a pass is in flight
    pub fn is_running(&self) -> bool {
        self.inner
            .inflight
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .is_some()
    }

    /// The most recently completed pass, as persisted
    pub async fn last_session(&self) -> Result<Option<SyncSession>> {
        Ok(store::read_meta::<SyncSession>(self.inner.store.as_ref(), LAST_SESSION_KEY).await?)
    }

    pub fn policy(&self) -> RetryPolicy {
        self.inner.policy
    }
}

impl Inner {
    fn is_online(&self) -> bool {
        self.network.as_ref().is_none_or(|n| n.is_online())
    }

    async fn drain(&self) -> Result<SyncSession> {
        let mut session = SyncSession::new(self.clock.now());

        if !self.is_online() {
            log::info!("Offline, not starting a sync pass");
            session.halted = true;
            return Ok(session);
        }

        self.events.publish(EngineEvent::SyncStarted);
        log::info!("Sync pass started");

        let evicted_before = self.queue.evicted_total().await?;
        let recovered = self.queue.recover_interrupted().await?;
        if recovered > 0 {
            log::info!("Recovered {} actions from an interrupted pass", recovered);
        }
        self.queue.purge_synced().await?;

        let mut seen: HashSet<String> = HashSet::new();
        let mut blocked: HashSet<String> = HashSet::new();

        // Re-list after each batch so actions enqueued mid-pass are drained too
        'pass: loop {
            let batch: Vec<PendingAction> = self
                .queue
                .list_pending()
                .await?
                .into_iter()
                .filter(|a| !seen.contains(&a.id))
                .collect();
            if batch.is_empty() {
                break;
            }

            for action in batch {
                seen.insert(action.id.clone());
                let resource = resource_of(&action.endpoint);

                if blocked.contains(&resource) || !action.is_eligible(self.clock.now()) {
                    log::debug!("Deferring action {} to a later pass", action.id);
                    session.items_deferred += 1;
                    blocked.insert(resource);
                    continue;
                }

                // Gone (evicted) or already claimed
                let Some(mut action) = self.queue.begin_attempt(&action).await? else {
                    continue;
                };
                session.items_attempted += 1;

                let result = self.remote.send(&RemoteRequest::for_action(&action)).await;
                match classify(&result, self.auth_expiry) {
                    Outcome::Delivered => {
                        self.queue.mark_synced(&mut action).await?;
                        session.items_succeeded += 1;
                        log::debug!("Action {} synced", action.id);
                        self.events
                            .publish(EngineEvent::ActionSynced { id: action.id.clone() });
                    }
                    Outcome::Reject(reason) => {
                        self.queue.mark_failed(&mut action, reason).await?;
                        session.items_failed += 1;
                    }
                    Outcome::Retry(error) => {
                        if self.record_retry(&mut action, &error, &mut session).await? {
                            blocked.insert(resource);
                        }
                    }
                    Outcome::Offline(error) => {
                        // An outage is not the action's fault
                        self.queue.release(&mut action, &error).await?;
                        session.items_deferred += 1;
                        log::warn!("Connectivity lost mid-pass ({}), halting", error);
                        session.halted = true;
                        break 'pass;
                    }
                }
            }
        }

        let evicted_after = self.queue.evicted_total().await?;
        session.items_evicted = evicted_after.saturating_sub(evicted_before);
        session.finished_at = self.clock.now();

        self.store
            .put(Namespace::Meta, LAST_SESSION_KEY, store::encode(&session)?)
            .await?;

        log::info!(
            "Sync pass finished: {} attempted, {} synced, {} failed, {} retried, {} deferred{}",
            session.items_attempted,
            session.items_succeeded,
            session.items_failed,
            session.items_retried,
            session.items_deferred,
            if session.halted { " (halted)" } else { "" }
        );
        self.events
            .publish(EngineEvent::SyncCompleted(session.clone()));
        Ok(session)
    }

    /// Spend one unit of retry budget. Returns true if the action stays PENDING.
    async fn record_retry(
        &self,
        action: &mut PendingAction,
        error: &str,
        session: &mut SyncSession,
    ) -> Result<bool> {
        action.retry_count = action.retry_count.saturating_add(1);

        if !RetryPolicy::allows_retry(action.retry_count, action.max_retries) {
            let reason = FailureReason::RetryBudgetExhausted {
                attempts: action.retry_count,
                last_error: error.to_string(),
            };
            self.queue.mark_failed(action, reason).await?;
            session.items_failed += 1;
            return Ok(false);
        }

        let delay = self.policy.backoff(action.retry_count - 1);
        let next_eligible_at = chrono::Duration::from_std(delay)
            .ok()
            .and_then(|d| self.clock.now().checked_add_signed(d))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);

        log::debug!(
            "Action {} failed ({}), retry {}/{} after {:?}",
            action.id,
            error,
            action.retry_count,
            action.max_retries,
            delay
        );
        self.queue.mark_retry(action, next_eligible_at, error).await?;
        session.items_retried += 1;
        Ok(true)
    }
}
