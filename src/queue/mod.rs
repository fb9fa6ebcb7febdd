//! Durable queue of not-yet-confirmed mutations
//!
//! Actions are stored under their zero-padded insertion sequence, so a key-ordered
//! scan of the queue namespace is FIFO order. The queue is bounded: admitting an
//! action into a full queue evicts the oldest PENDING action, and every eviction is
//! published as an `ActionEvicted` event and counted.
//!
//! Every mutation runs under a single async write lock and lands as one atomic store
//! batch, so the sync coordinator and application enqueues never race on a record.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::clock::Clock;
use crate::config::QueueConfig;
use crate::error::{QueueError, Result};
use crate::events::{EngineEvent, EventBus, FailureReason};
use crate::store::{self, DurableStore, Namespace, StoreOp};

const NEXT_SEQ_KEY: &str = "queue.next_seq";
const EVICTED_TOTAL_KEY: &str = "queue.evicted_total";

/// Ten years; longer retention windows are clamped
const MAX_RETENTION_SECS: u64 = 10 * 365 * 24 * 60 * 60;

/// HTTP method of a queued mutation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Delete => "DELETE",
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HttpMethod {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "GET" => Ok(HttpMethod::Get),
            "POST" => Ok(HttpMethod::Post),
            "PUT" => Ok(HttpMethod::Put),
            "PATCH" => Ok(HttpMethod::Patch),
            "DELETE" => Ok(HttpMethod::Delete),
            other => Err(format!("unsupported HTTP method: {}", other)),
        }
    }
}

/// Lifecycle state of a queued action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionState {
    Pending,
    Syncing,
    Synced,
    Failed,
}

impl ActionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionState::Pending => "PENDING",
            ActionState::Syncing => "SYNCING",
            ActionState::Synced => "SYNCED",
            ActionState::Failed => "FAILED",
        }
    }

    /// Whether the action still occupies a capacity slot
    pub fn counts_toward_capacity(&self) -> bool {
        !matches!(self, ActionState::Synced)
    }
}

impl fmt::Display for ActionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A mutation waiting to be applied to the remote
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingAction {
    /// Client-assigned id, sent as the idempotency token
    pub id: String,
    /// Insertion sequence; breaks `created_at` ties
    pub seq: u64,
    pub kind: String,
    pub endpoint: String,
    pub method: HttpMethod,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub retry_count: u32,
    pub max_retries: u32,
    pub state: ActionState,
    /// Earliest time the next attempt may run (set by backoff)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_eligible_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl PendingAction {
    fn store_key(&self) -> String {
        seq_key(self.seq)
    }

    pub fn is_eligible(&self, now: DateTime<Utc>) -> bool {
        self.next_eligible_at.is_none_or(|at| at <= now)
    }
}

fn seq_key(seq: u64) -> String {
    format!("{:020}", seq)
}

/// Parameters of an action to enqueue
#[derive(Debug, Clone, PartialEq)]
pub struct NewAction {
    pub kind: String,
    pub endpoint: String,
    pub method: HttpMethod,
    pub payload: Option<serde_json::Value>,
    /// Falls back to the configured default when `None`
    pub max_retries: Option<u32>,
}

impl NewAction {
    pub fn new(kind: impl Into<String>, method: HttpMethod, endpoint: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            endpoint: endpoint.into(),
            method,
            payload: None,
            max_retries: None,
        }
    }

    pub fn payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = Some(payload);
        self
    }

    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }
}

/// Counts by state plus the lifetime eviction total
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    pub pending: usize,
    pub syncing: usize,
    pub synced: usize,
    pub failed: usize,
    pub evicted_total: u64,
    pub capacity: usize,
}

impl QueueStats {
    /// Records occupying capacity
    pub fn live(&self) -> usize {
        self.pending + self.syncing + self.failed
    }
}

/// Bounded, ordered, durable action queue
pub struct ActionQueue {
    store: Arc<dyn DurableStore>,
    clock: Arc<dyn Clock>,
    events: EventBus,
    capacity: usize,
    default_max_retries: u32,
    synced_retention: Duration,
    writes: Mutex<()>,
}

impl ActionQueue {
    pub fn new(
        store: Arc<dyn DurableStore>,
        clock: Arc<dyn Clock>,
        events: EventBus,
        config: &QueueConfig,
    ) -> Self {
        Self {
            store,
            clock,
            events,
            capacity: config.capacity.max(1),
            default_max_retries: config.default_max_retries,
            synced_retention: Duration::seconds(
                config.synced_retention_secs.min(MAX_RETENTION_SECS) as i64,
            ),
            writes: Mutex::new(()),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Persist a new PENDING action and return its id.
    ///
    /// When the queue is at capacity the oldest PENDING actions are evicted in the
    /// same atomic batch that admits the new one.
    pub async fn enqueue(&self, action: NewAction) -> Result<String> {
        let _guard = self.writes.lock().await;

        let records = self.load_all().await?;
        let next_seq = store::read_meta::<u64>(self.store.as_ref(), NEXT_SEQ_KEY)
            .await?
            .unwrap_or(0)
            .max(records.last().map(|a| a.seq + 1).unwrap_or(0));
        let evicted_total = store::read_meta::<u64>(self.store.as_ref(), EVICTED_TOTAL_KEY)
            .await?
            .unwrap_or(0);

        let live = records
            .iter()
            .filter(|a| a.state.counts_toward_capacity())
            .count();
        let overflow = (live + 1).saturating_sub(self.capacity);

        let mut pending_oldest_first: Vec<&PendingAction> = records
            .iter()
            .filter(|a| a.state == ActionState::Pending)
            .collect();
        pending_oldest_first.sort_by_key(|a| (a.created_at, a.seq));

        if overflow > pending_oldest_first.len() {
            return Err(QueueError::Full(self.capacity).into());
        }
        let victims: Vec<&PendingAction> = pending_oldest_first.into_iter().take(overflow).collect();

        let now = self.clock.now();
        let record = PendingAction {
            id: uuid::Uuid::new_v4().to_string(),
            seq: next_seq,
            kind: action.kind,
            endpoint: action.endpoint,
            method: action.method,
            payload: action.payload,
            created_at: now,
            updated_at: now,
            retry_count: 0,
            max_retries: action.max_retries.unwrap_or(self.default_max_retries),
            state: ActionState::Pending,
            next_eligible_at: None,
            last_error: None,
        };

        let mut ops: Vec<StoreOp> = victims
            .iter()
            .map(|v| StoreOp::delete(Namespace::Queue, v.store_key()))
            .collect();
        ops.push(StoreOp::put(
            Namespace::Queue,
            record.store_key(),
            store::encode(&record)?,
        ));
        ops.push(StoreOp::put(
            Namespace::Meta,
            NEXT_SEQ_KEY,
            store::encode(&(next_seq + 1))?,
        ));
        if !victims.is_empty() {
            ops.push(StoreOp::put(
                Namespace::Meta,
                EVICTED_TOTAL_KEY,
                store::encode(&(evicted_total + victims.len() as u64))?,
            ));
        }

        self.store.apply(ops).await?;

        log::debug!(
            "Enqueued action {} ({} {} {})",
            record.id,
            record.kind,
            record.method,
            record.endpoint
        );
        for victim in victims {
            log::warn!(
                "Queue at capacity ({}), evicted oldest pending action {} ({})",
                self.capacity,
                victim.id,
                victim.kind
            );
            self.events.publish(EngineEvent::ActionEvicted {
                id: victim.id.clone(),
            });
        }

        Ok(record.id)
    }

    /// Unconfirmed actions (PENDING or SYNCING) in FIFO order
    pub async fn list_pending(&self) -> Result<Vec<PendingAction>> {
        self.list_where(|a| matches!(a.state, ActionState::Pending | ActionState::Syncing))
            .await
    }

    /// Actions awaiting acknowledgement by the application
    pub async fn list_failed(&self) -> Result<Vec<PendingAction>> {
        self.list_where(|a| a.state == ActionState::Failed).await
    }

    /// Every stored action, including SYNCED audit records
    pub async fn list_all(&self) -> Result<Vec<PendingAction>> {
        self.list_where(|_| true).await
    }

    pub async fn get(&self, id: &str) -> Result<Option<PendingAction>> {
        Ok(self.load_all().await?.into_iter().find(|a| a.id == id))
    }

    /// Remove a FAILED action after the application has acknowledged it
    pub async fn clear_failed(&self, id: &str) -> Result<()> {
        let _guard = self.writes.lock().await;
        let action = self.require_failed(id).await?;
        self.store
            .delete(Namespace::Queue, &action.store_key())
            .await?;
        log::info!("Cleared failed action {}", id);
        Ok(())
    }

    /// Give a FAILED action a fresh retry budget and put it back in line
    pub async fn retry_failed(&self, id: &str) -> Result<()> {
        let _guard = self.writes.lock().await;
        let mut action = self.require_failed(id).await?;
        action.state = ActionState::Pending;
        action.retry_count = 0;
        action.next_eligible_at = None;
        action.updated_at = self.clock.now();
        self.write(&action).await?;
        log::info!("Re-queued failed action {}", id);
        Ok(())
    }

    /// Move a PENDING action to SYNCING.
    ///
    /// Returns `None` if the action is gone (evicted) or no longer PENDING.
    pub async fn begin_attempt(&self, action: &PendingAction) -> Result<Option<PendingAction>> {
        let _guard = self.writes.lock().await;
        let key = action.store_key();
        let Some(data) = self.store.get(Namespace::Queue, &key).await? else {
            return Ok(None);
        };
        let mut current: PendingAction = store::decode(Namespace::Queue, &key, &data)?;
        if current.id != action.id || current.state != ActionState::Pending {
            return Ok(None);
        }

        current.state = ActionState::Syncing;
        current.updated_at = self.clock.now();
        self.write(&current).await?;
        Ok(Some(current))
    }

    /// Record a delivered action
    pub async fn mark_synced(&self, action: &mut PendingAction) -> Result<()> {
        let _guard = self.writes.lock().await;
        action.state = ActionState::Synced;
        action.next_eligible_at = None;
        action.last_error = None;
        action.updated_at = self.clock.now();
        self.write(action).await
    }

    /// Return an action to PENDING, eligible again at `next_eligible_at`
    pub async fn mark_retry(
        &self,
        action: &mut PendingAction,
        next_eligible_at: DateTime<Utc>,
        error: &str,
    ) -> Result<()> {
        let _guard = self.writes.lock().await;
        action.state = ActionState::Pending;
        action.next_eligible_at = Some(next_eligible_at);
        action.last_error = Some(error.to_string());
        action.updated_at = self.clock.now();
        self.write(action).await
    }

    /// Return an action to PENDING without spending retry budget
    pub async fn release(&self, action: &mut PendingAction, error: &str) -> Result<()> {
        let _guard = self.writes.lock().await;
        action.state = ActionState::Pending;
        action.last_error = Some(error.to_string());
        action.updated_at = self.clock.now();
        self.write(action).await
    }

    /// Move an action to FAILED and report it
    pub async fn mark_failed(&self, action: &mut PendingAction, reason: FailureReason) -> Result<()> {
        {
            let _guard = self.writes.lock().await;
            action.state = ActionState::Failed;
            action.next_eligible_at = None;
            action.last_error = Some(reason.to_string());
            action.updated_at = self.clock.now();
            self.write(action).await?;
        }
        log::warn!("Action {} ({}) failed: {}", action.id, action.kind, reason);
        self.events.publish(EngineEvent::ActionFailed {
            id: action.id.clone(),
            reason,
        });
        Ok(())
    }

    /// Return actions left SYNCING by an interrupted pass to PENDING
    pub async fn recover_interrupted(&self) -> Result<usize> {
        let _guard = self.writes.lock().await;
        let now = self.clock.now();
        let mut ops = Vec::new();
        for mut action in self.load_all().await? {
            if action.state == ActionState::Syncing {
                log::info!("Recovering interrupted action {}", action.id);
                action.state = ActionState::Pending;
                action.updated_at = now;
                ops.push(StoreOp::put(
                    Namespace::Queue,
                    action.store_key(),
                    store::encode(&action)?,
                ));
            }
        }
        let recovered = ops.len();
        self.store.apply(ops).await?;
        Ok(recovered)
    }

    /// Delete SYNCED actions whose audit window has elapsed
    pub async fn purge_synced(&self) -> Result<usize> {
        let _guard = self.writes.lock().await;
        let cutoff = self.clock.now() - self.synced_retention;
        let ops: Vec<StoreOp> = self
            .load_all()
            .await?
            .into_iter()
            .filter(|a| a.state == ActionState::Synced && a.updated_at <= cutoff)
            .map(|a| StoreOp::delete(Namespace::Queue, a.store_key()))
            .collect();
        let purged = ops.len();
        self.store.apply(ops).await?;
        if purged > 0 {
            log::debug!("Purged {} synced actions past retention", purged);
        }
        Ok(purged)
    }

    /// Lifetime count of capacity evictions
    pub async fn evicted_total(&self) -> Result<u64> {
        Ok(store::read_meta::<u64>(self.store.as_ref(), EVICTED_TOTAL_KEY)
            .await?
            .unwrap_or(0))
    }

    pub async fn stats(&self) -> Result<QueueStats> {
        let mut stats = QueueStats {
            evicted_total: self.evicted_total().await?,
            capacity: self.capacity,
            ..QueueStats::default()
        };
        for action in self.load_all().await? {
            match action.state {
                ActionState::Pending => stats.pending += 1,
                ActionState::Syncing => stats.syncing += 1,
                ActionState::Synced => stats.synced += 1,
                ActionState::Failed => stats.failed += 1,
            }
        }
        Ok(stats)
    }

    /// Number of records occupying capacity
    pub async fn len(&self) -> Result<usize> {
        Ok(self.stats().await?.live())
    }

    pub async fn is_empty(&self) -> Result<bool> {
        Ok(self.len().await? == 0)
    }

    async fn require_failed(&self, id: &str) -> Result<PendingAction> {
        let action = self
            .get(id)
            .await?
            .ok_or_else(|| QueueError::NotFound(id.to_string()))?;
        if action.state != ActionState::Failed {
            return Err(QueueError::NotFailed {
                id: id.to_string(),
                state: action.state.to_string(),
            }
            .into());
        }
        Ok(action)
    }

    async fn list_where<F>(&self, filter: F) -> Result<Vec<PendingAction>>
    where
        F: Fn(&PendingAction) -> bool,
    {
        let mut actions: Vec<PendingAction> =
            self.load_all().await?.into_iter().filter(filter).collect();
        actions.sort_by_key(|a| (a.created_at, a.seq));
        Ok(actions)
    }

    async fn write(&self, action: &PendingAction) -> Result<()> {
        self.store
            .put(Namespace::Queue, &action.store_key(), store::encode(action)?)
            .await?;
        Ok(())
    }

    /// All records in sequence order
    async fn load_all(&self) -> Result<Vec<PendingAction>> {
        self.store
            .scan(Namespace::Queue)
            .await?
            .into_iter()
            .map(|(key, data)| -> Result<PendingAction> {
                Ok(store::decode(Namespace::Queue, &key, &data)?)
            })
            .collect()
    }
}
