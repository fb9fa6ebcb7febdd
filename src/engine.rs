//! Engine facade
//!
//! [`OfflineEngine`] wires the store, cache, queue, coordinator and host signals
//! together and is the surface applications program against. All shared state lives
//! in one [`EngineState`] built once per process.

use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::background::{BackgroundScheduler, BackgroundTrigger};
use crate::cache::{CacheStats, ReadCache, cache_key};
use crate::clock::{Clock, SystemClock};
use crate::config::EngineConfig;
use crate::error::Result;
use crate::events::{EngineEvent, EventBus, FailureReason, Subscription};
use crate::network::{NetworkMonitor, NetworkSignal};
use crate::queue::{ActionQueue, HttpMethod, NewAction, PendingAction, QueueStats};
use crate::remote::{HttpRemote, RemoteApi, RemoteRequest, StaticToken, TokenProvider};
use crate::store::{DurableStore, SqliteStore};
use crate::sync::{CoordinatorParts, SyncCoordinator, SyncSession};

/// Process-wide engine state, passed by handle to every component
#[derive(Clone)]
pub struct EngineState {
    pub store: Arc<dyn DurableStore>,
    pub clock: Arc<dyn Clock>,
    pub events: EventBus,
}

/// Builder for [`OfflineEngine`]
pub struct EngineBuilder {
    config: EngineConfig,
    store: Option<Arc<dyn DurableStore>>,
    clock: Option<Arc<dyn Clock>>,
    remote: Option<Arc<dyn RemoteApi>>,
    network: Option<Arc<dyn NetworkSignal>>,
    scheduler: Option<Arc<dyn BackgroundScheduler>>,
    tokens: Option<Arc<dyn TokenProvider>>,
}

impl EngineBuilder {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            store: None,
            clock: None,
            remote: None,
            network: None,
            scheduler: None,
            tokens: None,
        }
    }

    /// Use this store instead of opening the configured SQLite file
    pub fn store(mut self, store: Arc<dyn DurableStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Use this remote instead of an `HttpRemote` built from the config
    pub fn remote(mut self, remote: Arc<dyn RemoteApi>) -> Self {
        self.remote = Some(remote);
        self
    }

    /// Host connectivity reports; enables reconnect-triggered sync
    pub fn network_signal(mut self, signal: Arc<dyn NetworkSignal>) -> Self {
        self.network = Some(signal);
        self
    }

    /// Host scheduler; enables background sync and maintenance
    pub fn scheduler(mut self, scheduler: Arc<dyn BackgroundScheduler>) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    pub fn token_provider(mut self, tokens: Arc<dyn TokenProvider>) -> Self {
        self.tokens = Some(tokens);
        self
    }

    /// Assemble the engine.
    ///
    /// With a network signal or scheduler attached this spawns tasks and so must run
    /// inside a tokio runtime.
    pub fn build(self) -> Result<OfflineEngine> {
        let config = self.config;
        config.validate()?;

        let store: Arc<dyn DurableStore> = match self.store {
            Some(store) => store,
            None => match &config.store.path {
                Some(path) => Arc::new(SqliteStore::open(path)?),
                None => Arc::new(SqliteStore::open_default()?),
            },
        };
        let clock: Arc<dyn Clock> = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let remote: Arc<dyn RemoteApi> = match self.remote {
            Some(remote) => remote,
            None => {
                let tokens = self.tokens.or_else(|| {
                    config
                        .remote
                        .api_token
                        .clone()
                        .map(|t| Arc::new(StaticToken(t)) as Arc<dyn TokenProvider>)
                });
                Arc::new(HttpRemote::new(&config.remote, tokens)?)
            }
        };

        let state = EngineState {
            store,
            clock,
            events: EventBus::new(),
        };
        let queue = Arc::new(ActionQueue::new(
            state.store.clone(),
            state.clock.clone(),
            state.events.clone(),
            &config.queue,
        ));
        let cache = ReadCache::new(state.store.clone(), state.clock.clone());
        let coordinator = SyncCoordinator::new(CoordinatorParts {
            queue: queue.clone(),
            store: state.store.clone(),
            remote: remote.clone(),
            clock: state.clock.clone(),
            events: state.events.clone(),
            network: self.network.clone(),
            policy: config.retry_policy(),
            auth_expiry: config.remote.auth_expiry,
        });

        let monitor = self.network.map(|signal| {
            NetworkMonitor::start(signal, config.network.debounce(), state.events.clone())
        });
        let reconnect = monitor
            .as_ref()
            .map(|m| spawn_reconnect_trigger(m.transitions(), coordinator.clone()));
        let background = self.scheduler.map(|scheduler| {
            BackgroundTrigger::register(
                scheduler.as_ref(),
                &config,
                coordinator.clone(),
                cache.clone(),
                queue.clone(),
                state.events.clone(),
            )
        });

        Ok(OfflineEngine {
            config,
            state,
            queue,
            cache,
            remote,
            coordinator,
            monitor,
            reconnect,
            _background: background,
        })
    }
}

/// Sync once per settled offline-to-online transition.
///
/// Follows the monitor's watch channel, which always holds the latest settled state.
fn spawn_reconnect_trigger(
    mut settled: watch::Receiver<bool>,
    coordinator: SyncCoordinator,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while settled.changed().await.is_ok() {
            if !*settled.borrow_and_update() {
                continue;
            }
            log::info!("Connectivity restored, starting sync");
            if let Err(e) = coordinator.sync().await {
                log::error!("Reconnect sync failed: {}", e);
            }
        }
    })
}

/// The offline-first engine
pub struct OfflineEngine {
    config: EngineConfig,
    state: EngineState,
    queue: Arc<ActionQueue>,
    cache: ReadCache,
    remote: Arc<dyn RemoteApi>,
    coordinator: SyncCoordinator,
    monitor: Option<NetworkMonitor>,
    reconnect: Option<JoinHandle<()>>,
    _background: Option<BackgroundTrigger>,
}

impl Drop for OfflineEngine {
    fn drop(&mut self) {
        if let Some(task) = self.reconnect.take() {
            task.abort();
        }
    }
}

impl OfflineEngine {
    pub fn builder(config: EngineConfig) -> EngineBuilder {
        EngineBuilder::new(config)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn state(&self) -> &EngineState {
        &self.state
    }

    pub fn queue(&self) -> &ActionQueue {
        &self.queue
    }

    pub fn cache(&self) -> &ReadCache {
        &self.cache
    }

    pub fn coordinator(&self) -> &SyncCoordinator {
        &self.coordinator
    }

    // ---- read cache ----

    /// Fresh cached payload for `key`, or `None`
    pub async fn cache_get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.cache.get(key).await
    }

    pub async fn cache_put(&self, key: &str, payload: &[u8], ttl_seconds: i64) -> Result<()> {
        self.cache.put(key, payload, ttl_seconds).await
    }

    /// Read through the cache: serve a fresh entry, otherwise GET the remote and cache
    /// a 2xx body. Returns `None` when neither the cache nor the remote can answer.
    pub async fn fetch(
        &self,
        endpoint: &str,
        params: &[(&str, &str)],
        ttl_seconds: i64,
    ) -> Result<Option<Vec<u8>>> {
        let key = cache_key(endpoint, params);
        if let Some(hit) = self.cache.get(&key).await? {
            log::debug!("Cache hit for {}", endpoint);
            return Ok(Some(hit));
        }

        if !self.is_online() {
            log::debug!("Cache miss for {} while offline", endpoint);
            return Ok(None);
        }

        let request = RemoteRequest::get(endpoint).with_query(params);
        match self.remote.send(&request).await {
            Ok(response) if response.is_success() => {
                self.cache.put(&key, &response.body, ttl_seconds).await?;
                Ok(Some(response.body))
            }
            Ok(response) => {
                log::debug!("GET {} returned {}, not cached", endpoint, response.status);
                Ok(None)
            }
            Err(e) => {
                log::debug!("GET {} failed: {}", endpoint, e);
                Ok(None)
            }
        }
    }

    pub async fn cache_stats(&self) -> Result<CacheStats> {
        self.cache.stats().await
    }

    /// Remove expired cache entries and SYNCED actions past retention
    pub async fn sweep(&self) -> Result<(usize, usize)> {
        let expired = self.cache.sweep().await?;
        let purged = self.queue.purge_synced().await?;
        Ok((expired, purged))
    }

    // ---- action queue ----

    /// Durably queue a mutation and return its id. Never touches the network.
    pub async fn enqueue_action(
        &self,
        kind: &str,
        endpoint: &str,
        method: HttpMethod,
        payload: Option<serde_json::Value>,
        max_retries: Option<u32>,
    ) -> Result<String> {
        let mut action = NewAction::new(kind, method, endpoint);
        action.payload = payload;
        action.max_retries = max_retries;
        self.queue.enqueue(action).await
    }

    pub async fn enqueue(&self, action: NewAction) -> Result<String> {
        self.queue.enqueue(action).await
    }

    pub async fn list_pending(&self) -> Result<Vec<PendingAction>> {
        self.queue.list_pending().await
    }

    pub async fn list_failed(&self) -> Result<Vec<PendingAction>> {
        self.queue.list_failed().await
    }

    pub async fn clear_failed(&self, id: &str) -> Result<()> {
        self.queue.clear_failed(id).await
    }

    pub async fn retry_failed(&self, id: &str) -> Result<()> {
        self.queue.retry_failed(id).await
    }

    pub async fn queue_stats(&self) -> Result<QueueStats> {
        self.queue.stats().await
    }

    // ---- sync ----

    /// Drain the queue now, or join the pass already running
    pub async fn sync(&self) -> Result<SyncSession> {
        self.coordinator.sync().await
    }

    pub async fn last_session(&self) -> Result<Option<SyncSession>> {
        self.coordinator.last_session().await
    }

    /// Settled connectivity; always true without a network signal
    pub fn is_online(&self) -> bool {
        self.monitor.as_ref().is_none_or(|m| m.is_online())
    }

    // ---- events ----

    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&EngineEvent) + Send + Sync + 'static,
    {
        self.state.events.subscribe(callback)
    }

    pub fn on_sync_started<F>(&self, callback: F) -> Subscription
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.subscribe(move |event| {
            if let EngineEvent::SyncStarted = event {
                callback();
            }
        })
    }

    pub fn on_sync_completed<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&SyncSession) + Send + Sync + 'static,
    {
        self.subscribe(move |event| {
            if let EngineEvent::SyncCompleted(session) = event {
                callback(session);
            }
        })
    }

    pub fn on_action_failed<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&str, &FailureReason) + Send + Sync + 'static,
    {
        self.subscribe(move |event| {
            if let EngineEvent::ActionFailed { id, reason } = event {
                callback(id, reason);
            }
        })
    }

    pub fn on_eviction<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.subscribe(move |event| {
            if let EngineEvent::ActionEvicted { id } = event {
                callback(id);
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::background::TokioScheduler;
    use crate::clock::ManualClock;
    use crate::network::HostSignal;
    use crate::queue::ActionState;
    use crate::remote::MockRemote;
    use crate::store::MemoryStore;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct Harness {
        engine: OfflineEngine,
        remote: Arc<MockRemote>,
        clock: Arc<ManualClock>,
    }

    fn harness(config: EngineConfig, signal: Option<Arc<HostSignal>>) -> Harness {
        let remote = Arc::new(MockRemote::new());
        let clock = Arc::new(ManualClock::starting_now());
        let mut builder = OfflineEngine::builder(config)
            .store(Arc::new(MemoryStore::new()))
            .clock(clock.clone())
            .remote(remote.clone());
        if let Some(signal) = signal {
            builder = builder.network_signal(signal);
        }
        Harness {
            engine: builder.build().unwrap(),
            remote,
            clock,
        }
    }

    fn count_sessions(engine: &OfflineEngine) -> (Arc<AtomicUsize>, Subscription) {
        let sessions = Arc::new(AtomicUsize::new(0));
        let counter = sessions.clone();
        let sub = engine.on_sync_completed(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        (sessions, sub)
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_drains_queue_in_order() {
        let signal = Arc::new(HostSignal::new(false));
        let h = harness(EngineConfig::default(), Some(signal.clone()));
        let (sessions, _sub) = count_sessions(&h.engine);

        let mut ids = Vec::new();
        for _ in 0..3 {
            ids.push(
                h.engine
                    .enqueue_action("note.create", "/notes", HttpMethod::Post, None, None)
                    .await
                    .unwrap(),
            );
        }
        assert_eq!(h.remote.request_count(), 0);

        signal.set_online(true);
        tokio::time::sleep(Duration::from_secs(3)).await;

        assert_eq!(sessions.load(Ordering::SeqCst), 1);
        let sent: Vec<String> = h
            .remote
            .requests()
            .into_iter()
            .filter_map(|r| r.idempotency_key)
            .collect();
        assert_eq!(sent, ids);
        assert!(h.engine.list_pending().await.unwrap().is_empty());
        for id in &ids {
            let action = h.engine.queue().get(id).await.unwrap().unwrap();
            assert_eq!(action.state, ActionState::Synced);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_during_busy_pass_starts_another() {
        let signal = Arc::new(HostSignal::new(false));
        let h = harness(EngineConfig::default(), Some(signal.clone()));
        let (sessions, _sub) = count_sessions(&h.engine);
        h.remote.set_latency(Duration::from_secs(30));
        h.engine
            .enqueue_action("note.create", "/notes", HttpMethod::Post, None, None)
            .await
            .unwrap();

        // First pass is now waiting on the remote
        signal.set_online(true);
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(h.remote.request_count(), 1);

        signal.set_online(false);
        tokio::time::sleep(Duration::from_secs(3)).await;
        signal.set_online(true);
        tokio::time::sleep(Duration::from_secs(3)).await;

        // More events than the bus retains, published before the first pass ends
        for i in 0..300 {
            h.engine.state.events.publish(EngineEvent::ActionSynced {
                id: format!("other-{}", i),
            });
        }

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(sessions.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_flapping_triggers_one_pass() {
        let signal = Arc::new(HostSignal::new(false));
        let h = harness(EngineConfig::default(), Some(signal.clone()));
        let (sessions, _sub) = count_sessions(&h.engine);

        for _ in 0..2 {
            h.engine
                .enqueue(NewAction::new("note.create", HttpMethod::Post, "/notes"))
                .await
                .unwrap();
        }

        // offline -> online -> offline -> online within two seconds
        for online in [true, false, true] {
            signal.set_online(online);
            tokio::time::sleep(Duration::from_millis(500)).await;
        }
        tokio::time::sleep(Duration::from_secs(5)).await;

        assert_eq!(sessions.load(Ordering::SeqCst), 1);
        assert_eq!(h.remote.request_count(), 2);
    }

    #[tokio::test]
    async fn test_action_failed_fires_once_when_budget_exhausted() {
        let h = harness(EngineConfig::default(), None);
        let failures = Arc::new(Mutex::new(Vec::new()));
        let sink = failures.clone();
        let _sub = h.engine.on_action_failed(move |id, reason| {
            sink.lock().unwrap().push((id.to_string(), reason.clone()));
        });

        let id = h
            .engine
            .enqueue_action("note.update", "/notes/4", HttpMethod::Put, None, Some(3))
            .await
            .unwrap();
        for _ in 0..3 {
            h.remote.push_status(500);
        }
        for _ in 0..3 {
            h.engine.sync().await.unwrap();
            h.clock.advance_secs(600);
        }

        let failed = h.engine.list_failed().await.unwrap();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].retry_count, 3);
        assert_eq!(failures.lock().unwrap().len(), 1);
        assert_eq!(failures.lock().unwrap()[0].0, id);
    }

    #[tokio::test]
    async fn test_eviction_callback() {
        let mut config = EngineConfig::default();
        config.queue.capacity = 100;
        let h = harness(config, None);
        let evicted = Arc::new(Mutex::new(Vec::new()));
        let sink = evicted.clone();
        let _sub = h
            .engine
            .on_eviction(move |id| sink.lock().unwrap().push(id.to_string()));

        let mut ids = Vec::new();
        for _ in 0..105 {
            ids.push(
                h.engine
                    .enqueue(NewAction::new("note.create", HttpMethod::Post, "/notes"))
                    .await
                    .unwrap(),
            );
        }

        assert_eq!(h.engine.queue_stats().await.unwrap().live(), 100);
        assert_eq!(*evicted.lock().unwrap(), ids[..5].to_vec());
    }

    #[tokio::test]
    async fn test_fetch_reads_through_cache() {
        let h = harness(EngineConfig::default(), None);
        h.remote
            .push(Ok(crate::remote::RemoteResponse::new(200, r#"{"id":42}"#)));

        let first = h.engine.fetch("/users/42", &[], 60).await.unwrap();
        let second = h.engine.fetch("/users/42", &[], 60).await.unwrap();
        assert_eq!(first, Some(br#"{"id":42}"#.to_vec()));
        assert_eq!(second, first);
        assert_eq!(h.remote.request_count(), 1);

        h.clock.advance_secs(61);
        h.remote.push_status(503);
        assert_eq!(h.engine.fetch("/users/42", &[], 60).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_fetch_offline_is_a_miss() {
        let signal = Arc::new(HostSignal::new(false));
        let h = harness(EngineConfig::default(), Some(signal));
        assert_eq!(h.engine.fetch("/users/1", &[], 60).await.unwrap(), None);
        assert_eq!(h.remote.request_count(), 0);
    }

    #[tokio::test]
    async fn test_sync_started_callback_and_unsubscribe() {
        let h = harness(EngineConfig::default(), None);
        let started = Arc::new(AtomicUsize::new(0));
        let counter = started.clone();
        let sub = h.engine.on_sync_started(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        h.engine.sync().await.unwrap();
        sub.unsubscribe();
        h.engine.sync().await.unwrap();

        assert_eq!(started.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_background_wake_syncs() {
        let mut config = EngineConfig::default();
        config.background.interval_secs = 60;
        let remote = Arc::new(MockRemote::new());
        let engine = OfflineEngine::builder(config)
            .store(Arc::new(MemoryStore::new()))
            .remote(remote.clone())
            .scheduler(Arc::new(TokioScheduler))
            .build()
            .unwrap();
        let wakes = Arc::new(AtomicUsize::new(0));
        let counter = wakes.clone();
        let _sub = engine.subscribe(move |event| {
            if matches!(event, EngineEvent::BackgroundWake) {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });

        engine
            .enqueue(NewAction::new("note.create", HttpMethod::Post, "/notes"))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_secs(61)).await;

        assert_eq!(wakes.load(Ordering::SeqCst), 1);
        assert_eq!(remote.request_count(), 1);
    }
}
