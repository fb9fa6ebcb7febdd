//! Replay and read-through against a mock HTTP backend

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use mockito::Matcher;

use offsync::remote::{HttpRemote, RemoteApi, RemoteRequest, TokenProvider};
use offsync::store::MemoryStore;
use offsync::{EngineConfig, HttpMethod, OfflineEngine};

fn config(base_url: &str) -> EngineConfig {
    let mut config = EngineConfig::default();
    config.remote.base_url = base_url.to_string();
    config.retry.backoff_base_ms = 10;
    config.retry.backoff_cap_ms = 100;
    config
}

fn engine(config: EngineConfig) -> OfflineEngine {
    OfflineEngine::builder(config)
        .store(Arc::new(MemoryStore::new()))
        .build()
        .expect("engine builds")
}

/// Hands out "old" until refreshed, then "new"
struct RotatingToken {
    refreshed: AtomicBool,
}

#[async_trait]
impl TokenProvider for RotatingToken {
    async fn token(&self) -> Option<String> {
        if self.refreshed.load(Ordering::SeqCst) {
            Some("new".to_string())
        } else {
            Some("old".to_string())
        }
    }

    async fn refresh(&self) -> Option<String> {
        self.refreshed.store(true, Ordering::SeqCst);
        Some("new".to_string())
    }
}

#[tokio::test]
async fn replay_sends_action_id_as_idempotency_key() {
    let mut server = mockito::Server::new_async().await;
    let engine = engine(config(&server.url()));
    let id = engine
        .enqueue_action(
            "note.create",
            "/notes",
            HttpMethod::Post,
            Some(serde_json::json!({"title": "groceries"})),
            None,
        )
        .await
        .unwrap();

    let mock = server
        .mock("POST", "/notes")
        .match_header("idempotency-key", id.as_str())
        .match_header("x-action-kind", "note.create")
        .match_body(Matcher::Json(serde_json::json!({"title": "groceries"})))
        .with_status(201)
        .expect(1)
        .create_async()
        .await;

    let session = engine.sync().await.unwrap();
    assert_eq!(session.items_succeeded, 1);
    mock.assert_async().await;
    assert!(engine.list_pending().await.unwrap().is_empty());
}

#[tokio::test]
async fn replay_attaches_configured_bearer_token() {
    let mut server = mockito::Server::new_async().await;
    let mut config = config(&server.url());
    config.remote.api_token = Some("secret".to_string());
    let engine = engine(config);
    engine
        .enqueue_action("note.delete", "/notes/3", HttpMethod::Delete, None, None)
        .await
        .unwrap();

    let mock = server
        .mock("DELETE", "/notes/3")
        .match_header("authorization", "Bearer secret")
        .with_status(204)
        .expect(1)
        .create_async()
        .await;

    let session = engine.sync().await.unwrap();
    assert_eq!(session.items_succeeded, 1);
    mock.assert_async().await;
}

#[tokio::test]
async fn unauthorized_refreshes_token_once() {
    let mut server = mockito::Server::new_async().await;
    let stale = server
        .mock("GET", "/me")
        .match_header("authorization", "Bearer old")
        .with_status(401)
        .expect(1)
        .create_async()
        .await;
    let fresh = server
        .mock("GET", "/me")
        .match_header("authorization", "Bearer new")
        .with_status(200)
        .with_body("{}")
        .expect(1)
        .create_async()
        .await;

    let tokens = Arc::new(RotatingToken {
        refreshed: AtomicBool::new(false),
    });
    let remote = HttpRemote::new(&config(&server.url()).remote, Some(tokens)).unwrap();

    let response = remote.send(&RemoteRequest::get("/me")).await.unwrap();
    assert_eq!(response.status, 200);
    stale.assert_async().await;
    fresh.assert_async().await;
}

#[tokio::test]
async fn rate_limited_action_is_retried_later() {
    let mut server = mockito::Server::new_async().await;
    let engine = engine(config(&server.url()));
    engine
        .enqueue_action("note.create", "/notes", HttpMethod::Post, None, None)
        .await
        .unwrap();

    let _limited = server
        .mock("POST", "/notes")
        .with_status(429)
        .expect(1)
        .create_async()
        .await;

    let session = engine.sync().await.unwrap();
    assert_eq!(session.items_retried, 1);

    let pending = engine.list_pending().await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].retry_count, 1);
    assert!(pending[0].next_eligible_at.is_some());
}

#[tokio::test]
async fn fetch_reads_through_cache() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("GET", "/notes")
        .match_query(Matcher::UrlEncoded("page".into(), "2".into()))
        .with_status(200)
        .with_body(r#"[{"id":1}]"#)
        .expect(1)
        .create_async()
        .await;

    let engine = engine(config(&server.url()));
    let first = engine.fetch("/notes", &[("page", "2")], 60).await.unwrap();
    let second = engine.fetch("/notes", &[("page", "2")], 60).await.unwrap();

    assert_eq!(first.as_deref(), Some(br#"[{"id":1}]"#.as_slice()));
    assert_eq!(first, second);
    mock.assert_async().await;
    assert_eq!(engine.cache_stats().await.unwrap().valid_entries, 1);
}

#[tokio::test]
async fn fetch_does_not_cache_errors() {
    let mut server = mockito::Server::new_async().await;
    let _missing = server
        .mock("GET", "/notes/404")
        .with_status(404)
        .create_async()
        .await;

    let engine = engine(config(&server.url()));
    assert!(engine.fetch("/notes/404", &[], 60).await.unwrap().is_none());
    assert_eq!(engine.cache_stats().await.unwrap().total_entries, 0);
}
