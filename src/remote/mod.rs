//! Remote API collaborator
//!
//! The engine only needs one thing from the backend: send a request, get back a status
//! and a body. HTTP error statuses are ordinary responses here; only transport
//! failures (no route, timeout) are errors.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::RemoteError;
use crate::queue::{HttpMethod, PendingAction};

pub mod http;
#[cfg(test)]
pub mod mock;
pub mod rate_limit;

pub use http::HttpRemote;
#[cfg(test)]
pub use mock::MockRemote;

/// A request for the remote API
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteRequest {
    pub method: HttpMethod,
    /// Path relative to the configured base URL, or an absolute URL
    pub endpoint: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub query: Vec<(String, String)>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub headers: Vec<(String, String)>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<serde_json::Value>,
    /// Sent in the configured idempotency header so the server can deduplicate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,
}

impl RemoteRequest {
    pub fn get(endpoint: impl Into<String>) -> Self {
        Self {
            method: HttpMethod::Get,
            endpoint: endpoint.into(),
            query: Vec::new(),
            headers: Vec::new(),
            body: None,
            idempotency_key: None,
        }
    }

    pub fn with_query(mut self, params: &[(&str, &str)]) -> Self {
        self.query = params
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        self
    }

    /// The replay of a queued action, keyed by the action id
    pub fn for_action(action: &PendingAction) -> Self {
        Self {
            method: action.method,
            endpoint: action.endpoint.clone(),
            query: Vec::new(),
            headers: vec![("X-Action-Kind".to_string(), action.kind.clone())],
            body: action.payload.clone(),
            idempotency_key: Some(action.id.clone()),
        }
    }
}

/// Status and body returned by the remote
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl RemoteResponse {
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Body as text, truncated for log and error messages
    pub fn body_excerpt(&self) -> String {
        const MAX: usize = 200;
        let text = String::from_utf8_lossy(&self.body);
        match text.char_indices().nth(MAX) {
            Some((idx, _)) => format!("{}...", &text[..idx]),
            None => text.into_owned(),
        }
    }
}

/// The remote HTTP API the engine replays actions against
#[async_trait]
pub trait RemoteApi: Send + Sync {
    async fn send(&self, request: &RemoteRequest) -> Result<RemoteResponse, RemoteError>;
}

/// Supplies bearer tokens for outgoing requests
#[async_trait]
pub trait TokenProvider: Send + Sync {
    /// Current token, if any
    async fn token(&self) -> Option<String>;

    /// Called after a 401; returns the replacement token if one could be obtained
    async fn refresh(&self) -> Option<String> {
        None
    }
}

/// A fixed token that never refreshes
#[derive(Debug, Clone)]
pub struct StaticToken(pub String);

#[async_trait]
impl TokenProvider for StaticToken {
    async fn token(&self) -> Option<String> {
        Some(self.0.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::ActionState;
    use chrono::Utc;

    #[test]
    fn test_request_for_action_carries_id() {
        let now = Utc::now();
        let action = PendingAction {
            id: "action-1".to_string(),
            seq: 0,
            kind: "note.update".to_string(),
            endpoint: "/notes/7".to_string(),
            method: HttpMethod::Patch,
            payload: Some(serde_json::json!({"title": "x"})),
            created_at: now,
            updated_at: now,
            retry_count: 0,
            max_retries: 3,
            state: ActionState::Syncing,
            next_eligible_at: None,
            last_error: None,
        };

        let request = RemoteRequest::for_action(&action);
        assert_eq!(request.method, HttpMethod::Patch);
        assert_eq!(request.endpoint, "/notes/7");
        assert_eq!(request.idempotency_key.as_deref(), Some("action-1"));
        assert_eq!(request.body, action.payload);
    }

    #[test]
    fn test_response_success_range() {
        assert!(RemoteResponse::new(200, "").is_success());
        assert!(RemoteResponse::new(204, "").is_success());
        assert!(!RemoteResponse::new(302, "").is_success());
        assert!(!RemoteResponse::new(500, "").is_success());
    }

    #[test]
    fn test_body_excerpt_truncates() {
        let response = RemoteResponse::new(500, "x".repeat(500));
        let excerpt = response.body_excerpt();
        assert!(excerpt.ends_with("..."));
        assert_eq!(excerpt.len(), 203);
    }
}
