//! Scripted remote for unit tests

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use super::{RemoteApi, RemoteRequest, RemoteResponse};
use crate::error::RemoteError;

/// Replays scripted outcomes in order, then answers 200 with an empty body
#[derive(Default)]
pub struct MockRemote {
    outcomes: Mutex<VecDeque<Result<RemoteResponse, RemoteError>>>,
    requests: Mutex<Vec<RemoteRequest>>,
    latency: Mutex<Option<Duration>>,
}

impl MockRemote {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_status(&self, status: u16) {
        self.push(Ok(RemoteResponse::new(status, format!("status {}", status))));
    }

    pub fn push_error(&self, error: RemoteError) {
        self.push(Err(error));
    }

    pub fn push(&self, outcome: Result<RemoteResponse, RemoteError>) {
        self.outcomes.lock().unwrap().push_back(outcome);
    }

    /// Delay every response by `latency`
    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock().unwrap() = Some(latency);
    }

    /// Every request received so far
    pub fn requests(&self) -> Vec<RemoteRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl RemoteApi for MockRemote {
    async fn send(&self, request: &RemoteRequest) -> Result<RemoteResponse, RemoteError> {
        // Give concurrent callers a chance to run, like a real network round trip
        tokio::task::yield_now().await;

        self.requests.lock().unwrap().push(request.clone());
        let latency = *self.latency.lock().unwrap();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        self.outcomes
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(RemoteResponse::new(200, Vec::new())))
    }
}
