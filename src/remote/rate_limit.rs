//! Reactive per-resource rate limiting
//!
//! Limiting only kicks in for a resource after the server has answered 429 for it.
//! Until then requests go out unthrottled.

use std::collections::HashMap;
use std::num::NonZeroU32;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use log::debug;

/// Resource an endpoint belongs to: its first path segment.
///
/// Query strings, scheme/host and an `/api/vN` prefix are ignored, so
/// `https://host/api/v1/notes/7?x=1` and `/notes` share the `notes` limiter.
pub fn resource_of(endpoint: &str) -> String {
    let path = match endpoint.split_once("://") {
        Some((_, rest)) => rest.find('/').map(|i| &rest[i..]).unwrap_or("/"),
        None => endpoint,
    };
    let path = path.split(['?', '#']).next().unwrap_or("");

    let mut segments = path.split('/').filter(|s| !s.is_empty()).peekable();
    if segments.peek() == Some(&"api") {
        segments.next();
        if segments
            .peek()
            .is_some_and(|s| s.len() > 1 && s.starts_with('v') && s[1..].chars().all(|c| c.is_ascii_digit()))
        {
            segments.next();
        }
    }

    segments.next().unwrap_or("").to_string()
}

/// Throttle for one resource, dormant until the server first answers 429.
pub struct ResourceRateLimiter {
    resource: String,
    throttled: AtomicBool,
    quota: RateLimiter<NotKeyed, InMemoryState, DefaultClock>,
}

impl ResourceRateLimiter {
    pub fn new(resource: impl Into<String>, per_second: u32) -> Self {
        let per_second = NonZeroU32::new(per_second).unwrap_or(NonZeroU32::MIN);
        Self {
            resource: resource.into(),
            throttled: AtomicBool::new(false),
            quota: RateLimiter::direct(Quota::per_second(per_second)),
        }
    }

    pub fn activate(&self) {
        if !self.throttled.swap(true, Ordering::SeqCst) {
            debug!("Server rate limited '{}', throttling it from now on", self.resource);
        }
    }

    pub fn is_active(&self) -> bool {
        self.throttled.load(Ordering::SeqCst)
    }

    /// Returns immediately while dormant.
    pub async fn acquire(&self) {
        if self.is_active() {
            self.quota.until_ready().await;
        }
    }
}

/// Limiters keyed by resource, created on the first 429 for that resource.
pub struct RateLimiterSet {
    per_second: u32,
    by_resource: Mutex<HashMap<String, Arc<ResourceRateLimiter>>>,
}

impl RateLimiterSet {
    pub fn new(per_second: u32) -> Self {
        Self {
            per_second,
            by_resource: Mutex::new(HashMap::new()),
        }
    }

    fn lookup(&self, resource: &str) -> Option<Arc<ResourceRateLimiter>> {
        self.by_resource
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(resource)
            .cloned()
    }

    /// Wait until a request to `resource` may go out. The map is not locked while
    /// waiting.
    pub async fn wait_for(&self, resource: &str) {
        if let Some(limiter) = self.lookup(resource) {
            limiter.acquire().await;
        }
    }

    /// Start throttling `resource` (called on 429).
    pub fn activate(&self, resource: &str) {
        self.by_resource
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entry(resource.to_string())
            .or_insert_with(|| Arc::new(ResourceRateLimiter::new(resource, self.per_second)))
            .activate();
    }

    pub fn is_active(&self, resource: &str) -> bool {
        self.lookup(resource).is_some_and(|l| l.is_active())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resource_of_relative_paths() {
        assert_eq!(resource_of("/notes"), "notes");
        assert_eq!(resource_of("/notes/7"), "notes");
        assert_eq!(resource_of("notes/7/comments"), "notes");
        assert_eq!(resource_of("/notes?page=2"), "notes");
    }

    #[test]
    fn test_resource_of_strips_api_version() {
        assert_eq!(resource_of("/api/v1/orders/9"), "orders");
        assert_eq!(resource_of("/api/v2/orders"), "orders");
        // Not a version segment
        assert_eq!(resource_of("/api/values"), "values");
    }

    #[test]
    fn test_resource_of_absolute_urls() {
        assert_eq!(resource_of("https://example.com/api/v1/users/42"), "users");
        assert_eq!(resource_of("http://localhost:8080"), "");
    }

    #[test]
    fn test_limiter_activation() {
        let limiter = ResourceRateLimiter::new("notes", 6);
        assert!(!limiter.is_active());

        limiter.activate();
        assert!(limiter.is_active());

        // Second activation should be idempotent
        limiter.activate();
        assert!(limiter.is_active());
    }

    #[tokio::test]
    async fn test_set_activates_lazily() {
        let set = RateLimiterSet::new(6);
        assert!(!set.is_active("notes"));

        // Waiting on an unknown resource returns immediately
        set.wait_for("notes").await;

        set.activate("notes");
        assert!(set.is_active("notes"));
        assert!(!set.is_active("orders"));
    }
}
