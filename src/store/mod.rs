//! Durable store contract
//!
//! The engine keeps three logical tables in a key-value store: read cache entries,
//! pending actions, and sync metadata. Every call is atomic; `apply` groups several
//! writes into a single all-or-nothing batch.

use async_trait::async_trait;
use serde::{Serialize, de::DeserializeOwned};

use crate::error::StoreError;

pub mod memory;
pub mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

type Result<T> = std::result::Result<T, StoreError>;

/// Logical table within the durable store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Namespace {
    /// Read cache entries
    Cache,
    /// Pending actions, keyed by zero-padded insertion sequence
    Queue,
    /// Counters and the last sync summary
    Meta,
}

impl Namespace {
    pub const ALL: [Namespace; 3] = [Namespace::Cache, Namespace::Queue, Namespace::Meta];

    pub fn as_str(&self) -> &'static str {
        match self {
            Namespace::Cache => "cache",
            Namespace::Queue => "queue",
            Namespace::Meta => "meta",
        }
    }
}

impl std::fmt::Display for Namespace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One write inside an atomic batch
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreOp {
    Put {
        namespace: Namespace,
        key: String,
        value: Vec<u8>,
    },
    Delete {
        namespace: Namespace,
        key: String,
    },
}

impl StoreOp {
    pub fn put(namespace: Namespace, key: impl Into<String>, value: Vec<u8>) -> Self {
        StoreOp::Put {
            namespace,
            key: key.into(),
            value,
        }
    }

    pub fn delete(namespace: Namespace, key: impl Into<String>) -> Self {
        StoreOp::Delete {
            namespace,
            key: key.into(),
        }
    }
}

/// Atomic key-value persistence over the engine's namespaces.
#[async_trait]
pub trait DurableStore: Send + Sync {
    async fn get(&self, namespace: Namespace, key: &str) -> Result<Option<Vec<u8>>>;

    /// Remove a key, returning whether it existed
    async fn delete(&self, namespace: Namespace, key: &str) -> Result<bool>;

    /// All entries of a namespace in ascending key order
    async fn scan(&self, namespace: Namespace) -> Result<Vec<(String, Vec<u8>)>>;

    /// Apply a batch of writes atomically: either every op lands or none does
    async fn apply(&self, ops: Vec<StoreOp>) -> Result<()>;

    async fn put(&self, namespace: Namespace, key: &str, value: Vec<u8>) -> Result<()> {
        self.apply(vec![StoreOp::put(namespace, key, value)]).await
    }
}

/// Serialize a record for storage
pub(crate) fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    serde_json::to_vec(value).map_err(|e| StoreError::Encode(e.to_string()))
}

/// Deserialize a stored record, reporting which key was unreadable
pub(crate) fn decode<T: DeserializeOwned>(namespace: Namespace, key: &str, data: &[u8]) -> Result<T> {
    serde_json::from_slice(data).map_err(|e| StoreError::Corrupt {
        namespace: namespace.to_string(),
        key: key.to_string(),
        reason: e.to_string(),
    })
}

/// Read a JSON value from the metadata namespace
pub(crate) async fn read_meta<T: DeserializeOwned>(
    store: &dyn DurableStore,
    key: &str,
) -> Result<Option<T>> {
    match store.get(Namespace::Meta, key).await? {
        Some(data) => Ok(Some(decode(Namespace::Meta, key, &data)?)),
        None => Ok(None),
    }
}
