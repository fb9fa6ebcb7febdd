//! Error types for the offline sync engine

use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type for the engine
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error(transparent)]
    Remote(#[from] RemoteError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A sync pass failed and this caller was coalesced onto it.
    #[error("Sync pass failed: {0}")]
    Coalesced(Arc<Error>),
}

impl Error {
    /// Unwrap a shared pass error, keeping the original when this was its only holder.
    pub(crate) fn from_shared(err: Arc<Error>) -> Self {
        Arc::try_unwrap(err).unwrap_or_else(Error::Coalesced)
    }

    /// True when the error came from the durable store.
    pub fn is_storage(&self) -> bool {
        match self {
            Error::Store(_) => true,
            Error::Coalesced(inner) => inner.is_storage(),
            _ => false,
        }
    }
}

/// Durable store failures. Fatal to the operation that hit them.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Storage I/O error: {0}")]
    Io(String),

    #[error("Could not determine data directory")]
    NoDataDir,

    #[error("Corrupt record {namespace}/{key}: {reason}")]
    Corrupt {
        namespace: String,
        key: String,
        reason: String,
    },

    #[error("Failed to encode record: {0}")]
    Encode(String),

    #[error("Storage unavailable: {0}")]
    Unavailable(String),

    #[error("Store written by schema {found}, this build supports schema {supported}")]
    SchemaMismatch { found: i32, supported: i32 },
}

/// Read cache caller errors
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Invalid TTL: {0} seconds (must be positive)")]
    InvalidTtl(i64),
}

/// Pending action queue errors
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Action not found: {0}")]
    NotFound(String),

    #[error("Action {id} is {state}, not FAILED")]
    NotFailed { id: String, state: String },

    #[error("Queue is full ({0} actions) and holds no PENDING action to evict")]
    Full(usize),
}

/// Transport-level failures talking to the remote API.
///
/// HTTP status codes are not errors at this layer; they come back in the response
/// and are classified by the sync coordinator.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RemoteError {
    #[error("Network unreachable: {0}")]
    Offline(String),

    #[error("Request timed out")]
    Timeout,

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Invalid request URL: {0}")]
    InvalidUrl(String),
}

impl From<reqwest::Error> for RemoteError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            RemoteError::Timeout
        } else if err.is_connect() {
            RemoteError::Offline("Failed to connect to remote".to_string())
        } else if err.is_builder() {
            RemoteError::InvalidUrl(err.to_string())
        } else {
            RemoteError::Transport(err.to_string())
        }
    }
}

/// Configuration-related errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration file not found: {0}")]
    NotFound(PathBuf),

    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Could not determine configuration directory")]
    NoConfigDir,
}

impl From<serde_yaml::Error> for ConfigError {
    fn from(err: serde_yaml::Error) -> Self {
        ConfigError::ParseError(err.to_string())
    }
}
