//! offsync - offline-first synchronization engine
//!
//! Lets an application keep reading cached responses and queuing mutations while its
//! backend is unreachable, then replays the queued mutations in order once
//! connectivity returns.
//!
//! ```no_run
//! use offsync::{EngineConfig, HttpMethod, OfflineEngine};
//!
//! # async fn demo() -> offsync::Result<()> {
//! let engine = OfflineEngine::builder(EngineConfig::load_at(None)?).build()?;
//! let id = engine
//!     .enqueue_action("note.create", "/notes", HttpMethod::Post, None, None)
//!     .await?;
//! let session = engine.sync().await?;
//! println!("{} synced, action {}", session.items_succeeded, id);
//! # Ok(())
//! # }
//! ```

pub mod background;
pub mod cache;
pub mod clock;
pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod network;
pub mod queue;
pub mod remote;
pub mod store;
pub mod sync;

pub use cache::{CacheStats, ReadCache, cache_key};
pub use config::EngineConfig;
pub use engine::{EngineBuilder, EngineState, OfflineEngine};
pub use error::{Error, Result};
pub use events::{EngineEvent, FailureReason, Subscription};
pub use network::{HostSignal, NetworkSignal};
pub use queue::{ActionState, HttpMethod, NewAction, PendingAction, QueueStats};
pub use sync::{RetryPolicy, SyncSession};
