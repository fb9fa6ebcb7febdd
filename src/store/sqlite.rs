//! SQLite-backed durable store
//!
//! One table per namespace, each a plain key/value map. Batches run inside a single
//! transaction so a crash never leaves half a batch behind.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, params};

use super::{DurableStore, Namespace, StoreOp};
use crate::error::StoreError;

/// Schema version stamped into `user_version`. A store stamped with any other version is refused.
const SCHEMA_VERSION: i32 = 1;

const DB_FILE: &str = "offsync.db";

type Result<T> = std::result::Result<T, StoreError>;

fn table(namespace: Namespace) -> &'static str {
    match namespace {
        Namespace::Cache => "cache_entries",
        Namespace::Queue => "pending_actions",
        Namespace::Meta => "sync_metadata",
    }
}

/// SQLite-backed durable store
pub struct SqliteStore {
    conn: Mutex<Connection>,
    path: PathBuf,
}

impl SqliteStore {
    /// Open or create the store at the default XDG data location
    pub fn open_default() -> Result<Self> {
        Self::open(&Self::default_path()?)
    }

    /// Default database path (~/.local/share/offsync/offsync.db on Linux)
    pub fn default_path() -> Result<PathBuf> {
        let data_base = dirs::data_dir().ok_or(StoreError::NoDataDir)?;
        Ok(data_base.join("offsync").join(DB_FILE))
    }

    /// Open or create the store at a specific database file
    pub fn open(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .map_err(|e| StoreError::Io(format!("Failed to create store dir: {}", e)))?;
        }

        let conn = Connection::open(db_path)?;

        // A mismatched store is refused, never rebuilt
        let version: i32 = conn.pragma_query_value(None, "user_version", |r| r.get(0))?;
        if version != 0 && version != SCHEMA_VERSION {
            return Err(StoreError::SchemaMismatch {
                found: version,
                supported: SCHEMA_VERSION,
            });
        }

        for namespace in Namespace::ALL {
            conn.execute_batch(&format!(
                "CREATE TABLE IF NOT EXISTS {} (
                    key TEXT PRIMARY KEY NOT NULL,
                    value BLOB NOT NULL,
                    updated_at INTEGER NOT NULL
                );",
                table(namespace)
            ))?;
        }

        conn.pragma_update(None, "user_version", SCHEMA_VERSION)?;
        log::debug!("Opened durable store at {}", db_path.display());

        Ok(Self {
            conn: Mutex::new(conn),
            path: db_path.to_path_buf(),
        })
    }

    /// Location of the database file
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| StoreError::Unavailable("connection lock poisoned".to_string()))
    }
}

#[async_trait]
impl DurableStore for SqliteStore {
    async fn get(&self, namespace: Namespace, key: &str) -> Result<Option<Vec<u8>>> {
        let conn = self.lock()?;
        let value = conn
            .query_row(
                &format!("SELECT value FROM {} WHERE key = ?1", table(namespace)),
                [key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    async fn delete(&self, namespace: Namespace, key: &str) -> Result<bool> {
        let conn = self.lock()?;
        let deleted = conn.execute(
            &format!("DELETE FROM {} WHERE key = ?1", table(namespace)),
            [key],
        )?;
        Ok(deleted > 0)
    }

    async fn scan(&self, namespace: Namespace) -> Result<Vec<(String, Vec<u8>)>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT key, value FROM {} ORDER BY key ASC",
            table(namespace)
        ))?;
        let rows = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<std::result::Result<Vec<(String, Vec<u8>)>, _>>()?;
        Ok(rows)
    }

    async fn apply(&self, ops: Vec<StoreOp>) -> Result<()> {
        if ops.is_empty() {
            return Ok(());
        }

        let now = Utc::now().timestamp();
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        for op in &ops {
            match op {
                StoreOp::Put {
                    namespace,
                    key,
                    value,
                } => {
                    tx.execute(
                        &format!(
                            "INSERT OR REPLACE INTO {} (key, value, updated_at) VALUES (?1, ?2, ?3)",
                            table(*namespace)
                        ),
                        params![key, value, now],
                    )?;
                }
                StoreOp::Delete { namespace, key } => {
                    tx.execute(
                        &format!("DELETE FROM {} WHERE key = ?1", table(*namespace)),
                        [key],
                    )?;
                }
            }
        }
        tx.commit()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn test_store() -> (SqliteStore, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = SqliteStore::open(&dir.path().join(DB_FILE)).unwrap();
        (store, dir)
    }

    #[tokio::test]
    async fn test_put_get() {
        let (store, _dir) = test_store();

        store
            .put(Namespace::Cache, "key1", b"small data".to_vec())
            .await
            .unwrap();

        let result = store.get(Namespace::Cache, "key1").await.unwrap();
        assert_eq!(result, Some(b"small data".to_vec()));
    }

    #[tokio::test]
    async fn test_namespaces_are_isolated() {
        let (store, _dir) = test_store();

        store
            .put(Namespace::Queue, "same", b"queue".to_vec())
            .await
            .unwrap();

        assert!(store.get(Namespace::Cache, "same").await.unwrap().is_none());
        assert!(store.get(Namespace::Meta, "same").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_scan_is_key_ordered() {
        let (store, _dir) = test_store();

        for key in ["00000000000000000003", "00000000000000000001", "00000000000000000002"] {
            store
                .put(Namespace::Queue, key, key.as_bytes().to_vec())
                .await
                .unwrap();
        }

        let keys: Vec<String> = store
            .scan(Namespace::Queue)
            .await
            .unwrap()
            .into_iter()
            .map(|(k, _)| k)
            .collect();
        assert_eq!(
            keys,
            vec![
                "00000000000000000001",
                "00000000000000000002",
                "00000000000000000003"
            ]
        );
    }

    #[tokio::test]
    async fn test_apply_batch() {
        let (store, _dir) = test_store();
        store
            .put(Namespace::Queue, "old", b"old".to_vec())
            .await
            .unwrap();

        store
            .apply(vec![
                StoreOp::delete(Namespace::Queue, "old"),
                StoreOp::put(Namespace::Queue, "new", b"new".to_vec()),
                StoreOp::put(Namespace::Meta, "counter", b"1".to_vec()),
            ])
            .await
            .unwrap();

        assert!(store.get(Namespace::Queue, "old").await.unwrap().is_none());
        assert!(store.get(Namespace::Queue, "new").await.unwrap().is_some());
        assert_eq!(
            store.get(Namespace::Meta, "counter").await.unwrap(),
            Some(b"1".to_vec())
        );
    }

    #[tokio::test]
    async fn test_delete_reports_existence() {
        let (store, _dir) = test_store();
        store
            .put(Namespace::Cache, "k", b"v".to_vec())
            .await
            .unwrap();

        assert!(store.delete(Namespace::Cache, "k").await.unwrap());
        assert!(!store.delete(Namespace::Cache, "k").await.unwrap());
    }

    #[tokio::test]
    async fn test_reopen_keeps_data() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(DB_FILE);
        {
            let store = SqliteStore::open(&path).unwrap();
            store
                .put(Namespace::Meta, "k", b"persisted".to_vec())
                .await
                .unwrap();
        }

        let store = SqliteStore::open(&path).unwrap();
        assert_eq!(
            store.get(Namespace::Meta, "k").await.unwrap(),
            Some(b"persisted".to_vec())
        );
    }

    #[tokio::test]
    async fn test_schema_mismatch_is_refused_and_keeps_data() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(DB_FILE);
        {
            let store = SqliteStore::open(&path).unwrap();
            store
                .put(Namespace::Queue, "00000000000000000001", b"queued".to_vec())
                .await
                .unwrap();
            let conn = store.conn.lock().unwrap();
            conn.pragma_update(None, "user_version", SCHEMA_VERSION + 1)
                .unwrap();
        }

        let err = SqliteStore::open(&path).err().unwrap();
        assert!(matches!(
            err,
            StoreError::SchemaMismatch { found, supported }
                if found == SCHEMA_VERSION + 1 && supported == SCHEMA_VERSION
        ));
        assert!(path.exists());

        // Restoring the stamp shows the queued record was left in place
        {
            let conn = Connection::open(&path).unwrap();
            conn.pragma_update(None, "user_version", SCHEMA_VERSION)
                .unwrap();
        }
        let store = SqliteStore::open(&path).unwrap();
        assert_eq!(
            store
                .get(Namespace::Queue, "00000000000000000001")
                .await
                .unwrap(),
            Some(b"queued".to_vec())
        );
    }
}
