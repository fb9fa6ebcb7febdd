//! In-memory durable store
//!
//! Same contract as the SQLite store without touching disk. Handy for tests and for
//! hosts that only want the queueing semantics for the lifetime of the process.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;

use super::{DurableStore, Namespace, StoreOp};
use crate::error::StoreError;

type Result<T> = std::result::Result<T, StoreError>;
type Tables = HashMap<Namespace, BTreeMap<String, Vec<u8>>>;

/// In-memory store with optional write-failure injection
#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
    fail_writes: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent write fail with `StoreError::Unavailable`
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    fn lock(&self) -> Result<MutexGuard<'_, Tables>> {
        self.tables
            .lock()
            .map_err(|_| StoreError::Unavailable("memory store lock poisoned".to_string()))
    }

    fn check_writable(&self) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("writes disabled".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl DurableStore for MemoryStore {
    async fn get(&self, namespace: Namespace, key: &str) -> Result<Option<Vec<u8>>> {
        let tables = self.lock()?;
        Ok(tables.get(&namespace).and_then(|t| t.get(key)).cloned())
    }

    async fn delete(&self, namespace: Namespace, key: &str) -> Result<bool> {
        self.check_writable()?;
        let mut tables = self.lock()?;
        Ok(tables
            .get_mut(&namespace)
            .is_some_and(|t| t.remove(key).is_some()))
    }

    async fn scan(&self, namespace: Namespace) -> Result<Vec<(String, Vec<u8>)>> {
        let tables = self.lock()?;
        Ok(tables
            .get(&namespace)
            .map(|t| t.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .unwrap_or_default())
    }

    async fn apply(&self, ops: Vec<StoreOp>) -> Result<()> {
        self.check_writable()?;
        // The whole batch runs under one lock, so readers never see part of it
        let mut tables = self.lock()?;
        for op in ops {
            match op {
                StoreOp::Put {
                    namespace,
                    key,
                    value,
                } => {
                    tables.entry(namespace).or_default().insert(key, value);
                }
                StoreOp::Delete { namespace, key } => {
                    if let Some(t) = tables.get_mut(&namespace) {
                        t.remove(&key);
                    }
                }
            }
        }
        Ok(())
    }
}
