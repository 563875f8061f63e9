use crate::errors::SemaphoreError;
use crate::storage::{Lock, PlainAttrs, Storage, StorageContext};
use async_trait::async_trait;
use dashmap::DashMap;
use std::fmt::Debug;
use std::sync::Arc;
use tokio::sync::Mutex;

/// [`MemoryStorage`] is an in-process, [`DashMap`]-backed [`Storage`]
/// implementation. It does not touch disk or the network.
///
/// # Usage Note(s)
/// Because it is in-memory, state does not survive a process restart and
/// is not shared across processes — two [`MemoryStorage`] instances never
/// see each other's writes. Share one `Arc<MemoryStorage>` between
/// `Scheduler`s in the same process (as the test suite does) to exercise
/// the persist/reload contract without a real backing store. For
/// multi-process deployments, use [`crate::storage::RedisStorage`].
///
/// # Constructor(s)
/// [`MemoryStorage::new`] or [`MemoryStorage::default`].
///
/// # See Also
/// - [`Storage`]
/// - [`crate::storage::RedisStorage`]
#[derive(Default)]
pub struct MemoryStorage {
    values: DashMap<String, serde_json::Map<String, serde_json::Value>>,
    locks: DashMap<String, Arc<MemoryLock>>,
}

impl Debug for MemoryStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStorage")
            .field("keys", &self.values.iter().map(|e| e.key().clone()).collect::<Vec<_>>())
            .finish()
    }
}

impl MemoryStorage {
    /// Creates a new, empty [`MemoryStorage`], wrapped in an `Arc` so it
    /// can be shared between multiple in-process `Scheduler` instances.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn save(
        &self,
        context: &StorageContext,
        model: &dyn PlainAttrs,
    ) -> Result<(), SemaphoreError> {
        self.values.insert(context.storage_key(), model.to_plain());
        Ok(())
    }

    async fn reload(
        &self,
        context: &StorageContext,
        model: &mut dyn PlainAttrs,
    ) -> Result<(), SemaphoreError> {
        if let Some(attrs) = self.values.get(&context.storage_key()) {
            model.from_plain(attrs.clone());
        }
        Ok(())
    }

    fn lock_on(&self, context: &StorageContext) -> Arc<dyn Lock> {
        self.locks
            .entry(context.lock_key())
            .or_insert_with(|| Arc::new(MemoryLock::new(context.lock_key())))
            .clone()
    }
}

/// The [`Lock`] implementation backing [`MemoryStorage`]: a plain
/// process-local mutex standing in for the TTL-based locking a real
/// distributed driver performs. Since there is only ever one process
/// sharing a [`MemoryStorage`], contention here is purely intra-process.
#[derive(Debug)]
pub struct MemoryLock {
    key: String,
    held: Mutex<bool>,
}

impl MemoryLock {
    fn new(key: String) -> Self {
        Self {
            key,
            held: Mutex::new(false),
        }
    }
}

#[async_trait]
impl Lock for MemoryLock {
    fn key(&self) -> &str {
        &self.key
    }

    async fn is_locked(&self) -> Result<bool, SemaphoreError> {
        Ok(*self.held.lock().await)
    }

    async fn lock(&self) -> Result<(), SemaphoreError> {
        *self.held.lock().await = true;
        Ok(())
    }

    async fn unlock(&self) -> Result<(), SemaphoreError> {
        *self.held.lock().await = false;
        Ok(())
    }
}
