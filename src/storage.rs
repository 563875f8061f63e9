#[allow(missing_docs)]
pub mod memory;

#[allow(missing_docs)]
pub mod redis;

pub use memory::MemoryStorage;
pub use redis::{RedisLock, RedisStorage};

use crate::errors::SemaphoreError;
use async_trait::async_trait;
use std::fmt::Debug;
use std::sync::Arc;

/// The namespace every key derived from a [`StorageContext`] is prefixed
/// with, matching the original implementation's `"task_semaphore."` prefix.
pub const NAMESPACE: &str = "task_semaphore";

/// [`StorageContext`] identifies *what* is being persisted or locked: a
/// scheduler's own lock, or one of its slots' state.
///
/// # See Also
/// - [`Storage`]
/// - [`crate::scheduler::Scheduler`]
/// - [`crate::slot::Slot`]
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum StorageContext {
    /// The scheduler-wide lock, keyed only by scheduler name.
    Scheduler {
        /// The owning scheduler's name.
        scheduler_name: String,
    },
    /// A single slot's persisted admission state.
    Slot {
        /// The owning scheduler's name.
        scheduler_name: String,
        /// The slot's id, unique within the scheduler.
        slot_id: String,
    },
}

impl StorageContext {
    /// Flattens this context to the dotted key under which the reference
    /// drivers store/lock it: `<namespace>.<scheduler_name>` for a
    /// scheduler, `<namespace>.<scheduler_name>.slot.<slot_id>` for a slot.
    pub fn storage_key(&self) -> String {
        match self {
            StorageContext::Scheduler { scheduler_name } => {
                format!("{NAMESPACE}.{scheduler_name}")
            }
            StorageContext::Slot {
                scheduler_name,
                slot_id,
            } => format!("{NAMESPACE}.{scheduler_name}.slot.{slot_id}"),
        }
    }

    /// The key under which the lock for this context is stored —
    /// `storage_key()` with a `.lock` suffix.
    pub fn lock_key(&self) -> String {
        format!("{}.lock", self.storage_key())
    }
}

/// A plain, serializable view of a persisted model's state: a bag of named
/// attributes. Mirrors the original implementation's `PlainAttrs` mixin
/// (`to_plain`/`from_plain`), with `serde_json::Value` standing in for
/// Python's dynamically typed attribute values.
///
/// # Required Method(s)
/// Implementors supply [`PlainAttrs::to_plain`] and [`PlainAttrs::from_plain`].
/// `from_plain` must assign each named attribute it recognizes and leave
/// unrecognized keys and keys absent from `attrs` untouched (retaining
/// whatever default value the model already held), matching `Storage::
/// reload`'s "unknown keys are ignored, missing keys retain default
/// values" contract.
///
/// # See Also
/// - [`Storage`]
pub trait PlainAttrs: Send + Sync {
    /// Returns this model's serializable attributes as a plain map.
    fn to_plain(&self) -> serde_json::Map<String, serde_json::Value>;

    /// Applies `attrs` onto this model's current state.
    fn from_plain(&mut self, attrs: serde_json::Map<String, serde_json::Value>);
}

/// [`Storage`] persists the serializable state of a model (anything
/// implementing [`PlainAttrs`]) under the key derived from a
/// [`StorageContext`], and is also the source of [`Lock`]s keyed the same
/// way.
///
/// # Required Method(s)
/// Implementors supply [`Storage::save`], [`Storage::reload`] and
/// [`Storage::lock_on`].
///
/// # Trait Implementation(s)
/// [`MemoryStorage`] (in-process reference/test driver) and
/// [`RedisStorage`] (distributed reference driver) ship with this crate.
///
/// # Object Safety
/// [`Storage`] is object safe; [`crate::scheduler::Scheduler`] and
/// [`crate::slot::Slot`] always hold `Arc<dyn Storage>`.
///
/// # See Also
/// - [`StorageContext`]
/// - [`PlainAttrs`]
/// - [`Lock`]
#[async_trait]
pub trait Storage: Debug + Send + Sync {
    /// Durably persists `model.to_plain()` under the key derived from
    /// `context`, overwriting any prior value.
    async fn save(
        &self,
        context: &StorageContext,
        model: &dyn PlainAttrs,
    ) -> Result<(), SemaphoreError>;

    /// Fetches the bytes persisted for `context`; if absent, `model` is
    /// left untouched (its "empty" default). Otherwise deserializes and
    /// applies the result via `model.from_plain`.
    async fn reload(
        &self,
        context: &StorageContext,
        model: &mut dyn PlainAttrs,
    ) -> Result<(), SemaphoreError>;

    /// Returns an acquirable [`Lock`] keyed by `context`.
    fn lock_on(&self, context: &StorageContext) -> Arc<dyn Lock>;
}

/// [`Lock`] is scoped mutual exclusion keyed by an opaque string.
/// Implementations are polled by [`crate::lock::acquire`], which is the
/// only intended caller — it applies the bounded-wait and TTL policy
/// uniformly across drivers.
///
/// # Required Method(s)
/// Implementors supply [`Lock::is_locked`], [`Lock::lock`] and
/// [`Lock::unlock`].
///
/// # See Also
/// - [`crate::lock::acquire`]
/// - [`Storage::lock_on`]
#[async_trait]
pub trait Lock: Debug + Send + Sync {
    /// The opaque key this lock is scoped to.
    fn key(&self) -> &str;

    /// Returns whether the lock is currently held by anyone (including a
    /// stale, not-yet-expired holder).
    async fn is_locked(&self) -> Result<bool, SemaphoreError>;

    /// Marks the lock as held, with a safety TTL so a crashed holder that
    /// never calls [`Lock::unlock`] is eventually recovered from.
    async fn lock(&self) -> Result<(), SemaphoreError>;

    /// Releases the lock.
    async fn unlock(&self) -> Result<(), SemaphoreError>;
}
