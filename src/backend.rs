use crate::errors::BackendError;
use async_trait::async_trait;
use std::fmt::Debug;

/// [`Backend`] is a pluggable task source: something a [`crate::slot::Slot`]
/// can poll for work and drive through a small callback protocol once a
/// task is admitted. The core owns no state on behalf of a backend — a
/// backend implementation is free to hold its own (a queue connection, a
/// cursor, counters...).
///
/// # Required Method(s)
/// Implementors must supply [`Backend::name`] and [`Backend::poll`]; every
/// other method has a no-op default, matching the "not applicable" default
/// behavior the spec describes for callbacks a backend doesn't care about.
///
/// # Trait Implementation(s)
/// None ship in this crate — backends are always provided by the
/// application embedding `task_semaphore`.
///
/// # Object Safety
/// [`Backend`] is object safe; slots and the registry always hold
/// `Arc<dyn Backend>`.
///
/// # See Also
/// - [`crate::slot::Slot`]
/// - [`crate::registry::BackendRegistry`]
#[async_trait]
pub trait Backend: Debug + Send + Sync {
    /// The backend's stable name. Used as the key under which a slot
    /// remembers which backend produced its current admission
    /// (`current_backend_name`), and as the key under which the backend
    /// can be looked up in a [`crate::registry::BackendRegistry`].
    ///
    /// Changing a backend's name between process restarts is an
    /// incompatible change: a slot reloaded from storage will no longer be
    /// able to resolve its persisted `current_backend_name` back to this
    /// backend.
    fn name(&self) -> &str;

    /// Returns one task identifier unique across all backends associated
    /// with any slot of this scheduler, or `None` if there is nothing to
    /// admit right now. May perform I/O; must not block indefinitely.
    async fn poll(&self) -> Option<String>;

    /// Called exactly once per admission, immediately after the slot
    /// records the task. This is where the backend should actually
    /// dispatch or begin the work referenced by `task_id`.
    async fn start_callback(&self, task_id: &str) -> Result<(), BackendError> {
        let _ = task_id;
        Ok(())
    }

    /// Called on graceful finish (an explicit `stop` signal, not a
    /// timeout). Side effect: cleanup.
    async fn stop_callback(&self, task_id: &str) -> Result<(), BackendError> {
        let _ = task_id;
        Ok(())
    }

    /// Called when the slot declares `task_id` timed out, immediately
    /// before the slot is freed.
    async fn timeout_callback(&self, task_id: &str) -> Result<(), BackendError> {
        let _ = task_id;
        Ok(())
    }

    /// Called on every accepted keepalive for `task_id`.
    async fn keepalive_callback(&self, task_id: &str) -> Result<(), BackendError> {
        let _ = task_id;
        Ok(())
    }

    /// Called when any of the other callbacks returns an error. The
    /// `Ok` payload is a "free the slot" request: `true` frees the slot,
    /// `false` keeps it admitted. If the failing method was
    /// `start_callback`, the slot is freed regardless of what this method
    /// returns. If this method itself returns `Err`, the slot is freed —
    /// see [`crate::slot::Slot`]'s callback wrapper.
    async fn backend_error_callback(
        &self,
        task_id: &str,
        error: &BackendError,
        method_name: &str,
    ) -> Result<bool, BackendError> {
        let _ = (task_id, error, method_name);
        Ok(false)
    }
}

#[async_trait]
impl<B: Backend + ?Sized> Backend for std::sync::Arc<B> {
    fn name(&self) -> &str {
        self.as_ref().name()
    }

    async fn poll(&self) -> Option<String> {
        self.as_ref().poll().await
    }

    async fn start_callback(&self, task_id: &str) -> Result<(), BackendError> {
        self.as_ref().start_callback(task_id).await
    }

    async fn stop_callback(&self, task_id: &str) -> Result<(), BackendError> {
        self.as_ref().stop_callback(task_id).await
    }

    async fn timeout_callback(&self, task_id: &str) -> Result<(), BackendError> {
        self.as_ref().timeout_callback(task_id).await
    }

    async fn keepalive_callback(&self, task_id: &str) -> Result<(), BackendError> {
        self.as_ref().keepalive_callback(task_id).await
    }

    async fn backend_error_callback(
        &self,
        task_id: &str,
        error: &BackendError,
        method_name: &str,
    ) -> Result<bool, BackendError> {
        self.as_ref()
            .backend_error_callback(task_id, error, method_name)
            .await
    }
}
