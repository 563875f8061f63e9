use thiserror::Error;

/// The error type returned by backend callbacks (`start_callback`,
/// `stop_callback`, `timeout_callback`, `keepalive_callback`,
/// `backend_error_callback`). Boxed rather than a concrete type since
/// backend implementations are third-party and may raise anything.
///
/// # See Also
/// - [`crate::backend::Backend`]
pub type BackendError = Box<dyn std::error::Error + Send + Sync>;

/// [`SemaphoreError`] is the error type surfaced by the core to its callers
/// (`Scheduler::schedule`, `Scheduler::keepalive`, `Scheduler::stop`,
/// `Scheduler::inspect`, `Slot::keepalive`, `Slot::stop`,
/// `Slot::timeout_if_late`). It uses [`thiserror`] so that adding a new
/// error kind is a one-line change.
///
/// Backend errors are never represented here: per the callback wrapper's
/// error-isolation policy (see [`crate::slot::Slot`]), they are always
/// fully handled before a `Slot` method returns.
///
/// # See Also
/// - [`crate::slot::Slot`]
/// - [`crate::scheduler::Scheduler`]
#[derive(Error, Debug)]
pub enum SemaphoreError {
    /// The supplied task id does not match any slot's current admission.
    #[error("{task_id:?} is unknown to {handler}")]
    WrongTaskId {
        /// The handler (slot or scheduler) the id was checked against.
        handler: String,
        /// The task id that was not found.
        task_id: String,
    },

    /// A slot's admission exceeded `last_keepalive_at + timeout_after`.
    #[error("{task_id:?} on {backend:?} timeouted for {slot}")]
    TaskTimeout {
        /// The slot that timed out.
        slot: String,
        /// The backend that owned the timed-out task, if known.
        backend: Option<String>,
        /// The task id that timed out.
        task_id: String,
    },

    /// `Lock::acquire` exceeded its bounded wait budget.
    #[error("waited too long for lock {key:?}")]
    LockTimeout {
        /// The key of the lock that could not be acquired in time.
        key: String,
    },

    /// A configuration error: unknown backend name, duplicate slot id,
    /// duplicate backend name within a slot, or a conflicting backend
    /// registration. Fatal to the operation that caused it.
    #[error("configuration error: {0}")]
    Config(String),

    /// A failure reported by a [`crate::storage::Storage`] or
    /// [`crate::storage::Lock`] implementation while persisting or
    /// locking state (e.g. an I/O or transport failure).
    #[error("storage error: {0}")]
    Storage(#[source] BackendError),
}

impl SemaphoreError {
    /// Constructs a [`SemaphoreError::WrongTaskId`].
    pub fn wrong_task_id(handler: impl Into<String>, task_id: impl Into<String>) -> Self {
        Self::WrongTaskId {
            handler: handler.into(),
            task_id: task_id.into(),
        }
    }

    /// Constructs a [`SemaphoreError::Config`].
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }
}
