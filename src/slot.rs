use crate::backend::Backend;
use crate::errors::SemaphoreError;
use crate::storage::{PlainAttrs, Storage, StorageContext};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use dashmap::DashMap;
use serde_json::{Map, Value, json};
use std::sync::Arc;
use std::time::Duration as StdDuration;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

/// Default admission timeout, 60 minutes, matching the original
/// implementation's `AbstractSlot.__init__(timeout_after=60)` (minutes).
pub const DEFAULT_TIMEOUT_AFTER: StdDuration = StdDuration::from_secs(60 * 60);

/// The serializable subset of a [`Slot`]'s state: the four admission
/// fields (which transition atomically, invariant I1) plus the configured
/// backend order (invariant I3), declared serializable per spec §4.5.
///
/// `backends_ordered` round-trips through storage for fidelity with the
/// reference driver's persisted layout, but [`Slot::reload`] does not use
/// it to reconstruct backend instances — per §4.5, the configured set of
/// backends always comes from configuration, never from storage.
#[derive(Debug, Clone, Default)]
pub struct SlotState {
    /// The task currently admitted, or `None` if the slot is free.
    pub current_task_id: Option<String>,
    /// The backend that produced `current_task_id`; `Some` iff
    /// `current_task_id` is `Some` (invariant I1).
    pub current_backend_name: Option<String>,
    /// When the current task was admitted; `Some` iff `current_task_id`
    /// is `Some` (invariant I1).
    pub started_at: Option<DateTime<Utc>>,
    /// The last accepted keepalive time; `Some` iff `current_task_id` is
    /// `Some` (invariant I1), and always `>= started_at` while admitted
    /// (invariant I4).
    pub last_keepalive_at: Option<DateTime<Utc>>,
    /// The configured backend polling order (invariant I3: no duplicates,
    /// enumerates the backend map exactly).
    pub backends_ordered: Vec<String>,
}

fn parse_timestamp(value: Option<&Value>) -> Option<DateTime<Utc>> {
    value?
        .as_str()
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

fn parse_string(value: Option<&Value>) -> Option<String> {
    value?.as_str().map(str::to_string)
}

impl PlainAttrs for SlotState {
    fn to_plain(&self) -> Map<String, Value> {
        let mut attrs = Map::new();
        attrs.insert("current_task_id".into(), json!(self.current_task_id));
        attrs.insert(
            "current_backend_name".into(),
            json!(self.current_backend_name),
        );
        attrs.insert(
            "started_at".into(),
            json!(self.started_at.map(|t| t.to_rfc3339())),
        );
        attrs.insert(
            "last_keepalive_at".into(),
            json!(self.last_keepalive_at.map(|t| t.to_rfc3339())),
        );
        attrs.insert("backends_ordered".into(), json!(self.backends_ordered));
        attrs
    }

    fn from_plain(&mut self, attrs: Map<String, Value>) {
        if let Some(v) = attrs.get("current_task_id") {
            self.current_task_id = parse_string(Some(v));
        }
        if let Some(v) = attrs.get("current_backend_name") {
            self.current_backend_name = parse_string(Some(v));
        }
        if attrs.contains_key("started_at") {
            self.started_at = parse_timestamp(attrs.get("started_at"));
        }
        if attrs.contains_key("last_keepalive_at") {
            self.last_keepalive_at = parse_timestamp(attrs.get("last_keepalive_at"));
        }
        if let Some(Value::Array(items)) = attrs.get("backends_ordered") {
            self.backends_ordered = items
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect();
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum CallbackMethod {
    Start,
    Stop,
    Timeout,
    Keepalive,
}

impl CallbackMethod {
    fn as_str(self) -> &'static str {
        match self {
            CallbackMethod::Start => "start_callback",
            CallbackMethod::Stop => "stop_callback",
            CallbackMethod::Timeout => "timeout_callback",
            CallbackMethod::Keepalive => "keepalive_callback",
        }
    }
}

/// [`Slot`] is the per-seat admission state machine: it admits at most one
/// task, tracks its backends in insertion order, persists its state, and
/// runs the callback protocol with error isolation.
///
/// A [`Slot`] reaches [`Storage`] through a non-owning `Arc<dyn Storage>`
/// handle and its owning scheduler's name, rather than an owning or cyclic
/// reference back to the [`crate::scheduler::Scheduler`] itself (see
/// spec §9, "Cyclic back-references").
///
/// # Constructor(s)
/// [`Slot::new`] (default 60-minute timeout) or [`Slot::with_timeout`].
///
/// # See Also
/// - [`crate::scheduler::Scheduler`]
/// - [`crate::backend::Backend`]
/// - [`Storage`]
pub struct Slot {
    id: String,
    scheduler_name: String,
    storage: Arc<dyn Storage>,
    timeout_after: ChronoDuration,
    state: RwLock<SlotState>,
    backends_by_name: DashMap<String, Arc<dyn Backend>>,
}

impl std::fmt::Debug for Slot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "<Slot id={:?}>", self.id)
    }
}

impl Slot {
    /// Constructs a free [`Slot`] with the default 60-minute timeout.
    ///
    /// # See Also
    /// - [`Slot::with_timeout`]
    pub fn new(
        id: impl Into<String>,
        scheduler_name: impl Into<String>,
        storage: Arc<dyn Storage>,
    ) -> Self {
        Self::with_timeout(id, scheduler_name, storage, DEFAULT_TIMEOUT_AFTER)
    }

    /// Constructs a free [`Slot`] with an explicit admission timeout.
    pub fn with_timeout(
        id: impl Into<String>,
        scheduler_name: impl Into<String>,
        storage: Arc<dyn Storage>,
        timeout_after: StdDuration,
    ) -> Self {
        Self {
            id: id.into(),
            scheduler_name: scheduler_name.into(),
            storage,
            timeout_after: ChronoDuration::from_std(timeout_after)
                .unwrap_or_else(|_| ChronoDuration::minutes(60)),
            state: RwLock::new(SlotState::default()),
            backends_by_name: DashMap::new(),
        }
    }

    /// This slot's id, unique within its scheduler.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Attaches `backend` to this slot, appending it to the polling order.
    ///
    /// # Error(s)
    /// Returns [`SemaphoreError::Config`] if a backend with the same
    /// [`Backend::name`] is already present (invariant I3: no duplicates).
    pub async fn add_backend(&self, backend: Arc<dyn Backend>) -> Result<(), SemaphoreError> {
        let name = backend.name().to_string();
        if self.backends_by_name.contains_key(&name) {
            return Err(SemaphoreError::config(format!(
                "backend {name:?} already present on slot {:?}",
                self.id
            )));
        }
        self.backends_by_name.insert(name.clone(), backend);
        self.state.write().await.backends_ordered.push(name);
        Ok(())
    }

    /// Iterates backends in configured order, calling each one's
    /// [`Backend::poll`], returning the first truthy task id together
    /// with its backend. Does not mutate slot state; later backends are
    /// not consulted once a task is found.
    pub async fn poll(&self) -> (Option<String>, Option<Arc<dyn Backend>>) {
        let order = self.state.read().await.backends_ordered.clone();
        for name in order {
            let Some(backend) = self.backends_by_name.get(&name).map(|e| e.clone()) else {
                continue;
            };
            debug!(slot = %self.id, backend = %name, "polling backend");
            if let Some(task_id) = backend.poll().await {
                return (Some(task_id), Some(backend));
            }
        }
        (None, None)
    }

    /// The task currently admitted, or `None` if the slot is free.
    pub async fn current_task_id(&self) -> Option<String> {
        self.state.read().await.current_task_id.clone()
    }

    /// The name of the backend that produced the current admission.
    pub async fn current_backend_name(&self) -> Option<String> {
        self.state.read().await.current_backend_name.clone()
    }

    /// The currently admitted backend instance, if any.
    pub async fn current_backend(&self) -> Option<Arc<dyn Backend>> {
        let name = self.state.read().await.current_backend_name.clone()?;
        self.backends_by_name.get(&name).map(|e| e.clone())
    }

    /// When the current task was admitted.
    pub async fn started_at(&self) -> Option<DateTime<Utc>> {
        self.state.read().await.started_at
    }

    /// The last accepted keepalive time.
    pub async fn last_keepalive_at(&self) -> Option<DateTime<Utc>> {
        self.state.read().await.last_keepalive_at
    }

    /// The configured backend polling order (invariant I3).
    pub async fn backends_ordered(&self) -> Vec<String> {
        self.state.read().await.backends_ordered.clone()
    }

    /// Precondition: the slot is free. Records `task_id`/`backend` as the
    /// current admission, persists, then invokes `start_callback` via the
    /// callback wrapper. If the wrapper frees the slot, the final
    /// observable state is free.
    pub async fn start(
        &self,
        task_id: &str,
        backend: Arc<dyn Backend>,
    ) -> Result<(), SemaphoreError> {
        let now = Utc::now();
        {
            let mut state = self.state.write().await;
            state.current_task_id = Some(task_id.to_string());
            state.current_backend_name = Some(backend.name().to_string());
            state.started_at = Some(now);
            state.last_keepalive_at = Some(now);
        }
        self.save().await?;
        info!(slot = %self.id, backend = %backend.name(), task_id, "admitted task");
        self.invoke_callback(&backend, task_id, CallbackMethod::Start)
            .await
    }

    /// Precondition: `current_task_id == task_id`, else
    /// [`SemaphoreError::WrongTaskId`]. Resets `last_keepalive_at`,
    /// invokes `keepalive_callback` via the wrapper, then persists
    /// (unconditionally, even if the wrapper already freed the slot —
    /// see spec §9's second Open Question).
    pub async fn keepalive(&self, task_id: &str) -> Result<(), SemaphoreError> {
        self.ensure_current_task(task_id).await?;
        let backend = self.current_backend().await;
        {
            let mut state = self.state.write().await;
            state.last_keepalive_at = Some(Utc::now());
        }
        if let Some(backend) = &backend {
            self.invoke_callback(backend, task_id, CallbackMethod::Keepalive)
                .await?;
        }
        self.save().await
    }

    /// Precondition: `current_task_id == task_id`, else
    /// [`SemaphoreError::WrongTaskId`]. Compares `last_keepalive_at +
    /// timeout_after` to now; if the deadline has passed, invokes
    /// `timeout_callback` via the wrapper and fails with
    /// [`SemaphoreError::TaskTimeout`] — the slot remains admitted at the
    /// point the error is raised; callers (the scheduler) are responsible
    /// for then calling [`Slot::stop`]. If not late, returns normally.
    pub async fn timeout_if_late(&self, task_id: &str) -> Result<(), SemaphoreError> {
        self.ensure_current_task(task_id).await?;
        let (last_keepalive, backend_name, backend) = {
            let state = self.state.read().await;
            (
                state.last_keepalive_at,
                state.current_backend_name.clone(),
                state
                    .current_backend_name
                    .as_ref()
                    .and_then(|n| self.backends_by_name.get(n).map(|e| e.clone())),
            )
        };
        let Some(last_keepalive) = last_keepalive else {
            return Ok(());
        };
        let deadline = last_keepalive + self.timeout_after;
        if deadline >= Utc::now() {
            return Ok(());
        }
        warn!(
            slot = %self.id, task_id, deadline = %deadline, last_keepalive = %last_keepalive,
            "slot deadline passed, timing out"
        );
        if let Some(backend) = &backend {
            self.invoke_callback(backend, task_id, CallbackMethod::Timeout)
                .await?;
        }
        Err(SemaphoreError::TaskTimeout {
            slot: self.id.clone(),
            backend: backend_name,
            task_id: task_id.to_string(),
        })
    }

    /// Precondition: `current_task_id == task_id`, else
    /// [`SemaphoreError::WrongTaskId`]. Invokes `stop_callback` via the
    /// wrapper, then unconditionally clears all four admission fields and
    /// persists (idempotent if the wrapper already freed the slot).
    pub async fn stop(&self, task_id: &str) -> Result<(), SemaphoreError> {
        self.ensure_current_task(task_id).await?;
        if let Some(backend) = self.current_backend().await {
            self.invoke_callback(&backend, task_id, CallbackMethod::Stop)
                .await?;
        }
        info!(slot = %self.id, task_id, "stopped task");
        self.free_slot().await
    }

    /// Persists this slot's state to [`Storage`].
    pub async fn save(&self) -> Result<(), SemaphoreError> {
        let context = self.storage_context();
        let state = self.state.read().await.clone();
        self.storage.save(&context, &state).await
    }

    /// Reloads the four admission fields from [`Storage`], preserving the
    /// configured backends (per §4.5, backends always come from
    /// configuration, never from storage).
    pub async fn reload(&self) -> Result<(), SemaphoreError> {
        let context = self.storage_context();
        let mut loaded = SlotState::default();
        self.storage.reload(&context, &mut loaded).await?;
        let mut state = self.state.write().await;
        state.current_task_id = loaded.current_task_id;
        state.current_backend_name = loaded.current_backend_name;
        state.started_at = loaded.started_at;
        state.last_keepalive_at = loaded.last_keepalive_at;
        Ok(())
    }

    fn storage_context(&self) -> StorageContext {
        StorageContext::Slot {
            scheduler_name: self.scheduler_name.clone(),
            slot_id: self.id.clone(),
        }
    }

    async fn ensure_current_task(&self, task_id: &str) -> Result<(), SemaphoreError> {
        let current = self.state.read().await.current_task_id.clone();
        if current.as_deref() != Some(task_id) {
            return Err(SemaphoreError::wrong_task_id(format!("{self:?}"), task_id));
        }
        Ok(())
    }

    async fn free_slot(&self) -> Result<(), SemaphoreError> {
        {
            let mut state = self.state.write().await;
            state.current_task_id = None;
            state.current_backend_name = None;
            state.started_at = None;
            state.last_keepalive_at = None;
        }
        self.save().await
    }

    /// The callback-wrapper algorithm (spec §4.3): calls the named method
    /// on `backend`; if it errors, calls `backend_error_callback`, and
    /// frees the slot if that callback requests it (or itself errors), or
    /// unconditionally if the failing method was `start_callback`.
    async fn invoke_callback(
        &self,
        backend: &Arc<dyn Backend>,
        task_id: &str,
        method: CallbackMethod,
    ) -> Result<(), SemaphoreError> {
        let result = match method {
            CallbackMethod::Start => backend.start_callback(task_id).await,
            CallbackMethod::Stop => backend.stop_callback(task_id).await,
            CallbackMethod::Timeout => backend.timeout_callback(task_id).await,
            CallbackMethod::Keepalive => backend.keepalive_callback(task_id).await,
        };
        let Err(err) = result else {
            return Ok(());
        };
        warn!(
            slot = %self.id, backend = %backend.name(), method = method.as_str(), task_id,
            error = %err, "backend callback failed, invoking error callback"
        );
        let free_requested = match backend
            .backend_error_callback(task_id, &err, method.as_str())
            .await
        {
            Ok(free) => free,
            Err(err2) => {
                error!(
                    slot = %self.id, backend = %backend.name(), error = %err2,
                    "backend_error_callback itself failed, freeing slot"
                );
                true
            }
        };
        if free_requested || method == CallbackMethod::Start {
            warn!(slot = %self.id, task_id, "freeing slot after callback error");
            self.free_slot().await?;
        }
        Ok(())
    }
}
