use crate::backend::Backend;
use crate::config::{BackendRef, SlotConfig};
use crate::errors::SemaphoreError;
use crate::lock;
use crate::registry::BackendRegistry;
use crate::slot::Slot;
use crate::storage::{Storage, StorageContext};
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};
use typed_builder::TypedBuilder;

/// A read-only snapshot of one slot's admission state, returned by
/// [`Scheduler::inspect`].
#[derive(Debug, Clone)]
pub struct SlotSnapshot {
    /// The slot's id.
    pub slot_id: String,
    /// The task currently admitted, or `None` if the slot is free.
    pub current_task_id: Option<String>,
    /// The backend that produced `current_task_id`, if admitted.
    pub current_backend_name: Option<String>,
    /// When the current task was admitted, if any.
    pub started_at: Option<chrono::DateTime<chrono::Utc>>,
    /// The last accepted keepalive time, if admitted.
    pub last_keepalive_at: Option<chrono::DateTime<chrono::Utc>>,
    /// The slot's configured backend polling order.
    pub backends_ordered: Vec<String>,
}

/// A read-only snapshot of the whole scheduler, returned by
/// [`Scheduler::inspect`]: every slot's serializable attributes plus every
/// unique backend name attached to any of its slots.
#[derive(Debug, Clone)]
pub struct SchedulerSnapshot {
    /// The scheduler's name.
    pub name: String,
    /// Every slot's snapshot, in configured (insertion) order.
    pub slots: Vec<SlotSnapshot>,
    /// Every unique backend name attached to any slot of this scheduler.
    pub backends: Vec<String>,
}

/// [`Scheduler`] owns a named set of [`Slot`]s and runs their periodic
/// admission pass under a single, scheduler-wide lock (spec §4.4, §9
/// "Concurrency realization").
///
/// A [`Scheduler`] is not itself persisted — only its slots are — so it can
/// be freely reconstructed from the same [`SlotConfig`] list and the same
/// [`Storage`] by another process and pick up exactly where the last one
/// left off (scenario 7, "Persist and resume").
///
/// # Constructor(s)
/// [`Scheduler::new`].
///
/// # See Also
/// - [`crate::slot::Slot`]
/// - [`crate::storage::Storage`]
/// - [`crate::registry::BackendRegistry`]
pub struct Scheduler {
    name: String,
    storage: Arc<dyn Storage>,
    registry: Arc<BackendRegistry>,
    slots: DashMap<String, Arc<Slot>>,
    slot_order: RwLock<Vec<String>>,
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("name", &self.name)
            .field(
                "slots",
                &self.slots.iter().map(|e| e.key().clone()).collect::<Vec<_>>(),
            )
            .finish()
    }
}

/// Builder-style construction parameters for a [`Scheduler`], mirroring the
/// teacher crate's own `SchedulerConfig`/`TypedBuilder` pattern. Only
/// `name` and `storage` are required; `registry` defaults to an empty
/// [`BackendRegistry`] for schedulers whose slots are configured entirely
/// with live [`BackendRef::Instance`] entries rather than names.
#[derive(TypedBuilder)]
#[builder(build_method(into = Scheduler))]
pub struct SchedulerConfig {
    /// The scheduler's name (see [`Scheduler::name`]).
    #[builder(setter(into))]
    pub name: String,
    /// The [`Storage`] backing every slot and the scheduler-wide lock.
    pub storage: Arc<dyn Storage>,
    /// The [`BackendRegistry`] used to resolve `BackendRef::Name` entries.
    #[builder(default = Arc::new(BackendRegistry::default()))]
    pub registry: Arc<BackendRegistry>,
}

impl From<SchedulerConfig> for Scheduler {
    fn from(config: SchedulerConfig) -> Self {
        Scheduler {
            name: config.name,
            storage: config.storage,
            registry: config.registry,
            slots: DashMap::new(),
            slot_order: RwLock::new(Vec::new()),
        }
    }
}

impl Scheduler {
    /// Constructs an empty [`Scheduler`] named `name`, backed by `storage`
    /// and resolving string backend references through `registry`.
    ///
    /// # See Also
    /// - [`Scheduler::builder`], for the [`TypedBuilder`]-driven form with
    ///   an optional `registry`.
    /// - [`Scheduler::init_from_config`]
    /// - [`Scheduler::add_slot`]
    pub fn new(
        name: impl Into<String>,
        storage: Arc<dyn Storage>,
        registry: Arc<BackendRegistry>,
    ) -> Self {
        Self {
            name: name.into(),
            storage,
            registry,
            slots: DashMap::new(),
            slot_order: RwLock::new(Vec::new()),
        }
    }

    /// Entry point for the [`SchedulerConfig`] builder.
    pub fn builder() -> SchedulerConfigBuilder {
        SchedulerConfig::builder()
    }

    /// This scheduler's name, also the key from which its scheduler-wide
    /// lock is derived (`StorageContext::Scheduler`).
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Adds every slot named in `config`, in order, then reloads each new
    /// slot's persisted state so in-memory state matches what's already
    /// committed to storage (spec §4.4).
    ///
    /// # Error(s)
    /// Propagates [`Scheduler::add_slot`]'s configuration errors and any
    /// [`SemaphoreError::Storage`] raised while reloading.
    pub async fn init_from_config(&self, config: Vec<SlotConfig>) -> Result<(), SemaphoreError> {
        for entry in config {
            let timeout_after = entry.slot_kwargs.timeout_after();
            let slot = self
                .add_slot(entry.slot_id, entry.backends, timeout_after)
                .await?;
            slot.reload().await?;
        }
        Ok(())
    }

    /// Creates a new [`Slot`] named `slot_id`, attaches `backends` (by name,
    /// resolved through this scheduler's [`BackendRegistry`], or by
    /// instance) in the given order, and registers it with this scheduler.
    /// `timeout_after` overrides [`crate::slot::DEFAULT_TIMEOUT_AFTER`] when
    /// given (the config-level [`crate::config::SlotKwargs`] only offers
    /// minute granularity; callers building slots programmatically can pass
    /// any [`std::time::Duration`] here, matching [`Slot::with_timeout`]).
    ///
    /// # Error(s)
    /// Returns [`SemaphoreError::Config`] if `slot_id` is already
    /// registered, if a name in `backends` is not registered, or if two
    /// entries in `backends` resolve to the same backend name.
    pub async fn add_slot(
        &self,
        slot_id: impl Into<String>,
        backends: Vec<BackendRef>,
        timeout_after: Option<std::time::Duration>,
    ) -> Result<Arc<Slot>, SemaphoreError> {
        let slot_id = slot_id.into();
        if self.slots.contains_key(&slot_id) {
            return Err(SemaphoreError::config(format!(
                "slot {slot_id:?} is already configured on scheduler {:?}",
                self.name
            )));
        }

        let slot = Arc::new(match timeout_after {
            Some(timeout_after) => Slot::with_timeout(
                slot_id.clone(),
                self.name.clone(),
                self.storage.clone(),
                timeout_after,
            ),
            None => Slot::new(slot_id.clone(), self.name.clone(), self.storage.clone()),
        });

        for backend_ref in backends {
            let backend: Arc<dyn Backend> = match backend_ref {
                BackendRef::Name(name) => self.registry.resolve(&name)?,
                BackendRef::Instance(backend) => backend,
            };
            slot.add_backend(backend).await?;
        }

        self.slots.insert(slot_id.clone(), slot.clone());
        self.slot_order.write().await.push(slot_id);
        info!(scheduler = %self.name, slot = %slot.id(), "slot configured");
        Ok(slot)
    }

    /// Looks up a configured slot by id.
    pub fn slot(&self, slot_id: &str) -> Option<Arc<Slot>> {
        self.slots.get(slot_id).map(|e| e.clone())
    }

    /// The periodic admission pass (spec §4.4). Takes this scheduler's
    /// lock for the entire duration, then for each slot in configured
    /// order: reloads it; if admitted, checks for timeout (stopping and
    /// moving on without polling if late, per the "timeout-then-admit is
    /// split across passes" design decision, spec §9 Open Question 3); if
    /// free, polls its backends and starts whatever task, if any, the
    /// first matching backend returns.
    ///
    /// # Error(s)
    /// Returns [`SemaphoreError::LockTimeout`] if the scheduler-wide lock
    /// cannot be acquired in time. Never returns
    /// [`SemaphoreError::TaskTimeout`] — that's caught internally and
    /// turned into a `stop` — or a backend error, which the callback
    /// wrapper always handles locally.
    pub async fn schedule(&self) -> Result<(), SemaphoreError> {
        let guard = self.acquire_lock().await?;
        debug!(scheduler = %self.name, "schedule pass starting");

        let order = self.slot_order.read().await.clone();
        for slot_id in order {
            let Some(slot) = self.slots.get(&slot_id).map(|e| e.clone()) else {
                continue;
            };
            slot.reload().await?;
            let current = slot.current_task_id().await;
            if let Some(task_id) = current {
                match slot.timeout_if_late(&task_id).await {
                    Ok(()) => {}
                    Err(SemaphoreError::TaskTimeout { .. }) => {
                        // `timeout_callback`'s own error path (via the callback
                        // wrapper) may already have freed the slot — e.g. a
                        // `backend_error_callback` that returns `true`, or one
                        // that itself errors. In that case `task_id` is stale
                        // and calling `stop` with it would surface a spurious
                        // `WrongTaskId`, which §7's propagation policy forbids
                        // for a fully-absorbed backend error. Only call `stop`
                        // if the slot still holds this admission.
                        if slot.current_task_id().await.as_deref() == Some(task_id.as_str()) {
                            slot.stop(&task_id).await?;
                        }
                    }
                    Err(other) => {
                        guard.release().await?;
                        return Err(other);
                    }
                }
                continue;
            }
            let (task_id, backend) = slot.poll().await;
            if let (Some(task_id), Some(backend)) = (task_id, backend) {
                slot.start(&task_id, backend).await?;
            }
        }

        debug!(scheduler = %self.name, "schedule pass complete");
        guard.release().await
    }

    /// Routes an external keepalive signal to whichever slot currently
    /// holds `task_id`.
    ///
    /// # Error(s)
    /// Returns [`SemaphoreError::WrongTaskId`] if no slot's current
    /// admission matches `task_id`, or [`SemaphoreError::LockTimeout`] if
    /// the scheduler-wide lock cannot be acquired in time.
    pub async fn keepalive(&self, task_id: &str) -> Result<(), SemaphoreError> {
        let guard = self.acquire_lock().await?;
        let result = self
            .dispatch(task_id, |slot, task_id| {
                Box::pin(async move { slot.keepalive(task_id).await })
            })
            .await;
        guard.release().await?;
        result
    }

    /// Routes an external stop signal to whichever slot currently holds
    /// `task_id`.
    ///
    /// # Error(s)
    /// Returns [`SemaphoreError::WrongTaskId`] if no slot's current
    /// admission matches `task_id`, or [`SemaphoreError::LockTimeout`] if
    /// the scheduler-wide lock cannot be acquired in time.
    pub async fn stop(&self, task_id: &str) -> Result<(), SemaphoreError> {
        let guard = self.acquire_lock().await?;
        let result = self
            .dispatch(task_id, |slot, task_id| {
                Box::pin(async move { slot.stop(task_id).await })
            })
            .await;
        guard.release().await?;
        result
    }

    /// A read-only snapshot of every slot's serializable attributes and
    /// every unique backend name attached to this scheduler.
    ///
    /// # Error(s)
    /// Returns [`SemaphoreError::LockTimeout`] if the scheduler-wide lock
    /// cannot be acquired in time.
    pub async fn inspect(&self) -> Result<SchedulerSnapshot, SemaphoreError> {
        let guard = self.acquire_lock().await?;
        let order = self.slot_order.read().await.clone();
        let mut slots = Vec::with_capacity(order.len());
        let mut backend_names = std::collections::BTreeSet::new();
        for slot_id in order {
            let Some(slot) = self.slots.get(&slot_id).map(|e| e.clone()) else {
                continue;
            };
            let backends_ordered = slot.backends_ordered().await;
            for name in &backends_ordered {
                backend_names.insert(name.clone());
            }
            slots.push(SlotSnapshot {
                slot_id: slot.id().to_string(),
                current_task_id: slot.current_task_id().await,
                current_backend_name: slot.current_backend_name().await,
                started_at: slot.started_at().await,
                last_keepalive_at: slot.last_keepalive_at().await,
                backends_ordered,
            });
        }
        guard.release().await?;
        Ok(SchedulerSnapshot {
            name: self.name.clone(),
            slots,
            backends: backend_names.into_iter().collect(),
        })
    }

    async fn acquire_lock(&self) -> Result<lock::LockGuard, SemaphoreError> {
        let context = StorageContext::Scheduler {
            scheduler_name: self.name.clone(),
        };
        lock::acquire_default(self.storage.lock_on(&context)).await
    }

    async fn dispatch<'a, F>(&'a self, task_id: &'a str, op: F) -> Result<(), SemaphoreError>
    where
        F: FnOnce(
            Arc<Slot>,
            &'a str,
        ) -> std::pin::Pin<
            Box<dyn std::future::Future<Output = Result<(), SemaphoreError>> + Send + 'a>,
        >,
    {
        let order = self.slot_order.read().await.clone();
        for slot_id in order {
            let Some(slot) = self.slots.get(&slot_id).map(|e| e.clone()) else {
                continue;
            };
            if slot.current_task_id().await.as_deref() == Some(task_id) {
                return op(slot, task_id).await;
            }
        }
        Err(SemaphoreError::wrong_task_id(
            format!("scheduler {:?}", self.name),
            task_id,
        ))
    }
}
