use crate::backend::Backend;
use crate::errors::SemaphoreError;
use dashmap::DashMap;
use std::fmt::Debug;
use std::sync::Arc;

/// A factory that constructs a fresh [`Backend`] instance for a registered
/// name. Kept as a boxed closure (rather than a bare `fn` pointer) so
/// backends that close over configuration (connection strings, queue
/// names...) can still be registered by name.
pub type BackendFactory = Arc<dyn Fn() -> Arc<dyn Backend> + Send + Sync>;

/// [`BackendRegistry`] is the process-wide directory mapping a stable
/// backend name to a factory that can construct it, so that slots declared
/// by configuration (a bare string) can be resolved to a live [`Backend`]
/// instance.
///
/// Unlike the teacher crate's own type registries (which live behind a
/// `static LazyLock`), this registry is deliberately *not* a hidden
/// singleton: per the design note on global state, it is an explicit,
/// independently constructible structure. Applications build one at
/// startup (or use [`BackendRegistry::default`]) and hand it to
/// [`crate::scheduler::Scheduler`], which keeps unit tests free to register
/// conflicting names in isolation from one another.
///
/// # Required Method(s)
/// None — [`BackendRegistry`] is a concrete struct, not a trait.
///
/// # See Also
/// - [`crate::backend::Backend`]
/// - [`crate::scheduler::Scheduler`]
#[derive(Default)]
pub struct BackendRegistry {
    factories: DashMap<String, BackendFactory>,
}

impl Debug for BackendRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendRegistry")
            .field(
                "registered",
                &self.factories.iter().map(|e| e.key().clone()).collect::<Vec<_>>(),
            )
            .finish()
    }
}

impl BackendRegistry {
    /// Creates a new, empty [`BackendRegistry`].
    ///
    /// # See Also
    /// - [`BackendRegistry::default`]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a backend factory under `name`. Registration is a
    /// configuration-time operation: registering a second factory under a
    /// name that is already present is a configuration error, detected
    /// immediately rather than later at lookup time.
    ///
    /// # Error(s)
    /// Returns [`SemaphoreError::Config`] if `name` is already registered.
    ///
    /// # See Also
    /// - [`BackendRegistry::resolve`]
    pub fn register(
        &self,
        name: impl Into<String>,
        factory: impl Fn() -> Arc<dyn Backend> + Send + Sync + 'static,
    ) -> Result<(), SemaphoreError> {
        let name = name.into();
        if self.factories.contains_key(&name) {
            return Err(SemaphoreError::config(format!(
                "conflicting backend registration for {name:?}"
            )));
        }
        self.factories.insert(name, Arc::new(factory));
        Ok(())
    }

    /// Resolves a registered backend name to a freshly constructed
    /// [`Backend`] instance.
    ///
    /// # Error(s)
    /// Returns [`SemaphoreError::Config`] if `name` is not registered.
    ///
    /// # See Also
    /// - [`BackendRegistry::register`]
    pub fn resolve(&self, name: &str) -> Result<Arc<dyn Backend>, SemaphoreError> {
        let factory = self
            .factories
            .get(name)
            .ok_or_else(|| SemaphoreError::config(format!("{name:?} is not a registered backend")))?;
        Ok((factory)())
    }

    /// Returns whether `name` is currently registered.
    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }
}
