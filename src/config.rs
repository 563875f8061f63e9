//! Configuration records consumed by [`crate::scheduler::Scheduler::init_from_config`].
//!
//! The core never parses a configuration *file* — that's explicitly out of
//! scope (spec.md §1) — but the in-memory shape an operator-owned loader
//! (TOML/YAML/JSON) would deserialize into is this module's concern, per
//! SPEC_FULL.md's ambient configuration note. [`SlotConfig`] derives
//! [`serde::Deserialize`] for exactly that reason.

use crate::backend::Backend;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Deserializer};

/// A single `backends` list entry: either a name to resolve through a
/// [`crate::registry::BackendRegistry`], or an already-constructed
/// [`Backend`] instance.
///
/// Only the name form is deserializable — a live `Arc<dyn Backend>` has no
/// meaningful textual representation, so configuration loaded from a file
/// can only ever reference backends by name. Callers building a
/// [`SlotConfig`] programmatically may still use [`BackendRef::Instance`]
/// directly.
#[derive(Clone)]
pub enum BackendRef {
    /// A backend name, resolved through a [`crate::registry::BackendRegistry`]
    /// at [`crate::scheduler::Scheduler::add_slot`] time.
    Name(String),
    /// An already-constructed backend instance, attached as-is.
    Instance(Arc<dyn Backend>),
}

impl fmt::Debug for BackendRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendRef::Name(name) => f.debug_tuple("Name").field(name).finish(),
            BackendRef::Instance(backend) => {
                f.debug_tuple("Instance").field(&backend.name()).finish()
            }
        }
    }
}

impl From<&str> for BackendRef {
    fn from(name: &str) -> Self {
        BackendRef::Name(name.to_string())
    }
}

impl From<String> for BackendRef {
    fn from(name: String) -> Self {
        BackendRef::Name(name)
    }
}

impl From<Arc<dyn Backend>> for BackendRef {
    fn from(backend: Arc<dyn Backend>) -> Self {
        BackendRef::Instance(backend)
    }
}

impl<'de> Deserialize<'de> for BackendRef {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let name = String::deserialize(deserializer)?;
        Ok(BackendRef::Name(name))
    }
}

/// The optional, per-slot construction knobs a configuration entry may
/// override. Mirrors the spec's `slot_kwargs` (§4.4, §6).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SlotKwargs {
    /// Overrides [`crate::slot::DEFAULT_TIMEOUT_AFTER`] for this slot, given
    /// in minutes (matching the original implementation's
    /// `timeout_after` constructor keyword, which is itself in minutes).
    pub timeout_after_minutes: Option<u64>,
}

impl SlotKwargs {
    /// The configured timeout as a [`Duration`], if overridden.
    pub fn timeout_after(&self) -> Option<Duration> {
        self.timeout_after_minutes.map(|m| Duration::from_secs(m * 60))
    }
}

/// One entry of the ordered configuration list consumed by
/// [`crate::scheduler::Scheduler::init_from_config`]: a slot id, its
/// backends in polling order, and optional per-slot construction knobs.
#[derive(Debug, Clone, Deserialize)]
pub struct SlotConfig {
    /// The slot's id, unique within the scheduler it's configured into.
    pub slot_id: String,
    /// Backends to attach, in polling order (spec §4.4 "First-match backend
    /// polling" — ordering is the configuration's priority signal).
    pub backends: Vec<BackendRef>,
    /// Optional per-slot construction overrides.
    #[serde(default)]
    pub slot_kwargs: SlotKwargs,
}

impl SlotConfig {
    /// Builds a [`SlotConfig`] for `slot_id` with `backends` in polling
    /// order and default slot kwargs.
    pub fn new(slot_id: impl Into<String>, backends: Vec<BackendRef>) -> Self {
        Self {
            slot_id: slot_id.into(),
            backends,
            slot_kwargs: SlotKwargs::default(),
        }
    }

    /// Returns this config with `timeout_after_minutes` overridden.
    pub fn with_timeout_minutes(mut self, minutes: u64) -> Self {
        self.slot_kwargs.timeout_after_minutes = Some(minutes);
        self
    }
}
