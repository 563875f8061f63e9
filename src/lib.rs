//! `task_semaphore` — a distributed task-semaphore: a small set of shared
//! "slots" that gate the execution of long-running tasks drawn from
//! pluggable task sources ("backends"). Each slot admits at most one task
//! at a time; an admitted task must periodically heartbeat via
//! [`scheduler::Scheduler::keepalive`] or it is evicted at the next
//! [`scheduler::Scheduler::schedule`] pass. Slot state is persisted through
//! [`storage::Storage`] so multiple scheduler processes can cooperate on
//! the same slot configuration without double-admitting a task.
//!
//! # Getting Started
//! Implement [`backend::Backend`] for each task source, register it with a
//! [`registry::BackendRegistry`] (or hand [`scheduler::Scheduler::add_slot`]
//! a live instance), build a [`scheduler::Scheduler`] over a
//! [`storage::Storage`], and drive [`scheduler::Scheduler::schedule`] on a
//! timer.

#[allow(missing_docs)]
pub mod backend;

#[allow(missing_docs)]
pub mod config;

#[allow(missing_docs)]
pub mod errors;

#[allow(missing_docs)]
pub mod lock;

#[allow(missing_docs)]
pub mod registry;

#[allow(missing_docs)]
pub mod scheduler;

#[allow(missing_docs)]
pub mod slot;

#[allow(missing_docs)]
pub mod storage;
