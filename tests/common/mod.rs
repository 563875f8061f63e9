//! Mock backends shared across the integration test suite.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use task_semaphore::backend::Backend;
use task_semaphore::errors::BackendError;
use tokio::sync::Mutex;

#[derive(Debug)]
struct SimpleError(String);

impl fmt::Display for SimpleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for SimpleError {}

pub fn backend_error(message: impl Into<String>) -> BackendError {
    Box::new(SimpleError(message.into()))
}

/// A backend that never has work: `poll` always returns `None`, counted.
#[derive(Debug, Default)]
pub struct EmptyBackend {
    name: String,
    pub poll_count: AtomicUsize,
}

impl EmptyBackend {
    pub fn new(name: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            poll_count: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl Backend for EmptyBackend {
    fn name(&self) -> &str {
        &self.name
    }

    async fn poll(&self) -> Option<String> {
        self.poll_count.fetch_add(1, Ordering::SeqCst);
        None
    }
}

/// A backend driven by a scripted sequence of `poll` results, with
/// counters on every callback and configurable failure/recovery behavior
/// for `start_callback`, `keepalive_callback`, and `backend_error_callback`.
#[derive(Debug)]
pub struct ScriptedBackend {
    name: String,
    tasks: Mutex<VecDeque<Option<String>>>,
    pub poll_count: AtomicUsize,
    pub start_count: AtomicUsize,
    pub stop_count: AtomicUsize,
    pub timeout_count: AtomicUsize,
    pub keepalive_count: AtomicUsize,
    pub error_callback_count: AtomicUsize,
    pub fail_start: bool,
    pub fail_keepalive: bool,
    pub fail_timeout: bool,
    /// What `backend_error_callback` returns when a failure occurs.
    pub free_on_error: bool,
}

impl ScriptedBackend {
    pub fn new(name: &str, tasks: impl IntoIterator<Item = &'static str>) -> Self {
        Self {
            name: name.to_string(),
            tasks: Mutex::new(tasks.into_iter().map(|t| Some(t.to_string())).collect()),
            poll_count: AtomicUsize::new(0),
            start_count: AtomicUsize::new(0),
            stop_count: AtomicUsize::new(0),
            timeout_count: AtomicUsize::new(0),
            keepalive_count: AtomicUsize::new(0),
            error_callback_count: AtomicUsize::new(0),
            fail_start: false,
            fail_keepalive: false,
            fail_timeout: false,
            free_on_error: false,
        }
    }

    pub fn with_fail_start(mut self) -> Self {
        self.fail_start = true;
        self
    }

    pub fn with_fail_keepalive(mut self) -> Self {
        self.fail_keepalive = true;
        self
    }

    pub fn with_fail_timeout(mut self) -> Self {
        self.fail_timeout = true;
        self
    }

    pub fn with_free_on_error(mut self) -> Self {
        self.free_on_error = true;
        self
    }

    pub fn into_arc(self) -> Arc<Self> {
        Arc::new(self)
    }
}

#[async_trait]
impl Backend for ScriptedBackend {
    fn name(&self) -> &str {
        &self.name
    }

    async fn poll(&self) -> Option<String> {
        self.poll_count.fetch_add(1, Ordering::SeqCst);
        self.tasks.lock().await.pop_front().flatten()
    }

    async fn start_callback(&self, task_id: &str) -> Result<(), BackendError> {
        self.start_count.fetch_add(1, Ordering::SeqCst);
        if self.fail_start {
            return Err(backend_error(format!("start failed for {task_id}")));
        }
        Ok(())
    }

    async fn stop_callback(&self, _task_id: &str) -> Result<(), BackendError> {
        self.stop_count.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn timeout_callback(&self, task_id: &str) -> Result<(), BackendError> {
        self.timeout_count.fetch_add(1, Ordering::SeqCst);
        if self.fail_timeout {
            return Err(backend_error(format!("timeout failed for {task_id}")));
        }
        Ok(())
    }

    async fn keepalive_callback(&self, task_id: &str) -> Result<(), BackendError> {
        self.keepalive_count.fetch_add(1, Ordering::SeqCst);
        if self.fail_keepalive {
            return Err(backend_error(format!("keepalive failed for {task_id}")));
        }
        Ok(())
    }

    async fn backend_error_callback(
        &self,
        _task_id: &str,
        _error: &BackendError,
        _method_name: &str,
    ) -> Result<bool, BackendError> {
        self.error_callback_count.fetch_add(1, Ordering::SeqCst);
        Ok(self.free_on_error)
    }
}
