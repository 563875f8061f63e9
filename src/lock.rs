use crate::errors::SemaphoreError;
use crate::storage::Lock;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::warn;

/// Default bound on how long [`acquire`] will poll before giving up, 5
/// minutes, matching the original implementation's `DEFAULT_MAX_WAIT`.
pub const DEFAULT_MAX_WAIT: Duration = Duration::from_secs(5 * 60);

/// Default delay between polls of [`Lock::is_locked`], 2 seconds, matching
/// the original implementation's `DEFAULT_LOCK_LOOP_WAIT_TIME`.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Acquires `lock`, polling [`Lock::is_locked`] every `poll_interval` until
/// it reports unheld, then claims it via [`Lock::lock`]. If the lock stays
/// held for longer than `max_wait`, returns [`SemaphoreError::LockTimeout`].
///
/// Returns a [`LockGuard`] that releases the lock when dropped (or sooner,
/// via [`LockGuard::release`]), so callers get release-on-every-exit-path
/// for free, including early returns via `?` and panics during the guarded
/// section — the same guarantee the original implementation's
/// `with`-block-based lock gave.
///
/// # See Also
/// - [`LockGuard`]
/// - [`Lock`]
pub async fn acquire(
    lock: Arc<dyn Lock>,
    poll_interval: Duration,
    max_wait: Duration,
) -> Result<LockGuard, SemaphoreError> {
    let start = Instant::now();
    while lock.is_locked().await? {
        if start.elapsed() > max_wait {
            return Err(SemaphoreError::LockTimeout {
                key: lock.key().to_string(),
            });
        }
        tokio::time::sleep(poll_interval).await;
    }
    lock.lock().await?;
    Ok(LockGuard {
        lock: Some(lock),
    })
}

/// Convenience wrapper around [`acquire`] using [`DEFAULT_POLL_INTERVAL`]
/// and [`DEFAULT_MAX_WAIT`].
pub async fn acquire_default(lock: Arc<dyn Lock>) -> Result<LockGuard, SemaphoreError> {
    acquire(lock, DEFAULT_POLL_INTERVAL, DEFAULT_MAX_WAIT).await
}

/// An RAII guard over a held [`Lock`]. Dropping it releases the lock.
///
/// Because [`Lock::unlock`] is async and [`Drop::drop`] is not, a guard
/// dropped without an explicit call to [`LockGuard::release`] spawns a
/// detached task to perform the release — this still runs during a panic
/// unwind, so the lock is not left held forever by a crashed caller (the
/// same role the reference drivers' TTL plays at a coarser timescale).
/// Prefer calling [`LockGuard::release`] explicitly on the normal,
/// non-panicking path so the release is awaited rather than merely
/// scheduled.
#[must_use = "dropping a LockGuard releases it asynchronously; prefer an explicit release().await"]
pub struct LockGuard {
    lock: Option<Arc<dyn Lock>>,
}

impl LockGuard {
    /// Releases the lock and awaits completion.
    pub async fn release(mut self) -> Result<(), SemaphoreError> {
        if let Some(lock) = self.lock.take() {
            lock.unlock().await
        } else {
            Ok(())
        }
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if let Some(lock) = self.lock.take() {
            tokio::spawn(async move {
                if let Err(err) = lock.unlock().await {
                    warn!(key = lock.key(), error = %err, "failed to release lock on drop");
                }
            });
        }
    }
}
