mod common;

#[cfg(test)]
mod tests {
    use super::common::ScriptedBackend;
    use std::sync::Arc;
    use std::time::Duration;
    use task_semaphore::config::BackendRef;
    use task_semaphore::errors::SemaphoreError;
    use task_semaphore::registry::BackendRegistry;
    use task_semaphore::scheduler::Scheduler;
    use task_semaphore::storage::{MemoryStorage, Storage, StorageContext};

    // Scenario 4: timeout path. A slot with a short timeout times out,
    // gets stopped, and — since timeout-then-admit is split across
    // passes (spec §9 Open Question 3) — only picks up the next task on
    // the pass *after* the one that stopped it.
    #[tokio::test]
    async fn timeout_path_splits_across_passes() {
        let storage = MemoryStorage::new();
        let scheduler = Scheduler::new("sched_timeout", storage, Arc::new(BackendRegistry::default()));
        let task = ScriptedBackend::new("TaskBackend", ["T1", "T2"]).into_arc();
        scheduler
            .add_slot(
                "sid_1",
                vec![BackendRef::Instance(task.clone())],
                Some(Duration::from_millis(200)),
            )
            .await
            .unwrap();

        scheduler.schedule().await.unwrap(); // admits T1
        let slot = scheduler.slot("sid_1").unwrap();
        assert_eq!(slot.current_task_id().await.as_deref(), Some("T1"));

        scheduler.schedule().await.unwrap(); // within deadline, no change
        assert_eq!(slot.current_task_id().await.as_deref(), Some("T1"));
        assert_eq!(
            task.timeout_count.load(std::sync::atomic::Ordering::SeqCst),
            0
        );

        tokio::time::sleep(Duration::from_millis(400)).await;

        scheduler.schedule().await.unwrap(); // times out and stops T1, no poll this pass
        assert_eq!(
            task.timeout_count.load(std::sync::atomic::Ordering::SeqCst),
            1
        );
        assert_eq!(
            task.stop_count.load(std::sync::atomic::Ordering::SeqCst),
            1
        );
        assert_eq!(slot.current_task_id().await, None);

        scheduler.schedule().await.unwrap(); // next pass admits T2
        assert_eq!(slot.current_task_id().await.as_deref(), Some("T2"));
    }

    // When `timeout_callback` itself errors and `backend_error_callback`
    // requests a free, the callback wrapper already frees the slot before
    // `timeout_if_late` raises `TaskTimeout`. `schedule()` must not then
    // call `stop` with the now-stale task id — that would surface a
    // spurious `WrongTaskId`, which a fully-absorbed backend error must
    // never do (§7's propagation policy).
    #[tokio::test]
    async fn timeout_callback_error_freeing_slot_does_not_leak_wrong_task_id() {
        let storage = MemoryStorage::new();
        let scheduler = Scheduler::new("sched_timeout_err", storage, Arc::new(BackendRegistry::default()));
        let task = ScriptedBackend::new("TaskBackend", ["T1", "T2"])
            .with_fail_timeout()
            .with_free_on_error()
            .into_arc();
        scheduler
            .add_slot(
                "sid_1",
                vec![BackendRef::Instance(task.clone())],
                Some(Duration::from_millis(200)),
            )
            .await
            .unwrap();

        scheduler.schedule().await.unwrap(); // admits T1
        let slot = scheduler.slot("sid_1").unwrap();
        assert_eq!(slot.current_task_id().await.as_deref(), Some("T1"));

        tokio::time::sleep(Duration::from_millis(400)).await;

        // timeout_callback errors, backend_error_callback frees the slot,
        // and schedule() must return Ok rather than WrongTaskId.
        scheduler.schedule().await.unwrap();
        assert_eq!(
            task.timeout_count.load(std::sync::atomic::Ordering::SeqCst),
            1
        );
        assert_eq!(
            task.error_callback_count.load(std::sync::atomic::Ordering::SeqCst),
            1
        );
        // stop_callback is never reached: the slot was already freed by
        // the callback wrapper before schedule() would have called stop().
        assert_eq!(
            task.stop_count.load(std::sync::atomic::Ordering::SeqCst),
            0
        );
        assert_eq!(slot.current_task_id().await, None);

        scheduler.schedule().await.unwrap(); // next pass admits T2
        assert_eq!(slot.current_task_id().await.as_deref(), Some("T2"));
    }

    // P5: save() then reload() is a fixed point for the four admission
    // fields.
    #[tokio::test]
    async fn save_reload_is_fixed_point() {
        let storage = MemoryStorage::new();
        let scheduler = Scheduler::new("sched_p5", storage, Arc::new(BackendRegistry::default()));
        let task = ScriptedBackend::new("TaskBackend", ["T1"]).into_arc();
        scheduler
            .add_slot("sid_1", vec![BackendRef::Instance(task)], None)
            .await
            .unwrap();
        scheduler.schedule().await.unwrap();

        let slot = scheduler.slot("sid_1").unwrap();
        let before = (
            slot.current_task_id().await,
            slot.current_backend_name().await,
            slot.started_at().await,
            slot.last_keepalive_at().await,
        );
        slot.save().await.unwrap();
        slot.reload().await.unwrap();
        let after = (
            slot.current_task_id().await,
            slot.current_backend_name().await,
            slot.started_at().await,
            slot.last_keepalive_at().await,
        );
        assert_eq!(before, after);
    }

    // Scenario 7: persist and resume. A second scheduler sharing the same
    // storage and configuration observes the first scheduler's admission
    // after a reload, as if it were a second cooperating process.
    #[tokio::test]
    async fn persist_and_resume_across_schedulers() {
        let storage = MemoryStorage::new();
        let registry_a = Arc::new(BackendRegistry::default());
        registry_a
            .register("TaskBackend", || {
                Arc::new(ScriptedBackend::new("TaskBackend", ["T1"]))
                    as Arc<dyn task_semaphore::backend::Backend>
            })
            .unwrap();
        let scheduler_a = Scheduler::new("sched_shared", storage.clone(), registry_a);
        scheduler_a
            .init_from_config(vec![task_semaphore::config::SlotConfig::new(
                "sid_1",
                vec![BackendRef::Name("TaskBackend".into())],
            )])
            .await
            .unwrap();
        scheduler_a.schedule().await.unwrap();
        assert_eq!(
            scheduler_a.slot("sid_1").unwrap().current_task_id().await.as_deref(),
            Some("T1")
        );

        let registry_b = Arc::new(BackendRegistry::default());
        registry_b
            .register("TaskBackend", || {
                Arc::new(ScriptedBackend::new("TaskBackend", []))
                    as Arc<dyn task_semaphore::backend::Backend>
            })
            .unwrap();
        let scheduler_b = Scheduler::new("sched_shared", storage, registry_b);
        scheduler_b
            .init_from_config(vec![task_semaphore::config::SlotConfig::new(
                "sid_1",
                vec![BackendRef::Name("TaskBackend".into())],
            )])
            .await
            .unwrap();

        let slot_b = scheduler_b.slot("sid_1").unwrap();
        assert_eq!(slot_b.current_task_id().await.as_deref(), Some("T1"));
        assert!(slot_b.started_at().await.is_some());
        assert!(slot_b.last_keepalive_at().await.is_some());
    }

    // P6 (partial, single-process simulation): a lock held by one
    // scheduler's pass is observed as held by anyone racing for the same
    // named lock, via the shared Storage's lock_on contract.
    #[tokio::test]
    async fn scheduler_lock_is_keyed_by_name_and_shared_via_storage() {
        let storage = MemoryStorage::new();
        let context = StorageContext::Scheduler {
            scheduler_name: "sched_lock".to_string(),
        };
        let lock_a = storage.lock_on(&context);
        let lock_b = storage.lock_on(&context);
        lock_a.lock().await.unwrap();
        assert!(lock_b.is_locked().await.unwrap());
        lock_a.unlock().await.unwrap();
        assert!(!lock_b.is_locked().await.unwrap());
    }

    // Acquiring a lock that stays held past max_wait surfaces LockTimeout.
    #[tokio::test]
    async fn lock_acquire_times_out() {
        let storage = MemoryStorage::new();
        let context = StorageContext::Scheduler {
            scheduler_name: "sched_lock_timeout".to_string(),
        };
        let lock = storage.lock_on(&context);
        lock.lock().await.unwrap();

        let err = task_semaphore::lock::acquire(
            storage.lock_on(&context),
            Duration::from_millis(20),
            Duration::from_millis(60),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, SemaphoreError::LockTimeout { .. }));
    }

    // Scenario 7 against the distributed reference driver: networked, so
    // gated behind `--ignored` like the teacher's own networked suites
    // (e.g. `telemetry_integration_test.rs`). Requires a local Redis at
    // `redis://127.0.0.1/` (`REDIS_URL` to override).
    #[ignore = "requires a reachable Redis instance"]
    #[tokio::test]
    async fn persist_and_resume_across_schedulers_via_redis() {
        use task_semaphore::storage::RedisStorage;

        let url = std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1/".to_string());
        let storage = RedisStorage::connect(&url)
            .await
            .expect("Redis must be reachable for this ignored test");

        let registry_a = Arc::new(BackendRegistry::default());
        registry_a
            .register("TaskBackend", || {
                Arc::new(ScriptedBackend::new("TaskBackend", ["T1"]))
                    as Arc<dyn task_semaphore::backend::Backend>
            })
            .unwrap();
        let scheduler_a = Scheduler::new("sched_redis_shared", storage.clone(), registry_a);
        scheduler_a
            .init_from_config(vec![task_semaphore::config::SlotConfig::new(
                "sid_1",
                vec![BackendRef::Name("TaskBackend".into())],
            )])
            .await
            .unwrap();
        scheduler_a.schedule().await.unwrap();
        assert_eq!(
            scheduler_a.slot("sid_1").unwrap().current_task_id().await.as_deref(),
            Some("T1")
        );

        let registry_b = Arc::new(BackendRegistry::default());
        registry_b
            .register("TaskBackend", || {
                Arc::new(ScriptedBackend::new("TaskBackend", []))
                    as Arc<dyn task_semaphore::backend::Backend>
            })
            .unwrap();
        let scheduler_b = Scheduler::new("sched_redis_shared", storage, registry_b);
        scheduler_b
            .init_from_config(vec![task_semaphore::config::SlotConfig::new(
                "sid_1",
                vec![BackendRef::Name("TaskBackend".into())],
            )])
            .await
            .unwrap();

        let slot_b = scheduler_b.slot("sid_1").unwrap();
        assert_eq!(slot_b.current_task_id().await.as_deref(), Some("T1"));
        assert!(slot_b.started_at().await.is_some());
        assert!(slot_b.last_keepalive_at().await.is_some());
    }
}
