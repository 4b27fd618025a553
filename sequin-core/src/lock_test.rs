#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::thread;
    use std::time::Duration;

    use crate::config::RecipeConfig;
    use crate::error::{CoordResult, RecipeError};
    use crate::infrastructure::CoordinationClient;
    use crate::lock::FairLock;
    use crate::service::{CoordinationService, Session};
    use crate::types::{sequence_of, Acl, CreateMode, WatchId, WatchRegistration, Watcher};

    const DIR: &str = "/locks/catalog";

    fn new_lock(service: &CoordinationService) -> FairLock<Session> {
        FairLock::new(Arc::new(service.connect()), RecipeConfig::lock(DIR)).unwrap()
    }

    /// Deletes the watched node through a second session right before the
    /// watch is registered, so the registration always lands on a node
    /// that is already gone.
    struct VanishingPredecessor {
        inner: Session,
        admin: Session,
    }

    impl CoordinationClient for VanishingPredecessor {
        fn exists(&self, path: &str) -> CoordResult<bool> {
            self.inner.exists(path)
        }
        fn create(&self, path: &str, data: &[u8], acl: &[Acl], mode: CreateMode) -> CoordResult<String> {
            self.inner.create(path, data, acl, mode)
        }
        fn delete(&self, path: &str, version: Option<u32>) -> CoordResult<()> {
            self.inner.delete(path, version)
        }
        fn get_children(&self, path: &str) -> CoordResult<Vec<String>> {
            self.inner.get_children(path)
        }
        fn get_data(&self, path: &str) -> CoordResult<Vec<u8>> {
            self.inner.get_data(path)
        }
        fn watch_exists(&self, path: &str, watcher: Watcher) -> CoordResult<WatchRegistration> {
            let _ = self.admin.delete(path, None);
            self.inner.watch_exists(path, watcher)
        }
        fn remove_watch(&self, id: WatchId) -> CoordResult<bool> {
            self.inner.remove_watch(id)
        }
    }

    #[test]
    fn test_acquire_and_unlock_removes_node() {
        let service = CoordinationService::in_memory();
        let observer = service.connect();
        let mut lock = new_lock(&service);

        lock.acquire().unwrap();
        assert!(lock.is_held());
        let node = lock.node_path().unwrap().to_string();
        assert!(node.starts_with("/locks/catalog/lock-"));
        assert!(observer.exists(&node).unwrap());

        lock.unlock().unwrap();
        assert!(!lock.is_held());
        assert!(lock.node_path().is_none());
        assert!(!observer.exists(&node).unwrap());
        // The directory is shared state and outlives the lock node
        assert!(observer.exists(DIR).unwrap());
    }

    #[test]
    fn test_reentrant_holds_release_on_last_unlock() {
        let service = CoordinationService::in_memory();
        let observer = service.connect();
        let mut lock = new_lock(&service);

        lock.acquire().unwrap();
        lock.acquire().unwrap();
        assert!(lock.try_acquire().unwrap());
        assert_eq!(lock.hold_count(), 3);
        let node = lock.node_path().unwrap().to_string();

        lock.unlock().unwrap();
        lock.unlock().unwrap();
        assert!(lock.is_held());
        assert!(observer.exists(&node).unwrap());

        lock.unlock().unwrap();
        assert!(!observer.exists(&node).unwrap());
        assert_eq!(lock.unlock(), Err(RecipeError::NotHeld));
    }

    #[test]
    fn test_try_acquire_keeps_position_in_line() {
        let service = CoordinationService::in_memory();
        let mut first = new_lock(&service);
        let mut second = new_lock(&service);

        assert!(first.try_acquire().unwrap());
        assert!(!second.try_acquire().unwrap());
        let queued = second.node_path().unwrap().to_string();

        // A later arrival stays behind the queued instance
        let mut third = new_lock(&service);
        assert!(!third.try_acquire().unwrap());

        first.unlock().unwrap();
        assert!(!third.try_acquire().unwrap());
        assert!(second.try_acquire().unwrap());
        assert_eq!(second.node_path(), Some(queued.as_str()));
    }

    #[test]
    fn test_reacquire_after_release_is_a_new_arrival() {
        let service = CoordinationService::in_memory();
        let mut lock = new_lock(&service);

        lock.acquire().unwrap();
        let before = sequence_of(lock.node_path().unwrap()).unwrap();
        lock.unlock().unwrap();
        lock.acquire().unwrap();
        let after = sequence_of(lock.node_path().unwrap()).unwrap();

        assert!(after > before);
    }

    #[test]
    fn test_grants_follow_arrival_order() {
        let service = CoordinationService::in_memory();
        let contenders = 6;

        let mut locks: Vec<FairLock<Session>> = (0..contenders).map(|_| new_lock(&service)).collect();
        assert!(locks[0].try_acquire().unwrap());
        for lock in locks.iter_mut().skip(1) {
            assert!(!lock.try_acquire().unwrap());
        }

        let mut first = locks.remove(0);
        let order = Arc::new(Mutex::new(Vec::new()));
        let inside = Arc::new(AtomicUsize::new(0));

        // Spawn in reverse so thread scheduling cannot stand in for fairness
        let handles: Vec<_> = locks
            .into_iter()
            .enumerate()
            .rev()
            .map(|(i, mut lock)| {
                let order = Arc::clone(&order);
                let inside = Arc::clone(&inside);
                thread::spawn(move || {
                    lock.acquire().unwrap();
                    assert_eq!(inside.fetch_add(1, Ordering::SeqCst), 0);
                    order.lock().unwrap().push(i + 1);
                    thread::sleep(Duration::from_millis(5));
                    inside.fetch_sub(1, Ordering::SeqCst);
                    lock.unlock().unwrap();
                })
            })
            .collect();

        thread::sleep(Duration::from_millis(50));
        assert!(order.lock().unwrap().is_empty());
        first.unlock().unwrap();

        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(*order.lock().unwrap(), (1..contenders).collect::<Vec<_>>());
    }

    #[test]
    fn test_mutual_exclusion_under_contention() {
        let service = CoordinationService::in_memory();
        let inside = Arc::new(AtomicUsize::new(0));
        let total = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let mut lock = new_lock(&service);
                let inside = Arc::clone(&inside);
                let total = Arc::clone(&total);
                thread::spawn(move || {
                    for _ in 0..10 {
                        lock.acquire().unwrap();
                        assert_eq!(inside.fetch_add(1, Ordering::SeqCst), 0);
                        total.fetch_add(1, Ordering::SeqCst);
                        inside.fetch_sub(1, Ordering::SeqCst);
                        lock.unlock().unwrap();
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(total.load(Ordering::SeqCst), 40);
        assert_eq!(service.watch_count(), 0);
    }

    #[test]
    fn test_crashed_holder_promotes_next_waiter() {
        let service = CoordinationService::in_memory();
        let holder_session = Arc::new(service.connect());
        let mut holder = FairLock::new(Arc::clone(&holder_session), RecipeConfig::lock(DIR)).unwrap();
        holder.acquire().unwrap();

        let mut waiter = new_lock(&service);
        let handle = thread::spawn(move || {
            let acquired = waiter.try_acquire_for(Duration::from_secs(5)).unwrap();
            (acquired, waiter)
        });

        thread::sleep(Duration::from_millis(50));
        service.expire_session(holder_session.id());

        let (acquired, waiter) = handle.join().unwrap();
        assert!(acquired);
        assert!(waiter.is_held());
        // The lost session is reported, not masked as a normal release
        assert_eq!(holder.unlock(), Err(RecipeError::SessionLost));
        assert_eq!(holder.acquire(), Err(RecipeError::SessionLost));
    }

    #[test]
    fn test_force_deleted_holder_node_releases_lock() {
        let service = CoordinationService::in_memory();
        let admin = service.connect();
        let mut holder = new_lock(&service);
        holder.acquire().unwrap();
        let holder_node = holder.node_path().unwrap().to_string();

        let mut waiter = new_lock(&service);
        let handle = thread::spawn(move || waiter.try_acquire_for(Duration::from_secs(5)).unwrap());

        thread::sleep(Duration::from_millis(50));
        admin.delete(&holder_node, None).unwrap();

        assert!(handle.join().unwrap());
        // Our node is already gone; releasing is a tolerated race
        holder.unlock().unwrap();
    }

    #[test]
    fn test_predecessor_gone_before_watch_registration() {
        let service = CoordinationService::in_memory();
        let mut holder = new_lock(&service);
        holder.acquire().unwrap();

        let client = Arc::new(VanishingPredecessor {
            inner: service.connect(),
            admin: service.connect(),
        });
        let mut waiter = FairLock::new(client, RecipeConfig::lock(DIR)).unwrap();

        assert!(waiter.try_acquire_for(Duration::from_secs(2)).unwrap());
        assert_eq!(service.watch_count(), 0);
    }

    #[test]
    fn test_waiter_rechecks_after_out_of_order_departure() {
        let service = CoordinationService::in_memory();
        let mut first = new_lock(&service);
        let mut second = new_lock(&service);
        first.acquire().unwrap();
        assert!(!second.try_acquire().unwrap());

        let mut third = new_lock(&service);
        let handle = thread::spawn(move || third.try_acquire_for(Duration::from_secs(5)).unwrap());

        // The node third watches leaves while the holder is still in place
        thread::sleep(Duration::from_millis(50));
        second.withdraw().unwrap();
        thread::sleep(Duration::from_millis(50));
        assert!(!handle.is_finished());

        first.unlock().unwrap();
        assert!(handle.join().unwrap());
    }

    #[test]
    fn test_timed_out_wait_cleans_up_watch() {
        let service = CoordinationService::in_memory();
        let mut holder = new_lock(&service);
        let mut waiter = new_lock(&service);
        holder.acquire().unwrap();

        assert!(!waiter.try_acquire_for(Duration::from_millis(50)).unwrap());
        assert_eq!(service.watch_count(), 0);
        assert!(!waiter.is_held());
        assert!(waiter.node_path().is_some());

        holder.unlock().unwrap();
        assert!(waiter.try_acquire_for(Duration::from_millis(50)).unwrap());
    }

    #[test]
    fn test_cancel_aborts_blocked_acquire() {
        let service = CoordinationService::in_memory();
        let mut holder = new_lock(&service);
        holder.acquire().unwrap();

        let mut waiter = new_lock(&service);
        let cancel = waiter.cancel_handle();
        let handle = thread::spawn(move || {
            let result = waiter.acquire();
            (result, waiter)
        });

        thread::sleep(Duration::from_millis(50));
        cancel.cancel();

        let (result, waiter) = handle.join().unwrap();
        assert_eq!(result, Err(RecipeError::Cancelled));
        assert!(!waiter.is_held());
        assert_eq!(service.watch_count(), 0);
        assert!(holder.is_held());
    }

    #[test]
    fn test_cancel_requested_before_wait_is_consumed_once() {
        let service = CoordinationService::in_memory();
        let mut holder = new_lock(&service);
        let mut waiter = new_lock(&service);
        holder.acquire().unwrap();

        waiter.cancel_handle().cancel();
        assert_eq!(waiter.acquire(), Err(RecipeError::Cancelled));
        assert!(!waiter.try_acquire_for(Duration::from_millis(20)).unwrap());
    }

    #[test]
    fn test_session_expiry_while_waiting_is_fatal() {
        let service = CoordinationService::in_memory();
        let mut holder = new_lock(&service);
        holder.acquire().unwrap();

        let session = Arc::new(service.connect());
        let session_id = session.id();
        let mut waiter = FairLock::new(session, RecipeConfig::lock(DIR)).unwrap();
        let handle = thread::spawn(move || {
            let result = waiter.acquire();
            (result, waiter)
        });

        thread::sleep(Duration::from_millis(50));
        service.expire_session(session_id);

        let (result, mut waiter) = handle.join().unwrap();
        assert_eq!(result, Err(RecipeError::SessionLost));
        assert_eq!(waiter.try_acquire(), Err(RecipeError::SessionLost));
        assert_eq!(waiter.unlock(), Err(RecipeError::SessionLost));
        assert!(holder.is_held());
    }

    #[test]
    fn test_unreachable_service_is_reported() {
        let service = CoordinationService::in_memory();
        let mut lock = new_lock(&service);
        service.set_available(false);

        assert_eq!(lock.acquire(), Err(RecipeError::ServiceUnavailable));
        assert_eq!(lock.try_acquire(), Err(RecipeError::ServiceUnavailable));

        service.set_available(true);
        assert!(lock.try_acquire().unwrap());
    }

    #[test]
    fn test_unlock_keeps_hold_when_service_unreachable() {
        let service = CoordinationService::in_memory();
        let mut lock = new_lock(&service);
        lock.acquire().unwrap();

        service.set_available(false);
        assert_eq!(lock.unlock(), Err(RecipeError::ServiceUnavailable));
        assert!(lock.is_held());

        service.set_available(true);
        lock.unlock().unwrap();
        assert!(!lock.is_held());
    }

    #[test]
    fn test_holder_reports_owner_of_lowest_node() {
        let service = CoordinationService::in_memory();
        let mut first = new_lock(&service);
        let mut second = new_lock(&service);

        assert_eq!(first.holder().unwrap(), None);
        first.acquire().unwrap();
        assert!(!second.try_acquire().unwrap());
        assert_eq!(second.holder().unwrap().as_deref(), Some(first.owner_id()));

        first.unlock().unwrap();
        assert!(second.try_acquire().unwrap());
        assert_eq!(first.holder().unwrap().as_deref(), Some(second.owner_id()));
    }

    #[test]
    fn test_dropping_queued_lock_frees_its_position() {
        let service = CoordinationService::in_memory();
        let admin = service.connect();
        let mut holder = new_lock(&service);
        holder.acquire().unwrap();

        let mut queued = new_lock(&service);
        assert!(!queued.try_acquire().unwrap());
        let node = queued.node_path().unwrap().to_string();
        drop(queued);
        assert!(!admin.exists(&node).unwrap());

        let mut next = new_lock(&service);
        holder.unlock().unwrap();
        assert!(next.try_acquire().unwrap());
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let service = CoordinationService::in_memory();
        let session = Arc::new(service.connect());

        for config in [
            RecipeConfig::lock("relative/dir"),
            RecipeConfig::lock("/"),
            RecipeConfig::lock("/locks").with_prefix(""),
            RecipeConfig::lock("/locks").with_prefix("a/b"),
            RecipeConfig::lock("/locks").with_acl(Vec::new()),
        ] {
            assert!(matches!(
                FairLock::new(Arc::clone(&session), config),
                Err(RecipeError::InvalidConfig(_))
            ));
        }
    }

    #[test]
    fn test_create_retries_past_existing_sequential_name() {
        let service = CoordinationService::in_memory();
        let admin = service.connect();
        let acl = Acl::open_unsafe();
        admin.create("/locks", &[], &acl, CreateMode::Persistent).unwrap();
        admin.create(DIR, &[], &acl, CreateMode::Persistent).unwrap();
        let squatter = format!("{}/lock-0000000000", DIR);
        admin.create(&squatter, b"other", &acl, CreateMode::Persistent).unwrap();

        let mut lock = new_lock(&service);
        assert!(!lock.try_acquire().unwrap());
        assert_eq!(lock.node_path(), Some("/locks/catalog/lock-0000000001"));

        admin.delete(&squatter, None).unwrap();
        assert!(lock.try_acquire().unwrap());
    }

    #[test]
    fn test_directory_recreated_after_removal() {
        let service = CoordinationService::in_memory();
        let admin = service.connect();
        let mut lock = new_lock(&service);

        lock.acquire().unwrap();
        lock.unlock().unwrap();
        admin.delete(DIR, None).unwrap();

        lock.acquire().unwrap();
        assert!(lock.is_held());
        assert!(admin.exists(DIR).unwrap());
        assert!(lock.node_path().unwrap().starts_with("/locks/catalog/lock-"));
    }

    #[test]
    fn test_grant_consumes_pending_cancel() {
        let service = CoordinationService::in_memory();
        let mut lock = new_lock(&service);
        let mut holder = new_lock(&service);

        lock.cancel_handle().cancel();
        lock.acquire().unwrap();
        lock.unlock().unwrap();

        // The earlier request was spent on the grant, so this wait runs to
        // its deadline instead of being cancelled.
        holder.acquire().unwrap();
        assert!(!lock.try_acquire_for(Duration::from_millis(20)).unwrap());
        assert!(!lock.cancel_handle().is_requested());
    }
}
