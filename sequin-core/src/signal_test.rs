#[cfg(test)]
mod tests {
    use std::thread;
    use std::time::{Duration, Instant};

    use crate::signal::{CancelHandle, WaitOutcome, WatchSignal};
    use crate::types::WatchEvent;

    #[test]
    fn test_watcher_settles_signal_across_threads() {
        let signal = WatchSignal::new();
        let watcher = signal.watcher();

        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            watcher(WatchEvent::NodeDeleted);
        });

        assert_eq!(signal.wait(), WaitOutcome::Fired(WatchEvent::NodeDeleted));
        handle.join().unwrap();
    }

    #[test]
    fn test_first_settlement_wins() {
        let signal = WatchSignal::new();
        signal.fire(WatchEvent::NodeCreated);
        signal.cancel();
        signal.fire(WatchEvent::NodeDeleted);

        assert!(signal.is_settled());
        assert_eq!(signal.wait(), WaitOutcome::Fired(WatchEvent::NodeCreated));
    }

    #[test]
    fn test_wait_until_times_out() {
        let signal = WatchSignal::new();
        let started = Instant::now();

        let outcome = signal.wait_until(started + Duration::from_millis(30));

        assert_eq!(outcome, WaitOutcome::TimedOut);
        assert!(started.elapsed() >= Duration::from_millis(30));
        assert!(!signal.is_settled());
    }

    #[test]
    fn test_cancel_before_arm_is_sticky() {
        let cancel = CancelHandle::new();
        cancel.cancel();
        assert!(cancel.is_requested());

        let signal = WatchSignal::new();
        cancel.arm(&signal);
        assert_eq!(signal.wait(), WaitOutcome::Cancelled);

        cancel.disarm();
        assert!(cancel.take_request());
        assert!(!cancel.take_request());
    }

    #[test]
    fn test_cancel_wakes_armed_waiter() {
        let cancel = CancelHandle::new();
        let signal = WatchSignal::new();
        cancel.arm(&signal);

        let remote = cancel.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            remote.cancel();
        });

        assert_eq!(
            signal.wait_until(Instant::now() + Duration::from_secs(5)),
            WaitOutcome::Cancelled
        );
        handle.join().unwrap();
    }
}
