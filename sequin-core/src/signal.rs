//! One-shot notification used to park a waiter until a watch fires.
//!
//! A fresh [`WatchSignal`] is created for every wait attempt. The watch
//! callback and a [`CancelHandle`] race to settle it; the first one wins
//! and later attempts to settle it are ignored.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::Instant;

use crate::types::{WatchEvent, Watcher};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// The watch fired with this event
    Fired(WatchEvent),
    /// The deadline passed first
    TimedOut,
    /// The waiter was cancelled
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SignalState {
    Pending,
    Fired(WatchEvent),
    Cancelled,
}

#[derive(Debug)]
struct Shared {
    state: Mutex<SignalState>,
    cond: Condvar,
}

#[derive(Debug, Clone)]
pub struct WatchSignal {
    shared: Arc<Shared>,
}

impl WatchSignal {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(SignalState::Pending),
                cond: Condvar::new(),
            }),
        }
    }

    /// A watcher callback that settles this signal when invoked.
    pub fn watcher(&self) -> Watcher {
        let signal = self.clone();
        Box::new(move |event| signal.settle(SignalState::Fired(event)))
    }

    pub fn fire(&self, event: WatchEvent) {
        self.settle(SignalState::Fired(event));
    }

    pub fn cancel(&self) {
        self.settle(SignalState::Cancelled);
    }

    pub fn is_settled(&self) -> bool {
        *self.lock() != SignalState::Pending
    }

    /// Block until the signal settles.
    pub fn wait(&self) -> WaitOutcome {
        let mut state = self.lock();
        while *state == SignalState::Pending {
            state = self
                .shared
                .cond
                .wait(state)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
        }
        Self::outcome(*state)
    }

    /// Block until the signal settles or `deadline` passes.
    pub fn wait_until(&self, deadline: Instant) -> WaitOutcome {
        let mut state = self.lock();
        while *state == SignalState::Pending {
            let now = Instant::now();
            if now >= deadline {
                return WaitOutcome::TimedOut;
            }
            let (guard, _) = self
                .shared
                .cond
                .wait_timeout(state, deadline - now)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            state = guard;
        }
        Self::outcome(*state)
    }

    fn settle(&self, next: SignalState) {
        let mut state = self.lock();
        if *state == SignalState::Pending {
            *state = next;
            self.shared.cond.notify_all();
        }
    }

    fn lock(&self) -> MutexGuard<'_, SignalState> {
        self.shared
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn outcome(state: SignalState) -> WaitOutcome {
        match state {
            SignalState::Fired(event) => WaitOutcome::Fired(event),
            SignalState::Cancelled => WaitOutcome::Cancelled,
            SignalState::Pending => WaitOutcome::TimedOut,
        }
    }
}

impl Default for WatchSignal {
    fn default() -> Self {
        Self::new()
    }
}

/// Aborts a lock wait from another thread.
///
/// A cancel request is sticky: if no wait is in flight it aborts the next
/// one. It is consumed once a wait observes it.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle {
    inner: Arc<CancelInner>,
}

#[derive(Debug, Default)]
struct CancelInner {
    requested: AtomicBool,
    armed: Mutex<Option<WatchSignal>>,
}

impl CancelHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.inner.requested.store(true, Ordering::SeqCst);
        if let Some(signal) = self.armed().as_ref() {
            signal.cancel();
        }
    }

    pub fn is_requested(&self) -> bool {
        self.inner.requested.load(Ordering::SeqCst)
    }

    /// Attach the signal of the wait about to start. A cancel that raced
    /// ahead of arming settles it immediately.
    pub(crate) fn arm(&self, signal: &WatchSignal) {
        *self.armed() = Some(signal.clone());
        if self.is_requested() {
            signal.cancel();
        }
    }

    pub(crate) fn disarm(&self) {
        *self.armed() = None;
    }

    /// Consume a pending cancel request.
    pub(crate) fn take_request(&self) -> bool {
        self.inner.requested.swap(false, Ordering::SeqCst)
    }

    fn armed(&self) -> MutexGuard<'_, Option<WatchSignal>> {
        self.inner
            .armed
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
