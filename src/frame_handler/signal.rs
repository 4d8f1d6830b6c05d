//! Condition-variable wait/notify pairs
//!
//! The frame pipeline's suspension points all share one shape: block until
//! a predicate over shared state holds, with wakeups broadcast by whoever
//! mutates that state. [`Signal`] packages the mutex/condvar pair so the
//! wakeup cannot be lost between a predicate check and the park.
//!
//! Callers must not hold a lock the predicate acquires while notifying;
//! notify only after map guards are dropped.

use parking_lot::{Condvar, Mutex};

/// A broadcast signal guarding an external predicate.
#[derive(Default)]
pub struct Signal {
    lock: Mutex<()>,
    condvar: Condvar,
}

impl Signal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Block until `predicate` returns true. The predicate is evaluated
    /// under the signal's lock, so a notifier that acquires the lock to
    /// broadcast cannot slip between the check and the park. Spurious
    /// wakeups only re-run the predicate.
    pub fn wait_until(&self, mut predicate: impl FnMut() -> bool) {
        let mut guard = self.lock.lock();
        while !predicate() {
            self.condvar.wait(&mut guard);
        }
    }

    /// Wake all waiters so they re-evaluate their predicates.
    pub fn notify_all(&self) {
        let _guard = self.lock.lock();
        self.condvar.notify_all();
    }
}
