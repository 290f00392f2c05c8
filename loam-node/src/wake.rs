//! Single-slot wake signal shared by the periodic timer and the
//! downlink receive path.
//!
//! Both producers only ever *set* the flag; the controller's sleep
//! wait is the sole consumer. Delivery is idempotent: signaling an
//! already-set flag is harmless, and at most one pending wake is ever
//! meaningful. This is deliberately not a queue.

use std::sync::{Condvar, Mutex};

pub struct WakeFlag {
    set: Mutex<bool>,
    cvar: Condvar,
}

impl WakeFlag {
    pub fn new() -> Self {
        Self {
            set: Mutex::new(false),
            cvar: Condvar::new(),
        }
    }

    /// Set the flag and release a blocked waiter. Safe from any
    /// context; never blocks.
    pub fn signal(&self) {
        let mut set = self.set.lock().unwrap();
        *set = true;
        self.cvar.notify_one();
    }

    /// Block until the flag is set, consuming the pending wake.
    pub fn wait(&self) {
        let mut set = self.set.lock().unwrap();
        while !*set {
            set = self.cvar.wait(set).unwrap();
        }
        *set = false;
    }

    /// Consume a pending wake without blocking. Returns whether one
    /// was pending.
    pub fn try_consume(&self) -> bool {
        let mut set = self.set.lock().unwrap();
        std::mem::replace(&mut *set, false)
    }
}

impl Default for WakeFlag {
    fn default() -> Self {
        Self::new()
    }
}
