//! Open/closed flag guarding publication from a background loop.

use std::sync::{Mutex, MutexGuard, PoisonError};

/// Publication gate shared between a consumer handle and its loop task.
///
/// Work runs under the gate's lock, so once [`ActiveGate::close`] returns
/// nothing published through [`ActiveGate::run`] can still be in flight.
#[derive(Debug)]
pub(crate) struct ActiveGate {
    open: Mutex<bool>,
}

impl ActiveGate {
    pub(crate) fn new() -> Self {
        Self {
            open: Mutex::new(true),
        }
    }

    fn lock(&self) -> MutexGuard<'_, bool> {
        self.open.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn is_open(&self) -> bool {
        *self.lock()
    }

    /// Close the gate. Returns true if this call closed it.
    pub(crate) fn close(&self) -> bool {
        std::mem::replace(&mut *self.lock(), false)
    }

    /// Run `f` if the gate is still open.
    pub(crate) fn run<R>(&self, f: impl FnOnce() -> R) -> Option<R> {
        let open = self.lock();
        if *open {
            Some(f())
        } else {
            None
        }
    }
}
