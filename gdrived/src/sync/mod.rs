use std::sync::{Mutex, MutexGuard, PoisonError};

pub mod backoff;
pub mod engine;
pub mod expand;
pub mod job;
pub mod pool;
pub mod queue;
pub mod root;
pub mod session;
pub mod transfer;

#[cfg(test)]
pub(crate) mod testing;

// Critical sections here never leave data half-updated, so a poisoned lock
// is still safe to use.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
