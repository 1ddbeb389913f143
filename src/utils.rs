use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Mutex, MutexGuard, PoisonError,
};

pub trait MutexUtils<T> {
    /// Lock a mutex and execute a function with its lock.
    /// This makes sure that the mutex is locked only during the function execution.
    fn with_lock<R, F>(&self, f: F) -> R
    where
        F: FnOnce(MutexGuard<'_, T>) -> R;
}

impl<T> MutexUtils<T> for Mutex<T> {
    fn with_lock<R, F>(&self, f: F) -> R
    where
        F: FnOnce(MutexGuard<'_, T>) -> R,
    {
        // A poisoned lock still holds consistent data here
        f(self.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

/// Shared flag telling the workers to stop picking new work.
///
/// Only tests cancel runs, the binary has no process signal handling.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}
