//! Process-local, non-blocking per-entity lock.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Clone, Default)]
pub struct EntityLock {
    held: Arc<AtomicBool>,
}

pub struct LockGuard {
    held: Arc<AtomicBool>,
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        self.held.store(false, Ordering::SeqCst);
    }
}

impl EntityLock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Non-blocking acquire: a second invocation while one is in flight returns `None`.
    pub fn try_acquire(&self) -> Option<LockGuard> {
        if self.held.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst).is_ok() {
            Some(LockGuard { held: self.held.clone() })
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_acquire_while_held_fails() {
        let lock = EntityLock::new();
        let guard = lock.try_acquire();
        assert!(guard.is_some());
        assert!(lock.try_acquire().is_none());
        drop(guard);
        assert!(lock.try_acquire().is_some());
    }
}
