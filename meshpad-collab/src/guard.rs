//! Re-entrancy suppression for one synchronized document.
//!
//! The guard is not a lock: acquiring a held guard never waits, it simply
//! fails, and the caller treats that as "skip this work". Release happens when
//! the [`GuardToken`] is dropped, so early returns, `?` and panics all reset it.

use std::sync::atomic::{AtomicBool, Ordering};

/// Exclusive-execution flag for remote applies, seeding and local-edit reads.
#[derive(Debug, Default)]
pub struct EditGuard {
    held: AtomicBool,
}

/// Proof that the guard is held. Releases it on drop.
#[derive(Debug)]
#[must_use = "the guard is released as soon as the token is dropped"]
pub struct GuardToken<'a> {
    guard: &'a EditGuard,
}

impl EditGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the guard, or `None` if it is already held.
    pub fn try_acquire(&self) -> Option<GuardToken<'_>> {
        self.held
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .ok()
            .map(|_| GuardToken { guard: self })
    }

    /// Run `f` while holding the guard. Returns `None` without running `f`
    /// when the guard is already held.
    pub fn with_guard<R>(&self, f: impl FnOnce() -> R) -> Option<R> {
        let _token = self.try_acquire()?;
        Some(f())
    }

    pub fn is_held(&self) -> bool {
        self.held.load(Ordering::Acquire)
    }
}

impl Drop for GuardToken<'_> {
    fn drop(&mut self) {
        self.guard.held.store(false, Ordering::Release);
    }
}
