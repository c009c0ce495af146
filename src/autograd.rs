//! Gradient-tracking switch.
//!
//! Tensor operations only record graph edges while tracking is enabled for the
//! current thread. `NoGradGuard` turns tracking off for a scope and restores the
//! previous state when dropped, including during unwinding.

use std::cell::Cell;

thread_local! {
    static TRACKING: Cell<bool> = Cell::new(true);
}

/// Swaps the tracking flag and returns the old value.
fn replace_tracking(enabled: bool) -> bool {
    TRACKING.with(|flag| flag.replace(enabled))
}

/// Enables or disables gradient tracking on the current thread.
pub fn set_grad_enabled(enabled: bool) {
    replace_tracking(enabled);
}

/// Returns whether operations on the current thread record the autograd graph.
pub fn is_grad_enabled() -> bool {
    TRACKING.with(Cell::get)
}

/// Disables gradient tracking until dropped, then puts back whatever was set before.
#[must_use = "tracking is re-enabled as soon as the guard is dropped"]
pub struct NoGradGuard {
    restore: bool,
}

impl NoGradGuard {
    pub fn new() -> Self {
        Self {
            restore: replace_tracking(false),
        }
    }
}

impl Default for NoGradGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for NoGradGuard {
    fn drop(&mut self) {
        replace_tracking(self.restore);
    }
}

/// Runs `f` with gradient tracking disabled.
pub fn no_grad<R>(f: impl FnOnce() -> R) -> R {
    let _guard = NoGradGuard::new();
    f()
}
