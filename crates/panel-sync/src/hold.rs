//! Suspend switch for diff draining.
//!
//! While a [`HoldGate`] is held, [`compute_diff`](crate::compute_diff) reports
//! "no patch" and leaves the ledger alone, so changes applied on behalf of the
//! client (which already has them) are not echoed back. The gate is an explicit
//! handle passed to every sync call; clones share the same flag, and separate
//! gates never affect each other.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone, Default)]
pub struct HoldGate {
    held: Arc<AtomicBool>,
}

impl HoldGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enter_hold(&self) {
        self.held.store(true, Ordering::SeqCst);
    }

    /// Release the gate. There is no nesting counter: one exit releases
    /// any number of prior enters.
    pub fn exit_hold(&self) {
        self.held.store(false, Ordering::SeqCst);
    }

    pub fn is_held(&self) -> bool {
        self.held.load(Ordering::SeqCst)
    }

    /// Hold the gate until the returned guard is dropped.
    pub fn hold(&self) -> HoldGuard<'_> {
        self.enter_hold();
        HoldGuard { gate: self }
    }
}

/// Releases its [`HoldGate`] on drop, including during unwinding.
#[derive(Debug)]
#[must_use = "the gate is released as soon as the guard is dropped"]
pub struct HoldGuard<'a> {
    gate: &'a HoldGate,
}

impl Drop for HoldGuard<'_> {
    fn drop(&mut self) {
        self.gate.exit_hold();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_enter_twice_exit_once_releases() {
        let gate = HoldGate::new();
        gate.enter_hold();
        gate.enter_hold();
        assert!(gate.is_held());
        gate.exit_hold();
        assert!(!gate.is_held());
    }

    #[test]
    fn test_guard_releases_on_scope_exit() {
        let gate = HoldGate::new();
        {
            let _guard = gate.hold();
            assert!(gate.is_held());
        }
        assert!(!gate.is_held());
    }

    #[test]
    fn test_guard_releases_on_panic() {
        let gate = HoldGate::new();
        let inner = gate.clone();
        let result = std::panic::catch_unwind(move || {
            let _guard = inner.hold();
            panic!("boom");
        });
        assert!(result.is_err());
        assert!(!gate.is_held());
    }

    #[test]
    fn test_separate_gates_are_independent() {
        let a = HoldGate::new();
        let b = HoldGate::new();
        let _guard = a.hold();
        assert!(a.is_held());
        assert!(!b.is_held());
    }
}
