//! Reservation bookkeeping for virtual-terminal indices.
//!
//! This deliberately stops at refcounting: switching the active VT (the
//! `ioctl(VT_ACTIVATE, ...)` dance) is a concern of whatever places a user on
//! a seat, not of the display-server core, which only needs to know "is this
//! VT already spoken for" before it hands one to an X server.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use log::{debug, trace};

/// A reservation registry for virtual-terminal indices.
///
/// Implementations must be reentrant-safe under the single-threaded
/// cooperative model this crate assumes: no locking, just `&self`.
pub trait VtRegistry {
    /// Reserve `vt`, incrementing its refcount. Always succeeds; a VT may be
    /// shared by more than one reservation (e.g. a greeter and the session it
    /// launches on the same VT).
    fn acquire(&self, vt: u32);

    /// Release one reservation on `vt`. No-op if `vt` has no outstanding
    /// reservations.
    fn release(&self, vt: u32);

    /// True if `vt` currently has at least one outstanding reservation.
    fn is_reserved(&self, vt: u32) -> bool;
}

/// Default in-memory registry: one refcount per VT index, shared via `Rc`
/// across every `LocalXServer` in the process.
#[derive(Default)]
pub struct DefaultVtRegistry {
    counts: RefCell<HashMap<u32, u32>>,
}

impl DefaultVtRegistry {
    pub fn new() -> Rc<Self> {
        Rc::new(Self::default())
    }
}

impl VtRegistry for DefaultVtRegistry {
    fn acquire(&self, vt: u32) {
        let mut counts = self.counts.borrow_mut();
        let count = counts.entry(vt).or_insert(0);
        *count += 1;
        trace!("vt{vt} reservation count now {count}");
    }

    fn release(&self, vt: u32) {
        let mut counts = self.counts.borrow_mut();
        if let Some(count) = counts.get_mut(&vt) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                counts.remove(&vt);
                debug!("vt{vt} has no remaining reservations");
            }
        }
    }

    fn is_reserved(&self, vt: u32) -> bool {
        self.counts.borrow().get(&vt).is_some_and(|count| *count > 0)
    }
}

/// A held reservation on a VT. Releases automatically on drop, mirroring the
/// teacher's `EnvironmentContainer` restore-on-drop idiom.
pub struct VtReference {
    registry: Rc<dyn VtRegistry>,
    vt: u32,
}

impl VtReference {
    /// Acquire `vt` from `registry` and return a handle that releases it on
    /// drop. `vt == 0` is accepted by the registry (callers decide whether
    /// zero means "no VT"; see `LocalXServer`).
    pub fn acquire(registry: Rc<dyn VtRegistry>, vt: u32) -> Self {
        registry.acquire(vt);
        Self { registry, vt }
    }

    pub fn vt(&self) -> u32 {
        self.vt
    }
}

impl Drop for VtReference {
    fn drop(&mut self) {
        self.registry.release(self.vt);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquire_then_release_clears_reservation() {
        let registry = DefaultVtRegistry::new();
        assert!(!registry.is_reserved(7));
        {
            let _reference = VtReference::acquire(registry.clone(), 7);
            assert!(registry.is_reserved(7));
        }
        assert!(!registry.is_reserved(7));
    }

    #[test]
    fn shared_vt_stays_reserved_until_both_release() {
        let registry = DefaultVtRegistry::new();
        let first = VtReference::acquire(registry.clone(), 3);
        let second = VtReference::acquire(registry.clone(), 3);
        drop(first);
        assert!(registry.is_reserved(3), "second reference still live");
        drop(second);
        assert!(!registry.is_reserved(3));
    }

    #[test]
    fn release_of_unreserved_vt_is_a_no_op() {
        let registry = DefaultVtRegistry::new();
        registry.release(99);
        assert!(!registry.is_reserved(99));
    }
}
