//! Lock-free primitives shared between the audio and main threads.

use atomic_float::AtomicF32;
use std::sync::atomic::{AtomicBool, Ordering};

/// Cache-line aligned atomic f32.
///
/// Used for mix controls, peak meters, and the descriptor parameter cache,
/// all of which are written on one thread and read on another every cycle.
#[derive(Debug)]
#[repr(align(64))]
pub struct AtomicFloat {
    value: AtomicF32,
}

impl AtomicFloat {
    pub fn new(value: f32) -> Self {
        Self {
            value: AtomicF32::new(value),
        }
    }

    #[inline]
    pub fn get(&self) -> f32 {
        self.value.load(Ordering::Acquire)
    }

    #[inline]
    pub fn get_relaxed(&self) -> f32 {
        self.value.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn set(&self, value: f32) {
        self.value.store(value, Ordering::Release);
    }
}

impl Clone for AtomicFloat {
    fn clone(&self) -> Self {
        Self::new(self.get())
    }
}

impl Default for AtomicFloat {
    fn default() -> Self {
        Self::new(0.0)
    }
}

/// Cache-line aligned atomic bool.
///
/// `raise`/`check_and_clear` give sticky-flag semantics: the RT path raises,
/// a later observer consumes.
#[derive(Debug)]
#[repr(align(64))]
pub struct AtomicFlag {
    value: AtomicBool,
}

impl AtomicFlag {
    pub fn new(value: bool) -> Self {
        Self {
            value: AtomicBool::new(value),
        }
    }

    #[inline]
    pub fn get(&self) -> bool {
        self.value.load(Ordering::Acquire)
    }

    #[inline]
    pub fn set(&self, value: bool) {
        self.value.store(value, Ordering::Release);
    }

    #[inline]
    pub fn raise(&self) {
        self.value.store(true, Ordering::Release);
    }

    /// Returns the flag state and clears it in one step.
    #[inline]
    pub fn check_and_clear(&self) -> bool {
        self.value.swap(false, Ordering::AcqRel)
    }
}

impl Clone for AtomicFlag {
    fn clone(&self) -> Self {
        Self::new(self.get())
    }
}

impl Default for AtomicFlag {
    fn default() -> Self {
        Self::new(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn atomic_float_roundtrip() {
        let val = AtomicFloat::new(1.0);
        assert_eq!(val.get(), 1.0);
        val.set(0.75);
        assert_eq!(val.get(), 0.75);
        assert_eq!(val.get_relaxed(), 0.75);
    }

    #[test]
    fn sticky_flag() {
        let flag = AtomicFlag::default();
        assert!(!flag.get());
        flag.raise();
        assert!(flag.get());
        assert!(flag.check_and_clear());
        assert!(!flag.get());
        assert!(!flag.check_and_clear());
    }
}
