//! Atomic f64 built on a `u64` bit pattern.
//!
//! The `total` window of every metric is readable without taking any lock
//! while writers are mid-update, so its numeric fields live in atomics.
//! Floats have no native atomic support; this wraps an [`AtomicU64`] holding
//! the IEEE-754 bit pattern and provides CAS loops for the compound ops.

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct AtomicF64(AtomicU64);

impl AtomicF64 {
    pub fn new(value: f64) -> Self {
        Self(AtomicU64::new(value.to_bits()))
    }

    #[inline]
    pub fn load(&self, order: Ordering) -> f64 {
        f64::from_bits(self.0.load(order))
    }

    #[inline]
    pub fn store(&self, value: f64, order: Ordering) {
        self.0.store(value.to_bits(), order);
    }

    /// Adds `delta` via a CAS loop and returns the previous value.
    pub fn fetch_add(&self, delta: f64, order: Ordering) -> f64 {
        let mut cur = self.0.load(Ordering::Relaxed);
        loop {
            let next = (f64::from_bits(cur) + delta).to_bits();
            match self
                .0
                .compare_exchange_weak(cur, next, order, Ordering::Relaxed)
            {
                Ok(prev) => return f64::from_bits(prev),
                Err(observed) => cur = observed,
            }
        }
    }

    /// Lowers the stored value to `value` if it is smaller (value order, not
    /// bit order). Returns the previous value.
    pub fn fetch_min(&self, value: f64, order: Ordering) -> f64 {
        let mut cur = self.0.load(Ordering::Relaxed);
        loop {
            if f64::from_bits(cur) <= value {
                return f64::from_bits(cur);
            }
            match self
                .0
                .compare_exchange_weak(cur, value.to_bits(), order, Ordering::Relaxed)
            {
                Ok(prev) => return f64::from_bits(prev),
                Err(observed) => cur = observed,
            }
        }
    }

    /// Raises the stored value to `value` if it is greater. Returns the
    /// previous value.
    pub fn fetch_max(&self, value: f64, order: Ordering) -> f64 {
        let mut cur = self.0.load(Ordering::Relaxed);
        loop {
            if f64::from_bits(cur) >= value {
                return f64::from_bits(cur);
            }
            match self
                .0
                .compare_exchange_weak(cur, value.to_bits(), order, Ordering::Relaxed)
            {
                Ok(prev) => return f64::from_bits(prev),
                Err(observed) => cur = observed,
            }
        }
    }
}
