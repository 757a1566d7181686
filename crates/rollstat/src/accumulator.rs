//! Per-window statistics accumulators.
//!
//! [`ValueAccumulator`] is the unit of statistics for one time window:
//! count/min/max/avg plus an owned percentile estimator. It carries no
//! synchronization of its own; the rollup layer mutates it either while it is
//! still private (pre-publish) or behind the `current` window's mutex, and
//! publishes it as an immutable snapshot afterwards.
//!
//! [`TotalAccumulator`] is the never-resetting lifetime window. It is updated
//! on every observation rather than by folding, so its numeric fields are
//! atomics readable mid-update without any lock; writers serialize their
//! compound read-modify-write through the estimator mutex.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::atomic::AtomicF64;
use crate::estimator::Estimator;
use crate::pool::Poolable;

#[derive(Debug, Clone)]
pub struct ValueAccumulator {
    count: u64,
    min: f64,
    max: f64,
    avg: f64,
    estimator: Estimator,
}

impl ValueAccumulator {
    pub fn new(estimator: Estimator) -> Self {
        Self {
            count: 0,
            min: 0.0,
            max: 0.0,
            avg: 0.0,
            estimator,
        }
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn min(&self) -> f64 {
        self.min
    }

    pub fn max(&self) -> f64 {
        self.max
    }

    pub fn avg(&self) -> f64 {
        self.avg
    }

    pub fn estimator(&self) -> &Estimator {
        &self.estimator
    }

    /// Feeds one observation. O(1) apart from occasional reservoir work.
    /// The estimator sees the pre-increment count; the count moves last.
    pub fn consider_value(&mut self, value: f64) {
        if self.count == 0 {
            self.min = value;
            self.max = value;
        } else {
            if value < self.min {
                self.min = value;
            }
            if value > self.max {
                self.max = value;
            }
        }
        self.avg = (self.avg * self.count as f64 + value) / (self.count as f64 + 1.0);
        self.estimator.consider_value(value, self.count);
        self.count += 1;
    }

    /// Resets to the single-sample state `{count: 1, min = avg = max = v}`.
    /// Used to seed a metric with a synthetic static value.
    pub fn set(&mut self, value: f64) {
        self.count = 1;
        self.min = value;
        self.max = value;
        self.avg = value;
        self.estimator.set(value);
    }

    /// Folds `other` into `self`, weighting the average by the respective
    /// sample counts. `other` is never mutated. Used only when folding
    /// window history into a parent period.
    pub fn merge_from(&mut self, other: &ValueAccumulator) {
        if other.count == 0 {
            return;
        }
        if self.count == 0 {
            self.min = other.min;
            self.max = other.max;
        } else {
            if other.min < self.min {
                self.min = other.min;
            }
            if other.max > self.max {
                self.max = other.max;
            }
        }
        let total = self.count + other.count;
        self.avg = (self.avg * self.count as f64 + other.avg * other.count as f64) / total as f64;
        self.estimator.merge_from(&other.estimator);
        self.count = total;
    }

    pub fn get_percentile(&self, p: f64) -> Option<f64> {
        self.estimator.get_percentile(p)
    }

    pub fn get_percentiles(&self, ps: &[f64]) -> Vec<Option<f64>> {
        self.estimator.get_percentiles(ps)
    }

    /// Finalizes lazily maintained estimator state ahead of publish.
    pub fn seal(&mut self) {
        self.estimator.seal();
    }
}

impl Poolable for ValueAccumulator {
    /// Zeroes every field, including estimator-internal state, so a reused
    /// accumulator can never leak stale values.
    fn reset(&mut self) {
        self.count = 0;
        self.min = 0.0;
        self.max = 0.0;
        self.avg = 0.0;
        self.estimator.reset();
    }
}

// ============================================================================
// Total
// ============================================================================

#[derive(Debug)]
pub struct TotalAccumulator {
    count: AtomicU64,
    sum: AtomicF64,
    min: AtomicF64,
    max: AtomicF64,
    estimator: Mutex<Estimator>,
}

impl TotalAccumulator {
    pub fn new(estimator: Estimator) -> Self {
        Self {
            count: AtomicU64::new(0),
            sum: AtomicF64::new(0.0),
            min: AtomicF64::new(0.0),
            max: AtomicF64::new(0.0),
            estimator: Mutex::new(estimator),
        }
    }

    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Acquire)
    }

    pub fn min(&self) -> f64 {
        self.min.load(Ordering::Acquire)
    }

    pub fn max(&self) -> f64 {
        self.max.load(Ordering::Acquire)
    }

    pub fn avg(&self) -> f64 {
        let count = self.count();
        if count == 0 {
            return 0.0;
        }
        self.sum.load(Ordering::Acquire) / count as f64
    }

    pub fn consider_value(&self, value: f64) {
        // Writers serialize through the estimator lock; readers of the
        // numeric fields never take it.
        let mut estimator = self.estimator.lock();
        let prior = self.count.load(Ordering::Relaxed);
        if prior == 0 {
            self.min.store(value, Ordering::Release);
            self.max.store(value, Ordering::Release);
        } else {
            self.min.fetch_min(value, Ordering::AcqRel);
            self.max.fetch_max(value, Ordering::AcqRel);
        }
        self.sum.fetch_add(value, Ordering::AcqRel);
        estimator.consider_value(value, prior);
        self.count.store(prior + 1, Ordering::Release);
    }

    pub fn set(&self, value: f64) {
        let mut estimator = self.estimator.lock();
        self.min.store(value, Ordering::Release);
        self.max.store(value, Ordering::Release);
        self.sum.store(value, Ordering::Release);
        estimator.set(value);
        self.count.store(1, Ordering::Release);
    }

    pub fn get_percentile(&self, p: f64) -> Option<f64> {
        self.estimator.lock().get_percentile(p)
    }

    pub fn get_percentiles(&self, ps: &[f64]) -> Vec<Option<f64>> {
        self.estimator.lock().get_percentiles(ps)
    }

    /// Point-in-time copy as a plain accumulator, for export.
    pub fn snapshot(&self) -> ValueAccumulator {
        let estimator = self.estimator.lock().clone();
        let count = self.count();
        ValueAccumulator {
            count,
            min: self.min(),
            max: self.max(),
            avg: self.avg(),
            estimator,
        }
    }

    /// Zeroes every field ahead of reclamation.
    pub fn reset(&self) {
        let mut estimator = self.estimator.lock();
        self.count.store(0, Ordering::Release);
        self.sum.store(0.0, Ordering::Release);
        self.min.store(0.0, Ordering::Release);
        self.max.store(0.0, Ordering::Release);
        estimator.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AggregationConfig, EstimatorFlavor};

    fn reservoir_acc() -> ValueAccumulator {
        let cfg = AggregationConfig::default();
        ValueAccumulator::new(Estimator::for_flavor(EstimatorFlavor::Reservoir, &cfg))
    }

    #[test]
    fn test_consider_value_stats() {
        let mut acc = reservoir_acc();
        for v in [5.0, 1.0, 9.0, 3.0] {
            acc.consider_value(v);
        }
        assert_eq!(acc.count(), 4);
        assert_eq!(acc.min(), 1.0);
        assert_eq!(acc.max(), 9.0);
        assert_eq!(acc.avg(), 4.5);
    }

    #[test]
    fn test_min_avg_max_ordering_invariant() {
        let mut acc = reservoir_acc();
        let mut x: u64 = 2463534242;
        for _ in 0..5000 {
            x ^= x << 13;
            x ^= x >> 17;
            x ^= x << 5;
            acc.consider_value((x % 100_000) as f64);
        }
        let eps = 1e-6;
        assert!(acc.min() - eps <= acc.avg() && acc.avg() <= acc.max() + eps);
    }

    #[test]
    fn test_set_resets_to_single_sample() {
        let mut acc = reservoir_acc();
        for v in [5.0, 100.0] {
            acc.consider_value(v);
        }
        acc.set(7.0);
        assert_eq!(acc.count(), 1);
        assert_eq!(acc.min(), 7.0);
        assert_eq!(acc.max(), 7.0);
        assert_eq!(acc.avg(), 7.0);
        assert_eq!(acc.get_percentile(0.5), Some(7.0));
    }

    #[test]
    fn test_merge_weights_by_count() {
        let mut a = reservoir_acc();
        let mut b = reservoir_acc();
        a.consider_value(10.0);
        for _ in 0..3 {
            b.consider_value(20.0);
        }
        a.merge_from(&b);
        assert_eq!(a.count(), 4);
        assert_eq!(a.min(), 10.0);
        assert_eq!(a.max(), 20.0);
        assert_eq!(a.avg(), 17.5);
    }

    #[test]
    fn test_merge_into_empty_copies_other() {
        let mut a = reservoir_acc();
        let mut b = reservoir_acc();
        for v in [2.0, 4.0] {
            b.consider_value(v);
        }
        a.merge_from(&b);
        assert_eq!(a.count(), 2);
        assert_eq!(a.min(), 2.0);
        assert_eq!(a.max(), 4.0);
        assert_eq!(a.avg(), 3.0);
        // merge never mutates the source
        assert_eq!(b.count(), 2);
    }

    #[test]
    fn test_reset_zeroes_everything() {
        let mut acc = reservoir_acc();
        acc.consider_value(42.0);
        acc.reset();
        assert_eq!(acc.count(), 0);
        assert_eq!(acc.min(), 0.0);
        assert_eq!(acc.max(), 0.0);
        assert_eq!(acc.avg(), 0.0);
        assert_eq!(acc.get_percentile(0.5), Some(0.0));
    }

    #[test]
    fn test_total_concurrent_updates() {
        use std::sync::Arc;
        use std::thread;

        let cfg = AggregationConfig::default();
        let total = Arc::new(TotalAccumulator::new(Estimator::for_flavor(
            EstimatorFlavor::Disabled,
            &cfg,
        )));
        let mut handles = Vec::new();
        for t in 0..4 {
            let total = total.clone();
            handles.push(thread::spawn(move || {
                for i in 0..1000 {
                    total.consider_value((t * 1000 + i) as f64);
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(total.count(), 4000);
        assert_eq!(total.min(), 0.0);
        assert_eq!(total.max(), 3999.0);
        let snap = total.snapshot();
        assert_eq!(snap.count(), 4000);
        assert!((snap.avg() - 1999.5).abs() < 1e-6);
    }
}
