//! Object pooling for the hot path.
//!
//! Every slice swaps a fresh accumulator in and retires the old one, so at
//! one metric per tick the allocator would see constant churn. A bounded
//! free-list keeps retired objects around for reuse. The reset step is part
//! of the contract, not optional cleanup: `release` resets before the object
//! re-enters the free-list, so `acquire` always hands out zeroed state.
//!
//! Published snapshots are reference-counted; [`Pool::release_arc`] only
//! reclaims an object once the last reader has dropped its handle, which is
//! what makes reuse safe alongside the lock-free read protocol.

use crossbeam_channel::{bounded, Receiver, Sender, TryRecvError, TrySendError};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::accumulator::ValueAccumulator;
use crate::config::{AggregationConfig, EstimatorFlavor};
use crate::estimator::Estimator;

/// Anything that can live in a [`Pool`] must know how to zero itself.
pub trait Poolable {
    fn reset(&mut self);
}

pub struct Pool<T> {
    free_tx: Sender<T>,
    free_rx: Receiver<T>,
    build: Box<dyn Fn() -> T + Send + Sync>,
    created: AtomicU64,
    reused: AtomicU64,
    discarded: AtomicU64,
}

impl<T: Poolable> Pool<T> {
    pub fn new<F>(capacity: usize, build: F) -> Self
    where
        F: Fn() -> T + Send + Sync + 'static,
    {
        let (free_tx, free_rx) = bounded(capacity);
        Self {
            free_tx,
            free_rx,
            build: Box::new(build),
            created: AtomicU64::new(0),
            reused: AtomicU64::new(0),
            discarded: AtomicU64::new(0),
        }
    }

    /// Allocate-or-reuse. Pooled objects were reset on release, so the
    /// result is always in zeroed state.
    pub fn acquire(&self) -> T {
        match self.free_rx.try_recv() {
            Ok(item) => {
                self.reused.fetch_add(1, Ordering::Relaxed);
                item
            }
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => {
                self.created.fetch_add(1, Ordering::Relaxed);
                (self.build)()
            }
        }
    }

    /// Resets `item` and returns it to the free-list; drops it when the
    /// free-list is full.
    pub fn release(&self, mut item: T) {
        item.reset();
        if let Err(TrySendError::Full(_)) = self.free_tx.try_send(item) {
            self.discarded.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Reclaims a published snapshot. A reader still holding the `Arc`
    /// keeps the object alive; it is only pooled when this was the last
    /// reference.
    pub fn release_arc(&self, item: Arc<T>) {
        match Arc::try_unwrap(item) {
            Ok(inner) => self.release(inner),
            Err(_) => {
                self.discarded.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// Drops every pooled object. Used when a configuration change makes
    /// the pooled shape stale (e.g. a new reservoir capacity).
    pub fn clear(&self) {
        while self.free_rx.try_recv().is_ok() {}
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            created: self.created.load(Ordering::Relaxed),
            reused: self.reused.load(Ordering::Relaxed),
            discarded: self.discarded.load(Ordering::Relaxed),
            idle: self.free_rx.len(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    pub created: u64,
    pub reused: u64,
    pub discarded: u64,
    pub idle: usize,
}

// ============================================================================
// Accumulator pools
// ============================================================================

/// One free-list per estimator flavor, shared engine-wide. Flavors pool
/// separately because a reset keeps the estimator's shape (capacity,
/// tracked percentile set) while zeroing its data.
pub struct AccumulatorPools {
    disabled: Pool<ValueAccumulator>,
    reservoir: Pool<ValueAccumulator>,
    decay: Pool<ValueAccumulator>,
}

impl AccumulatorPools {
    pub fn new(config: &AggregationConfig) -> Self {
        let capacity = config.pool_capacity;
        let make = |flavor: EstimatorFlavor, config: &AggregationConfig| {
            let config = config.clone();
            Pool::new(capacity, move || {
                ValueAccumulator::new(Estimator::for_flavor(flavor, &config))
            })
        };
        Self {
            disabled: make(EstimatorFlavor::Disabled, config),
            reservoir: make(EstimatorFlavor::Reservoir, config),
            decay: make(EstimatorFlavor::Decay, config),
        }
    }

    pub fn for_flavor(&self, flavor: EstimatorFlavor) -> &Pool<ValueAccumulator> {
        match flavor {
            EstimatorFlavor::Disabled => &self.disabled,
            EstimatorFlavor::Reservoir => &self.reservoir,
            EstimatorFlavor::Decay => &self.decay,
        }
    }

    pub fn clear(&self) {
        self.disabled.clear();
        self.reservoir.clear();
        self.decay.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_acquire_reuses_released() {
        let pools = AccumulatorPools::new(&AggregationConfig::default());
        let pool = pools.for_flavor(EstimatorFlavor::Reservoir);

        let mut acc = pool.acquire();
        acc.consider_value(42.0);
        pool.release(acc);

        let acc = pool.acquire();
        assert_eq!(acc.count(), 0, "pooled object must come back zeroed");
        assert_eq!(acc.get_percentile(0.5), Some(0.0));

        let stats = pool.stats();
        assert_eq!(stats.created, 1);
        assert_eq!(stats.reused, 1);
    }

    #[test]
    fn test_release_arc_skips_live_snapshots() {
        let pools = AccumulatorPools::new(&AggregationConfig::default());
        let pool = pools.for_flavor(EstimatorFlavor::Disabled);

        let shared = Arc::new(pool.acquire());
        let reader = shared.clone();
        pool.release_arc(shared);
        assert_eq!(pool.stats().idle, 0, "live snapshot must not be pooled");
        drop(reader);

        let sole = Arc::new(pool.acquire());
        pool.release_arc(sole);
        assert_eq!(pool.stats().idle, 1);
    }

    #[test]
    fn test_clear_drains_free_list() {
        let pools = AccumulatorPools::new(&AggregationConfig::default());
        let pool = pools.for_flavor(EstimatorFlavor::Decay);
        pool.release(pool.acquire());
        assert_eq!(pool.stats().idle, 1);
        pool.clear();
        assert_eq!(pool.stats().idle, 0);
    }
}
