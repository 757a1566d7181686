//! Idle detection and the two-phase eviction lifecycle.
//!
//! Every slice hands the just-closed window to the metric's [`IdleState`].
//! An idleness predicate decides whether the tick counted as idle; idle
//! ticks accumulate, activity resets the counter to zero. Crossing the
//! threshold triggers phase one, **stop**: the metric is marked not-running
//! and the scheduler drops it from its bucket on the next tick. Phase two is
//! the explicit **gc sweep** ([`MetricsEngine::gc`]): stopped metrics leave
//! the registry and their accumulators go back to the pools after zeroing.
//!
//! [`MetricsEngine::gc`]: crate::engine::MetricsEngine::gc

use std::sync::atomic::{AtomicU32, Ordering};

use crate::accumulator::ValueAccumulator;
use crate::atomic::AtomicF64;

/// When a slice counts as idle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdlePolicy {
    /// The metric is never evicted.
    Never,
    /// Idle when the closed window received no samples. The default for
    /// counters and timings.
    NoSamples,
    /// Idle when the closed window received no samples or its value matches
    /// the previous tick's. Suited to gauges that are re-set every tick.
    ValueUnchanged,
}

#[derive(Debug)]
pub struct IdleState {
    policy: IdlePolicy,
    threshold: u32,
    idle_ticks: AtomicU32,
    prev_value: AtomicF64,
}

impl IdleState {
    pub fn new(policy: IdlePolicy, threshold: u32) -> Self {
        Self {
            policy,
            threshold,
            idle_ticks: AtomicU32::new(0),
            prev_value: AtomicF64::new(f64::NAN),
        }
    }

    pub fn idle_ticks(&self) -> u32 {
        self.idle_ticks.load(Ordering::Relaxed)
    }

    /// Feeds the closed window for one tick. Returns `true` once the idle
    /// streak exceeds the threshold, i.e. the metric should stop.
    pub fn observe(&self, closed: &ValueAccumulator) -> bool {
        let idle = match self.policy {
            IdlePolicy::Never => return false,
            IdlePolicy::NoSamples => closed.count() == 0,
            IdlePolicy::ValueUnchanged => {
                if closed.count() == 0 {
                    true
                } else {
                    let prev = self.prev_value.load(Ordering::Relaxed);
                    self.prev_value.store(closed.avg(), Ordering::Relaxed);
                    closed.avg() == prev
                }
            }
        };
        if !idle {
            self.idle_ticks.store(0, Ordering::Relaxed);
            return false;
        }
        self.idle_ticks.fetch_add(1, Ordering::Relaxed) + 1 > self.threshold
    }
}
