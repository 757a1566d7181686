//! Multi-resolution time-window rollup.
//!
//! Each metric owns a [`WindowSet`]: the live `current` window, the most
//! recently closed single-tick window (`last`), one derived window per
//! configured period, and the never-resetting `total`. A tree of ring
//! buffers backs the derived windows:
//!
//! ```text
//!  tick ─► current ──slice──► tick ring ──fold──► period[0] ─► ring[0] ──fold──► period[1] ─► ...
//!                              (1 entry/tick)                  (1 entry/period[0])
//! ```
//!
//! Every slice closes `current`, publishes it as `last`, appends it to the
//! tick ring, and recomputes every period window by count-weighted merge
//! over its child ring. A period's own ring only advances when the tick
//! counter crosses that period's boundary, so higher periods accumulate
//! history proportionally more slowly.
//!
//! Publication is a single atomic pointer store ([`ArcSwap`]); readers load
//! the pointer once and work on the immutable referent. No accumulator is
//! ever mutated after publish.

use arc_swap::ArcSwap;
use parking_lot::Mutex;
use std::mem;
use std::sync::Arc;

use crate::accumulator::{TotalAccumulator, ValueAccumulator};
use crate::config::{EstimatorFlavor, PeriodSchedule};
use crate::estimator::Estimator;
use crate::pool::AccumulatorPools;

/// The externally visible windows of one metric.
pub struct WindowSet {
    current: Mutex<ValueAccumulator>,
    last: ArcSwap<ValueAccumulator>,
    by_period: Vec<ArcSwap<ValueAccumulator>>,
    total: TotalAccumulator,
}

impl WindowSet {
    fn new(estimator: Estimator, period_count: usize) -> Self {
        let empty = || Arc::new(ValueAccumulator::new(estimator.clone()));
        Self {
            current: Mutex::new(ValueAccumulator::new(estimator.clone())),
            last: ArcSwap::new(empty()),
            by_period: (0..period_count).map(|_| ArcSwap::new(empty())).collect(),
            total: TotalAccumulator::new(estimator),
        }
    }

    /// The most recently closed single-tick window.
    pub fn last(&self) -> Arc<ValueAccumulator> {
        self.last.load_full()
    }

    /// The derived window for configured period `i`.
    pub fn period(&self, i: usize) -> Arc<ValueAccumulator> {
        self.by_period[i].load_full()
    }

    pub fn period_count(&self) -> usize {
        self.by_period.len()
    }

    /// Point-in-time copy of the live window (brief lock).
    pub fn current_snapshot(&self) -> ValueAccumulator {
        self.current.lock().clone()
    }

    /// The lifetime window; readable lock-free while writers update it.
    pub fn total(&self) -> &TotalAccumulator {
        &self.total
    }
}

/// Fixed-size ring of closed windows for one period.
struct History {
    slots: Vec<Option<Arc<ValueAccumulator>>>,
    cursor: usize,
}

impl History {
    fn new(len: usize) -> Self {
        Self {
            slots: (0..len).map(|_| None).collect(),
            cursor: 0,
        }
    }

    fn push(&mut self, value: Arc<ValueAccumulator>) {
        self.slots[self.cursor] = Some(value);
        self.cursor = (self.cursor + 1) % self.slots.len();
    }

    /// Merges up to `depth` most-recent entries into `target`, walking
    /// backward from the cursor and stopping at the first unpopulated slot.
    fn fold_into(&self, depth: usize, target: &mut ValueAccumulator) {
        let len = self.slots.len();
        for k in 0..depth.min(len) {
            let idx = (self.cursor + len - 1 - k) % len;
            match &self.slots[idx] {
                Some(entry) => target.merge_from(entry),
                None => break,
            }
        }
    }

    fn clear(&mut self) {
        for slot in &mut self.slots {
            *slot = None;
        }
        self.cursor = 0;
    }
}

struct Histories {
    /// One entry per base tick; feeds the first period's fold.
    tick_ring: History,
    /// `period_rings[i]` holds closed values of period `i` and feeds the
    /// fold of period `i + 1`. The last period feeds nothing and has no ring.
    period_rings: Vec<History>,
}

/// The rollup state machine for one metric.
pub struct Rollup {
    windows: WindowSet,
    histories: Mutex<Histories>,
    schedule: Arc<PeriodSchedule>,
    flavor: EstimatorFlavor,
    pools: Arc<AccumulatorPools>,
}

impl Rollup {
    pub fn new(
        estimator: Estimator,
        schedule: Arc<PeriodSchedule>,
        pools: Arc<AccumulatorPools>,
    ) -> Self {
        let flavor = estimator.flavor();
        let periods = schedule.periods();
        let period_count = periods.len();
        let tick_ring = History::new(periods[0].interval_ticks as usize);
        let period_rings = periods
            .windows(2)
            .map(|w| History::new((w[1].interval_ticks / w[0].interval_ticks) as usize))
            .collect();
        Self {
            windows: WindowSet::new(estimator, period_count),
            histories: Mutex::new(Histories {
                tick_ring,
                period_rings,
            }),
            schedule,
            flavor,
            pools,
        }
    }

    pub fn windows(&self) -> &WindowSet {
        &self.windows
    }

    pub fn schedule(&self) -> &PeriodSchedule {
        &self.schedule
    }

    /// The hot path: a short lock on `current` plus the total's atomics.
    /// Never fails, never blocks for long.
    pub fn consider_value(&self, value: f64) {
        self.windows.current.lock().consider_value(value);
        self.windows.total.consider_value(value);
    }

    /// Forces the single-sample state everywhere.
    pub fn set(&self, value: f64) {
        self.windows.current.lock().set(value);
        self.windows.total.set(value);
    }

    /// Closes `current` and refreshes every derived window. `tick` is the
    /// slice ordinal (1-based) driving period-boundary checks. Returns the
    /// displaced window for idleness inspection.
    pub fn slice(&self, tick: u64) -> Arc<ValueAccumulator> {
        let pool = self.pools.for_flavor(self.flavor);

        let fresh = pool.acquire();
        let mut displaced = {
            let mut current = self.windows.current.lock();
            mem::replace(&mut *current, fresh)
        };
        displaced.seal();
        let displaced = Arc::new(displaced);
        pool.release_arc(self.windows.last.swap(displaced.clone()));

        let mut histories = self.histories.lock();
        histories.tick_ring.push(displaced.clone());

        let periods = self.schedule.periods();
        for i in 0..periods.len() {
            let mut folded = pool.acquire();
            {
                let child = if i == 0 {
                    &histories.tick_ring
                } else {
                    &histories.period_rings[i - 1]
                };
                child.fold_into(self.schedule.fold_depth(i), &mut folded);
            }
            folded.seal();
            let folded = Arc::new(folded);
            pool.release_arc(self.windows.by_period[i].swap(folded.clone()));
            if i + 1 < periods.len() && tick % periods[i].interval_ticks == 0 {
                histories.period_rings[i].push(folded);
            }
        }
        displaced
    }

    /// Returns every owned accumulator to its pool after zeroing. Called by
    /// the gc sweep once the metric has left the registry.
    pub fn reclaim(&self) {
        let pool = self.pools.for_flavor(self.flavor);
        let stub = ValueAccumulator::new(Estimator::Disabled);
        let current = mem::replace(&mut *self.windows.current.lock(), stub);
        pool.release(current);
        pool.release_arc(
            self.windows
                .last
                .swap(Arc::new(ValueAccumulator::new(Estimator::Disabled))),
        );
        for slot in &self.windows.by_period {
            pool.release_arc(slot.swap(Arc::new(ValueAccumulator::new(Estimator::Disabled))));
        }
        let mut histories = self.histories.lock();
        histories.tick_ring.clear();
        for ring in &mut histories.period_rings {
            ring.clear();
        }
        self.windows.total.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AggregationConfig, Period};
    use std::time::Duration;

    fn rollup(periods: Vec<Period>) -> Rollup {
        let config = AggregationConfig::default().with_periods(periods);
        let schedule = Arc::new(
            PeriodSchedule::new(config.periods.clone(), Duration::from_secs(1)).unwrap(),
        );
        let pools = Arc::new(AccumulatorPools::new(&config));
        Rollup::new(Estimator::from_config(&config), schedule, pools)
    }

    #[test]
    fn test_last_is_single_tick_window() {
        let r = rollup(vec![Period::ticks(5)]);
        r.consider_value(10.0);
        r.consider_value(20.0);
        r.slice(1);
        assert_eq!(r.windows().last().count(), 2);
        assert_eq!(r.windows().last().avg(), 15.0);

        r.consider_value(99.0);
        r.slice(2);
        assert_eq!(r.windows().last().count(), 1);
        assert_eq!(r.windows().last().avg(), 99.0);
    }

    #[test]
    fn test_period_folds_recent_ticks() {
        let r = rollup(vec![Period::ticks(3)]);
        for tick in 1..=3 {
            r.consider_value(tick as f64);
            r.slice(tick);
        }
        let p0 = r.windows().period(0);
        assert_eq!(p0.count(), 3);
        assert_eq!(p0.min(), 1.0);
        assert_eq!(p0.max(), 3.0);
        assert_eq!(p0.avg(), 2.0);
    }

    #[test]
    fn test_period_window_rolls_off_old_ticks() {
        let r = rollup(vec![Period::ticks(2)]);
        r.consider_value(1.0);
        r.slice(1);
        r.consider_value(100.0);
        r.slice(2);
        r.consider_value(200.0);
        r.slice(3);
        // Window of 2 ticks: only {100, 200} remain.
        let p0 = r.windows().period(0);
        assert_eq!(p0.count(), 2);
        assert_eq!(p0.min(), 100.0);
        assert_eq!(p0.avg(), 150.0);
    }

    #[test]
    fn test_higher_period_advances_on_boundary_only() {
        // period[0] = 2 ticks, period[1] = 4 ticks (depth 2).
        let r = rollup(vec![Period::ticks(2), Period::ticks(4)]);
        for tick in 1..=4 {
            r.consider_value(1.0);
            r.slice(tick);
        }
        let p1 = r.windows().period(1);
        assert_eq!(p1.count(), 4, "period[1] must cover all four ticks");
    }

    #[test]
    fn test_count_conservation_across_rollup() {
        // Once every ring is populated and nothing rolled off, the top
        // period reproduces the total count exactly.
        let r = rollup(vec![Period::ticks(2), Period::ticks(4)]);
        let mut fed = 0u64;
        for tick in 1..=4 {
            for s in 0..(tick + 1) {
                r.consider_value(s as f64);
                fed += 1;
            }
            r.slice(tick);
        }
        assert_eq!(r.windows().total().count(), fed);
        assert_eq!(r.windows().period(1).count(), fed);
    }

    #[test]
    fn test_total_never_rotates() {
        let r = rollup(vec![Period::ticks(2)]);
        for tick in 1..=10 {
            r.consider_value(tick as f64);
            r.slice(tick);
        }
        assert_eq!(r.windows().total().count(), 10);
        assert_eq!(r.windows().total().min(), 1.0);
        assert_eq!(r.windows().total().max(), 10.0);
    }

    #[test]
    fn test_fold_stops_at_unpopulated_slot() {
        let r = rollup(vec![Period::ticks(5)]);
        r.consider_value(7.0);
        r.slice(1);
        // Only one tick has ever closed; the 5-tick fold must not invent
        // samples from empty slots.
        assert_eq!(r.windows().period(0).count(), 1);
        assert_eq!(r.windows().period(0).avg(), 7.0);
    }

    #[test]
    fn test_snapshot_stability_between_slices() {
        let r = rollup(vec![Period::ticks(3)]);
        r.consider_value(5.0);
        r.slice(1);
        let a = r.windows().period(0);
        r.consider_value(50.0);
        // No slice yet: the published snapshot must be unaffected.
        let b = r.windows().period(0);
        assert_eq!(a.count(), b.count());
        assert_eq!(a.avg(), b.avg());
        assert_eq!(
            a.get_percentile(0.5),
            b.get_percentile(0.5),
            "percentile reads must be idempotent between slices"
        );
    }
}
