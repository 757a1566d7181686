//! The metric handle: one registry key, one window set, one idle state.
//!
//! A handle is created on first use, sliced by the shared scheduler at its
//! bucket interval, and torn down by the lifecycle sweep once it has idled
//! past the threshold. Ingestion never returns an error and never blocks
//! beyond a short lock hold.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::accumulator::ValueAccumulator;
use crate::config::PeriodSchedule;
use crate::estimator::Estimator;
use crate::lifecycle::{IdlePolicy, IdleState};
use crate::pool::AccumulatorPools;
use crate::rollup::{Rollup, WindowSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricKind {
    Counter,
    Gauge,
    Timing,
}

impl MetricKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricKind::Counter => "counter",
            MetricKind::Gauge => "gauge",
            MetricKind::Timing => "timing",
        }
    }
}

pub struct Metric {
    key: String,
    kind: MetricKind,
    rollup: Rollup,
    idle: IdleState,
    running: AtomicBool,
    /// Slice ordinal, 1-based after the first slice. Drives the
    /// period-boundary checks of the rollup.
    slices: AtomicU64,
    interval: Duration,
    /// Injects a tick failure, for exercising the scheduler's panic
    /// isolation.
    #[cfg(test)]
    pub(crate) fail_tick: AtomicBool,
}

impl Metric {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        key: impl Into<String>,
        kind: MetricKind,
        estimator: Estimator,
        schedule: Arc<PeriodSchedule>,
        pools: Arc<AccumulatorPools>,
        policy: IdlePolicy,
        idle_threshold: u32,
        interval: Duration,
    ) -> Self {
        Self {
            key: key.into(),
            kind,
            rollup: Rollup::new(estimator, schedule, pools),
            idle: IdleState::new(policy, idle_threshold),
            running: AtomicBool::new(true),
            slices: AtomicU64::new(0),
            interval,
            #[cfg(test)]
            fail_tick: AtomicBool::new(false),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn kind(&self) -> MetricKind {
        self.kind
    }

    pub(crate) fn interval(&self) -> Duration {
        self.interval
    }

    /// Feeds one observation. Duration-valued callers pre-convert to
    /// nanoseconds.
    pub fn consider_value(&self, value: f64) {
        self.rollup.consider_value(value);
    }

    /// Forces the single-sample state `{count: 1, min = avg = max = v}`.
    pub fn set(&self, value: f64) {
        self.rollup.set(value);
    }

    /// Lock-free access to the published windows.
    pub fn windows(&self) -> &WindowSet {
        self.rollup.windows()
    }

    pub fn schedule(&self) -> &PeriodSchedule {
        self.rollup.schedule()
    }

    /// Percentile over the lifetime window.
    pub fn get_percentile(&self, p: f64) -> Option<f64> {
        self.rollup.windows().total().get_percentile(p)
    }

    /// Batched percentiles over the lifetime window.
    pub fn get_percentiles(&self, ps: &[f64]) -> Vec<Option<f64>> {
        self.rollup.windows().total().get_percentiles(ps)
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Phase one of eviction: stop scheduling. The scheduler prunes the
    /// metric from its bucket on the next tick; the registry keeps it until
    /// the gc sweep.
    pub fn stop(&self) {
        if self.running.swap(false, Ordering::AcqRel) {
            tracing::debug!(key = %self.key, "metric stopped");
        }
    }

    /// Runs one slice outside the scheduler. Drives tests and manual
    /// flush-before-export; semantically identical to a scheduler tick.
    pub fn slice_now(&self) {
        self.on_tick();
    }

    /// One scheduler tick: slice, then evaluate idleness against the
    /// just-closed window.
    pub(crate) fn on_tick(&self) {
        #[cfg(test)]
        if self.fail_tick.load(Ordering::Relaxed) {
            panic!("injected tick failure");
        }
        let tick = self.slices.fetch_add(1, Ordering::Relaxed) + 1;
        let closed = self.rollup.slice(tick);
        if self.idle.observe(&closed) {
            self.stop();
        }
    }

    /// Phase two of eviction: zero and pool every owned accumulator. Called
    /// by the gc sweep after removal from the registry.
    pub(crate) fn reclaim(&self) {
        self.rollup.reclaim();
    }

    /// Point-in-time copy of the live window.
    pub fn current_snapshot(&self) -> ValueAccumulator {
        self.rollup.windows().current_snapshot()
    }
}

impl std::fmt::Debug for Metric {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Metric")
            .field("key", &self.key)
            .field("kind", &self.kind)
            .field("running", &self.is_running())
            .field("slices", &self.slices.load(Ordering::Relaxed))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AggregationConfig, EstimatorFlavor, Period};

    fn metric(policy: IdlePolicy, threshold: u32) -> Metric {
        let config = AggregationConfig::default().with_periods(vec![Period::ticks(5)]);
        let schedule = Arc::new(
            PeriodSchedule::new(config.periods.clone(), config.slicer_interval).unwrap(),
        );
        let pools = Arc::new(AccumulatorPools::new(&config));
        Metric::new(
            "test.metric",
            MetricKind::Timing,
            Estimator::for_flavor(EstimatorFlavor::Reservoir, &config),
            schedule,
            pools,
            policy,
            threshold,
            config.slicer_interval,
        )
    }

    #[test]
    fn test_idle_metric_stops_after_threshold() {
        let m = metric(IdlePolicy::NoSamples, 2);
        m.consider_value(1.0);
        m.slice_now();
        assert!(m.is_running());
        for _ in 0..3 {
            m.slice_now();
        }
        assert!(!m.is_running(), "3 empty ticks must exceed threshold 2");
    }

    #[test]
    fn test_active_metric_never_stops() {
        let m = metric(IdlePolicy::NoSamples, 2);
        for _ in 0..50 {
            m.consider_value(1.0);
            m.slice_now();
        }
        assert!(m.is_running());
    }

    #[test]
    fn test_percentile_queries_on_total() {
        let m = metric(IdlePolicy::Never, 0);
        for i in 1..=100 {
            m.consider_value(i as f64);
        }
        assert_eq!(m.get_percentile(0.5), Some(51.0));
        let batch = m.get_percentiles(&[0.01, 0.99]);
        assert_eq!(batch, vec![Some(2.0), Some(100.0)]);
    }
}
