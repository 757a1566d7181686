//! Engine configuration.
//!
//! Everything that used to be process-wide mutable state in traditional
//! metric libraries is an explicit config object here, owned by a
//! [`MetricsEngine`](crate::engine::MetricsEngine) instance so tests can run
//! isolated engines side by side. Changing a setting on a live engine only
//! affects metrics constructed after the call.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{Error, Result};

/// Default base slicing interval: one tick per second.
pub const DEFAULT_SLICER_INTERVAL: Duration = Duration::from_secs(1);

/// Default reservoir capacity for buffered percentile estimation.
pub const DEFAULT_RESERVOIR_CAPACITY: usize = 1000;

/// Percentiles tracked by the decay estimator (and emitted by the exporter).
pub const DEFAULT_PERCENTILES: [f64; 5] = [0.01, 0.10, 0.50, 0.90, 0.99];

/// Consecutive idle ticks before a metric is stopped.
pub const DEFAULT_IDLE_THRESHOLD: u32 = 5;

/// Slots per ingestion-queue ring.
pub const DEFAULT_RING_CAPACITY: usize = 64;

/// One rollup window, measured in base ticks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Period {
    pub interval_ticks: u64,
}

impl Period {
    pub const fn ticks(interval_ticks: u64) -> Self {
        Self { interval_ticks }
    }
}

/// Which percentile strategy newly constructed accumulators use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EstimatorFlavor {
    /// No percentile tracking; queries return `None`.
    Disabled,
    /// Bounded-memory exact percentiles over a uniform random sample.
    Reservoir,
    /// O(1)-memory self-correcting point estimates for a fixed percentile set.
    Decay,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregationConfig {
    /// Base tick driving slicing. Default 1s.
    pub slicer_interval: Duration,

    /// Rollup periods in base ticks, strictly ascending, each an exact
    /// multiple of the previous. Default `{5s, 1m, 5m, 1h, 6h, 1d}`.
    pub periods: Vec<Period>,

    /// Percentile strategy for timing metrics. Default reservoir.
    pub estimator: EstimatorFlavor,

    /// Reservoir buffer capacity.
    pub reservoir_capacity: usize,

    /// Percentiles tracked by the decay estimator.
    pub decay_percentiles: Vec<f64>,

    /// Consecutive idle ticks before a metric is stopped.
    pub idle_threshold: u32,

    /// Free-list capacity for pooled accumulators.
    pub pool_capacity: usize,

    /// Enable the batching ingestion queue front-end.
    pub ingestion_queue: bool,

    /// Slots per ingestion ring.
    pub ring_capacity: usize,

    /// Full rings buffered between producers and the queue worker.
    pub queue_depth: usize,
}

impl Default for AggregationConfig {
    fn default() -> Self {
        Self {
            slicer_interval: DEFAULT_SLICER_INTERVAL,
            periods: vec![
                Period::ticks(5),
                Period::ticks(60),
                Period::ticks(300),
                Period::ticks(3600),
                Period::ticks(21600),
                Period::ticks(86400),
            ],
            estimator: EstimatorFlavor::Reservoir,
            reservoir_capacity: DEFAULT_RESERVOIR_CAPACITY,
            decay_percentiles: DEFAULT_PERCENTILES.to_vec(),
            idle_threshold: DEFAULT_IDLE_THRESHOLD,
            pool_capacity: 1024,
            ingestion_queue: false,
            ring_capacity: DEFAULT_RING_CAPACITY,
            queue_depth: 16,
        }
    }
}

impl AggregationConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_slicer_interval(mut self, interval: Duration) -> Self {
        self.slicer_interval = interval;
        self
    }

    pub fn with_periods(mut self, periods: Vec<Period>) -> Self {
        self.periods = periods;
        self
    }

    pub fn with_estimator(mut self, flavor: EstimatorFlavor) -> Self {
        self.estimator = flavor;
        self
    }

    pub fn with_reservoir_capacity(mut self, capacity: usize) -> Self {
        self.reservoir_capacity = capacity;
        self
    }

    pub fn with_idle_threshold(mut self, ticks: u32) -> Self {
        self.idle_threshold = ticks;
        self
    }

    pub fn with_ingestion_queue(mut self, enabled: bool) -> Self {
        self.ingestion_queue = enabled;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.slicer_interval.is_zero() {
            return Err(Error::InvalidConfig("slicer interval must be non-zero".into()));
        }
        if self.reservoir_capacity == 0 {
            return Err(Error::InvalidConfig("reservoir capacity must be non-zero".into()));
        }
        if self.ring_capacity == 0 || self.queue_depth == 0 {
            return Err(Error::InvalidConfig("queue dimensions must be non-zero".into()));
        }
        for &p in &self.decay_percentiles {
            if !(0.0..=1.0).contains(&p) {
                return Err(Error::InvalidConfig(format!("percentile out of range: {p}")));
            }
        }
        PeriodSchedule::new(self.periods.clone(), self.slicer_interval).map(|_| ())
    }
}

/// A validated, immutable rollup hierarchy. Shared by every metric that was
/// constructed while it was the engine's active schedule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeriodSchedule {
    periods: Vec<Period>,
    base: Duration,
}

impl PeriodSchedule {
    /// Validates the divisibility invariant: strictly ascending intervals,
    /// each an exact multiple of its predecessor.
    pub fn new(periods: Vec<Period>, base: Duration) -> Result<Self> {
        if periods.is_empty() {
            return Err(Error::InvalidPeriods("at least one period required".into()));
        }
        if periods[0].interval_ticks == 0 {
            return Err(Error::InvalidPeriods("period interval must be non-zero".into()));
        }
        for window in periods.windows(2) {
            let (prev, next) = (window[0].interval_ticks, window[1].interval_ticks);
            if next <= prev {
                return Err(Error::InvalidPeriods(format!(
                    "periods must be strictly ascending: {next} follows {prev}"
                )));
            }
            if next % prev != 0 {
                return Err(Error::InvalidPeriods(format!(
                    "period {next} is not a multiple of {prev}"
                )));
            }
        }
        Ok(Self { periods, base })
    }

    pub fn periods(&self) -> &[Period] {
        &self.periods
    }

    pub fn len(&self) -> usize {
        self.periods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.periods.is_empty()
    }

    pub fn base_interval(&self) -> Duration {
        self.base
    }

    /// How many child entries a fold of period `i` walks: the first period
    /// folds base ticks, later periods fold entries of the previous ring.
    pub fn fold_depth(&self, i: usize) -> usize {
        let ticks = self.periods[i].interval_ticks;
        let child = if i == 0 { 1 } else { self.periods[i - 1].interval_ticks };
        (ticks / child) as usize
    }

    /// Window label for period `i`: `"<n>s" / "<n>m" / "<n>h" / "<n>d"` when
    /// the interval divides the unit evenly, else a raw duration string.
    pub fn label(&self, i: usize) -> String {
        let dur = self.base * self.periods[i].interval_ticks as u32;
        if dur.subsec_nanos() != 0 {
            return format!("{dur:?}");
        }
        let secs = dur.as_secs();
        for (unit, suffix) in [(86400, "d"), (3600, "h"), (60, "m"), (1, "s")] {
            if secs % unit == 0 {
                return format!("{}{}", secs / unit, suffix);
            }
        }
        format!("{dur:?}")
    }
}
