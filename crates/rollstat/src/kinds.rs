//! Thin per-kind wrappers over the metric handle.
//!
//! No aggregation logic of their own; they name the observation and convert
//! units (durations become nanoseconds as f64) before delegating.

use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::metric::Metric;

/// Monotonic event counter. Each `add` is one observation of the delta.
#[derive(Debug, Clone)]
pub struct Counter {
    metric: Arc<Metric>,
}

impl Counter {
    pub(crate) fn new(metric: Arc<Metric>) -> Self {
        Self { metric }
    }

    pub fn increment(&self) {
        self.add(1);
    }

    pub fn add(&self, delta: u64) {
        self.metric.consider_value(delta as f64);
    }

    pub fn metric(&self) -> &Arc<Metric> {
        &self.metric
    }
}

/// Point-in-time value. `observe` feeds a sample; `set` forces the
/// single-sample state (seeding a synthetic static value).
#[derive(Debug, Clone)]
pub struct Gauge {
    metric: Arc<Metric>,
}

impl Gauge {
    pub(crate) fn new(metric: Arc<Metric>) -> Self {
        Self { metric }
    }

    pub fn observe(&self, value: f64) {
        self.metric.consider_value(value);
    }

    pub fn set(&self, value: f64) {
        self.metric.set(value);
    }

    pub fn metric(&self) -> &Arc<Metric> {
        &self.metric
    }
}

/// Latency/duration samples, stored as nanoseconds.
#[derive(Debug, Clone)]
pub struct Timing {
    metric: Arc<Metric>,
}

impl Timing {
    pub(crate) fn new(metric: Arc<Metric>) -> Self {
        Self { metric }
    }

    pub fn observe(&self, duration: Duration) {
        self.observe_ns(duration.as_nanos() as f64);
    }

    pub fn observe_ns(&self, nanos: f64) {
        self.metric.consider_value(nanos);
    }

    /// Times `f` and records the elapsed wall time.
    pub fn time<F, R>(&self, f: F) -> R
    where
        F: FnOnce() -> R,
    {
        let start = Instant::now();
        let result = f();
        self.observe(start.elapsed());
        result
    }

    pub fn metric(&self) -> &Arc<Metric> {
        &self.metric
    }
}
