//! Snapshot rows for exporters.
//!
//! A sender (StatsD client, HTTP exposition, log shipper) consumes one
//! [`WindowReport`] per non-empty window: `last`, one row per configured
//! period labeled `"5s" / "1m" / "1h" / "1d"` style, and `total`. Windows
//! with zero samples are skipped. Percentile columns are `None` when the
//! metric's estimator does not support them (disabled strategy, or a decay
//! set that does not track the column's percentile).

use serde::Serialize;

use crate::accumulator::ValueAccumulator;
use crate::metric::Metric;

/// The percentile columns every report row carries.
pub const REPORT_PERCENTILES: [f64; 5] = [0.01, 0.10, 0.50, 0.90, 0.99];

#[derive(Debug, Clone, Serialize)]
pub struct WindowReport {
    pub window: String,
    pub count: u64,
    pub min: f64,
    pub per1: Option<f64>,
    pub per10: Option<f64>,
    pub per50: Option<f64>,
    pub avg: f64,
    pub per90: Option<f64>,
    pub per99: Option<f64>,
    pub max: f64,
}

impl WindowReport {
    fn from_window(window: &str, acc: &ValueAccumulator) -> Option<Self> {
        if acc.count() == 0 {
            return None;
        }
        let ps = acc.get_percentiles(&REPORT_PERCENTILES);
        Some(Self {
            window: window.to_string(),
            count: acc.count(),
            min: acc.min(),
            per1: ps[0],
            per10: ps[1],
            per50: ps[2],
            avg: acc.avg(),
            per90: ps[3],
            per99: ps[4],
            max: acc.max(),
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricReport {
    pub key: String,
    pub kind: &'static str,
    pub windows: Vec<WindowReport>,
}

/// Builds the report rows for one metric from its published snapshots.
pub fn report(metric: &Metric) -> MetricReport {
    let windows = metric.windows();
    let schedule = metric.schedule();
    let mut rows = Vec::with_capacity(windows.period_count() + 2);
    if let Some(row) = WindowReport::from_window("last", &windows.last()) {
        rows.push(row);
    }
    for i in 0..windows.period_count() {
        if let Some(row) = WindowReport::from_window(&schedule.label(i), &windows.period(i)) {
            rows.push(row);
        }
    }
    if let Some(row) = WindowReport::from_window("total", &windows.total().snapshot()) {
        rows.push(row);
    }
    MetricReport {
        key: metric.key().to_string(),
        kind: metric.kind().as_str(),
        windows: rows,
    }
}
