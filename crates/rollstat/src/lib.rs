//! # rollstat
//!
//! In-process metrics aggregation: high-frequency scalar observations in,
//! lock-free statistical snapshots out.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                         MetricsEngine                            │
//! ├──────────────────────────────────────────────────────────────────┤
//! │  caller ─► [IngestionQueue] ─► Metric.consider_value             │
//! │                                   │                              │
//! │                 ┌─────────────────┴──────────────┐               │
//! │                 ▼                                ▼               │
//! │          current window                    total (atomics)       │
//! │                 │ slice (per tick)                               │
//! │                 ▼                                                │
//! │     history rings ──fold──► period windows ──► ArcSwap publish   │
//! │                 │                                                │
//! │                 ▼                                                │
//! │     idle detection ──► stop ──► gc sweep ──► pools               │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Ingestion is allocation-free and never fails; snapshots are immutable
//! accumulators published by a single atomic pointer store, so readers never
//! lock and never observe a half-updated window. Metrics that go idle are
//! stopped and reclaimed in two phases.
//!
//! ```rust
//! use rollstat::MetricsEngine;
//! use std::time::Duration;
//!
//! let engine = MetricsEngine::with_defaults().unwrap();
//! let latency = engine.timing("api.latency").unwrap();
//! latency.observe(Duration::from_micros(250));
//!
//! for report in engine.export() {
//!     for window in report.windows {
//!         println!("{} [{}] count={}", report.key, window.window, window.count);
//!     }
//! }
//! ```

pub mod accumulator;
pub mod atomic;
pub mod config;
pub mod engine;
pub mod error;
pub mod estimator;
pub mod export;
pub mod kinds;
pub mod lifecycle;
pub mod metric;
pub mod pool;
pub mod queue;
pub mod registry;
pub mod rollup;
pub mod slicer;

pub use accumulator::{TotalAccumulator, ValueAccumulator};
pub use atomic::AtomicF64;
pub use config::{AggregationConfig, EstimatorFlavor, Period, PeriodSchedule};
pub use engine::MetricsEngine;
pub use error::{Error, Result};
pub use estimator::{Decay, Estimator, Reservoir, ITERATIONS_REQUIRED_PER_SECOND};
pub use export::{MetricReport, WindowReport, REPORT_PERCENTILES};
pub use kinds::{Counter, Gauge, Timing};
pub use lifecycle::{IdlePolicy, IdleState};
pub use metric::{Metric, MetricKind};
pub use pool::{AccumulatorPools, Pool, PoolStats, Poolable};
pub use queue::IngestionQueue;
pub use registry::Registry;
pub use rollup::{Rollup, WindowSet};
pub use slicer::Slicer;
