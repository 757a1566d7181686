//! The engine context: configuration, scheduler, pools, registry, queue.
//!
//! One [`MetricsEngine`] is the explicit replacement for what older metric
//! libraries keep in package-level globals. Tests construct isolated
//! instances; services usually hold one in an `Arc` for the process
//! lifetime. Configuration setters only affect metrics constructed after
//! the call.

use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::config::{AggregationConfig, EstimatorFlavor, Period, PeriodSchedule};
use crate::error::{Error, Result};
use crate::estimator::Estimator;
use crate::export::{self, MetricReport};
use crate::kinds::{Counter, Gauge, Timing};
use crate::lifecycle::IdlePolicy;
use crate::metric::{Metric, MetricKind};
use crate::pool::AccumulatorPools;
use crate::queue::IngestionQueue;
use crate::registry::Registry;
use crate::slicer::Slicer;

pub struct MetricsEngine {
    config: RwLock<AggregationConfig>,
    schedule: RwLock<Arc<PeriodSchedule>>,
    pools: RwLock<Arc<AccumulatorPools>>,
    slicer: Slicer,
    registry: Registry,
    queue: Option<IngestionQueue>,
    shut_down: AtomicBool,
}

impl std::fmt::Debug for MetricsEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricsEngine")
            .field("shut_down", &self.shut_down)
            .finish_non_exhaustive()
    }
}

impl MetricsEngine {
    pub fn new(config: AggregationConfig) -> Result<Self> {
        config.validate()?;
        let schedule = Arc::new(PeriodSchedule::new(
            config.periods.clone(),
            config.slicer_interval,
        )?);
        let pools = Arc::new(AccumulatorPools::new(&config));
        let queue = config.ingestion_queue.then(|| IngestionQueue::new(&config));
        tracing::info!(
            periods = config.periods.len(),
            interval = ?config.slicer_interval,
            queue = config.ingestion_queue,
            "metrics engine started"
        );
        Ok(Self {
            config: RwLock::new(config),
            schedule: RwLock::new(schedule),
            pools: RwLock::new(pools),
            slicer: Slicer::new(),
            registry: Registry::new(),
            queue,
            shut_down: AtomicBool::new(false),
        })
    }

    pub fn with_defaults() -> Result<Self> {
        Self::new(AggregationConfig::default())
    }

    // ------------------------------------------------------------------
    // Metric construction
    // ------------------------------------------------------------------

    /// Get-or-create sugar; see the `register_*` variants for the strict
    /// path that surfaces duplicate keys.
    pub fn counter(&self, key: &str) -> Result<Counter> {
        Ok(Counter::new(self.get_or_create(
            key,
            MetricKind::Counter,
            EstimatorFlavor::Disabled,
            IdlePolicy::NoSamples,
        )?))
    }

    pub fn gauge(&self, key: &str) -> Result<Gauge> {
        Ok(Gauge::new(self.get_or_create(
            key,
            MetricKind::Gauge,
            EstimatorFlavor::Disabled,
            IdlePolicy::ValueUnchanged,
        )?))
    }

    pub fn timing(&self, key: &str) -> Result<Timing> {
        let flavor = self.config.read().estimator;
        Ok(Timing::new(self.get_or_create(
            key,
            MetricKind::Timing,
            flavor,
            IdlePolicy::NoSamples,
        )?))
    }

    /// Strict registration: a duplicate key is an error, not a lookup.
    pub fn register_counter(&self, key: &str) -> Result<Counter> {
        self.create(
            key,
            MetricKind::Counter,
            EstimatorFlavor::Disabled,
            IdlePolicy::NoSamples,
        )
        .map(Counter::new)
    }

    pub fn register_gauge(&self, key: &str) -> Result<Gauge> {
        self.create(
            key,
            MetricKind::Gauge,
            EstimatorFlavor::Disabled,
            IdlePolicy::ValueUnchanged,
        )
        .map(Gauge::new)
    }

    pub fn register_timing(&self, key: &str) -> Result<Timing> {
        let flavor = self.config.read().estimator;
        self.create(key, MetricKind::Timing, flavor, IdlePolicy::NoSamples)
            .map(Timing::new)
    }

    /// Full-control construction for callers that need a specific estimator
    /// flavor or idle policy.
    pub fn register_with(
        &self,
        key: &str,
        kind: MetricKind,
        flavor: EstimatorFlavor,
        policy: IdlePolicy,
    ) -> Result<Arc<Metric>> {
        self.create(key, kind, flavor, policy)
    }

    fn get_or_create(
        &self,
        key: &str,
        kind: MetricKind,
        flavor: EstimatorFlavor,
        policy: IdlePolicy,
    ) -> Result<Arc<Metric>> {
        loop {
            if let Some(existing) = self.registry.get(key) {
                return Ok(existing);
            }
            match self.create(key, kind, flavor, policy) {
                Ok(metric) => return Ok(metric),
                // Lost a registration race; loop back to the lookup.
                Err(Error::AlreadyRegistered(_)) => continue,
                Err(e) => return Err(e),
            }
        }
    }

    fn create(
        &self,
        key: &str,
        kind: MetricKind,
        flavor: EstimatorFlavor,
        policy: IdlePolicy,
    ) -> Result<Arc<Metric>> {
        if self.shut_down.load(Ordering::Acquire) {
            return Err(Error::ShutDown);
        }
        let (idle_threshold, interval) = {
            let config = self.config.read();
            (config.idle_threshold, config.slicer_interval)
        };
        let estimator = Estimator::for_flavor(flavor, &self.config.read());
        let metric = Arc::new(Metric::new(
            key,
            kind,
            estimator,
            self.schedule.read().clone(),
            self.pools.read().clone(),
            policy,
            idle_threshold,
            interval,
        ));
        self.registry.register(metric.clone())?;
        self.slicer.attach(metric.clone());
        Ok(metric)
    }

    // ------------------------------------------------------------------
    // Lookup, lifecycle, export
    // ------------------------------------------------------------------

    pub fn get(&self, key: &str) -> Option<Arc<Metric>> {
        self.registry.get(key)
    }

    /// Running metrics. Stopped-but-unswept metrics are excluded.
    pub fn list(&self) -> Vec<Arc<Metric>> {
        self.registry.list()
    }

    /// Phase two of eviction: removes stopped metrics from the registry and
    /// returns their accumulators to the pools. Returns how many were
    /// reclaimed.
    pub fn gc(&self) -> usize {
        let swept = self.registry.sweep();
        for metric in &swept {
            metric.reclaim();
        }
        if !swept.is_empty() {
            tracing::debug!(count = swept.len(), "gc sweep reclaimed stopped metrics");
        }
        swept.len()
    }

    /// Queues an observation through the batching front-end; falls back to
    /// the direct path when the queue is disabled.
    pub fn enqueue(&self, metric: &Arc<Metric>, value: f64) {
        match &self.queue {
            Some(queue) => queue.push(metric.clone(), value),
            None => metric.consider_value(value),
        }
    }

    /// Report rows for every running metric, built from published snapshots.
    pub fn export(&self) -> Vec<MetricReport> {
        if let Some(queue) = &self.queue {
            queue.flush();
        }
        self.registry.list().iter().map(|m| export::report(m)).collect()
    }

    // ------------------------------------------------------------------
    // Configuration (affects only metrics constructed afterwards)
    // ------------------------------------------------------------------

    pub fn set_aggregation_periods(&self, periods: Vec<Period>) -> Result<()> {
        let base = self.config.read().slicer_interval;
        let schedule = Arc::new(PeriodSchedule::new(periods.clone(), base)?);
        self.config.write().periods = periods;
        *self.schedule.write() = schedule;
        Ok(())
    }

    pub fn set_slicer_interval(&self, interval: Duration) -> Result<()> {
        if interval.is_zero() {
            return Err(Error::InvalidConfig("slicer interval must be non-zero".into()));
        }
        let periods = {
            let mut config = self.config.write();
            config.slicer_interval = interval;
            config.periods.clone()
        };
        *self.schedule.write() = Arc::new(PeriodSchedule::new(periods, interval)?);
        Ok(())
    }

    pub fn set_reservoir_capacity(&self, capacity: usize) -> Result<()> {
        if capacity == 0 {
            return Err(Error::InvalidConfig("reservoir capacity must be non-zero".into()));
        }
        let rebuilt = {
            let mut config = self.config.write();
            config.reservoir_capacity = capacity;
            Arc::new(AccumulatorPools::new(&config))
        };
        // Metrics keep the pools they were built with; only new metrics see
        // the new capacity.
        *self.pools.write() = rebuilt;
        Ok(())
    }

    pub fn config(&self) -> AggregationConfig {
        self.config.read().clone()
    }

    /// Cooperative shutdown: stops the slicer threads, flushes and joins the
    /// queue worker. Idempotent.
    pub fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }
        self.slicer.shutdown();
        if let Some(queue) = &self.queue {
            queue.shutdown();
        }
        tracing::info!("metrics engine shut down");
    }
}

impl Drop for MetricsEngine {
    fn drop(&mut self) {
        self.shutdown();
    }
}
