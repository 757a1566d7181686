//! The shared slicing scheduler.
//!
//! One background thread per distinct slicing interval; every metric
//! constructed at that interval lives in the thread's bucket. Ticks iterate
//! the bucket under a read lock, attach/prune take the write lock. A metric
//! belongs to exactly one bucket.
//!
//! A panic inside one metric's slice (an estimator or folding bug) is caught
//! per metric and logged; it can never take down the bucket thread or starve
//! the other metrics sharing the interval. parking_lot locks do not poison,
//! so the bucket state stays usable after a caught panic.

use crossbeam_channel::{bounded, select, tick, Receiver, Sender};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crate::metric::Metric;

struct Bucket {
    interval: Duration,
    metrics: RwLock<Vec<Arc<Metric>>>,
}

impl Bucket {
    fn run_tick(&self) {
        let mut prune = false;
        {
            let metrics = self.metrics.read();
            for metric in metrics.iter() {
                if !metric.is_running() {
                    prune = true;
                    continue;
                }
                let outcome = catch_unwind(AssertUnwindSafe(|| metric.on_tick()));
                if let Err(payload) = outcome {
                    tracing::error!(
                        key = %metric.key(),
                        panic = panic_message(&payload),
                        "panic during slice tick; metric skipped this tick"
                    );
                }
                if !metric.is_running() {
                    prune = true;
                }
            }
        }
        if prune {
            let mut metrics = self.metrics.write();
            let before = metrics.len();
            metrics.retain(|m| m.is_running());
            tracing::debug!(
                interval = ?self.interval,
                pruned = before - metrics.len(),
                "pruned stopped metrics from slicer bucket"
            );
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s
    } else {
        "<non-string panic payload>"
    }
}

struct BucketHandle {
    bucket: Arc<Bucket>,
    shutdown_tx: Sender<()>,
    thread: Option<JoinHandle<()>>,
}

pub struct Slicer {
    buckets: Mutex<HashMap<Duration, BucketHandle>>,
}

impl Default for Slicer {
    fn default() -> Self {
        Self::new()
    }
}

impl Slicer {
    pub fn new() -> Self {
        Self {
            buckets: Mutex::new(HashMap::new()),
        }
    }

    /// Adds `metric` to the bucket for its interval, spawning the bucket
    /// thread on first use of that interval.
    pub fn attach(&self, metric: Arc<Metric>) {
        let interval = metric.interval();
        let mut buckets = self.buckets.lock();
        let handle = buckets.entry(interval).or_insert_with(|| {
            let bucket = Arc::new(Bucket {
                interval,
                metrics: RwLock::new(Vec::new()),
            });
            let (shutdown_tx, shutdown_rx) = bounded::<()>(0);
            let thread_bucket = bucket.clone();
            let thread = std::thread::Builder::new()
                .name(format!("rollstat-slicer-{interval:?}"))
                .spawn(move || run_bucket(thread_bucket, shutdown_rx))
                .ok();
            if thread.is_none() {
                tracing::error!(?interval, "failed to spawn slicer thread");
            }
            BucketHandle {
                bucket,
                shutdown_tx,
                thread,
            }
        });
        handle.bucket.metrics.write().push(metric);
    }

    /// Metrics currently scheduled, across all buckets.
    pub fn scheduled(&self) -> usize {
        self.buckets
            .lock()
            .values()
            .map(|h| h.bucket.metrics.read().len())
            .sum()
    }

    /// Cooperative stop: signals every bucket thread and joins it.
    pub fn shutdown(&self) {
        let mut buckets = self.buckets.lock();
        for (_, mut handle) in buckets.drain() {
            let _ = handle.shutdown_tx.send(());
            if let Some(thread) = handle.thread.take() {
                let _ = thread.join();
            }
        }
    }
}

fn run_bucket(bucket: Arc<Bucket>, shutdown_rx: Receiver<()>) {
    let ticker = tick(bucket.interval);
    loop {
        select! {
            recv(ticker) -> _ => bucket.run_tick(),
            recv(shutdown_rx) -> _ => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AggregationConfig, EstimatorFlavor, Period, PeriodSchedule};
    use crate::estimator::Estimator;
    use crate::lifecycle::IdlePolicy;
    use crate::metric::MetricKind;
    use crate::pool::AccumulatorPools;

    fn metric(key: &str, interval: Duration, policy: IdlePolicy, threshold: u32) -> Arc<Metric> {
        let config = AggregationConfig::default().with_periods(vec![Period::ticks(1000)]);
        let schedule = Arc::new(
            PeriodSchedule::new(config.periods.clone(), config.slicer_interval).unwrap(),
        );
        let pools = Arc::new(AccumulatorPools::new(&config));
        Arc::new(Metric::new(
            key,
            MetricKind::Timing,
            Estimator::for_flavor(EstimatorFlavor::Reservoir, &config),
            schedule,
            pools,
            policy,
            threshold,
            interval,
        ))
    }

    #[test]
    fn test_bucket_ticks_slice_metrics() {
        let slicer = Slicer::new();
        let m = metric("slicer.test", Duration::from_millis(20), IdlePolicy::Never, 0);
        m.consider_value(5.0);
        slicer.attach(m.clone());
        std::thread::sleep(Duration::from_millis(120));
        slicer.shutdown();
        assert_eq!(m.windows().total().count(), 1);
        // The 1000-tick window still covers the sample after a handful of
        // slices.
        assert_eq!(m.windows().period(0).count(), 1);
    }

    #[test]
    fn test_idle_metric_pruned_from_bucket() {
        let slicer = Slicer::new();
        let m = metric("slicer.idle", Duration::from_millis(10), IdlePolicy::NoSamples, 1);
        slicer.attach(m.clone());
        std::thread::sleep(Duration::from_millis(150));
        assert!(!m.is_running(), "metric should have idled out");
        assert_eq!(slicer.scheduled(), 0, "stopped metric must leave its bucket");
        slicer.shutdown();
    }

    #[test]
    fn test_panicking_metric_does_not_starve_bucket() {
        use std::sync::atomic::Ordering;

        let slicer = Slicer::new();
        let broken = metric("slicer.broken", Duration::from_millis(20), IdlePolicy::Never, 0);
        broken.fail_tick.store(true, Ordering::Relaxed);
        let healthy = metric("slicer.healthy", Duration::from_millis(20), IdlePolicy::Never, 0);
        healthy.consider_value(5.0);
        slicer.attach(broken.clone());
        slicer.attach(healthy.clone());
        std::thread::sleep(Duration::from_millis(120));

        // The shared bucket survived the repeated panics: the healthy
        // metric kept slicing and neither metric was dropped.
        assert_eq!(healthy.windows().period(0).count(), 1);
        assert!(broken.is_running());
        assert!(healthy.is_running());
        assert_eq!(slicer.scheduled(), 2);
        slicer.shutdown();
    }

    #[test]
    fn test_one_bucket_per_interval() {
        let slicer = Slicer::new();
        slicer.attach(metric("a", Duration::from_millis(50), IdlePolicy::Never, 0));
        slicer.attach(metric("b", Duration::from_millis(50), IdlePolicy::Never, 0));
        slicer.attach(metric("c", Duration::from_millis(80), IdlePolicy::Never, 0));
        assert_eq!(slicer.buckets.lock().len(), 2);
        assert_eq!(slicer.scheduled(), 3);
        slicer.shutdown();
    }
}
