//! Batching ingestion front-end.
//!
//! When producer concurrency vastly exceeds the number of accumulators being
//! updated, per-accumulator lock contention dominates. The queue amortizes
//! it: producers reserve slots in a shared fixed-capacity ring with one
//! `fetch_add`, and a single background worker applies full rings to their
//! target accumulators. Costs a small bounded latency and a small reordering
//! window, both acceptable for statistics.
//!
//! Slot protocol, per producer:
//! - reserved index `< capacity`: write the slot. The write that brings the
//!   ring's written-count to capacity hands the full ring to the worker
//!   channel; that bounded send is the queue's only source of backpressure.
//! - reserved index `== capacity`: this producer installs a fresh ring from
//!   the pool as the globally visible ring, then retries.
//! - reserved index `> capacity`: lost the race, yield and retry against the
//!   new ring.
//!
//! A ring cannot be handed off before every reserved slot below capacity has
//! been written, so the worker never observes a half-written ring. An ad-hoc
//! flush swaps the ring out first, then waits for in-flight slot writes
//! before draining.

use arc_swap::ArcSwap;
use crossbeam_channel::{bounded, Receiver, Sender};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use crate::config::AggregationConfig;
use crate::metric::Metric;
use crate::pool::{Pool, Poolable};

struct QueuedSample {
    target: Arc<Metric>,
    value: f64,
}

struct Ring {
    slots: Vec<Mutex<Option<QueuedSample>>>,
    /// Next index handed to a producer. May overshoot capacity; the
    /// overshoot is how producers learn the ring is being replaced.
    reserved: AtomicUsize,
    /// Completed slot writes. The ring is full when this reaches capacity.
    written: AtomicUsize,
}

impl Ring {
    fn new(capacity: usize) -> Self {
        Self {
            slots: (0..capacity).map(|_| Mutex::new(None)).collect(),
            reserved: AtomicUsize::new(0),
            written: AtomicUsize::new(0),
        }
    }

    /// Waits until every producer that reserved a slot below capacity has
    /// finished writing it. Bounded: a reserver writes its slot right after
    /// the `fetch_add`, so the gap closes within a few yields.
    fn await_writers(&self) {
        loop {
            let reserved = self.reserved.load(Ordering::Acquire).min(self.slots.len());
            if self.written.load(Ordering::Acquire) >= reserved {
                return;
            }
            std::thread::yield_now();
        }
    }
}

impl Poolable for Ring {
    fn reset(&mut self) {
        for slot in &mut self.slots {
            *slot.get_mut() = None;
        }
        *self.reserved.get_mut() = 0;
        *self.written.get_mut() = 0;
    }
}

pub struct IngestionQueue {
    current: ArcSwap<Ring>,
    rings: Arc<Pool<Ring>>,
    capacity: usize,
    full_tx: Mutex<Option<Sender<Arc<Ring>>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl IngestionQueue {
    pub fn new(config: &AggregationConfig) -> Self {
        let capacity = config.ring_capacity;
        let rings = Arc::new(Pool::new(config.queue_depth + 2, move || {
            Ring::new(capacity)
        }));
        let (full_tx, full_rx) = bounded::<Arc<Ring>>(config.queue_depth);
        Self {
            current: ArcSwap::from_pointee(Ring::new(capacity)),
            rings: rings.clone(),
            capacity,
            full_tx: Mutex::new(Some(full_tx)),
            worker: Mutex::new(spawn_worker(full_rx, rings)),
        }
    }

    /// Queues one observation for `target`. Bounded retry loop; blocks only
    /// when this write completes a ring and the worker channel is full.
    pub fn push(&self, target: Arc<Metric>, value: f64) {
        let mut sample = Some(QueuedSample { target, value });
        loop {
            let ring = self.current.load_full();
            let idx = ring.reserved.fetch_add(1, Ordering::AcqRel);
            if idx < self.capacity {
                *ring.slots[idx].lock() = sample.take();
                if ring.written.fetch_add(1, Ordering::AcqRel) + 1 == self.capacity {
                    if let Some(tx) = &*self.full_tx.lock() {
                        let _ = tx.send(ring);
                    }
                }
                return;
            }
            if idx == self.capacity {
                // Replace only the ring that overflowed; a concurrent flush
                // may have installed a replacement already, and clobbering
                // it would strand its samples.
                let fresh = Arc::new(self.rings.acquire());
                let _ = self.current.compare_and_swap(&ring, fresh);
            } else {
                std::thread::yield_now();
            }
        }
    }

    /// Applies every sample sitting in the partially filled ring. Safe while
    /// producers are mid-push: a producer that reserved a slot in the
    /// displaced ring finishes its write before the drain reads the slot,
    /// and replayed slots are emptied by `take`, so a ring that also reaches
    /// the worker applies each sample exactly once.
    pub fn flush(&self) {
        let stale = self.current.swap(Arc::new(self.rings.acquire()));
        stale.await_writers();
        drain_ring(&stale);
        self.rings.release_arc(stale);
    }

    /// Flushes the partial ring, closes the worker channel and joins the
    /// worker after it drains the backlog.
    pub fn shutdown(&self) {
        self.flush();
        drop(self.full_tx.lock().take());
        if let Some(worker) = self.worker.lock().take() {
            let _ = worker.join();
        }
    }
}

fn spawn_worker(full_rx: Receiver<Arc<Ring>>, rings: Arc<Pool<Ring>>) -> Option<JoinHandle<()>> {
    let thread = std::thread::Builder::new()
        .name("rollstat-ingest".into())
        .spawn(move || {
            for ring in full_rx.iter() {
                drain_ring(&ring);
                rings.release_arc(ring);
            }
        })
        .ok();
    if thread.is_none() {
        tracing::error!("failed to spawn ingestion worker");
    }
    thread
}

fn drain_ring(ring: &Ring) {
    for slot in &ring.slots {
        if let Some(sample) = slot.lock().take() {
            sample.target.consider_value(sample.value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{EstimatorFlavor, Period, PeriodSchedule};
    use crate::estimator::Estimator;
    use crate::lifecycle::IdlePolicy;
    use crate::metric::MetricKind;
    use crate::pool::AccumulatorPools;
    use std::time::Duration;

    fn metric() -> Arc<Metric> {
        let config = AggregationConfig::default().with_periods(vec![Period::ticks(5)]);
        let schedule = Arc::new(
            PeriodSchedule::new(config.periods.clone(), config.slicer_interval).unwrap(),
        );
        let pools = Arc::new(AccumulatorPools::new(&config));
        Arc::new(Metric::new(
            "queue.test",
            MetricKind::Counter,
            Estimator::for_flavor(EstimatorFlavor::Disabled, &config),
            schedule,
            pools,
            IdlePolicy::Never,
            0,
            config.slicer_interval,
        ))
    }

    fn queue_config() -> AggregationConfig {
        let mut cfg = AggregationConfig::default();
        cfg.ring_capacity = 8;
        cfg.queue_depth = 4;
        cfg
    }

    #[test]
    fn test_full_rings_reach_the_target() {
        let queue = IngestionQueue::new(&queue_config());
        let m = metric();
        // 3 full rings of 8
        for i in 0..24 {
            queue.push(m.clone(), i as f64);
        }
        // The worker applies asynchronously; wait briefly.
        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        while m.windows().total().count() < 24 && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(m.windows().total().count(), 24);
        assert_eq!(m.windows().total().min(), 0.0);
        assert_eq!(m.windows().total().max(), 23.0);
        queue.shutdown();
    }

    #[test]
    fn test_flush_delivers_partial_ring() {
        let queue = IngestionQueue::new(&queue_config());
        let m = metric();
        for i in 0..3 {
            queue.push(m.clone(), i as f64);
        }
        assert_eq!(m.windows().total().count(), 0, "partial ring not yet applied");
        queue.flush();
        assert_eq!(m.windows().total().count(), 3);
        queue.shutdown();
    }

    #[test]
    fn test_flush_concurrent_with_producers_loses_nothing() {
        // Flushing while producers are mid-push must wait for every
        // reserved slot write before draining the displaced ring.
        let queue = Arc::new(IngestionQueue::new(&queue_config()));
        let m = metric();
        let mut handles = Vec::new();
        for _ in 0..4 {
            let queue = queue.clone();
            let m = m.clone();
            handles.push(std::thread::spawn(move || {
                for i in 0..2000 {
                    queue.push(m.clone(), i as f64);
                }
            }));
        }
        let flusher = {
            let queue = queue.clone();
            std::thread::spawn(move || {
                for _ in 0..500 {
                    queue.flush();
                    std::thread::yield_now();
                }
            })
        };
        for h in handles {
            h.join().unwrap();
        }
        flusher.join().unwrap();
        queue.shutdown();
        assert_eq!(m.windows().total().count(), 8000);
    }

    #[test]
    fn test_concurrent_producers_lose_no_full_rings() {
        let queue = Arc::new(IngestionQueue::new(&queue_config()));
        let m = metric();
        let mut handles = Vec::new();
        for _ in 0..8 {
            let queue = queue.clone();
            let m = m.clone();
            handles.push(std::thread::spawn(move || {
                for i in 0..1000 {
                    queue.push(m.clone(), i as f64);
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        queue.shutdown();
        assert_eq!(m.windows().total().count(), 8000);
    }
}
