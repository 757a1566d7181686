//! Percentile estimation strategies.
//!
//! Three interchangeable strategies, selected per metric at construction:
//!
//! | Strategy  | Memory           | Update | Accuracy                        |
//! |-----------|------------------|--------|---------------------------------|
//! | Disabled  | O(1)             | O(1)   | none (queries return `None`)    |
//! | Reservoir | O(capacity)      | O(1)   | exact over the retained sample  |
//! | Decay     | O(k) percentiles | O(k)   | approximate, self-correcting    |
//!
//! The reservoir keeps a uniform random sample of the stream (Algorithm R);
//! the decay estimator keeps one scalar guess per tracked percentile and
//! nudges it against incoming samples. The decay merge arithmetic is a known
//! approximation and is kept as-is: downstream calibration expects exactly
//! this update rule.

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

use crate::config::{AggregationConfig, EstimatorFlavor};

/// Sustained samples-per-second at which the decay estimator reaches its
/// nominal accuracy. Also the divisor of its inertness term.
pub const ITERATIONS_REQUIRED_PER_SECOND: f64 = 20.0;

/// A percentile estimation strategy plus its state.
///
/// An `Estimator` is owned by exactly one accumulator and is only touched
/// while that accumulator is private (pre-publish) or locked, so none of the
/// mutating methods need internal synchronization.
#[derive(Debug, Clone)]
pub enum Estimator {
    Disabled,
    Reservoir(Reservoir),
    Decay(Decay),
}

impl Estimator {
    pub fn from_config(config: &AggregationConfig) -> Self {
        Self::for_flavor(config.estimator, config)
    }

    pub fn for_flavor(flavor: EstimatorFlavor, config: &AggregationConfig) -> Self {
        match flavor {
            EstimatorFlavor::Disabled => Estimator::Disabled,
            EstimatorFlavor::Reservoir => {
                Estimator::Reservoir(Reservoir::new(config.reservoir_capacity))
            }
            EstimatorFlavor::Decay => Estimator::Decay(Decay::new(&config.decay_percentiles)),
        }
    }

    pub fn flavor(&self) -> EstimatorFlavor {
        match self {
            Estimator::Disabled => EstimatorFlavor::Disabled,
            Estimator::Reservoir(_) => EstimatorFlavor::Reservoir,
            Estimator::Decay(_) => EstimatorFlavor::Decay,
        }
    }

    /// Feeds one sample. `count` is the owning accumulator's sample count
    /// before this observation.
    pub fn consider_value(&mut self, value: f64, count: u64) {
        match self {
            Estimator::Disabled => {}
            Estimator::Reservoir(r) => r.consider_value(value),
            Estimator::Decay(d) => d.consider_value(value, count),
        }
    }

    /// Resets to the single-sample state.
    pub fn set(&mut self, value: f64) {
        match self {
            Estimator::Disabled => {}
            Estimator::Reservoir(r) => r.set(value),
            Estimator::Decay(d) => d.set(value),
        }
    }

    /// Folds `other` into `self`, weighting by the respective tick counts.
    /// `other` is never mutated. Mixed flavors cannot occur within one
    /// metric; a mismatched merge is ignored.
    pub fn merge_from(&mut self, other: &Estimator) {
        match (self, other) {
            (Estimator::Disabled, _) => {}
            (Estimator::Reservoir(a), Estimator::Reservoir(b)) => a.merge_from(b),
            (Estimator::Decay(a), Estimator::Decay(b)) => a.merge_from(b),
            (a, b) => debug_assert!(
                false,
                "estimator flavor mismatch in merge: {:?} vs {:?}",
                a.flavor(),
                b.flavor()
            ),
        }
    }

    /// Approximated value of percentile `p`.
    ///
    /// `Disabled` returns `None`; so does `Decay` for a percentile outside
    /// its tracked set (no interpolation). `Reservoir` always answers, with
    /// `0.0` when no samples have been retained.
    pub fn get_percentile(&self, p: f64) -> Option<f64> {
        match self {
            Estimator::Disabled => None,
            Estimator::Reservoir(r) => Some(r.percentile(p)),
            Estimator::Decay(d) => d.percentile(p),
        }
    }

    /// Batched variant of [`get_percentile`](Self::get_percentile): a dirty
    /// reservoir is sorted once for the whole batch.
    pub fn get_percentiles(&self, ps: &[f64]) -> Vec<Option<f64>> {
        match self {
            Estimator::Disabled => vec![None; ps.len()],
            Estimator::Reservoir(r) => {
                let sorted = r.sorted();
                ps.iter()
                    .map(|&p| Some(Reservoir::index_sorted(&sorted, p)))
                    .collect()
            }
            Estimator::Decay(d) => ps.iter().map(|&p| d.percentile(p)).collect(),
        }
    }

    /// Sorts any lazily maintained state so subsequent immutable reads are
    /// cheap. Called once per accumulator right before publish.
    pub fn seal(&mut self) {
        if let Estimator::Reservoir(r) = self {
            r.seal();
        }
    }

    /// Zeroes all internal state while keeping flavor and capacity. Part of
    /// the pool contract: an estimator must pass through `reset` before the
    /// owning accumulator is reused.
    pub fn reset(&mut self) {
        match self {
            Estimator::Disabled => {}
            Estimator::Reservoir(r) => r.reset(),
            Estimator::Decay(d) => d.reset(),
        }
    }
}

// ============================================================================
// Reservoir (Algorithm R)
// ============================================================================

/// Fixed-capacity uniform sample of the observed stream.
///
/// While the buffer is not full every sample is appended; once full, sample
/// number `t` replaces a uniformly random slot with probability
/// `capacity / t`. Percentile queries index the sorted buffer; sorting is
/// deferred behind a dirty flag.
#[derive(Debug, Clone)]
pub struct Reservoir {
    data: Vec<f64>,
    capacity: usize,
    /// Samples ever offered, the `t` of Algorithm R.
    ticks: u64,
    dirty: bool,
    rng: SmallRng,
}

impl Reservoir {
    pub fn new(capacity: usize) -> Self {
        Self {
            data: Vec::with_capacity(capacity),
            capacity,
            ticks: 0,
            dirty: false,
            rng: SmallRng::from_entropy(),
        }
    }

    #[cfg(test)]
    pub(crate) fn with_seed(capacity: usize, seed: u64) -> Self {
        let mut r = Self::new(capacity);
        r.rng = SmallRng::seed_from_u64(seed);
        r
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    pub fn consider_value(&mut self, value: f64) {
        self.ticks += 1;
        if self.data.len() < self.capacity {
            self.data.push(value);
            self.dirty = true;
            return;
        }
        if self.rng.gen_range(0..self.ticks) < self.capacity as u64 {
            let slot = self.rng.gen_range(0..self.capacity);
            self.data[slot] = value;
            self.dirty = true;
        }
    }

    pub fn set(&mut self, value: f64) {
        self.data.clear();
        self.data.push(value);
        self.ticks = 1;
        self.dirty = false;
    }

    /// Merges `other`'s sample into `self`, preserving the size-weighted
    /// statistical mixture. If the union fits the buffer it is a plain
    /// concatenation; otherwise the tail of the incoming buffer fills the
    /// spare capacity and the remaining incoming values overwrite a random
    /// permutation of existing slots with probability
    /// `other.ticks / (self.ticks + other.ticks)` each.
    pub fn merge_from(&mut self, other: &Reservoir) {
        if other.data.is_empty() {
            self.ticks += other.ticks;
            return;
        }
        if self.data.len() + other.data.len() <= self.capacity {
            self.data.extend_from_slice(&other.data);
        } else {
            let spare = self.capacity - self.data.len();
            let (head, tail) = other.data.split_at(other.data.len() - spare);
            self.data.extend_from_slice(tail);
            let keep = self.data.len() - spare;
            let p = other.ticks as f64 / (self.ticks + other.ticks) as f64;
            let mut slots: Vec<usize> = (0..keep).collect();
            // Fisher-Yates
            for i in (1..slots.len()).rev() {
                let j = self.rng.gen_range(0..=i);
                slots.swap(i, j);
            }
            for (&value, &slot) in head.iter().zip(slots.iter()) {
                if self.rng.gen::<f64>() < p {
                    self.data[slot] = value;
                }
            }
        }
        self.ticks += other.ticks;
        self.dirty = true;
    }

    /// Percentile over the retained sample; `0.0` when empty so callers
    /// always get a concrete number.
    pub fn percentile(&self, p: f64) -> f64 {
        Self::index_sorted(&self.sorted(), p)
    }

    fn index_sorted(sorted: &[f64], p: f64) -> f64 {
        if sorted.is_empty() {
            return 0.0;
        }
        let idx = ((sorted.len() as f64 * p) as usize).min(sorted.len() - 1);
        sorted[idx]
    }

    fn sorted(&self) -> std::borrow::Cow<'_, [f64]> {
        if !self.dirty {
            return std::borrow::Cow::Borrowed(&self.data);
        }
        let mut copy = self.data.clone();
        copy.sort_unstable_by(f64::total_cmp);
        std::borrow::Cow::Owned(copy)
    }

    pub fn seal(&mut self) {
        if self.dirty {
            self.data.sort_unstable_by(f64::total_cmp);
            self.dirty = false;
        }
    }

    pub fn reset(&mut self) {
        self.data.clear();
        self.ticks = 0;
        self.dirty = false;
    }
}

// ============================================================================
// Decay
// ============================================================================

/// One scalar guess per tracked percentile, nudged by every sample.
///
/// For a sample `v` against the current guess for percentile `p`:
/// `inertness = count / ITERATIONS_REQUIRED_PER_SECOND`; a coin weighted by
/// `p` picks the direction in which movement is "required". If `v` already
/// lies on the required side the guess stays put; otherwise the guess is
/// blended toward `v` with `inertness * p` (required greater) or
/// `inertness * (1 - p)` as the retained weight. The first sample seeds all
/// guesses. Stochastic and self-correcting, not a true order statistic.
#[derive(Debug, Clone)]
pub struct Decay {
    percentiles: Vec<f64>,
    estimates: Vec<f64>,
    /// Samples ever observed; the merge weight.
    ticks: u64,
    rng: SmallRng,
}

impl Decay {
    pub fn new(percentiles: &[f64]) -> Self {
        Self {
            percentiles: percentiles.to_vec(),
            estimates: vec![0.0; percentiles.len()],
            ticks: 0,
            rng: SmallRng::from_entropy(),
        }
    }

    #[cfg(test)]
    pub(crate) fn with_seed(percentiles: &[f64], seed: u64) -> Self {
        let mut d = Self::new(percentiles);
        d.rng = SmallRng::seed_from_u64(seed);
        d
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    pub fn consider_value(&mut self, value: f64, count: u64) {
        self.ticks += 1;
        if count == 0 {
            self.estimates.fill(value);
            return;
        }
        for i in 0..self.percentiles.len() {
            let p = self.percentiles[i];
            self.estimates[i] = Self::guess(&mut self.rng, self.estimates[i], value, count, p);
        }
    }

    /// The decay update rule. The "no move needed" branch (sample already on
    /// the required side) is load-bearing: calibration depends on it.
    fn guess(rng: &mut SmallRng, cur: f64, new: f64, count: u64, p: f64) -> f64 {
        let mut inertness = count as f64 / ITERATIONS_REQUIRED_PER_SECOND;
        let require_greater = rng.gen::<f64>() > p;
        if new > cur {
            if require_greater {
                return cur;
            }
        } else if !require_greater {
            return cur;
        }
        if require_greater {
            inertness *= p;
        } else {
            inertness *= 1.0 - p;
        }
        (cur * inertness + new) / (inertness + 1.0)
    }

    pub fn set(&mut self, value: f64) {
        self.estimates.fill(value);
        self.ticks = 1;
    }

    /// Weighted average of each tracked percentile by relative tick counts.
    /// Known approximation; calibration expects exactly this formula.
    pub fn merge_from(&mut self, other: &Decay) {
        if other.ticks == 0 {
            return;
        }
        let total = self.ticks + other.ticks;
        for i in 0..self.estimates.len() {
            self.estimates[i] = (self.estimates[i] * self.ticks as f64
                + other.estimates[i] * other.ticks as f64)
                / total as f64;
        }
        self.ticks = total;
    }

    /// `None` for a percentile outside the tracked set; no interpolation.
    pub fn percentile(&self, p: f64) -> Option<f64> {
        self.percentiles
            .iter()
            .position(|&tracked| (tracked - p).abs() < 1e-9)
            .map(|i| self.estimates[i])
    }

    pub fn reset(&mut self) {
        self.estimates.fill(0.0);
        self.ticks = 0;
    }
}
