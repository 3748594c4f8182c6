//! Probabilistic inline GC.
//!
//! A local `put` sweeps expired rows with a small fixed probability, which
//! amortises cleanup without a scheduler. Tests should either use
//! [`GcPolicy::always`] / [`GcPolicy::never`] or call the sweep directly.

use rand::Rng;

/// Default chance that a `put` triggers a sweep.
pub const DEFAULT_GC_PROBABILITY: f64 = 0.01;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GcPolicy {
    probability: f64,
}

impl GcPolicy {
    /// Probability is clamped to `[0, 1]`; NaN disables sweeping.
    pub fn new(probability: f64) -> Self {
        let probability = if probability.is_nan() {
            0.0
        } else {
            probability.clamp(0.0, 1.0)
        };
        Self { probability }
    }

    pub fn never() -> Self {
        Self::new(0.0)
    }

    pub fn always() -> Self {
        Self::new(1.0)
    }

    pub fn probability(&self) -> f64 {
        self.probability
    }

    /// Roll the dice for one `put`.
    pub fn should_sweep(&self) -> bool {
        if self.probability <= 0.0 {
            false
        } else if self.probability >= 1.0 {
            true
        } else {
            rand::rng().random_bool(self.probability)
        }
    }
}

impl Default for GcPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_GC_PROBABILITY)
    }
}
