//! Injectable randomness for pacing decisions.

use rand::Rng;

/// Source of randomness behind every probabilistic pacing branch.
///
/// Kept as a trait so tests can script an exact sequence of outcomes and
/// assert which branch was taken.
pub trait RandomSource: Send {
    /// Return true with probability `p`.
    fn chance(&mut self, p: f64) -> bool;

    /// Uniform sample in `[min, max)`.
    fn uniform(&mut self, min: f64, max: f64) -> f64;

    /// Uniform index in `[0, len)`. `len` must be non-zero.
    fn pick(&mut self, len: usize) -> usize;
}

/// Default source backed by the thread-local RNG.
#[derive(Debug, Default)]
pub struct ThreadRandom;

impl RandomSource for ThreadRandom {
    fn chance(&mut self, p: f64) -> bool {
        rand::rng().random_bool(p.clamp(0.0, 1.0))
    }

    fn uniform(&mut self, min: f64, max: f64) -> f64 {
        if max <= min {
            return min;
        }
        rand::rng().random_range(min..max)
    }

    fn pick(&mut self, len: usize) -> usize {
        rand::rng().random_range(0..len)
    }
}

/// Scripted source that replays queued outcomes, for deterministic tests.
///
/// `uniform` pops a fraction in `[0, 1]` and maps it onto the requested
/// range; an exhausted queue yields the low bound / `false` / index 0.
#[cfg(test)]
#[derive(Debug, Default)]
pub struct ScriptedRandom {
    pub chances: std::collections::VecDeque<bool>,
    pub fractions: std::collections::VecDeque<f64>,
    pub picks: std::collections::VecDeque<usize>,
}

#[cfg(test)]
impl RandomSource for ScriptedRandom {
    fn chance(&mut self, _p: f64) -> bool {
        self.chances.pop_front().unwrap_or(false)
    }

    fn uniform(&mut self, min: f64, max: f64) -> f64 {
        let f = self.fractions.pop_front().unwrap_or(0.0);
        min + (max - min) * f
    }

    fn pick(&mut self, len: usize) -> usize {
        self.picks
            .pop_front()
            .unwrap_or(0)
            .min(len.saturating_sub(1))
    }
}
