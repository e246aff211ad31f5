//! Temperature sampling primitives.
//!
//! Two sampling modes exist and they are distinct, not endpoints of one
//! formula:
//!
//! - **Temperature 0**: greedy decoding. The argmax of the raw logits is
//!   taken directly, with ties broken toward the lowest token id so the
//!   result is deterministic.
//! - **Temperature > 0**: logits are scaled by `1/temperature`,
//!   softmaxed, and one token is drawn from the resulting categorical
//!   distribution.

use candle_core::{Tensor, D};
use rand::distributions::{Distribution, WeightedIndex};
use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::error::{Error, Result};

/// Scale logits by `1/temperature` and softmax.
///
/// Works on `[vocab]` logits or `[k, vocab]` batches (softmax over the
/// last dimension). `temperature` must be positive; greedy decoding never
/// produces a distribution.
pub fn temperature_softmax(logits: &Tensor, temperature: f32) -> Result<Tensor> {
    if temperature <= 0.0 {
        return Err(Error::Config(format!(
            "softmax temperature must be positive, got {temperature}"
        )));
    }
    let scaled = (logits / temperature as f64)?;
    Ok(candle_nn::ops::softmax(&scaled, D::Minus1)?)
}

/// Index of the largest value, ties broken toward the lowest index.
pub fn argmax(values: &[f32]) -> u32 {
    let mut best = 0usize;
    let mut best_value = f32::NEG_INFINITY;
    for (i, &v) in values.iter().enumerate() {
        if v > best_value {
            best_value = v;
            best = i;
        }
    }
    best as u32
}

/// Token sampler implementing the two-mode temperature policy.
#[derive(Debug)]
pub struct Sampler {
    temperature: f32,
    rng: StdRng,
}

impl Sampler {
    /// Create a sampler with an entropy-seeded RNG.
    pub fn new(temperature: f32) -> Self {
        Self {
            temperature,
            rng: StdRng::from_entropy(),
        }
    }

    /// Create a sampler with a specific seed for reproducibility.
    pub fn with_seed(temperature: f32, seed: u64) -> Self {
        Self {
            temperature,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// The configured temperature.
    pub fn temperature(&self) -> f32 {
        self.temperature
    }

    /// Sample a token from `[vocab]` logits.
    pub fn sample(&mut self, logits: &Tensor) -> Result<u32> {
        if self.temperature == 0.0 {
            let values: Vec<f32> = logits.to_vec1()?;
            return Ok(argmax(&values));
        }
        let probs = temperature_softmax(logits, self.temperature)?;
        self.sample_probs(&probs)
    }

    /// Sample a token from an already-softmaxed `[vocab]` distribution.
    pub fn sample_probs(&mut self, probs: &Tensor) -> Result<u32> {
        let weights: Vec<f32> = probs.to_vec1()?;
        sample_categorical(&weights, &mut self.rng)
    }
}

/// Draw one index from unnormalized non-negative weights.
///
/// # Errors
///
/// Returns [`Error::DegenerateDistribution`] when the weights do not sum
/// to a positive finite value.
pub(crate) fn sample_categorical(weights: &[f32], rng: &mut StdRng) -> Result<u32> {
    let sum: f32 = weights.iter().sum();
    if !sum.is_finite() || sum <= 0.0 {
        return Err(Error::DegenerateDistribution(format!(
            "categorical weights sum to {sum}"
        )));
    }
    let dist = WeightedIndex::new(weights.iter().map(|&w| w as f64))
        .map_err(|e| Error::DegenerateDistribution(e.to_string()))?;
    Ok(dist.sample(rng) as u32)
}
