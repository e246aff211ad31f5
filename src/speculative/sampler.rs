//! Rejection sampling for draft-token verification.
//!
//! For each drafted token the target probability `p` and draft
//! probability `q` of that exact token are compared: a uniform draw `u`
//! in `[0, 1)` accepts the token when `u < p/q`. Averaged over the
//! acceptance draw, the emitted token at each position is distributed
//! exactly according to the target model, no matter how poorly the draft
//! approximates it. A bad draft only costs extra target evaluations per
//! emitted token, never correctness.

use candle_core::Tensor;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::error::{Error, Result};
use crate::sampling::{self, sample_categorical};

/// Outcome of verifying one round of drafted tokens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifyOutcome {
    /// Number of drafted tokens accepted, in order from the front.
    pub accepted: usize,
    /// Replacement token sampled on the first rejection. `None` when the
    /// whole round was accepted; the round then ends with no extra token.
    pub replacement: Option<u32>,
}

impl VerifyOutcome {
    /// Total tokens this round contributes to the output.
    pub fn len(&self) -> usize {
        self.accepted + usize::from(self.replacement.is_some())
    }

    /// Whether the round contributes nothing (only possible for `k = 0`).
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Stochastic accept/reject verifier for drafted tokens.
#[derive(Debug)]
pub struct RejectionSampler {
    rng: StdRng,
}

impl Default for RejectionSampler {
    fn default() -> Self {
        Self::new()
    }
}

impl RejectionSampler {
    /// Create a sampler with an entropy-seeded RNG.
    pub fn new() -> Self {
        Self {
            rng: StdRng::from_entropy(),
        }
    }

    /// Create a sampler with a specific seed for reproducibility.
    pub fn with_seed(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Verify drafted tokens against the target distributions.
    ///
    /// `draft_probs` and `target_probs` are `[k, vocab]` rows of
    /// already-softmaxed probabilities, where row `i` is the distribution
    /// conditioned on everything before drafted position `i`.
    ///
    /// Positions are processed in order. A token with draft probability 0
    /// is always kept: the target assigned mass to a token the draft
    /// ruled out, so the ratio `p/q` is treated as infinite. The first
    /// rejection samples one replacement from the renormalized residual
    /// `max(p - q, 0)` and discards every later position, accepted or
    /// not.
    ///
    /// # Errors
    ///
    /// [`Error::Shape`] on mismatched dimensions or out-of-vocabulary
    /// draft tokens; [`Error::DegenerateDistribution`] when the residual
    /// has no positive finite mass (a model contract violation).
    pub fn verify(
        &mut self,
        draft_tokens: &[u32],
        draft_probs: &Tensor,
        target_probs: &Tensor,
    ) -> Result<VerifyOutcome> {
        let (k, vocab) = draft_probs.dims2()?;
        let (target_k, target_vocab) = target_probs.dims2()?;
        if k != draft_tokens.len() || target_k != k || target_vocab != vocab {
            return Err(Error::Shape(format!(
                "verify expects {} rows of [{k}, {vocab}], got target [{target_k}, {target_vocab}]",
                draft_tokens.len()
            )));
        }

        for (i, &token) in draft_tokens.iter().enumerate() {
            if token as usize >= vocab {
                return Err(Error::Shape(format!(
                    "draft token {token} outside vocabulary of {vocab}"
                )));
            }

            let p_row: Vec<f32> = target_probs.narrow(0, i, 1)?.squeeze(0)?.to_vec1()?;
            let q_row: Vec<f32> = draft_probs.narrow(0, i, 1)?.squeeze(0)?.to_vec1()?;
            let p = p_row[token as usize];
            let q = q_row[token as usize];

            if q > 0.0 {
                let u: f32 = self.rng.gen();
                if !(u < p / q) {
                    let replacement = self.sample_residual(&p_row, &q_row)?;
                    return Ok(VerifyOutcome {
                        accepted: i,
                        replacement: Some(replacement),
                    });
                }
            }
            // q == 0: always accept.
        }

        Ok(VerifyOutcome {
            accepted: k,
            replacement: None,
        })
    }

    /// Greedy verification for temperature 0.
    ///
    /// A drafted token is kept iff it equals the target argmax at its
    /// position; the first mismatch is replaced by that argmax. This is
    /// the accept/reject test specialized to one-hot distributions.
    pub fn verify_greedy(
        &self,
        draft_tokens: &[u32],
        target_logits: &Tensor,
    ) -> Result<VerifyOutcome> {
        let (k, _vocab) = target_logits.dims2()?;
        if k != draft_tokens.len() {
            return Err(Error::Shape(format!(
                "greedy verify expects {} target rows, got {k}",
                draft_tokens.len()
            )));
        }

        for (i, &token) in draft_tokens.iter().enumerate() {
            let row: Vec<f32> = target_logits.narrow(0, i, 1)?.squeeze(0)?.to_vec1()?;
            let best = sampling::argmax(&row);
            if token != best {
                return Ok(VerifyOutcome {
                    accepted: i,
                    replacement: Some(best),
                });
            }
        }

        Ok(VerifyOutcome {
            accepted: k,
            replacement: None,
        })
    }

    /// Sample a replacement token from `max(p - q, 0)`, renormalized.
    fn sample_residual(&mut self, p: &[f32], q: &[f32]) -> Result<u32> {
        let mut residual: Vec<f32> = p
            .iter()
            .zip(q.iter())
            .map(|(&pv, &qv)| (pv - qv).max(0.0))
            .collect();

        let mass: f32 = residual.iter().sum();
        if !mass.is_finite() || mass <= 0.0 {
            return Err(Error::DegenerateDistribution(format!(
                "residual distribution has mass {mass}"
            )));
        }
        for r in &mut residual {
            *r /= mass;
        }

        sample_categorical(&residual, &mut self.rng)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;

    fn rows(data: &[&[f32]]) -> Tensor {
        let vocab = data[0].len();
        let flat: Vec<f32> = data.iter().flat_map(|r| r.iter().copied()).collect();
        Tensor::from_vec(flat, (data.len(), vocab), &Device::Cpu).unwrap()
    }

    #[test]
    fn test_shape_mismatch_is_rejected() {
        let mut sampler = RejectionSampler::with_seed(1);
        let draft = rows(&[&[0.5, 0.5]]);
        let target = rows(&[&[0.5, 0.5], &[0.5, 0.5]]);
        assert!(sampler.verify(&[0], &draft, &target).is_err());
    }

    #[test]
    fn test_out_of_vocab_token_is_rejected() {
        let mut sampler = RejectionSampler::with_seed(1);
        let draft = rows(&[&[0.5, 0.5]]);
        let target = rows(&[&[0.5, 0.5]]);
        assert!(sampler.verify(&[9], &draft, &target).is_err());
    }

    #[test]
    fn test_identical_distributions_accept_everything() {
        let mut sampler = RejectionSampler::with_seed(1);
        let probs = rows(&[&[0.25; 4], &[0.25; 4], &[0.25; 4]]);
        let outcome = sampler.verify(&[0, 2, 3], &probs, &probs).unwrap();
        assert_eq!(outcome.accepted, 3);
        assert_eq!(outcome.replacement, None);
    }

    #[test]
    fn test_greedy_accepts_matching_argmax() {
        let sampler = RejectionSampler::with_seed(1);
        let logits = rows(&[&[0.0, 9.0, 0.0], &[9.0, 0.0, 0.0]]);
        let outcome = sampler.verify_greedy(&[1, 0], &logits).unwrap();
        assert_eq!(outcome.accepted, 2);
        assert_eq!(outcome.replacement, None);
    }

    #[test]
    fn test_greedy_replaces_first_mismatch() {
        let sampler = RejectionSampler::with_seed(1);
        let logits = rows(&[&[0.0, 9.0, 0.0], &[9.0, 0.0, 0.0], &[0.0, 0.0, 9.0]]);
        let outcome = sampler.verify_greedy(&[1, 2, 2], &logits).unwrap();
        assert_eq!(outcome.accepted, 1);
        assert_eq!(outcome.replacement, Some(0));
        assert_eq!(outcome.len(), 2);
    }

    #[test]
    fn test_degenerate_residual_surfaces_error() {
        let mut sampler = RejectionSampler::with_seed(1);
        // NaN target mass forces a rejection whose residual is NaN.
        let draft = rows(&[&[1.0, 0.0]]);
        let target = rows(&[&[f32::NAN, f32::NAN]]);
        let result = sampler.verify(&[0], &draft, &target);
        assert!(matches!(
            result,
            Err(Error::DegenerateDistribution(_))
        ));
    }
}
