//! Speculative decoding engine.
//!
//! Drives the draft-then-verify loop: the draft model proposes `gamma`
//! tokens per round, the target model scores the whole continuation in
//! one batched evaluation, and rejection sampling keeps a prefix of the
//! proposals (plus at most one corrected token).
//!
//! ```text
//! Sequence: [The, quick, brown]
//! Draft:    [fox, jumps, over, the]     <- gamma speculative tokens
//! Target:   one forward pass over all positions
//! Round:    [fox, jumps, over']         <- 2 accepted + 1 resampled
//! ```
//!
//! Tokens reach the caller through a lazy [`TokenStream`]; dropping the
//! stream is the only cancellation mechanism. A fully accepted round ends
//! without drawing a bonus token from the target's next-step
//! distribution: the next round simply proposes from the extended
//! sequence.

use std::collections::VecDeque;

use candle_core::Tensor;

use super::sampler::RejectionSampler;
use crate::config::GenerationConfig;
use crate::error::{Error, Result};
use crate::model::SequenceModel;
use crate::sampling::{self, temperature_softmax, Sampler};

/// Why a generation stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinishReason {
    /// A configured stop token was emitted.
    StopToken,
    /// The emitted count reached `max_tokens`.
    MaxTokens,
}

/// One emitted token, optionally paired with its log-probability under
/// the target model at its position.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StreamToken {
    /// The token id.
    pub token: u32,
    /// `ln p_target(token)` from the round's target evaluation, present
    /// when the config requests log-probabilities.
    pub logprob: Option<f32>,
}

/// Speculative decoder over a draft/target model pair.
///
/// Both models implement [`SequenceModel`]; the draft is cheap and
/// approximate, the target is authoritative. The emitted token stream is
/// distributed according to the target model regardless of draft quality.
pub struct SpeculativeDecoder<D, T> {
    draft: D,
    target: T,
    config: GenerationConfig,
    sampler: Sampler,
    rejection: RejectionSampler,
}

impl<D: SequenceModel, T: SequenceModel> SpeculativeDecoder<D, T> {
    /// Create a decoder with entropy-seeded RNGs.
    pub fn new(draft: D, target: T, config: GenerationConfig) -> Self {
        let sampler = Sampler::new(config.temperature);
        Self {
            draft,
            target,
            config,
            sampler,
            rejection: RejectionSampler::new(),
        }
    }

    /// Create a decoder with seeded RNGs for reproducibility.
    pub fn with_seed(draft: D, target: T, config: GenerationConfig, seed: u64) -> Self {
        let sampler = Sampler::with_seed(config.temperature, seed);
        Self {
            draft,
            target,
            config,
            sampler,
            rejection: RejectionSampler::with_seed(seed.wrapping_add(1)),
        }
    }

    /// The generation configuration.
    pub fn config(&self) -> &GenerationConfig {
        &self.config
    }

    /// Start a generation from `prompt`.
    ///
    /// The config and prompt are checked here, before any model call; the
    /// returned [`TokenStream`] lazily produces tokens until a stop token
    /// or the `max_tokens` budget ends it. Each call starts a fresh
    /// stream; streams are single-pass and cannot be restarted.
    ///
    /// # Errors
    ///
    /// [`Error::Config`] for an invalid config or an empty prompt.
    pub fn generate(&mut self, prompt: &[u32]) -> Result<TokenStream<'_, D, T>> {
        self.config.validate()?;
        if prompt.is_empty() {
            return Err(Error::Config("prompt must not be empty".to_string()));
        }

        Ok(TokenStream {
            decoder: self,
            tokens: prompt.to_vec(),
            pending: VecDeque::new(),
            num_generated: 0,
            finish: None,
            failed: false,
        })
    }

    /// Run one draft + verify round on top of `tokens`.
    ///
    /// Returns at least one and at most `gamma` validated tokens.
    fn round(&mut self, tokens: &[u32]) -> Result<Vec<StreamToken>> {
        let gamma = self.config.gamma;
        let greedy = self.config.is_greedy();
        let n = tokens.len();

        // Propose: autoregressive chain of draft-model calls on a scratch
        // copy. The softmaxed draft distributions are kept for the accept
        // test; for a deterministic model this equals re-evaluating the
        // draft at each prefix.
        let mut scratch = tokens.to_vec();
        let mut drafted = Vec::with_capacity(gamma);
        let mut draft_rows = Vec::with_capacity(gamma);
        for _ in 0..gamma {
            let logits = self.draft.forward(&scratch)?;
            let token = if greedy {
                let values: Vec<f32> = logits.to_vec1()?;
                sampling::argmax(&values)
            } else {
                let probs = temperature_softmax(&logits, self.config.temperature)?;
                let token = self.sampler.sample_probs(&probs)?;
                draft_rows.push(probs);
                token
            };
            drafted.push(token);
            scratch.push(token);
        }

        // Verify: one batched target evaluation over the whole scratch
        // sequence. Row n-1+i holds the target logits conditioned on
        // everything before drafted position i.
        let all_logits = self.target.forward_all(&scratch)?;
        let (rows, _vocab) = all_logits.dims2()?;
        if rows != scratch.len() {
            return Err(Error::Shape(format!(
                "target returned {rows} rows for {} tokens",
                scratch.len()
            )));
        }
        let target_rows = all_logits.narrow(0, n - 1, gamma)?;

        let outcome = if greedy {
            self.rejection.verify_greedy(&drafted, &target_rows)?
        } else {
            let draft_probs = Tensor::stack(&draft_rows, 0)?;
            let target_probs = temperature_softmax(&target_rows, self.config.temperature)?;
            self.rejection.verify(&drafted, &draft_probs, &target_probs)?
        };

        // Log-probabilities come from the same target evaluation, without
        // temperature scaling.
        let logprobs = if self.config.return_logprobs {
            Some(candle_nn::ops::log_softmax(&target_rows, candle_core::D::Minus1)?)
        } else {
            None
        };
        let logprob_at = |position: usize, token: u32| -> Result<Option<f32>> {
            match &logprobs {
                Some(lp) => {
                    let row: Vec<f32> = lp.narrow(0, position, 1)?.squeeze(0)?.to_vec1()?;
                    Ok(Some(row[token as usize]))
                }
                None => Ok(None),
            }
        };

        let mut out = Vec::with_capacity(outcome.len());
        for (j, &token) in drafted.iter().take(outcome.accepted).enumerate() {
            out.push(StreamToken {
                token,
                logprob: logprob_at(j, token)?,
            });
        }
        if let Some(token) = outcome.replacement {
            out.push(StreamToken {
                token,
                logprob: logprob_at(outcome.accepted, token)?,
            });
        }

        Ok(out)
    }
}

/// Lazy stream of generated tokens.
///
/// Single-pass cooperative generator: each `next()` call is a suspension
/// point, and a new draft/verify round only runs once every token from
/// the previous round has been consumed. The underlying sequence only
/// ever contains emitted (validated) tokens; provisional drafts live on a
/// per-round scratch copy.
pub struct TokenStream<'a, D, T> {
    decoder: &'a mut SpeculativeDecoder<D, T>,
    tokens: Vec<u32>,
    pending: VecDeque<StreamToken>,
    num_generated: usize,
    finish: Option<FinishReason>,
    failed: bool,
}

impl<D: SequenceModel, T: SequenceModel> TokenStream<'_, D, T> {
    /// Why the stream stopped, once it has.
    pub fn finish_reason(&self) -> Option<FinishReason> {
        self.finish
    }

    /// Number of tokens emitted so far.
    pub fn num_generated(&self) -> usize {
        self.num_generated
    }

    /// The full sequence: prompt plus every emitted token.
    pub fn tokens(&self) -> &[u32] {
        &self.tokens
    }
}

impl<D: SequenceModel, T: SequenceModel> Iterator for TokenStream<'_, D, T> {
    type Item = Result<StreamToken>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finish.is_some() || self.failed {
            return None;
        }

        if self.pending.is_empty() {
            match self.decoder.round(&self.tokens) {
                Ok(round) => self.pending.extend(round),
                Err(e) => {
                    // Fatal: no partial tokens are emitted after an error.
                    self.failed = true;
                    return Some(Err(e));
                }
            }
        }

        let item = self.pending.pop_front()?;
        self.tokens.push(item.token);
        self.num_generated += 1;

        let max_tokens = self.decoder.config.max_tokens;
        if self.decoder.config.stop_tokens.contains(&item.token) {
            self.finish = Some(FinishReason::StopToken);
            self.pending.clear();
        } else if max_tokens > 0 && self.num_generated >= max_tokens {
            // Truncate immediately, even mid-round.
            self.finish = Some(FinishReason::MaxTokens);
            self.pending.clear();
        }

        Some(Ok(item))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;

    /// Model with the same fixed next-token distribution at every
    /// position, built from probabilities (logits are `ln p`).
    struct FixedModel {
        row: Vec<f32>,
    }

    impl FixedModel {
        fn new(probs: &[f32]) -> Self {
            Self {
                row: probs.iter().map(|&p| p.ln()).collect(),
            }
        }
    }

    impl SequenceModel for FixedModel {
        fn forward_all(&self, tokens: &[u32]) -> Result<Tensor> {
            let vocab = self.row.len();
            let flat: Vec<f32> = self
                .row
                .iter()
                .cycle()
                .take(vocab * tokens.len())
                .copied()
                .collect();
            Ok(Tensor::from_vec(flat, (tokens.len(), vocab), &Device::Cpu)?)
        }
    }

    #[test]
    fn test_generate_rejects_empty_prompt() {
        let config = GenerationConfig::new(vec![2]);
        let mut decoder = SpeculativeDecoder::with_seed(
            FixedModel::new(&[0.5, 0.5]),
            FixedModel::new(&[0.5, 0.5]),
            config,
            0,
        );
        assert!(decoder.generate(&[]).is_err());
    }

    #[test]
    fn test_generate_rejects_invalid_config() {
        let config = GenerationConfig::new(vec![2]).gamma(0);
        let mut decoder = SpeculativeDecoder::with_seed(
            FixedModel::new(&[0.5, 0.5]),
            FixedModel::new(&[0.5, 0.5]),
            config,
            0,
        );
        assert!(decoder.generate(&[0]).is_err());
    }

    #[test]
    fn test_stream_reports_progress() {
        let config = GenerationConfig::new(vec![99]).max_tokens(3).gamma(2);
        let mut decoder = SpeculativeDecoder::with_seed(
            FixedModel::new(&[0.25, 0.25, 0.25, 0.25]),
            FixedModel::new(&[0.25, 0.25, 0.25, 0.25]),
            config,
            42,
        );

        let mut stream = decoder.generate(&[0]).unwrap();
        assert_eq!(stream.num_generated(), 0);
        assert!(stream.finish_reason().is_none());

        let emitted: Vec<u32> = stream
            .by_ref()
            .map(|r| r.unwrap().token)
            .collect();
        assert_eq!(emitted.len(), 3);
        assert_eq!(stream.num_generated(), 3);
        assert_eq!(stream.finish_reason(), Some(FinishReason::MaxTokens));
        assert_eq!(stream.tokens().len(), 1 + 3);
    }
}
