//! The sequence-model capability consumed by the decoder.
//!
//! Both the draft and the target model are "a thing that maps a token
//! sequence to next-token logits". The decoder is generic over two
//! implementations of this trait; concrete models, mock tables, and test
//! stubs all satisfy it the same way.

use candle_core::Tensor;

use crate::error::{Error, Result};

/// A model that predicts next-token logits for a token sequence.
///
/// Implementations must be deterministic given their weights and the input
/// sequence, and must accept arbitrary non-empty prefixes: the decoder
/// evaluates distributions at multiple prefix lengths of the same
/// sequence. Internal caches are fine as long as they do not change the
/// numeric result.
pub trait SequenceModel {
    /// Logits for every position of `tokens`.
    ///
    /// Returns a `[seq_len, vocab_size]` tensor where row `i` holds the
    /// logits for the token following `tokens[..=i]`. This is the batched
    /// evaluation the verifier uses: one call covers all drafted
    /// positions.
    fn forward_all(&self, tokens: &[u32]) -> Result<Tensor>;

    /// Logits for the token following the whole sequence, `[vocab_size]`.
    ///
    /// The default implementation takes the last row of
    /// [`forward_all`](Self::forward_all).
    fn forward(&self, tokens: &[u32]) -> Result<Tensor> {
        if tokens.is_empty() {
            return Err(Error::Shape(
                "cannot evaluate an empty token sequence".to_string(),
            ));
        }
        let all = self.forward_all(tokens)?;
        let (seq_len, _vocab) = all.dims2()?;
        if seq_len != tokens.len() {
            return Err(Error::Shape(format!(
                "model returned {} rows for {} tokens",
                seq_len,
                tokens.len()
            )));
        }
        Ok(all.narrow(0, seq_len - 1, 1)?.squeeze(0)?)
    }
}

// Allow passing models by reference or box without re-wrapping.
impl<M: SequenceModel + ?Sized> SequenceModel for &M {
    fn forward_all(&self, tokens: &[u32]) -> Result<Tensor> {
        (**self).forward_all(tokens)
    }

    fn forward(&self, tokens: &[u32]) -> Result<Tensor> {
        (**self).forward(tokens)
    }
}

impl<M: SequenceModel + ?Sized> SequenceModel for Box<M> {
    fn forward_all(&self, tokens: &[u32]) -> Result<Tensor> {
        (**self).forward_all(tokens)
    }

    fn forward(&self, tokens: &[u32]) -> Result<Tensor> {
        (**self).forward(tokens)
    }
}
