//! Speculative decoding.
//!
//! Accelerates autoregressive generation from a large target model with a
//! cheap draft model, while provably preserving the target model's output
//! distribution.
//!
//! 1. **Propose**: the draft model extends the sequence by `gamma`
//!    speculative tokens, one autoregressive step at a time.
//!
//! 2. **Verify**: the target model scores the whole continuation in a
//!    single batched forward pass.
//!
//! 3. **Accept/reject**: each drafted token is kept with probability
//!    `min(1, p/q)`; the first rejection resamples one replacement from
//!    the residual distribution `max(p - q, 0)` and discards the rest of
//!    the round.
//!
//! ```text
//! Draft (gamma=4):  [prompt] -> t1 -> t2 -> t3 -> t4
//! Target verify:    [prompt, t1, t2, t3, t4] -> one forward pass
//! Accept/reject:    keep t1, t2, reject t3, resample -> t1, t2, t3'
//! ```

pub mod engine;
pub mod sampler;

pub use engine::{FinishReason, SpeculativeDecoder, StreamToken, TokenStream};
pub use sampler::{RejectionSampler, VerifyOutcome};
