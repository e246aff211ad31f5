//! specdec: speculative decoding for autoregressive token generation.
//!
//! A cheap draft model proposes several tokens per round; the
//! authoritative target model verifies them in one batched evaluation
//! with a rejection-sampling test that preserves the target's output
//! distribution exactly. Model internals stay outside this crate: both
//! models enter through the [`SequenceModel`] capability trait.

pub mod config;
pub mod error;

pub mod model;
pub mod sampling;
pub mod speculative;

pub use config::GenerationConfig;
pub use error::{Error, Result};
pub use model::SequenceModel;
pub use sampling::{temperature_softmax, Sampler};
pub use speculative::{
    FinishReason, RejectionSampler, SpeculativeDecoder, StreamToken, TokenStream, VerifyOutcome,
};
