//! Error types for specdec.

use thiserror::Error;

/// Result type alias for specdec operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for specdec.
#[derive(Error, Debug)]
pub enum Error {
    /// A model evaluation failed. Fatal for the in-flight generation;
    /// there is no valid partial round to recover from.
    #[error("model evaluation failed: {0}")]
    ModelEval(String),

    /// Caller configuration error, rejected before any model call.
    #[error("configuration error: {0}")]
    Config(String),

    /// A distribution violated the SequenceModel contract (e.g. residual
    /// mass that is not positive and finite).
    #[error("degenerate distribution: {0}")]
    DegenerateDistribution(String),

    /// Tensor shapes did not match what the protocol expects.
    #[error("shape mismatch: {0}")]
    Shape(String),

    /// Tensor operation error.
    #[error("tensor error: {0}")]
    Tensor(#[from] candle_core::Error),

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}
