//! Configuration types for specdec.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Generation configuration for speculative decoding.
///
/// Speculative decoding drafts `gamma` tokens per round with a small draft
/// model, then verifies them against the target model in a single forward
/// pass. Higher `gamma` can improve throughput when the draft model tracks
/// the target well, but wastes draft computation when many tokens are
/// rejected.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationConfig {
    /// Number of tokens to draft per round (typical range: 2-8).
    pub gamma: usize,

    /// Maximum number of tokens to emit. `0` means unbounded: generation
    /// runs until a stop token is produced.
    pub max_tokens: usize,

    /// Sampling temperature. `0.0` selects greedy decoding (argmax, ties
    /// broken toward the lowest token id); values above zero scale logits
    /// by `1/temperature` before the softmax.
    pub temperature: f32,

    /// Token ids that terminate generation when emitted. Must contain at
    /// least one id; an empty set would make an unbounded generation
    /// impossible to stop.
    pub stop_tokens: Vec<u32>,

    /// Pair each emitted token with its log-probability under the target
    /// model, taken from the same evaluation used for verification.
    pub return_logprobs: bool,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            gamma: 4,
            max_tokens: 256,
            temperature: 1.0,
            stop_tokens: Vec::new(),
            return_logprobs: false,
        }
    }
}

impl GenerationConfig {
    /// Create a config with the given stop tokens and defaults elsewhere.
    pub fn new(stop_tokens: impl Into<Vec<u32>>) -> Self {
        Self {
            stop_tokens: stop_tokens.into(),
            ..Default::default()
        }
    }

    /// Set the number of draft tokens per round.
    pub fn gamma(mut self, gamma: usize) -> Self {
        self.gamma = gamma;
        self
    }

    /// Set the maximum number of emitted tokens (`0` = unbounded).
    pub fn max_tokens(mut self, max_tokens: usize) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// Set the sampling temperature.
    pub fn temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    /// Enable or disable log-probability output.
    pub fn logprobs(mut self, enabled: bool) -> Self {
        self.return_logprobs = enabled;
        self
    }

    /// Parse a config from a JSON string.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Load a config from a JSON file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_json(&contents)
    }

    /// Check the config for caller errors.
    ///
    /// Called before any model evaluation; a generation never starts with
    /// an invalid config.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] when `gamma` is zero, the stop-token set
    /// is empty, or the temperature is negative or not finite.
    pub fn validate(&self) -> Result<()> {
        if self.gamma == 0 {
            return Err(Error::Config("gamma must be at least 1".to_string()));
        }
        if self.stop_tokens.is_empty() {
            return Err(Error::Config(
                "stop token set must not be empty".to_string(),
            ));
        }
        if !self.temperature.is_finite() || self.temperature < 0.0 {
            return Err(Error::Config(format!(
                "temperature must be finite and non-negative, got {}",
                self.temperature
            )));
        }
        Ok(())
    }

    /// Whether greedy (argmax) decoding is selected.
    pub fn is_greedy(&self) -> bool {
        self.temperature == 0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = GenerationConfig::default();
        assert_eq!(config.gamma, 4);
        assert_eq!(config.max_tokens, 256);
        assert_eq!(config.temperature, 1.0);
        assert!(!config.return_logprobs);
    }

    #[test]
    fn test_builder() {
        let config = GenerationConfig::new(vec![2])
            .gamma(8)
            .max_tokens(0)
            .temperature(0.7)
            .logprobs(true);

        assert_eq!(config.gamma, 8);
        assert_eq!(config.max_tokens, 0);
        assert_eq!(config.stop_tokens, vec![2]);
        assert!(config.return_logprobs);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_gamma() {
        let config = GenerationConfig::new(vec![2]).gamma(0);
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_validate_rejects_empty_stop_tokens() {
        let config = GenerationConfig::default();
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_validate_rejects_bad_temperature() {
        let negative = GenerationConfig::new(vec![2]).temperature(-0.5);
        assert!(negative.validate().is_err());

        let nan = GenerationConfig::new(vec![2]).temperature(f32::NAN);
        assert!(nan.validate().is_err());
    }

    #[test]
    fn test_greedy_flag() {
        assert!(GenerationConfig::new(vec![2]).temperature(0.0).is_greedy());
        assert!(!GenerationConfig::new(vec![2]).temperature(0.1).is_greedy());
    }

    #[test]
    fn test_from_json() {
        let json = r#"{
            "gamma": 5,
            "max_tokens": 32,
            "temperature": 0.0,
            "stop_tokens": [2, 100],
            "return_logprobs": true
        }"#;

        let config = GenerationConfig::from_json(json).unwrap();
        assert_eq!(config.gamma, 5);
        assert_eq!(config.max_tokens, 32);
        assert_eq!(config.stop_tokens, vec![2, 100]);
        assert!(config.is_greedy());
        assert!(config.return_logprobs);
    }
}
