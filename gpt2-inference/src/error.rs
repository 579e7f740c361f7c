//! Error conditions raised while loading a model or generating from it.

use thiserror::Error;

/// Typed failures of the inference core.
///
/// Functions in this crate return `anyhow::Result`; these variants are raised
/// into `anyhow::Error` so callers can still `downcast_ref::<InferenceError>()`.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum InferenceError {
    #[error("File not found: {path}")]
    MissingFile { path: String },

    #[error("Truncated {what}: need {needed} bytes, have {available}")]
    TruncatedRead { what: String, needed: usize, available: usize },

    #[error("Failed to allocate {len} elements for {what}")]
    AllocationFailure { what: &'static str, len: usize },

    #[error("Invalid model configuration: {0}")]
    InvalidConfig(String),

    #[error("Weight buffer size mismatch: configuration implies {expected} floats, file holds {actual}")]
    WeightSizeMismatch { expected: usize, actual: usize },

    #[error("Position {position} exceeds block size {block_size}")]
    SequenceTooLong { position: usize, block_size: usize },

    #[error("Prompt has {len} tokens, at most {max} allowed")]
    PromptTooLong { len: usize, max: usize },

    #[error("Invalid prompt: {0}")]
    InvalidPrompt(String),

    #[error("Token {token} is outside of vocabulary of size {vocab_size}")]
    TokenOutOfRange { token: usize, vocab_size: usize },
}
