//! Error types for each layer of the generation pipeline.
//!
//! Collaborators (tokenizer, scorer) have their own error enums so a backend
//! can report its failure precisely; [`GenerateError`] wraps them together
//! with the step at which generation was aborted.

use thiserror::Error;

/// Failures reported by a [`crate::tokenizer::Tokenizer`].
#[derive(Error, Debug)]
pub enum TokenizerError {
    #[error("cannot encode {ch:?} at byte offset {offset}")]
    Unencodable { offset: usize, ch: char },

    #[error("token id {id} is outside the vocabulary of {vocab_size}")]
    UnknownId { id: u32, vocab_size: usize },

    #[error("invalid vocabulary: {0}")]
    InvalidVocabulary(String),

    #[error("vocabulary I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("vocabulary JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Failures reported by a [`crate::scorer::Scorer`].
#[derive(Error, Debug)]
pub enum ScoreError {
    #[error("sequence of {len} tokens exceeds the maximum context of {max}")]
    ContextLength { len: usize, max: usize },

    #[error("token id {id} is outside the model vocabulary of {vocab_size}")]
    UnknownToken { id: u32, vocab_size: usize },

    #[error("scorer backend failure: {0}")]
    Backend(String),
}

/// Failures of the sampling policy for a single step.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SamplingError {
    #[error("score for token {id} is NaN")]
    NonFinite { id: u32 },

    #[error("degenerate distribution: {0}")]
    Degenerate(String),

    #[error("no candidates to sample from")]
    Empty,
}

/// Why a call to [`crate::decoder::Decoder::generate`] was aborted.
#[derive(Error, Debug)]
pub enum GenerateError {
    #[error("invalid parameters: {0}")]
    InvalidParams(String),

    #[error("tokenization failed: {0}")]
    Tokenization(#[from] TokenizerError),

    #[error("scoring failed at step {step}: {source}")]
    Scoring {
        step: usize,
        #[source]
        source: ScoreError,
    },

    #[error("scorer returned {got} scores at step {step}, tokenizer vocabulary has {expected}")]
    VocabMismatch {
        step: usize,
        expected: usize,
        got: usize,
    },

    #[error("sampling failed at step {step}: {source}")]
    Sampling {
        step: usize,
        #[source]
        source: SamplingError,
    },

    #[error("generation cancelled before step {step}")]
    Cancelled { step: usize },
}

/// Failures while reading or writing an 8-bit checkpoint.
#[derive(Error, Debug)]
pub enum CheckpointError {
    #[error("no model found at {0}")]
    NotFound(std::path::PathBuf),

    #[error("checkpoint I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("checkpoint truncated: needed {needed} bytes at offset {offset}, {available} available")]
    Truncated {
        offset: usize,
        needed: usize,
        available: usize,
    },

    #[error("checkpoint shape mismatch: {0}")]
    Shape(String),
}

/// Model shapes that cannot be built.
#[derive(Error, Debug)]
#[error("invalid model args: {0}")]
pub struct InvalidArgs(pub String);
