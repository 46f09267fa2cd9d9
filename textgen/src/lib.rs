//! Prompt continuation by temperature and top-k sampling.
//!
//! [`decoder::Decoder`] drives the loop over any [`tokenizer::Tokenizer`]
//! and [`scorer::Scorer`]. The remaining modules provide runnable
//! collaborators, configuration, history and the front-end boundary used by
//! the binaries.

pub mod config;
pub mod decoder;
pub mod error;
pub mod frontend;
pub mod history;
pub mod model;
pub mod params;
pub mod quant;
pub mod sampling;
pub mod scorer;
pub mod tokenizer;

pub use decoder::{CancelToken, Decoder, Generation, StopReason};
pub use error::GenerateError;
pub use params::SamplingParams;
pub use scorer::Scorer;
pub use tokenizer::{Tokenizer, VocabTokenizer, PARAGRAPH_BREAK};
