//! The model seen from the decoder: token ids in, next-token scores out.

use std::sync::Arc;

use crate::error::ScoreError;

/// A frozen language model.
///
/// `score` receives the whole sequence so far and returns one real-valued
/// score per vocabulary entry for the position after the last token. An
/// empty sequence is valid and asks for the unconditioned distribution.
pub trait Scorer {
    fn score(&self, ids: &[u32]) -> Result<Vec<f32>, ScoreError>;
    fn vocab_size(&self) -> usize;
}

impl<S: Scorer + ?Sized> Scorer for &S {
    fn score(&self, ids: &[u32]) -> Result<Vec<f32>, ScoreError> {
        (**self).score(ids)
    }
    fn vocab_size(&self) -> usize {
        (**self).vocab_size()
    }
}

impl<S: Scorer + ?Sized> Scorer for Arc<S> {
    fn score(&self, ids: &[u32]) -> Result<Vec<f32>, ScoreError> {
        (**self).score(ids)
    }
    fn vocab_size(&self) -> usize {
        (**self).vocab_size()
    }
}

impl<S: Scorer + ?Sized> Scorer for Box<S> {
    fn score(&self, ids: &[u32]) -> Result<Vec<f32>, ScoreError> {
        (**self).score(ids)
    }
    fn vocab_size(&self) -> usize {
        (**self).vocab_size()
    }
}

/// Context-length and vocabulary checks shared by the bundled models.
pub fn check_sequence(ids: &[u32], vocab_size: usize, max_seq_len: usize) -> Result<(), ScoreError> {
    if ids.len() > max_seq_len {
        return Err(ScoreError::ContextLength {
            len: ids.len(),
            max: max_seq_len,
        });
    }
    if let Some(&id) = ids.iter().find(|&&id| id as usize >= vocab_size) {
        return Err(ScoreError::UnknownToken { id, vocab_size });
    }
    Ok(())
}
