//! Temperature and top-k sampling over a single score vector.
//!
//! The pipeline for one step is `scale -> top_k -> softmax -> sample`. Only
//! the candidates kept by [`top_k`] take part in normalisation and sampling;
//! every other token has zero probability.

use std::cmp::Ordering;

use rand::distributions::{Distribution, WeightedIndex};
use rand::Rng;

use crate::error::SamplingError;

/// A token kept after top-k truncation, with its temperature-scaled score.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Candidate {
    pub id: u32,
    pub score: f32,
}

/// Divide every score by `temperature`.
pub fn scale(scores: &mut [f32], temperature: f32) {
    let inv = 1.0 / temperature;
    for s in scores.iter_mut() {
        *s *= inv;
    }
}

/// Keep the `k` highest scores.
///
/// The result has exactly `min(k, scores.len())` entries, ordered by
/// descending score with ties going to the lower token id.
pub fn top_k(scores: &[f32], k: usize) -> Result<Vec<Candidate>, SamplingError> {
    if let Some(id) = scores.iter().position(|s| s.is_nan()) {
        return Err(SamplingError::NonFinite { id: id as u32 });
    }
    let mut indexed: Vec<Candidate> = scores
        .iter()
        .enumerate()
        .map(|(i, &score)| Candidate { id: i as u32, score })
        .collect();
    let k = k.min(indexed.len());
    if k == 0 {
        return Err(SamplingError::Empty);
    }
    if k < indexed.len() {
        indexed.select_nth_unstable_by(k - 1, by_rank);
        indexed.truncate(k);
    }
    indexed.sort_unstable_by(by_rank);
    Ok(indexed)
}

fn by_rank(a: &Candidate, b: &Candidate) -> Ordering {
    b.score
        .partial_cmp(&a.score)
        .unwrap_or(Ordering::Equal)
        .then(a.id.cmp(&b.id))
}

/// Softmax restricted to `candidates`.
pub fn softmax(candidates: &[Candidate]) -> Result<Vec<f32>, SamplingError> {
    let max = candidates
        .iter()
        .map(|c| c.score)
        .fold(f32::NEG_INFINITY, f32::max);
    if candidates.is_empty() {
        return Err(SamplingError::Empty);
    }
    if !max.is_finite() {
        return Err(SamplingError::Degenerate(format!(
            "highest retained score is {max}"
        )));
    }
    let mut probs: Vec<f32> = candidates.iter().map(|c| (c.score - max).exp()).collect();
    let sum: f32 = probs.iter().sum();
    if !(sum.is_finite() && sum > 0.0) {
        return Err(SamplingError::Degenerate(format!(
            "probability mass sums to {sum}"
        )));
    }
    for p in &mut probs {
        *p /= sum;
    }
    Ok(probs)
}

/// Draw one token id from `candidates` weighted by `probs`.
pub fn sample<R: Rng + ?Sized>(
    candidates: &[Candidate],
    probs: &[f32],
    rng: &mut R,
) -> Result<u32, SamplingError> {
    if candidates.is_empty() {
        return Err(SamplingError::Empty);
    }
    let dist = WeightedIndex::new(probs)
        .map_err(|e| SamplingError::Degenerate(e.to_string()))?;
    Ok(candidates[dist.sample(rng)].id)
}

/// Temperature plus top-k policy for one decoding step.
#[derive(Debug, Clone, Copy)]
pub struct TopKSampler {
    temperature: f32,
    top_k: usize,
}

impl TopKSampler {
    pub fn new(temperature: f32, top_k: usize) -> Self {
        Self { temperature, top_k }
    }

    /// Retained candidates and their probabilities for `scores`.
    ///
    /// `scores` is consumed: it is scaled in place.
    pub fn distribution(
        &self,
        mut scores: Vec<f32>,
    ) -> Result<(Vec<Candidate>, Vec<f32>), SamplingError> {
        scale(&mut scores, self.temperature);
        let candidates = top_k(&scores, self.top_k)?;
        let probs = softmax(&candidates)?;
        Ok((candidates, probs))
    }

    pub fn sample<R: Rng + ?Sized>(
        &self,
        scores: Vec<f32>,
        rng: &mut R,
    ) -> Result<u32, SamplingError> {
        let (candidates, probs) = self.distribution(scores)?;
        sample(&candidates, &probs, rng)
    }
}
