//! Autoregressive decoding loop.
//!
//! One call of [`Decoder::generate`] encodes the prompt once, then for every
//! step scores the whole sequence, samples the next id with
//! [`TopKSampler`], appends it, decodes it on its own and checks the
//! paragraph-break stop condition. Single-token decoding is the authoritative
//! output: the returned text is the prompt plus the fragments joined in order.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use rand::Rng;
use tracing::{debug, trace};

use crate::error::GenerateError;
use crate::params::SamplingParams;
use crate::sampling::TopKSampler;
use crate::scorer::Scorer;
use crate::tokenizer::{Tokenizer, PARAGRAPH_BREAK};

/// Why generation ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The last fragment was the paragraph break.
    Sentinel,
    /// `max_steps` tokens were produced.
    MaxSteps,
}

/// Result of a successful `generate` call.
#[derive(Debug, Clone)]
pub struct Generation {
    /// Prompt followed by every generated fragment.
    pub text: String,
    pub prompt_ids: Vec<u32>,
    pub generated_ids: Vec<u32>,
    pub fragments: Vec<String>,
    pub stop: StopReason,
}

impl Generation {
    /// Only the generated continuation.
    pub fn continuation(&self) -> String {
        self.fragments.concat()
    }
}

/// Cloneable flag checked by the decoder between steps.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Borrows a tokenizer and a scorer; holds no per-call state.
pub struct Decoder<T, S> {
    tokenizer: T,
    scorer: S,
}

impl<T: Tokenizer, S: Scorer> Decoder<T, S> {
    pub fn new(tokenizer: T, scorer: S) -> Self {
        Self { tokenizer, scorer }
    }

    pub fn tokenizer(&self) -> &T {
        &self.tokenizer
    }

    pub fn scorer(&self) -> &S {
        &self.scorer
    }

    /// Extend `prompt` with sampled tokens.
    pub fn generate<R: Rng + ?Sized>(
        &self,
        prompt: &str,
        params: &SamplingParams,
        rng: &mut R,
    ) -> Result<Generation, GenerateError> {
        self.run(prompt, params, rng, None)
    }

    /// Like [`Decoder::generate`] but aborts once `cancel` is set.
    pub fn generate_with_cancel<R: Rng + ?Sized>(
        &self,
        prompt: &str,
        params: &SamplingParams,
        rng: &mut R,
        cancel: &CancelToken,
    ) -> Result<Generation, GenerateError> {
        self.run(prompt, params, rng, Some(cancel))
    }

    fn run<R: Rng + ?Sized>(
        &self,
        prompt: &str,
        params: &SamplingParams,
        rng: &mut R,
        cancel: Option<&CancelToken>,
    ) -> Result<Generation, GenerateError> {
        params.validate()?;
        let vocab_size = self.tokenizer.vocab_size();
        let sampler = TopKSampler::new(params.temperature, params.effective_top_k(vocab_size));

        let prompt_ids = self.tokenizer.encode(prompt)?;
        debug!(
            prompt_tokens = prompt_ids.len(),
            max_steps = params.max_steps,
            temperature = params.temperature,
            top_k = params.top_k,
            "starting generation"
        );

        let mut sequence = prompt_ids.clone();
        let mut fragments = Vec::new();
        let mut stop = StopReason::MaxSteps;

        for step in 1..=params.max_steps {
            if cancel.is_some_and(CancelToken::is_cancelled) {
                return Err(GenerateError::Cancelled { step });
            }

            let scores = self
                .scorer
                .score(&sequence)
                .map_err(|source| GenerateError::Scoring { step, source })?;
            if scores.len() != vocab_size {
                return Err(GenerateError::VocabMismatch {
                    step,
                    expected: vocab_size,
                    got: scores.len(),
                });
            }

            let next = sampler
                .sample(scores, rng)
                .map_err(|source| GenerateError::Sampling { step, source })?;
            sequence.push(next);

            let fragment = self.tokenizer.decode(&[next])?;
            trace!(step, token = next, fragment = ?fragment, "sampled");
            let done = fragment == PARAGRAPH_BREAK;
            fragments.push(fragment);
            if done {
                stop = StopReason::Sentinel;
                break;
            }
        }

        debug!(generated = fragments.len(), stop = ?stop, "generation finished");

        let mut text = String::with_capacity(prompt.len() + fragments.iter().map(String::len).sum::<usize>());
        text.push_str(prompt);
        for f in &fragments {
            text.push_str(f);
        }
        let generated_ids = sequence.split_off(prompt_ids.len());
        Ok(Generation {
            text,
            prompt_ids,
            generated_ids,
            fragments,
            stop,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ScoreError;
    use crate::tokenizer::VocabTokenizer;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::cell::Cell;

    /// Always prefers one fixed token.
    struct Fixed {
        vocab: usize,
        favourite: u32,
    }

    impl Scorer for Fixed {
        fn score(&self, _ids: &[u32]) -> Result<Vec<f32>, ScoreError> {
            let mut s = vec![0.0; self.vocab];
            s[self.favourite as usize] = 10.0;
            Ok(s)
        }
        fn vocab_size(&self) -> usize {
            self.vocab
        }
    }

    /// Counts calls and returns the wrong number of scores.
    struct Short(Cell<usize>);

    impl Scorer for Short {
        fn score(&self, _ids: &[u32]) -> Result<Vec<f32>, ScoreError> {
            self.0.set(self.0.get() + 1);
            Ok(vec![0.0; 3])
        }
        fn vocab_size(&self) -> usize {
            3
        }
    }

    fn tokenizer() -> VocabTokenizer {
        VocabTokenizer::ascii()
    }

    #[test]
    fn greedy_appends_favourite() {
        let t = tokenizer();
        let x = t.id_of("x").unwrap();
        let decoder = Decoder::new(&t, Fixed { vocab: 98, favourite: x });
        let mut rng = StdRng::seed_from_u64(0);
        let g = decoder
            .generate("ab", &SamplingParams::new(4, 0.7, 1), &mut rng)
            .unwrap();
        assert_eq!(g.text, "abxxxx");
        assert_eq!(g.continuation(), "xxxx");
        assert_eq!(g.generated_ids, vec![x; 4]);
        assert_eq!(g.prompt_ids.len(), 2);
        assert_eq!(g.stop, StopReason::MaxSteps);
    }

    #[test]
    fn invalid_params_fail_before_scoring() {
        let t = tokenizer();
        let scorer = Short(Cell::new(0));
        let decoder = Decoder::new(&t, &scorer);
        let mut rng = StdRng::seed_from_u64(0);
        let err = decoder
            .generate("a", &SamplingParams::new(0, 1.0, 1), &mut rng)
            .unwrap_err();
        assert!(matches!(err, GenerateError::InvalidParams(_)));
        assert_eq!(scorer.0.get(), 0);
    }

    #[test]
    fn vocab_mismatch_is_reported() {
        let t = tokenizer();
        let decoder = Decoder::new(&t, Short(Cell::new(0)));
        let mut rng = StdRng::seed_from_u64(0);
        let err = decoder
            .generate("a", &SamplingParams::new(3, 1.0, 1), &mut rng)
            .unwrap_err();
        assert!(matches!(
            err,
            GenerateError::VocabMismatch { step: 1, expected: 98, got: 3 }
        ));
    }

    #[test]
    fn unencodable_prompt_is_tokenization_error() {
        let t = tokenizer();
        let decoder = Decoder::new(&t, Fixed { vocab: 98, favourite: 0 });
        let mut rng = StdRng::seed_from_u64(0);
        let err = decoder
            .generate("naïve", &SamplingParams::default(), &mut rng)
            .unwrap_err();
        assert!(matches!(err, GenerateError::Tokenization(_)));
    }

    #[test]
    fn cancelled_token_aborts_before_first_step() {
        let t = tokenizer();
        let decoder = Decoder::new(&t, Fixed { vocab: 98, favourite: 0 });
        let mut rng = StdRng::seed_from_u64(0);
        let cancel = CancelToken::new();
        cancel.cancel();
        let err = decoder
            .generate_with_cancel("a", &SamplingParams::default(), &mut rng, &cancel)
            .unwrap_err();
        assert!(matches!(err, GenerateError::Cancelled { step: 1 }));
    }
}
