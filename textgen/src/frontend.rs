//! Caller-facing boundary around the decoder.
//!
//! [`TextGenerator::respond`] never fails: any error from validation,
//! tokenization, scoring or sampling comes back as an `"Error: ..."` string
//! in place of the generated text.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::{info, warn};

use crate::config::{AppConfig, SharedScorer, SharedTokenizer, UiBounds};
use crate::decoder::{CancelToken, Decoder, Generation};
use crate::error::GenerateError;
use crate::history::GenerationLog;
use crate::params::SamplingParams;

/// One request from the user.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub prompt: String,
    pub params: SamplingParams,
    /// Overrides the generator's seed policy for this request.
    pub seed: Option<u64>,
}

impl GenerationRequest {
    pub fn new(prompt: impl Into<String>, params: SamplingParams) -> Self {
        Self {
            prompt: prompt.into(),
            params,
            seed: None,
        }
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }
}

/// How each request's random source is seeded.
#[derive(Debug)]
enum SeedPolicy {
    /// Fresh entropy per request.
    Entropy,
    /// Request `n` of the session uses `base + n`.
    Fixed { base: u64, next: AtomicU64 },
}

/// Shared, read-only collaborators plus the front-end policies.
///
/// Safe to share between threads: the model and tokenizer are never mutated
/// and only the history connection is locked.
pub struct TextGenerator {
    tokenizer: SharedTokenizer,
    scorer: SharedScorer,
    bounds: UiBounds,
    history: Option<Mutex<GenerationLog>>,
    seeds: SeedPolicy,
}

impl TextGenerator {
    pub fn new(tokenizer: SharedTokenizer, scorer: SharedScorer) -> Self {
        Self {
            tokenizer,
            scorer,
            bounds: UiBounds::default(),
            history: None,
            seeds: SeedPolicy::Entropy,
        }
    }

    /// Build from a config: load the collaborators, open the history.
    pub fn from_config(config: &AppConfig) -> anyhow::Result<Self> {
        let (tokenizer, scorer) = config.load_collaborators()?;
        let mut generator = Self::new(tokenizer, scorer).with_bounds(config.bounds);
        if let Some(seed) = config.seed {
            generator = generator.with_seed(seed);
        }
        if let Some(path) = &config.history {
            generator = generator.with_history(GenerationLog::open(path)?);
        }
        info!(
            vocab = generator.tokenizer.vocab_size(),
            history = config.history.is_some(),
            "generator ready"
        );
        Ok(generator)
    }

    pub fn with_bounds(mut self, bounds: UiBounds) -> Self {
        self.bounds = bounds;
        self
    }

    pub fn with_history(mut self, log: GenerationLog) -> Self {
        self.history = Some(Mutex::new(log));
        self
    }

    pub fn with_seed(mut self, base: u64) -> Self {
        self.seeds = SeedPolicy::Fixed {
            base,
            next: AtomicU64::new(0),
        };
        self
    }

    pub fn bounds(&self) -> &UiBounds {
        &self.bounds
    }

    /// Run `f` against the history, if one is configured.
    pub fn with_log<T>(&self, f: impl FnOnce(&GenerationLog) -> T) -> Option<T> {
        let log = self.history.as_ref()?;
        let guard = log.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        Some(f(&guard))
    }

    fn rng_for(&self, request: &GenerationRequest) -> StdRng {
        match (request.seed, &self.seeds) {
            (Some(seed), _) => StdRng::seed_from_u64(seed),
            (None, SeedPolicy::Fixed { base, next }) => {
                let n = next.fetch_add(1, Ordering::Relaxed);
                StdRng::seed_from_u64(base.wrapping_add(n))
            }
            (None, SeedPolicy::Entropy) => StdRng::from_entropy(),
        }
    }

    /// Typed result of a request.
    pub fn try_respond(&self, request: &GenerationRequest) -> Result<Generation, GenerateError> {
        self.try_respond_with_cancel(request, &CancelToken::new())
    }

    pub fn try_respond_with_cancel(
        &self,
        request: &GenerationRequest,
        cancel: &CancelToken,
    ) -> Result<Generation, GenerateError> {
        self.bounds
            .check(&request.params)
            .map_err(GenerateError::InvalidParams)?;
        let decoder = Decoder::new(&self.tokenizer, &self.scorer);
        let mut rng = self.rng_for(request);
        decoder.generate_with_cancel(&request.prompt, &request.params, &mut rng, cancel)
    }

    /// Generated text, or a human-readable error message.
    pub fn respond(&self, request: &GenerationRequest) -> String {
        self.respond_with_cancel(request, &CancelToken::new())
    }

    pub fn respond_with_cancel(&self, request: &GenerationRequest, cancel: &CancelToken) -> String {
        match self.reply(request, cancel) {
            Ok(g) => g.text,
            Err(message) => message,
        }
    }

    /// Run a request, record it in the history, and render any failure as
    /// the message shown to the user.
    pub fn reply(
        &self,
        request: &GenerationRequest,
        cancel: &CancelToken,
    ) -> Result<Generation, String> {
        let result = self
            .try_respond_with_cancel(request, cancel)
            .map_err(|e| {
                warn!(error = %e, "generation failed");
                format!("Error: {e}")
            });
        let (output, generated) = match &result {
            Ok(g) => (g.text.as_str(), g.generated_ids.len()),
            Err(message) => (message.as_str(), 0),
        };
        if let Some(Err(e)) = self.with_log(|log| {
            log.record(&request.prompt, &request.params, output, result.is_ok(), generated)
        }) {
            warn!(error = %e, "failed to record generation history");
        }
        result
    }
}
