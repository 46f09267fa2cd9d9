//! Front-end configuration.
//!
//! Serialised as JSON. Every field has a default so `{}` is a valid config:
//! the reference model seeded with 0, the ASCII vocabulary, the default
//! sampling parameters and no history.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

use crate::model::{ModelArgs, Transformer};
use crate::params::SamplingParams;
use crate::quant::QTransformer;
use crate::scorer::Scorer;
use crate::tokenizer::{Tokenizer, VocabTokenizer};

/// A scorer that can be shared across threads.
pub type SharedScorer = Arc<dyn Scorer + Send + Sync>;
/// A tokenizer that can be shared across threads.
pub type SharedTokenizer = Arc<dyn Tokenizer + Send + Sync>;

/// Ranges the front-end accepts for user-supplied parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UiBounds {
    pub min_steps: usize,
    pub max_steps: usize,
    /// Exclusive lower bound is 0; this is the inclusive upper bound.
    pub max_temperature: f32,
    pub min_top_k: usize,
    pub max_top_k: usize,
}

impl Default for UiBounds {
    fn default() -> Self {
        Self {
            min_steps: 10,
            max_steps: 200,
            max_temperature: 2.0,
            min_top_k: 1,
            max_top_k: 100,
        }
    }
}

impl UiBounds {
    /// Describe the first parameter outside the bounds, if any.
    pub fn check(&self, p: &SamplingParams) -> Result<(), String> {
        if p.max_steps < self.min_steps || p.max_steps > self.max_steps {
            return Err(format!(
                "max length {} is outside [{}, {}]",
                p.max_steps, self.min_steps, self.max_steps
            ));
        }
        if !(p.temperature > 0.0 && p.temperature <= self.max_temperature) {
            return Err(format!(
                "temperature {} is outside (0, {}]",
                p.temperature, self.max_temperature
            ));
        }
        if p.top_k < self.min_top_k || p.top_k > self.max_top_k {
            return Err(format!(
                "top-k {} is outside [{}, {}]",
                p.top_k, self.min_top_k, self.max_top_k
            ));
        }
        Ok(())
    }
}

/// Everything the binaries need to build a generator.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Shape and seed of the reference model, used when no checkpoint is set.
    pub model: ModelArgs,
    /// 8-bit checkpoint written by `quantize`.
    pub checkpoint: Option<PathBuf>,
    /// Context limit applied to a loaded checkpoint.
    pub checkpoint_max_seq_len: Option<usize>,
    /// JSON array of vocabulary pieces. Defaults to the ASCII vocabulary.
    pub vocab: Option<PathBuf>,
    pub defaults: SamplingParams,
    pub bounds: UiBounds,
    /// SQLite file for the generation history.
    pub history: Option<PathBuf>,
    /// Fixed seed for reproducible sessions.
    pub seed: Option<u64>,
}

impl AppConfig {
    /// Save config to a JSON file.
    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)
            .with_context(|| format!("writing config {}", path.display()))?;
        Ok(())
    }

    /// Load config from a JSON file.
    pub fn load(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let config = serde_json::from_str(&json)
            .with_context(|| format!("parsing config {}", path.display()))?;
        Ok(config)
    }

    /// Load from `path` when given, otherwise use the defaults.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(p) => Self::load(p),
            None => Ok(Self::default()),
        }
    }

    pub fn load_tokenizer(&self) -> Result<SharedTokenizer> {
        let tokenizer = match &self.vocab {
            Some(path) => VocabTokenizer::load(path)
                .with_context(|| format!("loading vocabulary {}", path.display()))?,
            None => VocabTokenizer::ascii(),
        };
        Ok(Arc::new(tokenizer))
    }

    /// The checkpoint when configured, otherwise the seeded reference model.
    pub fn load_scorer(&self) -> Result<SharedScorer> {
        match &self.checkpoint {
            Some(path) => {
                let mut model = QTransformer::load_mmap(path)?;
                if let Some(max) = self.checkpoint_max_seq_len {
                    model = model.with_max_seq_len(max);
                }
                Ok(Arc::new(model))
            }
            None => Ok(Arc::new(Transformer::new(self.model.clone())?)),
        }
    }

    /// Tokenizer and scorer, checked to agree on the vocabulary size.
    pub fn load_collaborators(&self) -> Result<(SharedTokenizer, SharedScorer)> {
        let tokenizer = self.load_tokenizer()?;
        let scorer = self.load_scorer()?;
        if tokenizer.vocab_size() != scorer.vocab_size() {
            bail!(
                "tokenizer has {} pieces but the model scores {} tokens",
                tokenizer.vocab_size(),
                scorer.vocab_size()
            );
        }
        Ok((tokenizer, scorer))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn empty_json_is_default() {
        let config: AppConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.defaults, SamplingParams::default());
        assert_eq!(config.bounds, UiBounds::default());
        assert_eq!(config.model, ModelArgs::default());
        assert!(config.checkpoint.is_none());
    }

    #[test]
    fn save_then_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("textgen.json");
        let config = AppConfig {
            seed: Some(9),
            defaults: SamplingParams::new(40, 1.1, 5),
            ..Default::default()
        };
        config.save(&path).unwrap();
        let loaded = AppConfig::load(&path).unwrap();
        assert_eq!(loaded.seed, Some(9));
        assert_eq!(loaded.defaults, config.defaults);
    }

    #[test]
    fn default_collaborators_agree() {
        let (tokenizer, scorer) = AppConfig::default().load_collaborators().unwrap();
        assert_eq!(tokenizer.vocab_size(), scorer.vocab_size());
    }

    #[test]
    fn missing_checkpoint_is_reported() {
        let config = AppConfig {
            checkpoint: Some(PathBuf::from("/nonexistent/model.q8")),
            ..Default::default()
        };
        let err = config.load_scorer().err().unwrap();
        assert!(err.to_string().contains("no model found"));
    }

    #[test]
    fn vocab_mismatch_is_reported() {
        let config = AppConfig {
            model: ModelArgs { vocab_size: 50, ..Default::default() },
            ..Default::default()
        };
        assert!(config.load_collaborators().is_err());
    }

    #[test]
    fn bounds_match_front_end_sliders() {
        let b = UiBounds::default();
        assert!(b.check(&SamplingParams::default()).is_ok());
        assert!(b.check(&SamplingParams::new(9, 0.7, 50)).is_err());
        assert!(b.check(&SamplingParams::new(201, 0.7, 50)).is_err());
        assert!(b.check(&SamplingParams::new(100, 2.1, 50)).is_err());
        assert!(b.check(&SamplingParams::new(100, 0.0, 50)).is_err());
        assert!(b.check(&SamplingParams::new(100, 2.0, 100)).is_ok());
        assert!(b.check(&SamplingParams::new(100, 0.7, 101)).is_err());
    }
}
