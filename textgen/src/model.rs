//! Reference decoder-only transformer used as the default [`Scorer`].
//!
//! Weights are drawn from a seeded generator, so the same [`ModelArgs`]
//! always produce the same scores.

use ndarray::{s, Array1, Array2, Axis};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::error::{InvalidArgs, ScoreError};
use crate::scorer::{check_sequence, Scorer};

/// Configuration for the transformer model.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelArgs {
    /// Maximum sequence length supported.
    pub max_seq_len: usize,
    /// Vocabulary size.
    pub vocab_size: usize,
    /// Embedding/hidden dimension.
    pub dim: usize,
    /// Number of layers.
    pub n_layers: usize,
    /// Number of attention heads.
    pub n_heads: usize,
    /// Hidden dimension of the feed-forward network.
    pub hidden_dim: usize,
    /// Seed for weight initialisation.
    pub seed: u64,
}

impl Default for ModelArgs {
    fn default() -> Self {
        Self {
            max_seq_len: 512,
            vocab_size: 98,
            dim: 64,
            n_layers: 2,
            n_heads: 4,
            hidden_dim: 256,
            seed: 0,
        }
    }
}

impl ModelArgs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Check that the shapes are usable.
    pub fn validate(&self) -> Result<(), InvalidArgs> {
        if self.vocab_size == 0 || self.dim == 0 || self.max_seq_len == 0 {
            return Err(InvalidArgs(
                "vocab_size, dim and max_seq_len must be positive".into(),
            ));
        }
        if self.n_heads == 0 || self.dim % self.n_heads != 0 {
            return Err(InvalidArgs(format!(
                "dim {} is not divisible by n_heads {}",
                self.dim, self.n_heads
            )));
        }
        Ok(())
    }
}

fn uniform(rng: &mut StdRng) -> f32 {
    rng.gen_range(-0.1..0.1)
}

/// Embedding layer mapping token ids to vectors.
pub struct Embedding {
    weight: Array2<f32>, // vocab_size x dim
}

impl Embedding {
    pub fn new(vocab_size: usize, dim: usize, rng: &mut StdRng) -> Self {
        let weight = Array2::from_shape_fn((vocab_size, dim), |_| uniform(rng));
        Self { weight }
    }

    pub fn weight(&self) -> &Array2<f32> {
        &self.weight
    }

    pub fn forward(&self, tokens: &[u32]) -> Array2<f32> {
        let mut out = Array2::<f32>::zeros((tokens.len(), self.weight.ncols()));
        for (i, &tok) in tokens.iter().enumerate() {
            out.row_mut(i).assign(&self.weight.row(tok as usize));
        }
        out
    }
}

/// Fully connected layer.
pub struct Linear {
    weight: Array2<f32>, // out x in
    bias: Option<Array1<f32>>,
}

impl Linear {
    pub fn new(in_features: usize, out_features: usize, bias: bool, rng: &mut StdRng) -> Self {
        let weight = Array2::from_shape_fn((out_features, in_features), |_| uniform(rng));
        let bias = bias.then(|| Array1::from_shape_fn(out_features, |_| uniform(rng)));
        Self { weight, bias }
    }

    pub fn weight(&self) -> &Array2<f32> {
        &self.weight
    }

    pub fn bias(&self) -> Option<&Array1<f32>> {
        self.bias.as_ref()
    }

    pub fn forward(&self, x: &Array2<f32>) -> Array2<f32> {
        let mut y = x.dot(&self.weight.t());
        if let Some(b) = &self.bias {
            y += &b.view().insert_axis(Axis(0));
        }
        y
    }
}

/// Root mean square layer normalization.
pub struct RMSNorm {
    weight: Array1<f32>,
    eps: f32,
}

impl RMSNorm {
    pub fn new(dim: usize) -> Self {
        Self {
            weight: Array1::ones(dim),
            eps: 1e-6,
        }
    }

    pub fn forward(&self, x: &Array2<f32>) -> Array2<f32> {
        let mean = x.map_axis(Axis(1), |row| row.mapv(|v| v * v).mean().unwrap_or(0.0));
        let denom = mean.mapv(|m| (m + self.eps).sqrt()).insert_axis(Axis(1));
        let norm = x / &denom;
        norm * &self.weight.view().insert_axis(Axis(0))
    }
}

/// Causal multi-head self attention.
pub struct Attention {
    wq: Linear,
    wk: Linear,
    wv: Linear,
    wo: Linear,
    n_heads: usize,
    head_dim: usize,
}

impl Attention {
    pub fn new(dim: usize, n_heads: usize, rng: &mut StdRng) -> Self {
        let head_dim = dim / n_heads;
        Self {
            wq: Linear::new(dim, dim, false, rng),
            wk: Linear::new(dim, dim, false, rng),
            wv: Linear::new(dim, dim, false, rng),
            wo: Linear::new(dim, dim, false, rng),
            n_heads,
            head_dim,
        }
    }

    pub fn forward(&self, x: &Array2<f32>) -> Array2<f32> {
        let q = self.wq.forward(x);
        let k = self.wk.forward(x);
        let v = self.wv.forward(x);
        let seq = x.nrows();
        let scale = (self.head_dim as f32).sqrt();

        let mut out = Array2::<f32>::zeros((seq, self.n_heads * self.head_dim));
        for h in 0..self.n_heads {
            let cols = h * self.head_dim..(h + 1) * self.head_dim;
            let qh = q.slice(s![.., cols.clone()]);
            let kh = k.slice(s![.., cols.clone()]);
            let vh = v.slice(s![.., cols.clone()]);
            let mut out_h = out.slice_mut(s![.., cols]);

            for i in 0..seq {
                // position i only sees 0..=i
                let mut weights: Vec<f32> = (0..=i)
                    .map(|j| qh.row(i).dot(&kh.row(j)) / scale)
                    .collect();
                let max = weights.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
                let mut sum = 0.0;
                for w in weights.iter_mut() {
                    *w = (*w - max).exp();
                    sum += *w;
                }
                for (j, w) in weights.iter().enumerate() {
                    let coeff = w / sum;
                    for d in 0..self.head_dim {
                        out_h[[i, d]] += coeff * vh[[j, d]];
                    }
                }
            }
        }
        self.wo.forward(&out)
    }
}

/// Simple feed-forward network using SILU activation.
pub struct MLP {
    w1: Linear,
    w2: Linear,
}

impl MLP {
    pub fn new(dim: usize, hidden_dim: usize, rng: &mut StdRng) -> Self {
        Self {
            w1: Linear::new(dim, hidden_dim, false, rng),
            w2: Linear::new(hidden_dim, dim, false, rng),
        }
    }

    pub fn forward(&self, x: &Array2<f32>) -> Array2<f32> {
        let hidden = self.w1.forward(x).mapv(|v| v * (1.0 / (1.0 + (-v).exp()))); // silu
        self.w2.forward(&hidden)
    }
}

/// Transformer block consisting of attention and feed-forward layers.
pub struct Block {
    attn_norm: RMSNorm,
    attn: Attention,
    ffn_norm: RMSNorm,
    ffn: MLP,
}

impl Block {
    pub fn new(args: &ModelArgs, rng: &mut StdRng) -> Self {
        Self {
            attn_norm: RMSNorm::new(args.dim),
            attn: Attention::new(args.dim, args.n_heads, rng),
            ffn_norm: RMSNorm::new(args.dim),
            ffn: MLP::new(args.dim, args.hidden_dim, rng),
        }
    }

    pub fn forward(&self, x: &Array2<f32>) -> Array2<f32> {
        let h = self.attn_norm.forward(x);
        let h = self.attn.forward(&h);
        let x = x + &h;
        let h = self.ffn_norm.forward(&x);
        let h = self.ffn.forward(&h);
        x + &h
    }
}

/// Full Transformer model used for generation.
pub struct Transformer {
    pub args: ModelArgs,
    embed: Embedding,
    layers: Vec<Block>,
    norm: RMSNorm,
    head: Linear,
}

impl Transformer {
    /// Build a model with weights drawn from `args.seed`.
    pub fn new(args: ModelArgs) -> Result<Self, InvalidArgs> {
        args.validate()?;
        let mut rng = StdRng::seed_from_u64(args.seed);
        let embed = Embedding::new(args.vocab_size, args.dim, &mut rng);
        let layers = (0..args.n_layers).map(|_| Block::new(&args, &mut rng)).collect();
        let norm = RMSNorm::new(args.dim);
        let head = Linear::new(args.dim, args.vocab_size, false, &mut rng);
        Ok(Self { args, embed, layers, norm, head })
    }

    pub fn embed(&self) -> &Embedding {
        &self.embed
    }

    pub fn head(&self) -> &Linear {
        &self.head
    }

    /// Scores for every position, `tokens.len() x vocab_size`.
    pub fn forward(&self, tokens: &[u32]) -> Array2<f32> {
        let mut h = self.embed.forward(tokens);
        for layer in &self.layers {
            h = layer.forward(&h);
        }
        let h = self.norm.forward(&h);
        self.head.forward(&h)
    }
}

impl Scorer for Transformer {
    fn score(&self, ids: &[u32]) -> Result<Vec<f32>, ScoreError> {
        check_sequence(ids, self.args.vocab_size, self.args.max_seq_len)?;
        if ids.is_empty() {
            let zero = Array2::<f32>::zeros((1, self.args.dim));
            return Ok(self.head.forward(&zero).row(0).to_vec());
        }
        let logits = self.forward(ids);
        Ok(logits.row(logits.nrows() - 1).to_vec())
    }

    fn vocab_size(&self) -> usize {
        self.args.vocab_size
    }
}
