//! 8-bit quantised model and its checkpoint format.
//!
//! A [`QTransformer`] keeps only the embedding and the output head of a
//! [`Transformer`], each quantised with one symmetric scale per tensor. The
//! checkpoint is a flat little-endian file: the embedding followed by the
//! head, see [`QTransformer::save`].

use std::fs::File;
use std::io::Write;
use std::path::Path;

use bytemuck::cast_slice;
use memmap2::MmapOptions;
use ndarray::{Array1, Array2, Axis};

use crate::error::{CheckpointError, ScoreError};
use crate::model::{Embedding, Linear, Transformer};
use crate::scorer::{check_sequence, Scorer};

/// Context limit for quantised models; the checkpoint does not record one.
pub const DEFAULT_MAX_SEQ_LEN: usize = 1024;

/// Simple quantization of a tensor to 8-bit integers with a scale factor.
fn quantize_tensor(t: &Array2<f32>) -> (Vec<i8>, f32) {
    let max = t.iter().fold(0.0_f32, |m, &v| m.max(v.abs()));
    let scale = if max == 0.0 { 1.0 } else { 127.0 / max };
    let data = t.iter().map(|&v| (v * scale).round() as i8).collect();
    (data, 1.0 / scale)
}

/// Bounds-checked little-endian reader over a checkpoint buffer.
struct Reader<'a> {
    buf: &'a [u8],
    offset: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, offset: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], CheckpointError> {
        let end = self.offset.checked_add(n).filter(|&e| e <= self.buf.len());
        match end {
            Some(end) => {
                let bytes = &self.buf[self.offset..end];
                self.offset = end;
                Ok(bytes)
            }
            None => Err(CheckpointError::Truncated {
                offset: self.offset,
                needed: n,
                available: self.buf.len().saturating_sub(self.offset),
            }),
        }
    }

    fn u32(&mut self) -> Result<usize, CheckpointError> {
        let mut b = [0u8; 4];
        b.copy_from_slice(self.take(4)?);
        Ok(u32::from_le_bytes(b) as usize)
    }

    fn f32(&mut self) -> Result<f32, CheckpointError> {
        let mut b = [0u8; 4];
        b.copy_from_slice(self.take(4)?);
        Ok(f32::from_le_bytes(b))
    }

    fn u8(&mut self) -> Result<u8, CheckpointError> {
        Ok(self.take(1)?[0])
    }

    fn i8s(&mut self, n: usize) -> Result<Vec<i8>, CheckpointError> {
        Ok(self.take(n)?.iter().map(|&b| b as i8).collect())
    }
}

fn element_count(a: usize, b: usize) -> Result<usize, CheckpointError> {
    a.checked_mul(b)
        .ok_or_else(|| CheckpointError::Shape(format!("{a} x {b} overflows")))
}

/// Quantized linear layer.
#[derive(Clone, Debug)]
pub struct QLinear {
    weight: Vec<i8>,
    bias: Option<Array1<f32>>,
    scale: f32,
    in_features: usize,
    out_features: usize,
}

impl QLinear {
    pub fn from_linear(l: &Linear) -> Self {
        let (weight, scale) = quantize_tensor(l.weight());
        Self {
            weight,
            bias: l.bias().cloned(),
            scale,
            in_features: l.weight().ncols(),
            out_features: l.weight().nrows(),
        }
    }

    fn read(r: &mut Reader<'_>) -> Result<Self, CheckpointError> {
        let out_features = r.u32()?;
        let in_features = r.u32()?;
        let scale = r.f32()?;
        let weight = r.i8s(element_count(out_features, in_features)?)?;
        let bias = match r.u8()? {
            0 => None,
            1 => {
                let mut b = Vec::new();
                for _ in 0..out_features {
                    b.push(r.f32()?);
                }
                Some(Array1::from(b))
            }
            flag => {
                return Err(CheckpointError::Shape(format!(
                    "invalid bias flag {flag}"
                )))
            }
        };
        Ok(Self { weight, bias, scale, in_features, out_features })
    }

    fn write<W: Write>(&self, w: &mut W) -> std::io::Result<()> {
        w.write_all(&(self.out_features as u32).to_le_bytes())?;
        w.write_all(&(self.in_features as u32).to_le_bytes())?;
        w.write_all(&self.scale.to_le_bytes())?;
        w.write_all(cast_slice(&self.weight))?;
        if let Some(b) = &self.bias {
            w.write_all(&[1u8])?;
            for v in b.iter() {
                w.write_all(&v.to_le_bytes())?;
            }
        } else {
            w.write_all(&[0u8])?;
        }
        Ok(())
    }

    pub fn forward(&self, input: &Array2<f32>) -> Array2<f32> {
        let weight = Array2::from_shape_fn((self.out_features, self.in_features), |(i, j)| {
            self.weight[i * self.in_features + j] as f32 * self.scale
        });
        let mut out = input.dot(&weight.t());
        if let Some(b) = &self.bias {
            out += &b.view().insert_axis(Axis(0));
        }
        out
    }
}

/// Quantized embedding layer.
#[derive(Clone, Debug)]
pub struct QEmbedding {
    weight: Vec<i8>,
    scale: f32,
    vocab: usize,
    dim: usize,
}

impl QEmbedding {
    pub fn from_embedding(e: &Embedding) -> Self {
        let (weight, scale) = quantize_tensor(e.weight());
        Self { weight, scale, vocab: e.weight().nrows(), dim: e.weight().ncols() }
    }

    fn read(r: &mut Reader<'_>) -> Result<Self, CheckpointError> {
        let vocab = r.u32()?;
        let dim = r.u32()?;
        let scale = r.f32()?;
        let weight = r.i8s(element_count(vocab, dim)?)?;
        Ok(Self { weight, scale, vocab, dim })
    }

    fn write<W: Write>(&self, w: &mut W) -> std::io::Result<()> {
        w.write_all(&(self.vocab as u32).to_le_bytes())?;
        w.write_all(&(self.dim as u32).to_le_bytes())?;
        w.write_all(&self.scale.to_le_bytes())?;
        w.write_all(cast_slice(&self.weight))
    }

    /// Rows for `tokens`. Ids must be below the vocabulary size.
    pub fn forward(&self, tokens: &[u32]) -> Array2<f32> {
        let mut out = Array2::<f32>::zeros((tokens.len(), self.dim));
        for (i, &tok) in tokens.iter().enumerate() {
            let base = tok as usize * self.dim;
            for d in 0..self.dim {
                out[[i, d]] = self.weight[base + d] as f32 * self.scale;
            }
        }
        out
    }
}

/// Quantized transformer holding only embedding and head.
#[derive(Clone, Debug)]
pub struct QTransformer {
    pub embed: QEmbedding,
    pub head: QLinear,
    pub max_seq_len: usize,
}

impl QTransformer {
    pub fn from_model(m: &Transformer) -> Self {
        Self {
            embed: QEmbedding::from_embedding(m.embed()),
            head: QLinear::from_linear(m.head()),
            max_seq_len: m.args.max_seq_len,
        }
    }

    pub fn with_max_seq_len(mut self, max_seq_len: usize) -> Self {
        self.max_seq_len = max_seq_len;
        self
    }

    /// Write the checkpoint.
    ///
    /// Layout: `vocab:u32 dim:u32 scale:f32 weights:i8[vocab*dim]` for the
    /// embedding, then `out:u32 in:u32 scale:f32 weights:i8[out*in]
    /// has_bias:u8 bias:f32[out]?` for the head.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), CheckpointError> {
        let mut f = File::create(path)?;
        self.embed.write(&mut f)?;
        self.head.write(&mut f)?;
        f.flush()?;
        Ok(())
    }

    /// Parse a checkpoint from memory.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CheckpointError> {
        let mut r = Reader::new(bytes);
        let embed = QEmbedding::read(&mut r)?;
        let head = QLinear::read(&mut r)?;
        if head.in_features != embed.dim {
            return Err(CheckpointError::Shape(format!(
                "head expects {} inputs, embedding has dim {}",
                head.in_features, embed.dim
            )));
        }
        if head.out_features != embed.vocab {
            return Err(CheckpointError::Shape(format!(
                "head produces {} scores, embedding has vocab {}",
                head.out_features, embed.vocab
            )));
        }
        Ok(Self { embed, head, max_seq_len: DEFAULT_MAX_SEQ_LEN })
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, CheckpointError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(CheckpointError::NotFound(path.to_path_buf()));
        }
        let bytes = std::fs::read(path)?;
        Self::from_bytes(&bytes)
    }

    pub fn load_mmap<P: AsRef<Path>>(path: P) -> Result<Self, CheckpointError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(CheckpointError::NotFound(path.to_path_buf()));
        }
        let file = File::open(path)?;
        // SAFETY: the file must not change while mapped; the map is dropped
        // once parsing has copied the weights out.
        let mmap = unsafe { MmapOptions::new().map(&file)? };
        Self::from_bytes(&mmap[..])
    }

    pub fn forward(&self, tokens: &[u32]) -> Array2<f32> {
        let h = self.embed.forward(tokens);
        self.head.forward(&h)
    }
}

impl Scorer for QTransformer {
    fn score(&self, ids: &[u32]) -> Result<Vec<f32>, ScoreError> {
        check_sequence(ids, self.embed.vocab, self.max_seq_len)?;
        let last = match ids.last() {
            Some(&id) => self.embed.forward(&[id]),
            None => Array2::zeros((1, self.embed.dim)),
        };
        Ok(self.head.forward(&last).row(0).to_vec())
    }

    fn vocab_size(&self) -> usize {
        self.embed.vocab
    }
}
