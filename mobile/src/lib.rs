//! Embedding surface for `textgen`.
//!
//! Exposes the decoder over a C ABI (see [`ffi`]) so a host application can
//! load an 8-bit checkpoint once and request continuations, and provides the
//! helper used by the `quantize` binary to produce such checkpoints.

use std::path::Path;

use anyhow::{Context, Result};
use textgen::model::{ModelArgs, Transformer};
use textgen::quant::QTransformer;

pub mod ffi;
pub use ffi::*;

/// Build the seeded reference model for `args`, quantise it and write the
/// checkpoint to `path`.
pub fn quantize_to(args: &ModelArgs, path: &Path) -> Result<QTransformer> {
    let model = Transformer::new(args.clone())?;
    let q = QTransformer::from_model(&model);
    q.save(path)
        .with_context(|| format!("writing checkpoint {}", path.display()))?;
    Ok(q)
}
