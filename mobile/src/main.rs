use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use textgen::config::AppConfig;
use textgen::Scorer;
use textgen_mobile::quantize_to;

/// Write an 8-bit checkpoint of the configured reference model.
#[derive(Parser)]
#[command(author, version, about)]
struct Args {
    /// JSON config whose `model` section describes the model
    #[arg(long)]
    config: Option<PathBuf>,

    /// Output file for the quantized model
    #[arg(long, default_value = "model.q8")]
    out: PathBuf,

    /// Override the weight seed
    #[arg(long)]
    seed: Option<u64>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let mut model_args = AppConfig::load_or_default(args.config.as_deref())?.model;
    if let Some(seed) = args.seed {
        model_args.seed = seed;
    }
    let q = quantize_to(&model_args, &args.out)?;
    tracing::info!(vocab = q.vocab_size(), seed = model_args.seed, "quantized");
    println!("Saved quantized model to {:?}", args.out);
    Ok(())
}
