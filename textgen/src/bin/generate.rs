//! Generate one continuation and print it.
//!
//! The prompt comes from `--prompt` or, when absent, from stdin.

use std::io::{self, Read};
use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use textgen::config::AppConfig;
use textgen::frontend::{GenerationRequest, TextGenerator};
use textgen::{CancelToken, SamplingParams};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// JSON config file
    #[arg(long)]
    config: Option<PathBuf>,

    /// 8-bit checkpoint, overrides the config
    #[arg(long)]
    checkpoint: Option<PathBuf>,

    /// Prompt text; read from stdin when omitted
    #[arg(long)]
    prompt: Option<String>,

    /// Maximum number of generated tokens
    #[arg(long)]
    max_length: Option<usize>,

    /// Sampling temperature
    #[arg(long)]
    temperature: Option<f32>,

    /// Number of candidates kept before sampling
    #[arg(long)]
    top_k: Option<usize>,

    /// Seed for reproducible output
    #[arg(long)]
    seed: Option<u64>,
}

/// Drop the single line ending a piped prompt arrives with.
fn strip_line_ending(mut text: String) -> String {
    if text.ends_with('\n') {
        text.pop();
        if text.ends_with('\r') {
            text.pop();
        }
    }
    text
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(io::stderr)
        .init();

    let args = Args::parse();
    let mut config = AppConfig::load_or_default(args.config.as_deref())?;
    if args.checkpoint.is_some() {
        config.checkpoint = args.checkpoint;
    }

    let prompt = match args.prompt {
        Some(p) => p,
        None => {
            let mut buf = String::new();
            io::stdin().read_to_string(&mut buf)?;
            strip_line_ending(buf)
        }
    };

    let d = config.defaults;
    let params = SamplingParams::new(
        args.max_length.unwrap_or(d.max_steps),
        args.temperature.unwrap_or(d.temperature),
        args.top_k.unwrap_or(d.top_k),
    );

    let generator = TextGenerator::from_config(&config)?;
    let mut request = GenerationRequest::new(prompt, params);
    if let Some(seed) = args.seed {
        request = request.with_seed(seed);
    }

    match generator.reply(&request, &CancelToken::new()) {
        Ok(generation) => {
            println!("{}", generation.text);
            Ok(())
        }
        Err(message) => {
            eprintln!("{}", message);
            std::process::exit(1);
        }
    }
}
