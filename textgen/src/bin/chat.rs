//! Interactive prompt loop.
//!
//! Every non-command line is a prompt; the continuation is printed with the
//! current sampling parameters, which can be changed with `!set`.

use std::io::{self, BufRead, Write};
use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use textgen::config::AppConfig;
use textgen::frontend::{GenerationRequest, TextGenerator};
use textgen::SamplingParams;

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// JSON config file
    #[arg(long)]
    config: Option<PathBuf>,

    /// 8-bit checkpoint, overrides the config
    #[arg(long)]
    checkpoint: Option<PathBuf>,

    /// SQLite file for the generation history, overrides the config
    #[arg(long)]
    history: Option<PathBuf>,
}

/// Application state for one interactive session.
pub struct ChatApp {
    generator: TextGenerator,
    params: SamplingParams,
}

impl ChatApp {
    pub fn new(generator: TextGenerator, params: SamplingParams) -> Self {
        Self { generator, params }
    }

    /// Run the interactive loop until `quit` or end of input.
    pub fn run(&mut self) -> Result<()> {
        println!("textgen interactive sampler");
        println!("Commands: 'quit', '!params', '!set <max_length|temperature|top_k> <value>', '!history', '!stats', '!clear'");
        println!();

        let stdin = io::stdin();
        let mut lines = stdin.lock().lines();
        loop {
            print!("prompt> ");
            io::stdout().flush()?;

            let Some(line) = lines.next() else { break };
            let line = line?;
            let input = line.trim_end_matches(['\r', '\n']);
            if input.trim().is_empty() {
                continue;
            }

            match input.trim() {
                "quit" => {
                    println!("Goodbye!");
                    break;
                }
                "!params" => {
                    self.show_params();
                    continue;
                }
                "!history" => {
                    self.show_history();
                    continue;
                }
                "!stats" => {
                    self.show_stats();
                    continue;
                }
                "!clear" => {
                    match self.generator.with_log(|log| log.clear()) {
                        Some(Ok(())) => println!("History cleared."),
                        Some(Err(e)) => println!("Error clearing history: {}", e),
                        None => println!("No history configured."),
                    }
                    continue;
                }
                cmd if cmd.starts_with("!set") => {
                    match self.set(cmd) {
                        Ok(()) => self.show_params(),
                        Err(msg) => println!("{}", msg),
                    }
                    continue;
                }
                _ => {}
            }

            let request = GenerationRequest::new(input, self.params);
            println!("{}", self.generator.respond(&request));
            println!();
        }
        Ok(())
    }

    fn set(&mut self, cmd: &str) -> std::result::Result<(), String> {
        let mut parts = cmd.split_whitespace().skip(1);
        let (Some(name), Some(value), None) = (parts.next(), parts.next(), parts.next()) else {
            return Err("usage: !set <max_length|temperature|top_k> <value>".into());
        };
        let mut next = self.params;
        match name {
            "max_length" | "max_steps" => {
                next.max_steps = value.parse().map_err(|e| format!("bad max_length: {e}"))?
            }
            "temperature" => {
                next.temperature = value.parse().map_err(|e| format!("bad temperature: {e}"))?
            }
            "top_k" => next.top_k = value.parse().map_err(|e| format!("bad top_k: {e}"))?,
            other => return Err(format!("unknown parameter {other:?}")),
        }
        self.generator.bounds().check(&next)?;
        self.params = next;
        Ok(())
    }

    fn show_params(&self) {
        let b = self.generator.bounds();
        println!(
            "max_length={} [{}, {}]  temperature={} (0, {}]  top_k={} [{}, {}]",
            self.params.max_steps,
            b.min_steps,
            b.max_steps,
            self.params.temperature,
            b.max_temperature,
            self.params.top_k,
            b.min_top_k,
            b.max_top_k
        );
    }

    fn show_history(&self) {
        match self.generator.with_log(|log| log.recent(5)) {
            Some(Ok(entries)) if entries.is_empty() => println!("History is empty."),
            Some(Ok(entries)) => {
                for (i, e) in entries.iter().enumerate() {
                    println!(
                        "  {}. [{}] {:?} -> {:?}",
                        i + 1,
                        e.timestamp,
                        truncate(&e.prompt, 40),
                        truncate(&e.output, 60)
                    );
                }
            }
            Some(Err(e)) => println!("Error reading history: {}", e),
            None => println!("No history configured."),
        }
    }

    fn show_stats(&self) {
        match self.generator.with_log(|log| log.stats()) {
            Some(Ok(stats)) => {
                println!("Requests: {} ({} failed)", stats.total_entries, stats.failed_entries);
                println!("Generated tokens: {}", stats.generated_tokens);
                println!(
                    "Database size: {} bytes ({:.1} KB)",
                    stats.db_size_bytes,
                    stats.db_size_bytes as f64 / 1024.0
                );
            }
            Some(Err(e)) => println!("Error retrieving statistics: {}", e),
            None => println!("No history configured."),
        }
    }
}

fn truncate(s: &str, max_chars: usize) -> String {
    if s.chars().count() > max_chars {
        let head: String = s.chars().take(max_chars.saturating_sub(3)).collect();
        format!("{}...", head)
    } else {
        s.to_string()
    }
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
    if args.history.is_some() {
        config.history = args.history;
    }

    let generator = TextGenerator::from_config(&config)?;
    let mut app = ChatApp::new(generator, config.defaults);
    app.run()
}
