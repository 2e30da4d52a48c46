//! Command-line interface for split-flush
//!
//! # Usage Examples
//!
//! ```bash
//! # Buffer messages per queue id and append each flushed batch to
//! # out/<queue_id>.jsonl
//! split-flush run --input messages.jsonl --output-dir out/
//!
//! # Tune the thresholds, retry failing writes, read from stdin
//! cat messages.jsonl | split-flush run --input - --output-dir out/ \
//!   --size-threshold 1000 --time-threshold 2s --max-retries 3
//!
//! # Print the effective configuration of a file
//! split-flush check-config --config flush.yaml
//! ```
//!
//! Each input line is a message:
//! `{"header": {"queue_id": "orders", "offset": 42}, "payload": {...}}`

use anyhow::Context;
use clap::{Parser, Subcommand};
use split_cache::{FlushCallback, Message};
use split_flush::{load_flush_config, resolve_flush_config, run_pipeline, FlushArgs};
use split_sink::{JsonlDirSink, RetryingCallback, TracingSink};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufRead, BufReader};

#[derive(Parser)]
#[command(name = "split-flush")]
#[command(about = "Buffer messages per split key and flush them in batches")]
#[command(long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Read JSONL messages and flush them per queue id
    Run {
        /// Input file, or "-" for stdin
        #[arg(long, default_value = "-")]
        input: String,

        /// Directory receiving one <queue_id>.jsonl file per partition
        #[arg(long, required_unless_present = "log_only")]
        output_dir: Option<PathBuf>,

        /// Log flushed batches instead of writing them
        #[arg(long)]
        log_only: bool,

        /// Flush configuration file (TOML, YAML or JSON)
        #[arg(long, value_name = "PATH", env = "SPLIT_FLUSH_CONFIG")]
        config: Option<PathBuf>,

        /// Retries per failed batch before the failure policy applies
        #[arg(long, default_value = "0")]
        max_retries: u32,

        #[command(flatten)]
        flush: FlushArgs,
    },

    /// Validate a configuration file and print the effective settings
    CheckConfig {
        #[arg(long, value_name = "PATH")]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if let Err(e) = run().await {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
    Ok(())
}

async fn run() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            input,
            output_dir,
            log_only,
            config,
            max_retries,
            flush,
        } => {
            let flush_config = resolve_flush_config(config.as_deref(), &flush)?;
            tracing::info!("Effective flush configuration: {flush_config:?}");

            let sink = build_sink(output_dir, log_only, max_retries).await?;
            let reader = open_input(&input).await?;
            let summary = run_pipeline(reader, sink, flush_config).await?;

            println!("{}", serde_json::to_string_pretty(&summary)?);
            if summary.undelivered > 0 {
                anyhow::bail!(
                    "{} messages could not be delivered",
                    summary.undelivered
                );
            }
        }
        Commands::CheckConfig { config } => {
            let flush_config = load_flush_config(&config)?;
            println!("{}", toml::to_string_pretty(&flush_config)?);
        }
    }

    Ok(())
}

async fn build_sink(
    output_dir: Option<PathBuf>,
    log_only: bool,
    max_retries: u32,
) -> anyhow::Result<Arc<dyn FlushCallback<Message, String>>> {
    let sink: Arc<dyn FlushCallback<Message, String>> = match output_dir {
        Some(dir) if !log_only => Arc::new(JsonlDirSink::new(dir).await?),
        _ => Arc::new(TracingSink::new()),
    };
    if max_retries == 0 {
        return Ok(sink);
    }
    Ok(Arc::new(
        RetryingCallback::<_, Message, String>::new(sink).with_max_retries(max_retries),
    ))
}

async fn open_input(input: &str) -> anyhow::Result<Box<dyn AsyncBufRead + Unpin + Send>> {
    if input == "-" {
        return Ok(Box::new(BufReader::new(tokio::io::stdin())));
    }
    let file = tokio::fs::File::open(input)
        .await
        .with_context(|| format!("Failed to open input file {input}"))?;
    Ok(Box::new(BufReader::new(file)))
}
