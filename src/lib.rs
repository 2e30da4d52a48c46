//! Split-Flush Library
//!
//! Command-line plumbing around [`split_cache`]: layered flush
//! configuration and a JSONL ingestion pipeline that partitions messages by
//! queue id and hands per-queue batches to a [`split_sink`] sink.
//!
//! # CLI Usage
//!
//! ```bash
//! # Partition a JSONL stream into one file per queue
//! split-flush run --input messages.jsonl --output-dir out/ --size-threshold 500
//!
//! # Read from stdin, log batches instead of writing them
//! cat messages.jsonl | split-flush run --input - --log-only
//!
//! # Validate a config file
//! split-flush check-config --config flush.toml
//! ```

pub mod config;
pub mod ingest;

pub use config::{
    load_flush_config, parse_duration, resolve_flush_config, FlushArgs, FlushFileConfig,
};
pub use ingest::{ingest_jsonl, run_pipeline, IngestSummary, PipelineSummary};
