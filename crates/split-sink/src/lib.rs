//! Flush callback sinks for split-cache.
//!
//! Each sink implements [`split_cache::FlushCallback`] and can be handed to
//! a `PartitionedMessageCache`:
//!
//! - [`JsonlDirSink`] - appends batches to one JSONL file per partition
//! - [`TracingSink`] - logs batches, always succeeds
//! - [`CollectingSink`] - keeps batches in memory, with failure injection
//! - [`RetryingCallback`] - retries any callback with exponential backoff

mod collect;
mod jsonl;
mod retry;
mod tracing_sink;

pub use collect::CollectingSink;
pub use jsonl::{JsonlDirSink, JsonlRecord};
pub use retry::{RetryingCallback, DEFAULT_MAX_RETRIES, DEFAULT_RETRY_BASE_DELAY_MS};
pub use tracing_sink::TracingSink;
