//! Error types for the split cache.

use thiserror::Error;

/// A message was rejected at enqueue time because no split key could be
/// derived from it. Nothing is buffered for a rejected message.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Invalid split key: {reason}")]
pub struct InvalidKeyError {
    pub reason: String,
}

impl InvalidKeyError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// A flush callback failed for one partition.
///
/// `undelivered` counts the messages of the drained batch that did not
/// reach the sink. Whether they were requeued or dropped depends on the
/// configured [`FailurePolicy`](crate::FailurePolicy).
#[derive(Error, Debug)]
#[error("Flush of partition '{key}' failed with {undelivered} undelivered messages: {source:#}")]
pub struct FlushError<K> {
    pub key: K,
    pub undelivered: usize,
    #[source]
    pub source: anyhow::Error,
}

/// Unexpected failure inside one auto-flush cycle.
///
/// The driver logs these and keeps running.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DriverLoopError {
    #[error("Flush cycle panicked: {0}")]
    Panicked(String),
}

impl DriverLoopError {
    /// Build an error from a payload caught with `catch_unwind`.
    pub fn from_panic(payload: Box<dyn std::any::Any + Send>) -> Self {
        Self::Panicked(panic_message(payload.as_ref()))
    }
}

pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
