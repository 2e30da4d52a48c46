//! Split key derivation.
//!
//! The cache knows nothing about message internals. It asks a
//! [`SplitKeyExtractor`] for the partition key of every enqueued message.

use std::fmt::{Debug, Display};
use std::hash::Hash;

use crate::error::InvalidKeyError;
use crate::message::Message;

/// Bounds required of a partition key.
pub trait PartitionKey: Eq + Hash + Clone + Display + Debug + Send + Sync + 'static {}

impl<T> PartitionKey for T where T: Eq + Hash + Clone + Display + Debug + Send + Sync + 'static {}

/// Derives the partition key of a message.
///
/// Called on every enqueue, so implementations must be cheap and must not
/// mutate the message. Any `Fn(&M) -> Result<K, InvalidKeyError>` closure
/// is an extractor.
pub trait SplitKeyExtractor<M, K>: Send + Sync {
    fn split_key(&self, message: &M) -> Result<K, InvalidKeyError>;
}

impl<M, K, F> SplitKeyExtractor<M, K> for F
where
    F: Fn(&M) -> Result<K, InvalidKeyError> + Send + Sync,
{
    fn split_key(&self, message: &M) -> Result<K, InvalidKeyError> {
        self(message)
    }
}

/// Splits [`Message`]s by the queue id in their header.
#[derive(Debug, Clone, Copy, Default)]
pub struct QueueIdExtractor;

impl SplitKeyExtractor<Message, String> for QueueIdExtractor {
    fn split_key(&self, message: &Message) -> Result<String, InvalidKeyError> {
        match message.queue_id() {
            Some(id) if !id.trim().is_empty() => Ok(id.to_string()),
            Some(_) => Err(InvalidKeyError::new("message header has a blank queue id")),
            None => Err(InvalidKeyError::new("message header has no queue id")),
        }
    }
}
