//! Message type carried through the cache by the stock integration.

use serde::{Deserialize, Serialize};

/// Routing metadata of a message.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MessageHeader {
    /// Queue the message was read from. Used as the split key by
    /// [`QueueIdExtractor`](crate::QueueIdExtractor).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub queue_id: Option<String>,
    /// Offset within the source queue (if any)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offset: Option<i64>,
    /// Message timestamp (milliseconds since epoch)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
    /// Name of the producing source
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

/// A buffered message. The payload is opaque to the cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    #[serde(default)]
    pub header: MessageHeader,
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl Message {
    pub fn new(queue_id: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            header: MessageHeader {
                queue_id: Some(queue_id.into()),
                ..Default::default()
            },
            payload,
        }
    }

    /// A message with no queue id. Rejected by `QueueIdExtractor`.
    pub fn without_queue(payload: serde_json::Value) -> Self {
        Self {
            header: MessageHeader::default(),
            payload,
        }
    }

    pub fn with_offset(mut self, offset: i64) -> Self {
        self.header.offset = Some(offset);
        self
    }

    pub fn with_timestamp(mut self, timestamp: i64) -> Self {
        self.header.timestamp = Some(timestamp);
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.header.source = Some(source.into());
        self
    }

    pub fn queue_id(&self) -> Option<&str> {
        self.header.queue_id.as_deref()
    }
}
