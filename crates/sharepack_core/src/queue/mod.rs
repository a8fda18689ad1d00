//! Work queue port carrying provisioning requests.
//!
//! Received messages stay invisible to other consumers for the visibility
//! timeout; a message that is never deleted reappears afterwards
//! (at-least-once delivery).

pub mod memory;

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

use crate::types::Strategy;

pub use memory::InMemoryWorkQueue;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("queue connection error: {0}")]
    Connection(String),

    /// Message already deleted or its receipt superseded by a later receive
    #[error("stale receipt for message {0}")]
    StaleReceipt(Uuid),

    #[error("malformed queue message: {0}")]
    Malformed(String),

    #[error("queue backend error: {0}")]
    Backend(String),
}

pub type QueueResult<T> = Result<T, QueueError>;

/// A received message and its delivery metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct QueueMessage {
    pub message_id: Uuid,
    /// Token proving this receive still owns the message
    pub pop_receipt: Uuid,
    /// Number of times the message has been received, this one included
    pub dequeue_count: u32,
    pub enqueued_at: DateTime<Utc>,
    pub body: Value,
}

/// Payload placed on the queue after a successful upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvisioningRequest {
    pub share_pack_id: Uuid,
    #[serde(default)]
    pub share_pack_name: Option<String>,
    #[serde(default)]
    pub strategy: Option<Strategy>,
}

impl ProvisioningRequest {
    pub fn new(share_pack_id: Uuid) -> Self {
        Self {
            share_pack_id,
            share_pack_name: None,
            strategy: None,
        }
    }

    pub fn to_value(&self) -> QueueResult<Value> {
        serde_json::to_value(self).map_err(|e| QueueError::Malformed(e.to_string()))
    }

    pub fn from_message(message: &QueueMessage) -> QueueResult<Self> {
        serde_json::from_value(message.body.clone()).map_err(|e| {
            QueueError::Malformed(format!("message {}: {}", message.message_id, e))
        })
    }
}

#[async_trait]
pub trait WorkQueue: Send + Sync {
    /// Append a message; returns its id.
    async fn enqueue(&self, body: Value) -> QueueResult<Uuid>;

    /// Claim up to `max_messages` visible messages, hiding them for `visibility`.
    async fn receive(
        &self,
        max_messages: usize,
        visibility: Duration,
    ) -> QueueResult<Vec<QueueMessage>>;

    /// Acknowledge a message received earlier.
    async fn delete(&self, message: &QueueMessage) -> QueueResult<()>;

    /// Messages on the queue, visible or not.
    async fn approximate_length(&self) -> QueueResult<usize>;
}
