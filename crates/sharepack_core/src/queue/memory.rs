//! In-memory work queue with visibility timeouts.

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::Mutex;
use tokio::time::Instant;
use uuid::Uuid;

use super::{QueueError, QueueMessage, QueueResult, WorkQueue};

struct Entry {
    message_id: Uuid,
    body: Value,
    enqueued_at: DateTime<Utc>,
    visible_at: Instant,
    dequeue_count: u32,
    pop_receipt: Option<Uuid>,
}

/// Queue backed by a `VecDeque`, ordered by enqueue time.
///
/// Uses the tokio clock so paused-time tests can advance past visibility
/// timeouts.
#[derive(Default)]
pub struct InMemoryWorkQueue {
    entries: Mutex<VecDeque<Entry>>,
}

impl InMemoryWorkQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn contains(&self, message_id: Uuid) -> bool {
        self.entries
            .lock()
            .await
            .iter()
            .any(|e| e.message_id == message_id)
    }

    /// Messages that could be received right now.
    pub async fn visible_len(&self) -> usize {
        let now = Instant::now();
        self.entries
            .lock()
            .await
            .iter()
            .filter(|e| e.visible_at <= now)
            .count()
    }
}

#[async_trait]
impl WorkQueue for InMemoryWorkQueue {
    async fn enqueue(&self, body: Value) -> QueueResult<Uuid> {
        let message_id = Uuid::now_v7();
        self.entries.lock().await.push_back(Entry {
            message_id,
            body,
            enqueued_at: Utc::now(),
            visible_at: Instant::now(),
            dequeue_count: 0,
            pop_receipt: None,
        });
        Ok(message_id)
    }

    async fn receive(
        &self,
        max_messages: usize,
        visibility: Duration,
    ) -> QueueResult<Vec<QueueMessage>> {
        let now = Instant::now();
        let mut entries = self.entries.lock().await;
        let mut claimed = Vec::new();
        for entry in entries.iter_mut() {
            if claimed.len() >= max_messages {
                break;
            }
            if entry.visible_at > now {
                continue;
            }
            let receipt = Uuid::now_v7();
            entry.visible_at = now + visibility;
            entry.dequeue_count += 1;
            entry.pop_receipt = Some(receipt);
            claimed.push(QueueMessage {
                message_id: entry.message_id,
                pop_receipt: receipt,
                dequeue_count: entry.dequeue_count,
                enqueued_at: entry.enqueued_at,
                body: entry.body.clone(),
            });
        }
        Ok(claimed)
    }

    async fn delete(&self, message: &QueueMessage) -> QueueResult<()> {
        let mut entries = self.entries.lock().await;
        let position = entries.iter().position(|e| {
            e.message_id == message.message_id && e.pop_receipt == Some(message.pop_receipt)
        });
        match position {
            Some(i) => {
                entries.remove(i);
                Ok(())
            }
            None => Err(QueueError::StaleReceipt(message.message_id)),
        }
    }

    async fn approximate_length(&self) -> QueueResult<usize> {
        Ok(self.entries.lock().await.len())
    }
}
