//! Share Pack Queue Consumer
//!
//! Single logical worker that drains provisioning requests from the work
//! queue and hands them to the orchestrator, one message at a time.
//!
//! A message is acknowledged when provisioning succeeds or when it can never
//! succeed (undecodable payload, redelivered too often, share pack gone).
//! Failed runs are retried in process only when the failure is transient and
//! budget remains; otherwise the message is left alone and reappears once
//! its visibility timeout lapses.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::classify::is_retryable;
use crate::error::{ProvisionError, ProvisionResult};
use crate::orchestrator::Orchestrator;
use crate::queue::{ProvisioningRequest, QueueError, QueueMessage, WorkQueue};
use crate::repository::SharePackRepository;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumerConfig {
    pub visibility_timeout: Duration,
    /// Sleep between empty polls
    pub poll_interval: Duration,
    /// Sleep before an in-process retry
    pub retry_cooldown: Duration,
    pub max_retries: u32,
    /// Deliveries after which a message is treated as poison
    pub max_dequeue_count: u32,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            visibility_timeout: Duration::from_secs(300),
            poll_interval: Duration::from_millis(5000),
            retry_cooldown: Duration::from_secs(30),
            max_retries: 1,
            max_dequeue_count: 5,
        }
    }
}

/// What happened to one poll of the queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageOutcome {
    /// Nothing was visible
    Idle,
    /// Provisioned and acknowledged
    Completed { share_pack_id: Uuid, attempts: u32 },
    /// Acknowledged without processing
    Poison { message_id: Uuid, reason: String },
    /// Acknowledged; the share pack has no current version
    MissingEntity { share_pack_id: Uuid },
    /// Left unacknowledged for redelivery
    Failed {
        share_pack_id: Uuid,
        attempts: u32,
        retryable: bool,
        error: String,
    },
}

impl MessageOutcome {
    pub fn acknowledged(&self) -> bool {
        matches!(
            self,
            Self::Completed { .. } | Self::Poison { .. } | Self::MissingEntity { .. }
        )
    }
}

/// Runs provisioning for one share pack.
#[async_trait]
pub trait ProvisioningHandler: Send + Sync {
    async fn provision(&self, share_pack_id: Uuid) -> ProvisionResult<()>;
}

#[async_trait]
impl ProvisioningHandler for Orchestrator {
    async fn provision(&self, share_pack_id: Uuid) -> ProvisionResult<()> {
        Orchestrator::provision(self, share_pack_id).await.map(|_| ())
    }
}

pub struct SharePackConsumer {
    queue: Arc<dyn WorkQueue>,
    share_packs: SharePackRepository,
    handler: Arc<dyn ProvisioningHandler>,
    config: ConsumerConfig,
}

impl SharePackConsumer {
    pub fn new(
        queue: Arc<dyn WorkQueue>,
        share_packs: SharePackRepository,
        handler: Arc<dyn ProvisioningHandler>,
        config: ConsumerConfig,
    ) -> Self {
        Self {
            queue,
            share_packs,
            handler,
            config,
        }
    }

    pub fn config(&self) -> &ConsumerConfig {
        &self.config
    }

    /// Poll until `shutdown` flips to true. An in-flight message always
    /// runs to completion first.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!("share pack consumer started");

        loop {
            if *shutdown.borrow() {
                break;
            }

            let idle = match self.process_one().await {
                Ok(MessageOutcome::Idle) => true,
                Ok(outcome) => {
                    debug!(?outcome, "message handled");
                    false
                }
                Err(e) => {
                    error!(error = %e, "error polling work queue");
                    true
                }
            };

            if idle {
                tokio::select! {
                    _ = tokio::time::sleep(self.config.poll_interval) => {}
                    changed = shutdown.changed() => {
                        if changed.is_err() {
                            // Sender gone, nobody can ask us to stop any more
                            break;
                        }
                    }
                }
            }
        }

        info!("share pack consumer shutting down");
    }

    /// Receive and handle at most one message.
    pub async fn process_one(&self) -> ProvisionResult<MessageOutcome> {
        let message = self
            .queue
            .receive(1, self.config.visibility_timeout)
            .await?
            .into_iter()
            .next();
        match message {
            Some(message) => self.handle(message).await,
            None => Ok(MessageOutcome::Idle),
        }
    }

    async fn handle(&self, message: QueueMessage) -> ProvisionResult<MessageOutcome> {
        let request = match ProvisioningRequest::from_message(&message) {
            Ok(request) => request,
            Err(e) => {
                warn!(message_id = %message.message_id, error = %e, "discarding undecodable message");
                self.ack(&message).await?;
                return Ok(MessageOutcome::Poison {
                    message_id: message.message_id,
                    reason: e.to_string(),
                });
            }
        };
        let share_pack_id = request.share_pack_id;

        if message.dequeue_count > self.config.max_dequeue_count {
            warn!(
                message_id = %message.message_id,
                share_pack_id = %share_pack_id,
                dequeue_count = message.dequeue_count,
                "discarding message delivered too many times"
            );
            self.ack(&message).await?;
            return Ok(MessageOutcome::Poison {
                message_id: message.message_id,
                reason: format!("dequeued {} times", message.dequeue_count),
            });
        }

        let Some(pack) = self.share_packs.get(share_pack_id).await? else {
            info!(share_pack_id = %share_pack_id, "share pack not found, acknowledging message");
            self.ack(&message).await?;
            return Ok(MessageOutcome::MissingEntity { share_pack_id });
        };

        info!(
            share_pack_id = %share_pack_id,
            strategy = %pack.fields.strategy,
            version = pack.version,
            dequeue_count = message.dequeue_count,
            "processing share pack"
        );

        let mut attempts = 0;
        loop {
            attempts += 1;
            match self.handler.provision(share_pack_id).await {
                Ok(()) => {
                    self.ack(&message).await?;
                    info!(share_pack_id = %share_pack_id, attempts, "share pack processed");
                    return Ok(MessageOutcome::Completed {
                        share_pack_id,
                        attempts,
                    });
                }
                Err(e) => {
                    let retryable = is_retryable(&e);
                    if retryable && attempts <= self.config.max_retries {
                        warn!(
                            share_pack_id = %share_pack_id,
                            attempt = attempts,
                            error = %e,
                            cooldown_secs = self.config.retry_cooldown.as_secs(),
                            "transient failure, retrying after cool-down"
                        );
                        tokio::time::sleep(self.config.retry_cooldown).await;
                        continue;
                    }
                    error!(
                        share_pack_id = %share_pack_id,
                        attempts,
                        retryable,
                        error = %e,
                        "share pack processing failed, leaving message for redelivery"
                    );
                    return Ok(MessageOutcome::Failed {
                        share_pack_id,
                        attempts,
                        retryable,
                        error: e.to_string(),
                    });
                }
            }
        }
    }

    async fn ack(&self, message: &QueueMessage) -> ProvisionResult<()> {
        match self.queue.delete(message).await {
            Ok(()) => Ok(()),
            // Visibility lapsed and someone else holds it now
            Err(QueueError::StaleReceipt(id)) => {
                warn!(message_id = %id, "message receipt no longer valid, not acknowledged");
                Ok(())
            }
            Err(e) => Err(ProvisionError::from(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::SharePack;
    use crate::platform::PlatformError;
    use crate::queue::InMemoryWorkQueue;
    use crate::store::{InMemoryTemporalStore, Scd2Table};
    use serde_json::json;
    use std::collections::VecDeque;
    use tokio::sync::Mutex;
    use tokio::time::Instant;

    #[derive(Default)]
    struct ScriptedHandler {
        results: Mutex<VecDeque<ProvisionResult<()>>>,
        calls: Mutex<u32>,
    }

    impl ScriptedHandler {
        fn with(results: Vec<ProvisionResult<()>>) -> Arc<Self> {
            Arc::new(Self {
                results: Mutex::new(results.into()),
                calls: Mutex::new(0),
            })
        }

        async fn calls(&self) -> u32 {
            *self.calls.lock().await
        }
    }

    #[async_trait]
    impl ProvisioningHandler for ScriptedHandler {
        async fn provision(&self, _share_pack_id: Uuid) -> ProvisionResult<()> {
            *self.calls.lock().await += 1;
            self.results.lock().await.pop_front().unwrap_or(Ok(()))
        }
    }

    struct Fixture {
        queue: Arc<InMemoryWorkQueue>,
        packs: SharePackRepository,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                queue: Arc::new(InMemoryWorkQueue::new()),
                packs: SharePackRepository::new(Scd2Table::new(Arc::new(
                    InMemoryTemporalStore::new(),
                ))),
            }
        }

        fn consumer(&self, handler: Arc<ScriptedHandler>) -> SharePackConsumer {
            SharePackConsumer::new(
                self.queue.clone(),
                self.packs.clone(),
                handler,
                ConsumerConfig::default(),
            )
        }

        async fn stored_pack(&self) -> Uuid {
            let pack = SharePack {
                share_pack_name: "finance-ledger".into(),
                requested_by: "alice".into(),
                business_line: "finance".into(),
                project_name: "ledger".into(),
                ..SharePack::default()
            };
            let id = self
                .packs
                .record_upload(pack, "alice", "upload")
                .await
                .unwrap()
                .business_id;
            self.queue
                .enqueue(ProvisioningRequest::new(id).to_value().unwrap())
                .await
                .unwrap();
            id
        }
    }

    #[tokio::test(start_paused = true)]
    async fn success_acknowledges() {
        let fx = Fixture::new();
        let id = fx.stored_pack().await;
        let handler = ScriptedHandler::with(vec![Ok(())]);

        let outcome = fx.consumer(handler.clone()).process_one().await.unwrap();

        assert_eq!(
            outcome,
            MessageOutcome::Completed {
                share_pack_id: id,
                attempts: 1
            }
        );
        assert_eq!(fx.queue.approximate_length().await.unwrap(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failure_retries_once_after_cooldown() {
        let fx = Fixture::new();
        fx.stored_pack().await;
        let handler = ScriptedHandler::with(vec![
            Err(PlatformError::Timeout("slow".into()).into()),
            Ok(()),
        ]);

        let started = Instant::now();
        let outcome = fx.consumer(handler.clone()).process_one().await.unwrap();

        assert!(matches!(outcome, MessageOutcome::Completed { attempts: 2, .. }));
        assert!(started.elapsed() >= ConsumerConfig::default().retry_cooldown);
        assert_eq!(handler.calls().await, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn retry_budget_is_one() {
        let fx = Fixture::new();
        fx.stored_pack().await;
        let handler = ScriptedHandler::with(vec![
            Err(PlatformError::Http { status: 503, message: "busy".into() }.into()),
            Err(PlatformError::Http { status: 503, message: "busy".into() }.into()),
            Ok(()),
        ]);

        let outcome = fx.consumer(handler.clone()).process_one().await.unwrap();

        assert!(matches!(
            outcome,
            MessageOutcome::Failed { attempts: 2, retryable: true, .. }
        ));
        assert_eq!(handler.calls().await, 2);
        assert_eq!(fx.queue.approximate_length().await.unwrap(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn undecodable_payload_is_poison() {
        let fx = Fixture::new();
        fx.queue.enqueue(json!({"share_pack": "nope"})).await.unwrap();
        let handler = ScriptedHandler::with(vec![]);

        let outcome = fx.consumer(handler.clone()).process_one().await.unwrap();

        assert!(matches!(outcome, MessageOutcome::Poison { .. }));
        assert!(outcome.acknowledged());
        assert_eq!(handler.calls().await, 0);
        assert_eq!(fx.queue.approximate_length().await.unwrap(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn over_delivered_message_is_poison() {
        let fx = Fixture::new();
        fx.stored_pack().await;
        let handler = ScriptedHandler::with(vec![]);
        let consumer = fx.consumer(handler.clone());
        let visibility = consumer.config().visibility_timeout;

        for _ in 0..5 {
            let msg = fx.queue.receive(1, visibility).await.unwrap();
            assert_eq!(msg.len(), 1);
            tokio::time::advance(visibility + Duration::from_secs(1)).await;
        }

        let outcome = consumer.process_one().await.unwrap();
        assert!(matches!(outcome, MessageOutcome::Poison { .. }));
        assert_eq!(handler.calls().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn empty_queue_is_idle() {
        let fx = Fixture::new();
        let outcome = fx
            .consumer(ScriptedHandler::with(vec![]))
            .process_one()
            .await
            .unwrap();
        assert_eq!(outcome, MessageOutcome::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn run_stops_on_shutdown() {
        let fx = Fixture::new();
        fx.stored_pack().await;
        let handler = ScriptedHandler::with(vec![Ok(())]);
        let consumer = Arc::new(fx.consumer(handler.clone()));
        let (tx, rx) = watch::channel(false);

        let task = tokio::spawn({
            let consumer = consumer.clone();
            async move { consumer.run(rx).await }
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        tx.send(true).unwrap();
        task.await.unwrap();

        assert_eq!(handler.calls().await, 1);
        assert_eq!(fx.queue.approximate_length().await.unwrap(), 0);
    }
}
