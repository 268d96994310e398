// src/bus/kafka.rs
// Partitioned durable log backend (Kafka-compatible, at-least-once)

use async_trait::async_trait;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::message::Message;
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use rdkafka::util::Timeout;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::{IngestTask, MessageBus, TaskHandler};
use crate::config::BusConfig;
use crate::error::{Result, TrellisError};

/// Bound on a single task dispatch; a stuck handler must not stall the
/// partition forever.
const HANDLER_TIMEOUT_SECS: u64 = 300;

/// Durable log backend. Keys are document uuids, so all tasks for one
/// document land on the same partition and replay in order. Offsets are
/// auto-committed; redelivery after a crash re-runs the handler, which is
/// idempotent on `document_uuid`.
pub struct KafkaBus {
    producer: FutureProducer,
    bootstrap_servers: String,
    topic: String,
    group_id: String,
    produce_timeout: Duration,
    drain_timeout: Duration,
    shutdown: CancellationToken,
    consumer_task: Mutex<Option<JoinHandle<()>>>,
}

impl KafkaBus {
    pub fn new(config: &BusConfig) -> Result<Self> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", &config.bootstrap_servers)
            .set("message.timeout.ms", "10000")
            .set("compression.type", "gzip")
            .set("acks", "all")
            .create()
            .map_err(|e| TrellisError::Store(format!("kafka producer init failed: {e}")))?;

        info!(servers = %config.bootstrap_servers, topic = %config.embedding_topic, "kafka bus initialized");
        Ok(Self {
            producer,
            bootstrap_servers: config.bootstrap_servers.clone(),
            topic: config.embedding_topic.clone(),
            group_id: config.group_id.clone(),
            produce_timeout: Duration::from_secs(config.produce_timeout_secs),
            drain_timeout: Duration::from_secs(config.drain_timeout_secs),
            shutdown: CancellationToken::new(),
            consumer_task: Mutex::new(None),
        })
    }

    fn build_consumer(&self) -> Result<StreamConsumer> {
        ClientConfig::new()
            .set("bootstrap.servers", &self.bootstrap_servers)
            .set("group.id", &self.group_id)
            .set("enable.auto.commit", "true")
            .set("auto.offset.reset", "latest")
            .set("session.timeout.ms", "30000")
            .create()
            .map_err(|e| TrellisError::Store(format!("kafka consumer init failed: {e}")))
    }

    async fn consume_loop(
        consumer: StreamConsumer,
        handler: TaskHandler,
        shutdown: CancellationToken,
    ) {
        loop {
            let message = tokio::select! {
                _ = shutdown.cancelled() => break,
                result = consumer.recv() => result,
            };

            match message {
                Ok(msg) => {
                    let Some(Ok(payload)) = msg.payload_view::<str>() else {
                        warn!("non-utf8 task payload discarded");
                        continue;
                    };
                    match serde_json::from_str::<IngestTask>(payload) {
                        Ok(task) => {
                            let dispatch = tokio::time::timeout(
                                Duration::from_secs(HANDLER_TIMEOUT_SECS),
                                (handler)(task),
                            );
                            if dispatch.await.is_err() {
                                warn!(
                                    partition = msg.partition(),
                                    offset = msg.offset(),
                                    "task handler exceeded its runtime bound"
                                );
                            }
                        }
                        Err(e) => warn!(error = %e, "malformed task discarded"),
                    }
                }
                Err(e) => {
                    error!(error = %e, "kafka receive failed");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }
        }
        info!("kafka consumer loop stopped");
    }
}

#[async_trait]
impl MessageBus for KafkaBus {
    async fn produce(&self, task: IngestTask) -> Result<()> {
        let payload = serde_json::to_string(&task)?;
        let key = task.document_uuid.clone();
        let record = FutureRecord::to(&self.topic).payload(&payload).key(&key);

        self.producer
            .send(record, Timeout::After(self.produce_timeout))
            .await
            .map_err(|(e, _)| TrellisError::Store(format!("kafka produce failed: {e}")))?;
        Ok(())
    }

    async fn consume(&self, handler: TaskHandler) -> Result<()> {
        let mut slot = self.consumer_task.lock().await;
        if slot.is_some() {
            return Err(TrellisError::Input("consumer already running".to_string()));
        }

        let consumer = self.build_consumer()?;
        consumer
            .subscribe(&[self.topic.as_str()])
            .map_err(|e| TrellisError::Store(format!("kafka subscribe failed: {e}")))?;

        info!(topic = %self.topic, group = %self.group_id, "kafka consumer started");
        *slot = Some(tokio::spawn(Self::consume_loop(
            consumer,
            handler,
            self.shutdown.clone(),
        )));
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        self.shutdown.cancel();
        if let Some(task) = self.consumer_task.lock().await.take() {
            if tokio::time::timeout(self.drain_timeout, task).await.is_err() {
                warn!("kafka consumer did not stop within the grace period");
            }
        }
        if let Err(e) = self.producer.flush(Timeout::After(self.drain_timeout)) {
            warn!(error = %e, "kafka producer flush failed during shutdown");
        }
        info!("kafka bus stopped");
        Ok(())
    }
}
