// src/bus/channel.rs
// In-process bounded queue backend with a worker pool (at-most-once)

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::{IngestTask, MessageBus, TaskHandler};
use crate::config::BusConfig;
use crate::error::{Result, TrellisError};

/// Bounded in-process queue. `produce` blocks with a timeout when the queue
/// is full; `consume` starts N worker tasks that each receive, invoke the
/// handler, and ack on return. A panicking handler is caught and logged; the
/// message counts as delivered.
pub struct ChannelBus {
    sender: mpsc::Sender<IngestTask>,
    receiver: Arc<Mutex<mpsc::Receiver<IngestTask>>>,
    num_consumers: usize,
    produce_timeout: Duration,
    drain_timeout: Duration,
    shutdown: CancellationToken,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl ChannelBus {
    pub fn new(config: &BusConfig) -> Self {
        let (sender, receiver) = mpsc::channel(config.max_size.max(1));
        info!(max_size = config.max_size, "channel bus initialized");
        Self {
            sender,
            receiver: Arc::new(Mutex::new(receiver)),
            num_consumers: config.num_consumers.max(1),
            produce_timeout: Duration::from_secs(config.produce_timeout_secs),
            drain_timeout: Duration::from_secs(config.drain_timeout_secs),
            shutdown: CancellationToken::new(),
            workers: Mutex::new(Vec::new()),
        }
    }

    async fn worker_loop(
        worker_id: usize,
        receiver: Arc<Mutex<mpsc::Receiver<IngestTask>>>,
        handler: TaskHandler,
        shutdown: CancellationToken,
    ) {
        debug!(worker_id, "ingest worker started");
        loop {
            let task = {
                let mut rx = receiver.lock().await;
                tokio::select! {
                    task = rx.recv() => task,
                    _ = shutdown.cancelled() => {
                        // Drain whatever is already queued before exiting.
                        rx.try_recv().ok()
                    }
                }
            };

            let Some(task) = task else {
                if shutdown.is_cancelled() {
                    break;
                }
                // Channel closed without shutdown; nothing more will arrive.
                break;
            };

            // Spawn per message so a panicking handler cannot take the
            // worker down; the message is considered acked regardless.
            let outcome = tokio::spawn((handler)(task)).await;
            if let Err(join_err) = outcome {
                error!(worker_id, error = %join_err, "task handler panicked, message dropped");
            }
        }
        debug!(worker_id, "ingest worker stopped");
    }
}

#[async_trait]
impl MessageBus for ChannelBus {
    async fn produce(&self, task: IngestTask) -> Result<()> {
        self.sender
            .send_timeout(task, self.produce_timeout)
            .await
            .map_err(|e| match e {
                mpsc::error::SendTimeoutError::Timeout(_) => {
                    warn!("channel bus full, produce timed out");
                    TrellisError::Timeout("bus produce".to_string())
                }
                mpsc::error::SendTimeoutError::Closed(_) => {
                    TrellisError::Store("bus is stopped".to_string())
                }
            })
    }

    async fn consume(&self, handler: TaskHandler) -> Result<()> {
        let mut workers = self.workers.lock().await;
        if !workers.is_empty() {
            return Err(TrellisError::Input("consumers already running".to_string()));
        }
        for worker_id in 0..self.num_consumers {
            workers.push(tokio::spawn(Self::worker_loop(
                worker_id,
                Arc::clone(&self.receiver),
                Arc::clone(&handler),
                self.shutdown.clone(),
            )));
        }
        info!(consumers = self.num_consumers, "channel bus consumers started");
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        self.shutdown.cancel();
        let mut workers = self.workers.lock().await;
        let deadline = tokio::time::Instant::now() + self.drain_timeout;
        for worker in workers.drain(..) {
            match tokio::time::timeout_at(deadline, worker).await {
                Ok(_) => {}
                Err(_) => warn!("worker did not drain within the grace period"),
            }
        }
        info!("channel bus stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BusMode;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn test_config(max_size: usize, consumers: usize) -> BusConfig {
        BusConfig {
            mode: BusMode::Channel,
            max_size,
            num_consumers: consumers,
            produce_timeout_secs: 1,
            bootstrap_servers: String::new(),
            embedding_topic: String::new(),
            group_id: String::new(),
            drain_timeout_secs: 2,
        }
    }

    #[tokio::test]
    async fn tasks_are_delivered_to_the_handler() {
        let bus = ChannelBus::new(&test_config(16, 2));
        let seen = Arc::new(AtomicUsize::new(0));
        let seen_clone = Arc::clone(&seen);

        let handler: TaskHandler = Arc::new(move |_task| {
            let seen = Arc::clone(&seen_clone);
            Box::pin(async move {
                seen.fetch_add(1, Ordering::SeqCst);
            })
        });
        bus.consume(handler).await.unwrap();

        for i in 0..5 {
            bus.produce(IngestTask::text(&format!("d-{i}"), "content", 0))
                .await
                .unwrap();
        }

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(seen.load(Ordering::SeqCst), 5);
        bus.stop().await.unwrap();
    }

    #[tokio::test]
    async fn panicking_handler_is_contained() {
        let bus = ChannelBus::new(&test_config(4, 1));
        let seen = Arc::new(AtomicUsize::new(0));
        let seen_clone = Arc::clone(&seen);

        let handler: TaskHandler = Arc::new(move |task| {
            let seen = Arc::clone(&seen_clone);
            Box::pin(async move {
                if task.document_uuid == "boom" {
                    panic!("handler exploded");
                }
                seen.fetch_add(1, Ordering::SeqCst);
            })
        });
        bus.consume(handler).await.unwrap();

        bus.produce(IngestTask::text("boom", "x", 0)).await.unwrap();
        bus.produce(IngestTask::text("ok", "x", 0)).await.unwrap();

        tokio::time::sleep(Duration::from_millis(200)).await;
        // The worker survived the panic and processed the next message.
        assert_eq!(seen.load(Ordering::SeqCst), 1);
        bus.stop().await.unwrap();
    }

    #[tokio::test]
    async fn double_consume_is_rejected() {
        let bus = ChannelBus::new(&test_config(4, 1));
        let handler: TaskHandler = Arc::new(|_| Box::pin(async {}));
        bus.consume(Arc::clone(&handler)).await.unwrap();
        assert!(bus.consume(handler).await.is_err());
        bus.stop().await.unwrap();
    }
}
