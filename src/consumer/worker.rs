use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::sleep;

use super::idempotent::{ConsumerDecision, IdempotentConsumer};
use crate::errors::BrokerError;
use crate::messaging::{Delivery, DeliverySource};

enum Step {
    Acked,
    Nacked,
    Idle,
}

/// Polls one `DeliverySource` and feeds every delivery through the
/// idempotent consumer, acking or nacking as it decides.
pub struct ConsumerWorker<D: DeliverySource> {
    source: D,
    consumer: Arc<IdempotentConsumer>,
}

impl<D: DeliverySource + 'static> ConsumerWorker<D> {
    pub fn new(source: D, consumer: Arc<IdempotentConsumer>) -> Self {
        Self { source, consumer }
    }

    /// Handle deliveries until the source is drained or a delivery is nacked.
    /// Returns how many deliveries were acknowledged.
    pub async fn process_available(&mut self) -> Result<usize, BrokerError> {
        let mut acked = 0;
        while let Some(delivery) = self.source.poll().await? {
            match self.handle(&delivery).await? {
                Step::Acked => acked += 1,
                Step::Nacked | Step::Idle => break,
            }
        }
        Ok(acked)
    }

    pub fn spawn(self, shutdown: watch::Receiver<bool>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }

    /// Run until `shutdown` flips to true or its sender is dropped.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        let group = self.consumer.config().consumer_group.clone();
        let idle = self.consumer.config().idle_poll_interval;
        let redelivery = self.consumer.config().redelivery_delay;
        tracing::info!(consumer_group = %group, "🚀 Consumer worker started");

        loop {
            if *shutdown.borrow() {
                break;
            }

            let polled = tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
                polled = self.source.poll() => polled,
            };

            let step = match polled {
                Ok(Some(delivery)) => self.handle(&delivery).await,
                Ok(None) => Ok(Step::Idle),
                Err(e) => Err(e),
            };

            let delay = match step {
                Ok(Step::Acked) => continue,
                Ok(Step::Nacked) => redelivery,
                Ok(Step::Idle) => idle,
                Err(e) => {
                    tracing::warn!(consumer_group = %group, error = %e, "Broker error in consumer loop");
                    idle
                }
            };

            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                _ = sleep(delay) => {}
            }
        }

        tracing::info!(consumer_group = %group, "Consumer worker stopped");
    }

    async fn handle(&mut self, delivery: &Delivery) -> Result<Step, BrokerError> {
        match self.consumer.on_delivery(delivery).await {
            ConsumerDecision::Ack(_) => {
                self.source.ack(delivery).await?;
                Ok(Step::Acked)
            }
            ConsumerDecision::Nack => {
                self.source.nack(delivery).await?;
                Ok(Step::Nacked)
            }
        }
    }
}
