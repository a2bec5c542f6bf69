use async_trait::async_trait;
use rdkafka::{
    config::ClientConfig,
    consumer::{CommitMode, Consumer, StreamConsumer},
    error::{KafkaError, RDKafkaErrorCode},
    producer::{FutureProducer, FutureRecord},
    util::Timeout,
    Message, Offset, TopicPartitionList,
};
use std::time::Duration;

use super::broker::{BrokerProducer, Delivery, DeliverySource};
use crate::errors::BrokerError;

// ============================================================================
// Redpanda / Kafka Adapter
// ============================================================================
//
// Producer: FutureProducer, one record per event, keyed by aggregate id.
// Consumer: StreamConsumer with auto-commit off; Ack commits offset + 1,
// Nack seeks back so the record is fetched again.
//
// The circuit breaker lives in the durable publisher, not here.
//
// ============================================================================

pub struct RedpandaProducer {
    producer: FutureProducer,
    send_timeout: Duration,
}

impl RedpandaProducer {
    pub fn new(brokers: &str, send_timeout: Duration) -> anyhow::Result<Self> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", brokers)
            .set("message.timeout.ms", send_timeout.as_millis().to_string())
            .create()?;

        tracing::info!(brokers = %brokers, "Redpanda producer created");

        Ok(Self {
            producer,
            send_timeout,
        })
    }

    fn classify(&self, error: KafkaError) -> BrokerError {
        match error {
            KafkaError::MessageProduction(RDKafkaErrorCode::MessageTimedOut) => {
                BrokerError::Timeout(self.send_timeout)
            }
            KafkaError::MessageProduction(
                code @ (RDKafkaErrorCode::MessageSizeTooLarge | RDKafkaErrorCode::InvalidMessage),
            ) => BrokerError::Rejected(code.to_string()),
            other => BrokerError::Unavailable(other.to_string()),
        }
    }
}

#[async_trait]
impl BrokerProducer for RedpandaProducer {
    async fn send(&self, topic: &str, partition_key: &str, payload: &[u8]) -> Result<(), BrokerError> {
        let record = FutureRecord::to(topic).key(partition_key).payload(payload);

        self.producer
            .send(record, Timeout::After(self.send_timeout))
            .await
            .map_err(|(e, _)| self.classify(e))?;

        tracing::debug!(topic = %topic, key = %partition_key, "Published to Redpanda");
        Ok(())
    }
}

pub struct RedpandaSubscription {
    consumer: StreamConsumer,
    seek_timeout: Duration,
}

impl RedpandaSubscription {
    pub fn new(brokers: &str, consumer_group: &str, topics: &[&str]) -> anyhow::Result<Self> {
        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", brokers)
            .set("group.id", consumer_group)
            .set("enable.auto.commit", "false")
            .set("auto.offset.reset", "earliest")
            .create()?;

        consumer.subscribe(topics)?;

        tracing::info!(
            brokers = %brokers,
            consumer_group = %consumer_group,
            topics = ?topics,
            "Redpanda consumer subscribed"
        );

        Ok(Self {
            consumer,
            seek_timeout: Duration::from_secs(5),
        })
    }
}

#[async_trait]
impl DeliverySource for RedpandaSubscription {
    async fn poll(&mut self) -> Result<Option<Delivery>, BrokerError> {
        let message = self
            .consumer
            .recv()
            .await
            .map_err(|e| BrokerError::Unavailable(e.to_string()))?;

        Ok(Some(Delivery {
            topic: message.topic().to_string(),
            partition: message.partition(),
            offset: message.offset(),
            key: message.key().map(|k| String::from_utf8_lossy(k).into_owned()),
            payload: message.payload().unwrap_or_default().to_vec(),
        }))
    }

    async fn ack(&mut self, delivery: &Delivery) -> Result<(), BrokerError> {
        let mut offsets = TopicPartitionList::new();
        offsets
            .add_partition_offset(&delivery.topic, delivery.partition, Offset::Offset(delivery.offset + 1))
            .map_err(|e| BrokerError::Rejected(e.to_string()))?;

        self.consumer
            .commit(&offsets, CommitMode::Async)
            .map_err(|e| BrokerError::Unavailable(e.to_string()))
    }

    async fn nack(&mut self, delivery: &Delivery) -> Result<(), BrokerError> {
        self.consumer
            .seek(
                &delivery.topic,
                delivery.partition,
                Offset::Offset(delivery.offset),
                self.seek_timeout,
            )
            .map_err(|e| BrokerError::Unavailable(e.to_string()))
    }
}
