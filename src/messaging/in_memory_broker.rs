use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use super::broker::{BrokerProducer, Delivery, DeliverySource};
use crate::errors::BrokerError;

// ============================================================================
// In-Memory Broker
// ============================================================================
//
// Partitioned, keyed log with per-consumer-group offsets. Used in dev mode and
// by tests in place of Redpanda.
//
// - Records with the same key always land on the same partition
// - A group only moves past a record when it acks it; a nack leaves the
//   offset in place so the record is delivered again
// - A subscription over several topics yields records in append order, so a
//   key's records arrive in the order they were sent even across topics
// - `set_available(false)` makes every send fail, for outage scenarios
//
// ============================================================================

struct StoredRecord {
    sequence: u64,
    key: String,
    payload: Vec<u8>,
}

#[derive(Default)]
struct BrokerLog {
    topics: HashMap<String, Vec<Vec<StoredRecord>>>,
    committed: HashMap<(String, String, i32), i64>,
    next_sequence: u64,
}

struct BrokerInner {
    partitions: usize,
    log: Mutex<BrokerLog>,
    available: AtomicBool,
    send_attempts: AtomicU64,
}

#[derive(Clone)]
pub struct InMemoryBroker {
    inner: Arc<BrokerInner>,
}

impl InMemoryBroker {
    pub fn new(partitions: usize) -> Self {
        Self {
            inner: Arc::new(BrokerInner {
                partitions: partitions.max(1),
                log: Mutex::new(BrokerLog::default()),
                available: AtomicBool::new(true),
                send_attempts: AtomicU64::new(0),
            }),
        }
    }

    pub fn set_available(&self, available: bool) {
        self.inner.available.store(available, Ordering::SeqCst);
        tracing::info!(available, "In-memory broker availability changed");
    }

    /// Sends that reached the broker, accepted or not.
    pub fn send_attempts(&self) -> u64 {
        self.inner.send_attempts.load(Ordering::SeqCst)
    }

    pub fn partition_for(&self, key: &str) -> i32 {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        (hasher.finish() % self.inner.partitions as u64) as i32
    }

    /// Payloads stored on `topic`, in append order.
    pub fn payloads(&self, topic: &str) -> Vec<Vec<u8>> {
        let log = self.inner.log.lock();
        let mut records: Vec<&StoredRecord> = log
            .topics
            .get(topic)
            .map(|partitions| partitions.iter().flatten().collect())
            .unwrap_or_default();
        records.sort_by_key(|r| r.sequence);
        records.into_iter().map(|r| r.payload.clone()).collect()
    }

    pub fn subscribe(&self, consumer_group: &str, topics: &[&str]) -> InMemorySubscription {
        tracing::info!(consumer_group, topics = ?topics, "Subscribed to in-memory broker");
        InMemorySubscription {
            broker: self.clone(),
            consumer_group: consumer_group.to_string(),
            topics: topics.iter().map(|t| t.to_string()).collect(),
        }
    }
}

#[async_trait]
impl BrokerProducer for InMemoryBroker {
    async fn send(&self, topic: &str, partition_key: &str, payload: &[u8]) -> Result<(), BrokerError> {
        self.inner.send_attempts.fetch_add(1, Ordering::SeqCst);
        if !self.inner.available.load(Ordering::SeqCst) {
            return Err(BrokerError::Unavailable("in-memory broker offline".to_string()));
        }

        let partition = self.partition_for(partition_key) as usize;
        let partitions = self.inner.partitions;
        let mut log = self.inner.log.lock();
        let sequence = log.next_sequence;
        log.next_sequence += 1;

        let topic_log = log
            .topics
            .entry(topic.to_string())
            .or_insert_with(|| (0..partitions).map(|_| Vec::new()).collect());
        topic_log[partition].push(StoredRecord {
            sequence,
            key: partition_key.to_string(),
            payload: payload.to_vec(),
        });
        Ok(())
    }
}

pub struct InMemorySubscription {
    broker: InMemoryBroker,
    consumer_group: String,
    topics: Vec<String>,
}

impl InMemorySubscription {
    fn committed_key(&self, topic: &str, partition: i32) -> (String, String, i32) {
        (self.consumer_group.clone(), topic.to_string(), partition)
    }
}

#[async_trait]
impl DeliverySource for InMemorySubscription {
    async fn poll(&mut self) -> Result<Option<Delivery>, BrokerError> {
        let log = self.broker.inner.log.lock();
        let mut next: Option<(u64, Delivery)> = None;

        for topic in &self.topics {
            let Some(partitions) = log.topics.get(topic) else {
                continue;
            };
            for (partition, records) in partitions.iter().enumerate() {
                let partition = partition as i32;
                let offset = log
                    .committed
                    .get(&self.committed_key(topic, partition))
                    .copied()
                    .unwrap_or(0);
                let Some(record) = records.get(offset as usize) else {
                    continue;
                };
                if next.as_ref().map_or(true, |(seq, _)| record.sequence < *seq) {
                    next = Some((
                        record.sequence,
                        Delivery {
                            topic: topic.clone(),
                            partition,
                            offset,
                            key: Some(record.key.clone()),
                            payload: record.payload.clone(),
                        },
                    ));
                }
            }
        }

        Ok(next.map(|(_, delivery)| delivery))
    }

    async fn ack(&mut self, delivery: &Delivery) -> Result<(), BrokerError> {
        let key = self.committed_key(&delivery.topic, delivery.partition);
        let mut log = self.broker.inner.log.lock();
        let committed = log.committed.entry(key).or_insert(0);
        *committed = (*committed).max(delivery.offset + 1);
        Ok(())
    }

    async fn nack(&mut self, delivery: &Delivery) -> Result<(), BrokerError> {
        tracing::debug!(
            topic = %delivery.topic,
            partition = delivery.partition,
            offset = delivery.offset,
            "Delivery rejected, will be redelivered"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_same_key_same_partition() {
        let broker = InMemoryBroker::new(8);
        assert_eq!(broker.partition_for("order-1"), broker.partition_for("order-1"));
        assert!(broker.partition_for("order-2") < 8);
    }

    #[tokio::test]
    async fn test_unavailable_broker_rejects_and_counts() {
        let broker = InMemoryBroker::new(3);
        broker.set_available(false);

        let result = broker.send("order.created", "k", b"x").await;

        assert!(matches!(result, Err(BrokerError::Unavailable(_))));
        assert_eq!(broker.send_attempts(), 1);
        assert!(broker.payloads("order.created").is_empty());
    }

    #[tokio::test]
    async fn test_nack_redelivers_and_ack_advances() {
        let broker = InMemoryBroker::new(2);
        broker.send("order.created", "k", b"first").await.unwrap();
        broker.send("order.created", "k", b"second").await.unwrap();
        let mut subscription = broker.subscribe("notifications", &["order.created"]);

        let first = subscription.poll().await.unwrap().unwrap();
        assert_eq!(first.payload, b"first");
        subscription.nack(&first).await.unwrap();

        let again = subscription.poll().await.unwrap().unwrap();
        assert_eq!(again, first);
        subscription.ack(&again).await.unwrap();

        let second = subscription.poll().await.unwrap().unwrap();
        assert_eq!(second.payload, b"second");
        subscription.ack(&second).await.unwrap();

        assert!(subscription.poll().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_groups_have_independent_offsets() {
        let broker = InMemoryBroker::new(1);
        broker.send("order.paid", "k", b"p").await.unwrap();

        let mut a = broker.subscribe("a", &["order.paid"]);
        let mut b = broker.subscribe("b", &["order.paid"]);

        let delivery = a.poll().await.unwrap().unwrap();
        a.ack(&delivery).await.unwrap();

        assert!(a.poll().await.unwrap().is_none());
        assert!(b.poll().await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_subscription_across_topics_follows_send_order() {
        let broker = InMemoryBroker::new(4);
        broker.send("order.paid", "order-1", b"2").await.unwrap();
        broker.send("order.created", "order-2", b"1").await.unwrap();
        broker.send("order.shipped", "order-1", b"3").await.unwrap();

        let mut subscription =
            broker.subscribe("g", &["order.created", "order.paid", "order.shipped"]);
        let mut seen = Vec::new();
        while let Some(delivery) = subscription.poll().await.unwrap() {
            seen.push(delivery.payload.clone());
            subscription.ack(&delivery).await.unwrap();
        }

        assert_eq!(seen, vec![b"2".to_vec(), b"1".to_vec(), b"3".to_vec()]);
    }
}
