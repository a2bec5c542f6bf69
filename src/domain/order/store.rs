use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use uuid::Uuid;

use super::aggregate::OrderAggregate;
use crate::dispatch::Transaction;
use crate::errors::StorageError;

/// Persistence collaborator for orders.
///
/// Each business operation begins its own transaction; nothing written through
/// it is visible to others until `commit`.
#[async_trait]
pub trait OrderStore: Send + Sync {
    type Tx: OrderTransaction;

    async fn begin(&self) -> Result<Self::Tx, StorageError>;
}

#[async_trait]
pub trait OrderTransaction: Transaction {
    async fn load(&mut self, order_id: Uuid) -> Result<Option<OrderAggregate>, StorageError>;

    /// Stage `order`. Its `version` must be exactly one past the stored one
    /// (1 for a new order), otherwise commit fails with a conflict.
    async fn save(&mut self, order: &OrderAggregate) -> Result<(), StorageError>;
}

// ============================================================================
// In-memory store
// ============================================================================

#[derive(Default)]
struct Inner {
    orders: Mutex<HashMap<Uuid, OrderAggregate>>,
    failing_begins: AtomicU32,
    failing_commits: AtomicU32,
    commits: AtomicU64,
    rollbacks: AtomicU64,
}

/// Map-backed store with failure injection, used by tests and the demo binary.
#[derive(Clone, Default)]
pub struct InMemoryOrderStore {
    inner: Arc<Inner>,
}

impl InMemoryOrderStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` calls to `begin` fail with a transient error.
    pub fn fail_next_begins(&self, count: u32) {
        self.inner.failing_begins.store(count, Ordering::SeqCst);
    }

    /// Make the next `count` commits fail with a transient error.
    pub fn fail_next_commits(&self, count: u32) {
        self.inner.failing_commits.store(count, Ordering::SeqCst);
    }

    pub fn get(&self, order_id: Uuid) -> Option<OrderAggregate> {
        self.inner.orders.lock().get(&order_id).cloned()
    }

    pub fn commit_count(&self) -> u64 {
        self.inner.commits.load(Ordering::SeqCst)
    }

    pub fn rollback_count(&self) -> u64 {
        self.inner.rollbacks.load(Ordering::SeqCst)
    }
}

fn take_failure(counter: &AtomicU32) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

#[async_trait]
impl OrderStore for InMemoryOrderStore {
    type Tx = InMemoryOrderTx;

    async fn begin(&self) -> Result<Self::Tx, StorageError> {
        if take_failure(&self.inner.failing_begins) {
            return Err(StorageError::Unavailable("connection refused".into()));
        }

        Ok(InMemoryOrderTx {
            inner: self.inner.clone(),
            staged: Vec::new(),
        })
    }
}

pub struct InMemoryOrderTx {
    inner: Arc<Inner>,
    staged: Vec<OrderAggregate>,
}

#[async_trait]
impl Transaction for InMemoryOrderTx {
    async fn commit(self) -> Result<(), StorageError> {
        if take_failure(&self.inner.failing_commits) {
            return Err(StorageError::Unavailable("connection reset during commit".into()));
        }

        let mut orders = self.inner.orders.lock();
        for order in &self.staged {
            let actual = orders.get(&order.id).map(|o| o.version).unwrap_or(0);
            let expected = order.version - 1;
            if actual != expected {
                return Err(StorageError::Conflict {
                    order_id: order.id,
                    expected,
                    actual,
                });
            }
        }
        for order in self.staged {
            orders.insert(order.id, order);
        }

        self.inner.commits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn rollback(self) -> Result<(), StorageError> {
        self.inner.rollbacks.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[async_trait]
impl OrderTransaction for InMemoryOrderTx {
    async fn load(&mut self, order_id: Uuid) -> Result<Option<OrderAggregate>, StorageError> {
        if let Some(staged) = self.staged.iter().rev().find(|o| o.id == order_id) {
            return Ok(Some(staged.clone()));
        }
        Ok(self.inner.orders.lock().get(&order_id).cloned())
    }

    async fn save(&mut self, order: &OrderAggregate) -> Result<(), StorageError> {
        self.staged.retain(|o| o.id != order.id);
        self.staged.push(order.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::order::OrderItem;

    fn order() -> OrderAggregate {
        OrderAggregate::create(Uuid::new_v4(), Uuid::new_v4(), vec![OrderItem::new(Uuid::new_v4(), 1)])
            .unwrap()
            .0
    }

    #[tokio::test]
    async fn test_writes_visible_only_after_commit() {
        let store = InMemoryOrderStore::new();
        let order = order();

        let mut tx = store.begin().await.unwrap();
        tx.save(&order).await.unwrap();
        assert!(store.get(order.id).is_none());
        assert_eq!(tx.load(order.id).await.unwrap(), Some(order.clone()));

        tx.commit().await.unwrap();
        assert_eq!(store.get(order.id), Some(order));
        assert_eq!(store.commit_count(), 1);
    }

    #[tokio::test]
    async fn test_rollback_discards_writes() {
        let store = InMemoryOrderStore::new();
        let order = order();

        let mut tx = store.begin().await.unwrap();
        tx.save(&order).await.unwrap();
        tx.rollback().await.unwrap();

        assert!(store.get(order.id).is_none());
        assert_eq!(store.rollback_count(), 1);
    }

    #[tokio::test]
    async fn test_stale_version_conflicts() {
        let store = InMemoryOrderStore::new();
        let order = order();

        let mut tx = store.begin().await.unwrap();
        tx.save(&order).await.unwrap();
        tx.commit().await.unwrap();

        // A second create of the same id is a stale write
        let mut tx = store.begin().await.unwrap();
        tx.save(&order).await.unwrap();
        let result = tx.commit().await;

        assert_eq!(
            result.unwrap_err(),
            StorageError::Conflict { order_id: order.id, expected: 0, actual: 1 }
        );
    }

    #[tokio::test]
    async fn test_injected_failures_are_consumed() {
        let store = InMemoryOrderStore::new();
        store.fail_next_begins(2);

        assert!(store.begin().await.is_err());
        assert!(store.begin().await.is_err());
        assert!(store.begin().await.is_ok());
    }
}
