use std::sync::Arc;
use tracing::Instrument;
use uuid::Uuid;

use super::aggregate::OrderAggregate;
use super::commands::OrderCommand;
use super::store::{OrderStore, OrderTransaction};
use super::value_objects::OrderItem;
use crate::correlation::{correlation_span, CorrelationId};
use crate::dispatch::{DispatchCoordinator, EventBuffer};
use crate::errors::{IsTransient, ServiceError};
use crate::utils::RetryExecutor;

// ============================================================================
// Order Service
// ============================================================================
//
// Runs each order command as one persistence transaction:
//   begin -> load -> decide -> save -> buffer event -> commit -> publish
//
// The whole transaction is retried on transient storage errors. Business
// errors fail at once. Events reach the publisher only after commit, and
// publication trouble never turns into a ServiceError.
//
// ============================================================================

pub struct OrderService<S: OrderStore> {
    store: Arc<S>,
    coordinator: DispatchCoordinator,
    retry: RetryExecutor,
}

impl<S: OrderStore> OrderService<S> {
    pub fn new(store: Arc<S>, coordinator: DispatchCoordinator, retry: RetryExecutor) -> Self {
        Self {
            store,
            coordinator,
            retry,
        }
    }

    pub async fn create_order(
        &self,
        customer_id: Uuid,
        items: Vec<OrderItem>,
        correlation_id: CorrelationId,
    ) -> Result<OrderAggregate, ServiceError> {
        let command = OrderCommand::CreateOrder {
            order_id: Uuid::new_v4(),
            customer_id,
            items,
        };
        self.execute(command, correlation_id).await
    }

    pub async fn pay_order(
        &self,
        order_id: Uuid,
        payment_reference: String,
        correlation_id: CorrelationId,
    ) -> Result<OrderAggregate, ServiceError> {
        let command = OrderCommand::PayOrder {
            order_id,
            payment_reference,
        };
        self.execute(command, correlation_id).await
    }

    pub async fn ship_order(
        &self,
        order_id: Uuid,
        tracking_number: String,
        carrier: String,
        correlation_id: CorrelationId,
    ) -> Result<OrderAggregate, ServiceError> {
        let command = OrderCommand::ShipOrder {
            order_id,
            tracking_number,
            carrier,
        };
        self.execute(command, correlation_id).await
    }

    pub async fn deliver_order(
        &self,
        order_id: Uuid,
        signature: Option<String>,
        correlation_id: CorrelationId,
    ) -> Result<OrderAggregate, ServiceError> {
        let command = OrderCommand::DeliverOrder {
            order_id,
            signature,
        };
        self.execute(command, correlation_id).await
    }

    pub async fn cancel_order(
        &self,
        order_id: Uuid,
        reason: Option<String>,
        correlation_id: CorrelationId,
    ) -> Result<OrderAggregate, ServiceError> {
        let command = OrderCommand::CancelOrder { order_id, reason };
        self.execute(command, correlation_id).await
    }

    /// Run `command` with retry, returning the committed order state.
    pub async fn execute(
        &self,
        command: OrderCommand,
        correlation_id: CorrelationId,
    ) -> Result<OrderAggregate, ServiceError> {
        async {
            tracing::info!(
                command = command.name(),
                order_id = %command.order_id(),
                "Handling order command"
            );

            self.retry
                .execute_with_retry(
                    &command,
                    |command, _attempt| self.attempt(command, correlation_id),
                    |e: &ServiceError| e.is_transient(),
                    |error, attempts, command| {
                        tracing::error!(
                            command = command.name(),
                            order_id = %command.order_id(),
                            attempts = attempts,
                            error = %error,
                            "Order command failed, storage unavailable"
                        );
                        match error {
                            ServiceError::Storage(source) => {
                                Err(ServiceError::StorageExhausted { attempts, source })
                            }
                            other => Err(other),
                        }
                    },
                )
                .await
        }
        .instrument(correlation_span(correlation_id))
        .await
    }

    async fn attempt(
        &self,
        command: &OrderCommand,
        correlation_id: CorrelationId,
    ) -> Result<OrderAggregate, ServiceError> {
        let mut tx = self.store.begin().await?;
        let mut buffer = self.coordinator.buffer(correlation_id);

        match Self::stage(&mut tx, command, &mut buffer).await {
            Ok(order) => {
                let report = self.coordinator.commit(tx, buffer).await?;
                tracing::info!(
                    order_id = %order.id,
                    status = %order.status,
                    version = order.version,
                    released = report.released(),
                    delivered = report.delivered(),
                    "Order command committed"
                );
                Ok(order)
            }
            Err(e) => {
                if let Err(rollback_error) = self.coordinator.rollback(tx, buffer).await {
                    tracing::warn!(error = %rollback_error, "Rollback failed");
                }
                Err(e)
            }
        }
    }

    async fn stage(
        tx: &mut S::Tx,
        command: &OrderCommand,
        buffer: &mut EventBuffer,
    ) -> Result<OrderAggregate, ServiceError> {
        let order_id = command.order_id();
        let current = tx.load(order_id).await?;

        let (order, event) = match (current, command) {
            (
                None,
                OrderCommand::CreateOrder {
                    order_id,
                    customer_id,
                    items,
                },
            ) => OrderAggregate::create(*order_id, *customer_id, items.clone())?,
            (None, _) => return Err(ServiceError::NotFound(order_id)),
            (Some(mut order), command) => {
                let event = order.handle_command(command)?;
                order.apply(&event);
                (order, event)
            }
        };

        tx.save(&order).await?;
        event.record_into(order.id, buffer)?;
        Ok(order)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::order::{InMemoryOrderStore, OrderError, OrderStatus};
    use crate::errors::StorageError;
    use crate::events::deserialize_event;
    use crate::messaging::{
        republish_channel, BrokerProducer, DurablePublisher, InMemoryBroker, RepublishConfig,
        RepublishWorker,
    };
    use crate::metrics::Metrics;
    use crate::storage::InMemoryDeadLetterStore;
    use crate::utils::{CircuitBreaker, CircuitBreakerConfig, RetryPolicy};
    use tokio::time::{Duration, Instant};

    struct Harness {
        store: Arc<InMemoryOrderStore>,
        broker: InMemoryBroker,
        metrics: Arc<Metrics>,
        service: OrderService<InMemoryOrderStore>,
        _worker: RepublishWorker,
    }

    fn harness() -> Harness {
        let store = Arc::new(InMemoryOrderStore::new());
        let broker = InMemoryBroker::new(3);
        let metrics = Arc::new(Metrics::new().unwrap());
        let producer: Arc<dyn BrokerProducer> = Arc::new(broker.clone());
        let breaker = CircuitBreaker::new(
            "broker-publisher",
            CircuitBreakerConfig {
                minimum_calls: 100,
                sliding_window_size: 100,
                ..CircuitBreakerConfig::default()
            },
        );

        let (queue, worker) = republish_channel(
            RepublishConfig::default(),
            producer.clone(),
            breaker.clone(),
            Arc::new(InMemoryDeadLetterStore::new()),
            metrics.clone(),
        );
        let publisher = DurablePublisher::new(producer, breaker, metrics.clone(), queue);
        let retry = RetryExecutor::new("order_command", RetryPolicy::default())
            .with_observer(metrics.clone());
        let service = OrderService::new(
            store.clone(),
            DispatchCoordinator::new(Arc::new(publisher)),
            retry,
        );

        Harness {
            store,
            broker,
            metrics,
            service,
            _worker: worker,
        }
    }

    fn items() -> Vec<OrderItem> {
        vec![OrderItem::new(Uuid::new_v4(), 2)]
    }

    #[tokio::test]
    async fn test_lifecycle_publishes_one_event_per_command_in_order() {
        let h = harness();
        let cid = CorrelationId::new();

        let order = h.service.create_order(Uuid::new_v4(), items(), cid).await.unwrap();
        h.service.pay_order(order.id, "pay-1".into(), cid).await.unwrap();
        h.service.ship_order(order.id, "1Z".into(), "UPS".into(), cid).await.unwrap();
        let delivered = h.service.deliver_order(order.id, None, cid).await.unwrap();

        assert_eq!(delivered.status, OrderStatus::Delivered);
        assert_eq!(h.store.get(order.id).unwrap().version, 4);

        let created = deserialize_event(&h.broker.payloads("order.created")[0]).unwrap();
        assert_eq!(created.aggregate_id(), order.id);
        assert_eq!(created.correlation_id(), cid);
        assert_eq!(h.broker.payloads("order.paid").len(), 1);
        assert_eq!(h.broker.payloads("order.shipped").len(), 1);
        assert_eq!(h.broker.payloads("order.delivered").len(), 1);
    }

    #[tokio::test]
    async fn test_broker_down_does_not_fail_the_business_operation() {
        let h = harness();
        h.broker.set_available(false);

        let order = h
            .service
            .create_order(Uuid::new_v4(), items(), CorrelationId::new())
            .await
            .unwrap();

        assert_eq!(h.store.get(order.id).unwrap().status, OrderStatus::Created);
        assert_eq!(
            h.metrics
                .events_publish_failed
                .with_label_values(&["OrderCreated", "broker"])
                .get(),
            1
        );
    }

    #[tokio::test]
    async fn test_business_error_rolls_back_and_publishes_nothing() {
        let h = harness();
        let cid = CorrelationId::new();
        let order = h.service.create_order(Uuid::new_v4(), items(), cid).await.unwrap();
        let sends_before = h.broker.send_attempts();

        let result = h.service.ship_order(order.id, "1Z".into(), "UPS".into(), cid).await;

        assert!(matches!(result, Err(ServiceError::Business(OrderError::NotPaid))));
        assert_eq!(h.store.rollback_count(), 1);
        assert_eq!(h.broker.send_attempts(), sends_before);
        assert_eq!(h.store.get(order.id).unwrap().version, 1);
    }

    #[tokio::test]
    async fn test_unknown_order_is_not_found() {
        let h = harness();
        let missing = Uuid::new_v4();

        let result = h.service.cancel_order(missing, None, CorrelationId::new()).await;

        assert!(matches!(result, Err(ServiceError::NotFound(id)) if id == missing));
        assert_eq!(h.broker.send_attempts(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_storage_errors_are_retried_with_backoff() {
        let h = harness();
        h.store.fail_next_begins(2);
        let started = Instant::now();

        let order = h
            .service
            .create_order(Uuid::new_v4(), items(), CorrelationId::new())
            .await
            .unwrap();

        assert_eq!(started.elapsed(), Duration::from_secs(3));
        assert!(h.store.get(order.id).is_some());
        assert_eq!(h.broker.payloads("order.created").len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_commit_is_retried_without_phantom_events() {
        let h = harness();
        h.store.fail_next_commits(1);

        let order = h
            .service
            .create_order(Uuid::new_v4(), items(), CorrelationId::new())
            .await
            .unwrap();

        // One event for the one commit that succeeded
        assert_eq!(h.broker.payloads("order.created").len(), 1);
        assert_eq!(h.store.commit_count(), 1);
        assert!(h.store.get(order.id).is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_storage_retries_surface_as_operational_failure() {
        let h = harness();
        h.store.fail_next_begins(3);

        let result = h
            .service
            .create_order(Uuid::new_v4(), items(), CorrelationId::new())
            .await;

        match result {
            Err(ServiceError::StorageExhausted { attempts, source }) => {
                assert_eq!(attempts, 3);
                assert!(matches!(source, StorageError::Unavailable(_)));
            }
            other => panic!("expected StorageExhausted, got {:?}", other),
        }
        assert_eq!(h.broker.send_attempts(), 0);
    }
}
