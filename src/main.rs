use kameo::prelude::*;
use scylla::client::session::Session;
use scylla::client::session_builder::SessionBuilder;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Duration;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use uuid::Uuid;

use order_events::actors::{DlqActor, DlqHandle, GetSystemHealth, HealthMonitorActor};
use order_events::config::AppConfig;
use order_events::consumer::{ConsumerWorker, IdempotentConsumer, InProcessConsumer, LogNotifier};
use order_events::correlation::CorrelationId;
use order_events::dispatch::DispatchCoordinator;
use order_events::domain::order::{InMemoryOrderStore, OrderItem, OrderService};
use order_events::events::all_topics;
use order_events::messaging::{
    republish_channel, BrokerDeadLetterSink, BrokerProducer, DurablePublisher, EventPublisher,
    FanOutDeadLetterSink, InMemoryBroker, InProcessPublisher, PublisherMode, RedpandaProducer,
    RedpandaSubscription,
};
use order_events::metrics::{self, Metrics};
use order_events::storage::{
    ensure_schema, DeadLetterSink, DeadLetterStore, InMemoryDeadLetterStore,
    InMemoryProcessedEventStore, ProcessedEventStore, RedisProcessedEventStore,
    ScyllaDeadLetterStore, ScyllaProcessedEventStore,
};
use order_events::utils::{CircuitBreakerRegistry, RetryExecutor};

/// `KAFKA_BROKERS` value that selects the in-memory broker.
const IN_MEMORY_BROKERS: &str = "memory";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize structured logging with environment-based filtering
    // Example: RUST_LOG=debug cargo run
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_thread_ids(true))
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,order_events=debug")),
        )
        .init();

    let config = AppConfig::from_env()?;
    tracing::info!(publisher_mode = %config.publisher_mode, "🚀 Starting order events demo");

    // === 1. Metrics and circuit breakers ===
    let metrics = Arc::new(Metrics::new()?);
    tracing::info!("📊 Metrics registry created with {} metrics", metrics.registry().gather().len());

    let breakers = Arc::new(CircuitBreakerRegistry::new());
    breakers.add_listener(metrics.clone());
    let broker_breaker = breakers.get_or_create("broker-publisher", config.circuit_breaker.clone());

    // === 2. Optional ScyllaDB session ===
    let session = match &config.scylla_node {
        Some(node) => {
            tracing::info!(node = %node, "Connecting to ScyllaDB...");
            let session: Session = SessionBuilder::new().known_node(node).build().await?;
            ensure_schema(&session, &config.scylla_keyspace).await?;
            Some(Arc::new(session))
        }
        None => None,
    };

    // === 3. Actors: dead-letter queue and health monitor ===
    let dlq_store: Arc<dyn DeadLetterStore> = match &session {
        Some(session) => Arc::new(ScyllaDeadLetterStore::new(session.clone())),
        None => Arc::new(InMemoryDeadLetterStore::new()),
    };
    let dlq = DlqHandle::new(DlqActor::spawn(DlqActor::new(dlq_store, metrics.clone())));
    let health = HealthMonitorActor::spawn(HealthMonitorActor::new(breakers.clone()));

    // Metrics HTTP server runs on its own actix system thread
    let metrics_registry = Arc::new(metrics.registry().clone());
    let metrics_health = health.clone();
    let metrics_port = config.metrics_port;
    std::thread::spawn(move || {
        let result = actix_web::rt::System::new().block_on(metrics::start_metrics_server(
            metrics_registry,
            metrics_health,
            metrics_port,
        ));
        if let Err(e) = result {
            tracing::error!("Metrics server error: {}", e);
        }
    });

    // === 4. Processed-event store for the idempotent consumer ===
    let group = config.consumer.consumer_group.clone();
    let processed: Arc<dyn ProcessedEventStore> = if let Some(session) = &session {
        Arc::new(ScyllaProcessedEventStore::new(session.clone(), group))
    } else if let Some(url) = &config.redis_url {
        Arc::new(RedisProcessedEventStore::connect(url, group, config.dedup_retention).await?)
    } else {
        Arc::new(InMemoryProcessedEventStore::new())
    };

    // === 5. Publisher variant and consumer wiring ===
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut background: Vec<JoinHandle<()>> = Vec::new();
    let dlq_sink: Arc<dyn DeadLetterSink> = Arc::new(dlq.clone());

    let publisher: Arc<dyn EventPublisher> = match config.publisher_mode {
        PublisherMode::InProcess => {
            let consumer = Arc::new(IdempotentConsumer::new(
                config.consumer.clone(),
                processed,
                Arc::new(LogNotifier),
                dlq_sink.clone(),
                metrics.clone(),
            ));
            let publisher = InProcessPublisher::new();
            publisher.subscribe(Arc::new(InProcessConsumer::new(consumer)));
            Arc::new(publisher)
        }
        PublisherMode::Durable => {
            let topics = all_topics();
            let producer: Arc<dyn BrokerProducer>;
            let consumer_dlq: Arc<dyn DeadLetterSink>;

            let consumer_for = |dead_letters: Arc<dyn DeadLetterSink>| {
                Arc::new(IdempotentConsumer::new(
                    config.consumer.clone(),
                    processed.clone(),
                    Arc::new(LogNotifier),
                    dead_letters,
                    metrics.clone(),
                ))
            };

            if config.kafka_brokers == IN_MEMORY_BROKERS {
                let broker = InMemoryBroker::new(config.broker_partitions);
                producer = Arc::new(broker.clone());
                consumer_dlq = Arc::new(FanOutDeadLetterSink::new(vec![
                    dlq_sink.clone(),
                    Arc::new(BrokerDeadLetterSink::new(producer.clone())),
                ]));
                let subscription = broker.subscribe(&config.consumer.consumer_group, &topics);
                background.push(
                    ConsumerWorker::new(subscription, consumer_for(consumer_dlq)).spawn(shutdown_rx.clone()),
                );
            } else {
                producer = Arc::new(RedpandaProducer::new(&config.kafka_brokers, config.kafka_send_timeout)?);
                consumer_dlq = Arc::new(FanOutDeadLetterSink::new(vec![
                    dlq_sink.clone(),
                    Arc::new(BrokerDeadLetterSink::new(producer.clone())),
                ]));
                let subscription = RedpandaSubscription::new(
                    &config.kafka_brokers,
                    &config.consumer.consumer_group,
                    &topics,
                )?;
                background.push(
                    ConsumerWorker::new(subscription, consumer_for(consumer_dlq)).spawn(shutdown_rx.clone()),
                );
            }

            let (queue, worker) = republish_channel(
                config.republish.clone(),
                producer.clone(),
                broker_breaker.clone(),
                dlq_sink.clone(),
                metrics.clone(),
            );
            background.push(worker.spawn());

            Arc::new(DurablePublisher::new(producer, broker_breaker.clone(), metrics.clone(), queue))
        }
    };

    // === 6. Order service ===
    let retry = RetryExecutor::new("order_command", config.retry.clone()).with_observer(metrics.clone());
    let service = OrderService::new(
        Arc::new(InMemoryOrderStore::new()),
        DispatchCoordinator::new(publisher),
        retry,
    );

    // === 7. Demonstrate the order lifecycle ===
    if let Err(e) = run_lifecycle(&service).await {
        tracing::error!(error = %e, "Order lifecycle demo failed");
    }

    tokio::time::sleep(Duration::from_secs(2)).await;

    let system = health
        .ask(GetSystemHealth)
        .send()
        .await
        .map_err(|e| anyhow::anyhow!("Health query failed: {:?}", e))?;
    tracing::info!(status = ?system.overall_status, components = system.components.len(), "🩺 System health");
    let stats = dlq.stats().await?;
    tracing::info!(total = stats.total_messages, "📮 Dead letter queue");

    // === 8. Shutdown ===
    // Dropping the service drops the last re-publication queue handle
    drop(service);
    let _ = shutdown_tx.send(true);
    for handle in background {
        if tokio::time::timeout(Duration::from_secs(5), handle).await.is_err() {
            tracing::warn!("Background task did not stop in time");
        }
    }

    tracing::info!("🎉 Demo complete!");
    Ok(())
}

async fn run_lifecycle(service: &OrderService<InMemoryOrderStore>) -> anyhow::Result<()> {
    let customer_id = Uuid::new_v4();
    let items = vec![
        OrderItem::new(Uuid::new_v4(), 2),
        OrderItem::new(Uuid::new_v4(), 1),
    ];

    let order = service.create_order(customer_id, items, CorrelationId::new()).await?;
    tracing::info!("✅ Order created: {}", order.id);

    service
        .pay_order(order.id, format!("pay-{}", Uuid::new_v4()), CorrelationId::new())
        .await?;
    tracing::info!("✅ Order paid: {}", order.id);

    service
        .ship_order(order.id, "1Z999AA10123456784".to_string(), "UPS".to_string(), CorrelationId::new())
        .await?;
    tracing::info!("✅ Order shipped: {}", order.id);

    service
        .deliver_order(order.id, Some("J. Doe".to_string()), CorrelationId::new())
        .await?;
    tracing::info!("✅ Order delivered: {}", order.id);

    let second = service
        .create_order(customer_id, vec![OrderItem::new(Uuid::new_v4(), 3)], CorrelationId::new())
        .await?;
    service
        .cancel_order(second.id, Some("Customer requested cancellation".to_string()), CorrelationId::new())
        .await?;
    tracing::info!("✅ Order cancelled: {}", second.id);

    // A rejected command rolls back and publishes nothing
    match service
        .ship_order(second.id, "1Z".to_string(), "UPS".to_string(), CorrelationId::new())
        .await
    {
        Ok(_) => tracing::warn!("Cancelled order was shipped"),
        Err(e) => tracing::info!(order_id = %second.id, error = %e, "Rejected command as expected"),
    }

    Ok(())
}
