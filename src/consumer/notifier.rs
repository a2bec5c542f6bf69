use async_trait::async_trait;

use crate::events::{DomainEvent, EventType};

/// The side effect the consumer must run at most once per event.
#[async_trait]
pub trait NotificationSender: Send + Sync {
    async fn notify(&self, event: &DomainEvent) -> anyhow::Result<()>;
}

/// Customer-facing text for an event.
pub fn notification_text(event: &DomainEvent) -> String {
    let order_id = event.aggregate_id();
    match event.event_type() {
        EventType::OrderCreated => format!("Order {} has been received", order_id),
        EventType::OrderPaid => format!("Payment for order {} confirmed", order_id),
        EventType::OrderShipped => format!("Order {} is on its way", order_id),
        EventType::OrderDelivered => format!("Order {} has been delivered", order_id),
        EventType::OrderCancelled => format!("Order {} was cancelled", order_id),
    }
}

/// Writes notifications to the log instead of an email or SMS gateway.
pub struct LogNotifier;

#[async_trait]
impl NotificationSender for LogNotifier {
    async fn notify(&self, event: &DomainEvent) -> anyhow::Result<()> {
        tracing::info!(
            event_id = %event.event_id(),
            order_id = %event.aggregate_id(),
            event_type = %event.event_type(),
            "📧 {}",
            notification_text(event)
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::correlation::CorrelationId;
    use serde_json::json;
    use uuid::Uuid;

    #[test]
    fn test_notification_text_names_the_order() {
        let order_id = Uuid::new_v4();
        let event = DomainEvent::new(EventType::OrderShipped, order_id, json!({}), CorrelationId::new());

        assert_eq!(notification_text(&event), format!("Order {} is on its way", order_id));
    }
}
