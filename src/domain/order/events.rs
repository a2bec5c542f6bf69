use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::value_objects::OrderItem;
use crate::dispatch::EventBuffer;
use crate::events::EventType;

// ============================================================================
// Order Events - Bodies of the domain events an order emits
// ============================================================================
//
// The event type travels on the DomainEvent record (and selects the topic),
// so only the body struct is serialized into the payload.
//
// ============================================================================

/// Order Event - Union type for all order events
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum OrderEvent {
    Created(OrderCreated),
    Paid(OrderPaid),
    Shipped(OrderShipped),
    Delivered(OrderDelivered),
    Cancelled(OrderCancelled),
}

impl OrderEvent {
    pub fn event_type(&self) -> EventType {
        match self {
            OrderEvent::Created(_) => EventType::OrderCreated,
            OrderEvent::Paid(_) => EventType::OrderPaid,
            OrderEvent::Shipped(_) => EventType::OrderShipped,
            OrderEvent::Delivered(_) => EventType::OrderDelivered,
            OrderEvent::Cancelled(_) => EventType::OrderCancelled,
        }
    }

    /// Record this event for `order_id` in the operation's buffer.
    pub fn record_into(&self, order_id: Uuid, buffer: &mut EventBuffer) -> Result<(), serde_json::Error> {
        let event_type = self.event_type();
        match self {
            OrderEvent::Created(body) => buffer.record_body(event_type, order_id, body),
            OrderEvent::Paid(body) => buffer.record_body(event_type, order_id, body),
            OrderEvent::Shipped(body) => buffer.record_body(event_type, order_id, body),
            OrderEvent::Delivered(body) => buffer.record_body(event_type, order_id, body),
            OrderEvent::Cancelled(body) => buffer.record_body(event_type, order_id, body),
        }?;
        Ok(())
    }
}

// ============================================================================
// Individual Event Types
// ============================================================================

/// Order Created - Initial event in order lifecycle
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct OrderCreated {
    pub customer_id: Uuid,
    pub items: Vec<OrderItem>,
}

/// Order Paid - Payment captured
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct OrderPaid {
    pub payment_reference: String,
    pub paid_at: DateTime<Utc>,
}

/// Order Shipped - Order dispatched to customer
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct OrderShipped {
    pub tracking_number: String,
    pub carrier: String,
    pub shipped_at: DateTime<Utc>,
}

/// Order Delivered - Order successfully delivered
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct OrderDelivered {
    pub delivered_at: DateTime<Utc>,
    pub signature: Option<String>,
}

/// Order Cancelled - Order lifecycle ended
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct OrderCancelled {
    pub reason: Option<String>,
}
