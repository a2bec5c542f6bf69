use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::commands::OrderCommand;
use super::errors::OrderError;
use super::events::*;
use super::value_objects::{OrderItem, OrderStatus};

// ============================================================================
// Order Aggregate - Domain Logic
// ============================================================================
//
// Commands are validated against the current state and produce one event;
// applying the event produces the next state and bumps `version`. The store
// uses `version` for optimistic concurrency.
//
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderAggregate {
    // Identity
    pub id: Uuid,
    pub version: i64,

    // Current State
    pub customer_id: Uuid,
    pub items: Vec<OrderItem>,
    pub status: OrderStatus,

    // Audit Trail
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,

    // Optional fields
    pub payment_reference: Option<String>,
    pub tracking_number: Option<String>,
    pub carrier: Option<String>,
    pub cancelled_reason: Option<String>,
}

impl OrderAggregate {
    /// Validate a new order and build its first state.
    pub fn create(
        order_id: Uuid,
        customer_id: Uuid,
        items: Vec<OrderItem>,
    ) -> Result<(Self, OrderEvent), OrderError> {
        validate_items(&items)?;

        let created = OrderCreated { customer_id, items };
        let now = Utc::now();
        let aggregate = Self {
            id: order_id,
            version: 1,
            customer_id,
            items: created.items.clone(),
            status: OrderStatus::Created,
            created_at: now,
            updated_at: now,
            payment_reference: None,
            tracking_number: None,
            carrier: None,
            cancelled_reason: None,
        };

        Ok((aggregate, OrderEvent::Created(created)))
    }

    /// Decide which event a command on an existing order produces.
    pub fn handle_command(&self, command: &OrderCommand) -> Result<OrderEvent, OrderError> {
        match command {
            OrderCommand::CreateOrder { order_id, .. } => Err(OrderError::AlreadyExists(*order_id)),

            OrderCommand::PayOrder { payment_reference, .. } => {
                match self.status {
                    OrderStatus::Created => {}
                    OrderStatus::Cancelled => return Err(OrderError::AlreadyCancelled),
                    _ => return Err(OrderError::AlreadyPaid),
                }
                if payment_reference.trim().is_empty() {
                    return Err(OrderError::MissingPaymentReference);
                }

                Ok(OrderEvent::Paid(OrderPaid {
                    payment_reference: payment_reference.clone(),
                    paid_at: Utc::now(),
                }))
            }

            OrderCommand::ShipOrder { tracking_number, carrier, .. } => {
                match self.status {
                    OrderStatus::Paid => {}
                    OrderStatus::Created => return Err(OrderError::NotPaid),
                    OrderStatus::Cancelled => return Err(OrderError::AlreadyCancelled),
                    _ => return Err(OrderError::InvalidStatusTransition(self.status)),
                }

                Ok(OrderEvent::Shipped(OrderShipped {
                    tracking_number: tracking_number.clone(),
                    carrier: carrier.clone(),
                    shipped_at: Utc::now(),
                }))
            }

            OrderCommand::DeliverOrder { signature, .. } => {
                match self.status {
                    OrderStatus::Shipped => {}
                    _ => return Err(OrderError::NotShipped),
                }

                Ok(OrderEvent::Delivered(OrderDelivered {
                    delivered_at: Utc::now(),
                    signature: signature.clone(),
                }))
            }

            OrderCommand::CancelOrder { reason, .. } => {
                match self.status {
                    OrderStatus::Cancelled => return Err(OrderError::AlreadyCancelled),
                    OrderStatus::Shipped | OrderStatus::Delivered => {
                        return Err(OrderError::InvalidStatusTransition(self.status))
                    }
                    OrderStatus::Created | OrderStatus::Paid => {}
                }

                Ok(OrderEvent::Cancelled(OrderCancelled {
                    reason: reason.clone(),
                }))
            }
        }
    }

    /// Fold an event into the state.
    pub fn apply(&mut self, event: &OrderEvent) {
        self.updated_at = Utc::now();
        self.version += 1;

        match event {
            OrderEvent::Created(e) => {
                self.customer_id = e.customer_id;
                self.items = e.items.clone();
                self.status = OrderStatus::Created;
            }
            OrderEvent::Paid(e) => {
                self.status = OrderStatus::Paid;
                self.payment_reference = Some(e.payment_reference.clone());
            }
            OrderEvent::Shipped(e) => {
                self.status = OrderStatus::Shipped;
                self.tracking_number = Some(e.tracking_number.clone());
                self.carrier = Some(e.carrier.clone());
            }
            OrderEvent::Delivered(_) => {
                self.status = OrderStatus::Delivered;
            }
            OrderEvent::Cancelled(e) => {
                self.status = OrderStatus::Cancelled;
                self.cancelled_reason = e.reason.clone();
            }
        }
    }
}

fn validate_items(items: &[OrderItem]) -> Result<(), OrderError> {
    if items.is_empty() {
        return Err(OrderError::EmptyItems);
    }

    for item in items {
        if item.quantity <= 0 {
            return Err(OrderError::InvalidQuantity(item.quantity));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_order() -> OrderAggregate {
        let (order, _) = OrderAggregate::create(
            Uuid::new_v4(),
            Uuid::new_v4(),
            vec![OrderItem::new(Uuid::new_v4(), 2)],
        )
        .unwrap();
        order
    }

    fn run(order: &mut OrderAggregate, command: OrderCommand) -> Result<OrderEvent, OrderError> {
        let event = order.handle_command(&command)?;
        order.apply(&event);
        Ok(event)
    }

    #[test]
    fn test_create_validates_items() {
        let empty = OrderAggregate::create(Uuid::new_v4(), Uuid::new_v4(), vec![]);
        assert_eq!(empty.unwrap_err(), OrderError::EmptyItems);

        let zero = OrderAggregate::create(
            Uuid::new_v4(),
            Uuid::new_v4(),
            vec![OrderItem::new(Uuid::new_v4(), 0)],
        );
        assert_eq!(zero.unwrap_err(), OrderError::InvalidQuantity(0));
    }

    #[test]
    fn test_full_lifecycle() {
        let mut order = new_order();
        let id = order.id;

        run(&mut order, OrderCommand::PayOrder { order_id: id, payment_reference: "pay-1".into() }).unwrap();
        run(
            &mut order,
            OrderCommand::ShipOrder { order_id: id, tracking_number: "1Z".into(), carrier: "UPS".into() },
        )
        .unwrap();
        let delivered = run(&mut order, OrderCommand::DeliverOrder { order_id: id, signature: None }).unwrap();

        assert!(matches!(delivered, OrderEvent::Delivered(_)));
        assert_eq!(order.status, OrderStatus::Delivered);
        assert_eq!(order.version, 4);
        assert_eq!(order.payment_reference.as_deref(), Some("pay-1"));
    }

    #[test]
    fn test_cannot_ship_unpaid_order() {
        let mut order = new_order();
        let id = order.id;
        let result = run(
            &mut order,
            OrderCommand::ShipOrder { order_id: id, tracking_number: "1Z".into(), carrier: "UPS".into() },
        );

        assert_eq!(result.unwrap_err(), OrderError::NotPaid);
        assert_eq!(order.version, 1);
    }

    #[test]
    fn test_cancel_rules() {
        let mut order = new_order();
        let id = order.id;

        run(&mut order, OrderCommand::CancelOrder { order_id: id, reason: Some("changed mind".into()) }).unwrap();
        assert_eq!(order.cancelled_reason.as_deref(), Some("changed mind"));

        let again = run(&mut order, OrderCommand::CancelOrder { order_id: id, reason: None });
        assert_eq!(again.unwrap_err(), OrderError::AlreadyCancelled);

        let pay = run(&mut order, OrderCommand::PayOrder { order_id: id, payment_reference: "p".into() });
        assert_eq!(pay.unwrap_err(), OrderError::AlreadyCancelled);
    }

    #[test]
    fn test_create_on_existing_order_is_rejected() {
        let order = new_order();
        let result = order.handle_command(&OrderCommand::CreateOrder {
            order_id: order.id,
            customer_id: Uuid::new_v4(),
            items: vec![OrderItem::new(Uuid::new_v4(), 1)],
        });

        assert_eq!(result.unwrap_err(), OrderError::AlreadyExists(order.id));
    }
}
