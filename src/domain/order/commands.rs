use uuid::Uuid;

use super::value_objects::OrderItem;

// ============================================================================
// Order Commands - Represent user intent
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum OrderCommand {
    CreateOrder {
        order_id: Uuid,
        customer_id: Uuid,
        items: Vec<OrderItem>,
    },
    PayOrder {
        order_id: Uuid,
        payment_reference: String,
    },
    ShipOrder {
        order_id: Uuid,
        tracking_number: String,
        carrier: String,
    },
    DeliverOrder {
        order_id: Uuid,
        signature: Option<String>,
    },
    CancelOrder {
        order_id: Uuid,
        reason: Option<String>,
    },
}

impl OrderCommand {
    pub fn order_id(&self) -> Uuid {
        match self {
            OrderCommand::CreateOrder { order_id, .. }
            | OrderCommand::PayOrder { order_id, .. }
            | OrderCommand::ShipOrder { order_id, .. }
            | OrderCommand::DeliverOrder { order_id, .. }
            | OrderCommand::CancelOrder { order_id, .. } => *order_id,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            OrderCommand::CreateOrder { .. } => "create_order",
            OrderCommand::PayOrder { .. } => "pay_order",
            OrderCommand::ShipOrder { .. } => "ship_order",
            OrderCommand::DeliverOrder { .. } => "deliver_order",
            OrderCommand::CancelOrder { .. } => "cancel_order",
        }
    }
}
