use uuid::Uuid;

use super::value_objects::OrderStatus;

// ============================================================================
// Order Business Rule Errors
// ============================================================================
//
// Every variant is a permanent business error: retrying the same command
// against the same order state fails the same way.
//
// ============================================================================

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum OrderError {
    #[error("Order {0} already exists")]
    AlreadyExists(Uuid),

    #[error("Order is already cancelled")]
    AlreadyCancelled,

    #[error("Order is already paid")]
    AlreadyPaid,

    #[error("Order must be paid before shipping")]
    NotPaid,

    #[error("Order must be shipped before delivery")]
    NotShipped,

    #[error("Cannot modify order in status: {0}")]
    InvalidStatusTransition(OrderStatus),

    #[error("Order items cannot be empty")]
    EmptyItems,

    #[error("Invalid item quantity: {0}")]
    InvalidQuantity(i32),

    #[error("Payment reference cannot be empty")]
    MissingPaymentReference,
}
