// ============================================================================
// Order Domain - Business Logic for the Order Aggregate
// ============================================================================
//
// This module contains ALL Order-specific code:
// - Value objects (OrderItem, OrderStatus)
// - Events (OrderCreated, OrderPaid, etc.)
// - Commands (CreateOrder, PayOrder, etc.)
// - Errors (OrderError enum)
// - Aggregate (OrderAggregate with the status rules)
// - Store (OrderStore persistence collaborator, in-memory implementation)
// - Service (OrderService, the origin of every domain event)
//
// ============================================================================

pub mod value_objects;
pub mod events;
pub mod commands;
pub mod errors;
pub mod aggregate;
pub mod store;
pub mod service;

// Re-export for convenience
pub use value_objects::*;
pub use events::*;
pub use commands::*;
pub use errors::*;
pub use aggregate::*;
pub use store::*;
pub use service::*;
