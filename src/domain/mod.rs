// ============================================================================
// Domain Layer - Business Logic
// ============================================================================
//
// The order aggregate is the only producer of domain events. Each aggregate
// has its own subdirectory with:
// - Value objects
// - Events
// - Commands
// - Errors
// - Aggregate implementation
// - Store and service
//
// ============================================================================

pub mod order;
