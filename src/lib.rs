// ============================================================================
// Order Events - reliable publication of order domain events
// ============================================================================
//
// A business operation commits, its buffered domain events are released to
// the configured publisher, and an idempotent consumer turns them into
// notifications exactly once per event:
//
//   OrderService -> DispatchCoordinator -> EventPublisher -> broker
//                                          (CircuitBreaker)    |
//                                                              v
//                       notifications <- IdempotentConsumer <- ConsumerWorker
//
// ============================================================================

pub mod actors;
pub mod config;
pub mod consumer;
pub mod correlation;
pub mod dispatch;
pub mod domain;
pub mod errors;
pub mod events;
pub mod messaging;
pub mod metrics;
pub mod storage;
pub mod utils;
