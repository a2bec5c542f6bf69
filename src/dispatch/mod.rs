// ============================================================================
// Transactional Dispatch
// ============================================================================
//
// Events raised while a business operation runs are recorded in an
// `EventBuffer` owned by that operation. The coordinator hands them to the
// publisher only after the persistence layer reports a successful commit; on
// rollback, or a failed commit, the buffer is dropped unpublished.
//
// Publish attempts may still be skipped by a crash between commit and
// release, which is why consumers deduplicate.
//
// ============================================================================

mod buffer;
mod coordinator;
mod transaction;

pub use buffer::EventBuffer;
pub use coordinator::{DispatchCoordinator, DispatchReport};
pub use transaction::Transaction;
