// ============================================================================
// Core Actor Abstractions
// ============================================================================
//
// Types shared by infrastructure actors.
//
// ============================================================================

pub mod health;

pub use health::*;
