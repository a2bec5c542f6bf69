use chrono::{DateTime, Utc};

use super::DomainEvent;
use crate::utils::CircuitPhase;

/// A publication that did not reach the broker on the first try.
///
/// Lives in the re-publication queue until the broker accepts the event or it
/// is handed to the dead-letter path.
#[derive(Debug, Clone)]
pub struct PublicationAttempt {
    pub event: DomainEvent,
    pub attempt: u32,
    pub observed_phase: CircuitPhase,
    pub first_failed_at: DateTime<Utc>,
    pub last_error: String,
}

impl PublicationAttempt {
    pub fn first_failure(event: DomainEvent, observed_phase: CircuitPhase, error: String) -> Self {
        Self {
            event,
            attempt: 1,
            observed_phase,
            first_failed_at: Utc::now(),
            last_error: error,
        }
    }

    /// Record another failed attempt.
    pub fn failed_again(&mut self, observed_phase: CircuitPhase, error: String) {
        self.attempt += 1;
        self.observed_phase = observed_phase;
        self.last_error = error;
    }
}
