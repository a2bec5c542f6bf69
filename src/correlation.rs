use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

// ============================================================================
// Correlation Context
// ============================================================================
//
// The inbound request boundary generates or forwards a correlation id. It is
// attached to every DomainEvent and carried as a field on every span/log line
// emitted while handling the request.
//
// ============================================================================

/// Header used to forward a correlation id across process boundaries.
pub const CORRELATION_HEADER: &str = "x-correlation-id";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(Uuid);

impl CorrelationId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Forward the caller's id when it parses, otherwise start a new one.
    pub fn from_header(value: Option<&str>) -> Self {
        match value.map(str::trim).filter(|v| !v.is_empty()) {
            Some(raw) => match Uuid::parse_str(raw) {
                Ok(id) => Self(id),
                Err(_) => {
                    tracing::debug!(header = raw, "Ignoring malformed correlation id");
                    Self::new()
                }
            },
            None => Self::new(),
        }
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for CorrelationId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for CorrelationId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Span carrying the correlation id for everything logged inside it.
pub fn correlation_span(correlation_id: CorrelationId) -> tracing::Span {
    tracing::info_span!("request", correlation_id = %correlation_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forwards_valid_header() {
        let id = Uuid::new_v4();
        let cid = CorrelationId::from_header(Some(&id.to_string()));
        assert_eq!(cid.as_uuid(), id);
    }

    #[test]
    fn test_generates_when_missing_or_malformed() {
        let a = CorrelationId::from_header(None);
        let b = CorrelationId::from_header(Some("not-a-uuid"));
        let c = CorrelationId::from_header(Some("   "));
        assert_ne!(a, b);
        assert_ne!(b, c);
    }

    #[test]
    fn test_serializes_as_plain_uuid() {
        let id = Uuid::new_v4();
        let json = serde_json::to_string(&CorrelationId::from(id)).unwrap();
        assert_eq!(json, format!("\"{}\"", id));
    }
}
