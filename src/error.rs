// src/error.rs
// Error taxonomy for check attempts and dispatch. Transient errors are the
// only ones the retry wrapper re-invokes; everything else fails the cycle.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum IngestError {
    /// Network hiccup, provider rate limiting, upstream 5xx. Retried on the
    /// job class's fixed-delay budget.
    #[error("transient fetch error: {0}")]
    Transient(String),

    /// Authentication failure or payload shape mismatch. Not retried this
    /// cycle; counts toward the schedule's consecutive failures.
    #[error("permanent source error: {0}")]
    Permanent(String),

    /// The attempt exceeded its job class timeout.
    #[error("job timed out after {0}s")]
    Timeout(u64),

    /// Per-record validation failure surfaced out of transform/load.
    #[error("validation error: {0}")]
    Validation(String),

    /// A referenced row is missing from its store.
    #[error("{0} not found: id {1}")]
    NotFound(&'static str, u64),

    /// Routing failure while evaluating one record during a sweep.
    #[error("routing error: {0}")]
    Route(String),
}

impl IngestError {
    /// Whether the retry wrapper should re-invoke the attempt.
    pub fn is_transient(&self) -> bool {
        matches!(self, IngestError::Transient(_) | IngestError::Timeout(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_transient_and_timeout_retry() {
        assert!(IngestError::Transient("503".into()).is_transient());
        assert!(IngestError::Timeout(30).is_transient());
        assert!(!IngestError::Permanent("bad key".into()).is_transient());
        assert!(!IngestError::Validation("null value".into()).is_transient());
        assert!(!IngestError::NotFound("schedule", 7).is_transient());
    }
}
