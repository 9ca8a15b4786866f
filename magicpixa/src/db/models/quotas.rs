//! Database models for anonymous device quotas.

/// Result of spending one anonymous generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuotaOutcome {
    Consumed { remaining: i64 },
    Exhausted,
}
