//! Domain error model.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type used across the domain layer.
pub type DomainResult<T> = Result<T, DomainError>;

/// The record kinds the booking service stores.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Member,
    InventoryItem,
    /// A booking that exists *and* is still active.
    ///
    /// Cancellation reports unknown and already-cancelled references with this
    /// same kind so callers cannot probe which references ever existed.
    ActiveBooking,
    Booking,
}

impl core::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let s = match self {
            EntityKind::Member => "member",
            EntityKind::InventoryItem => "inventory item",
            EntityKind::ActiveBooking => "active booking",
            EntityKind::Booking => "booking",
        };
        f.write_str(s)
    }
}

/// Domain-level error.
///
/// Keep this focused on deterministic, business/domain failures. Every variant
/// is a pure function of current state; none of them is worth retrying.
/// Infrastructure concerns belong elsewhere.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// A referenced record does not exist.
    #[error("{0} not found")]
    NotFound(EntityKind),

    /// The member already holds the maximum number of active bookings.
    #[error("member has reached the maximum of {limit} active bookings")]
    QuotaExceeded { limit: i64 },

    /// The inventory item has no remaining units.
    #[error("no remaining count for this inventory item")]
    OutOfStock,

    /// The inventory item's expiration date is in the past.
    #[error("inventory item is expired; cannot be booked")]
    Expired,

    /// Malformed input (e.g. an unparseable ingestion row or reference).
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// A domain invariant would be violated by the requested transition.
    #[error("invariant violated: {0}")]
    InvariantViolation(String),
}

impl DomainError {
    pub fn not_found(kind: EntityKind) -> Self {
        Self::NotFound(kind)
    }

    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    pub fn invariant(msg: impl Into<String>) -> Self {
        Self::InvariantViolation(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_message_names_the_entity() {
        assert_eq!(
            DomainError::not_found(EntityKind::ActiveBooking).to_string(),
            "active booking not found"
        );
        assert_eq!(
            DomainError::not_found(EntityKind::InventoryItem).to_string(),
            "inventory item not found"
        );
    }

    #[test]
    fn quota_message_carries_limit() {
        let err = DomainError::QuotaExceeded { limit: 2 };
        assert!(err.to_string().contains("maximum of 2"));
    }
}
