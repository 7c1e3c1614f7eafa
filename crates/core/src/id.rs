//! Strongly-typed identifiers used across the domain.
//!
//! Row identifiers are store-assigned integers. They are internal handles only:
//! the one identifier handed to outside callers for addressing a booking is the
//! random [`BookingReference`].

use core::str::FromStr;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::DomainError;

/// Identifier of a member.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MemberId(i64);

/// Identifier of an inventory item.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InventoryItemId(i64);

/// Internal identifier of a booking row.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BookingId(i64);

macro_rules! impl_int_newtype {
    ($t:ty, $name:literal) => {
        impl $t {
            pub const fn new(value: i64) -> Self {
                Self(value)
            }

            pub const fn get(self) -> i64 {
                self.0
            }
        }

        impl core::fmt::Display for $t {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                core::fmt::Display::fmt(&self.0, f)
            }
        }

        impl From<i64> for $t {
            fn from(value: i64) -> Self {
                Self(value)
            }
        }

        impl From<$t> for i64 {
            fn from(value: $t) -> Self {
                value.0
            }
        }

        impl FromStr for $t {
            type Err = DomainError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let v = s
                    .trim()
                    .parse::<i64>()
                    .map_err(|e| DomainError::invalid_input(format!("{}: {}", $name, e)))?;
                Ok(Self(v))
            }
        }
    };
}

impl_int_newtype!(MemberId, "MemberId");
impl_int_newtype!(InventoryItemId, "InventoryItemId");
impl_int_newtype!(BookingId, "BookingId");

/// Opaque, globally unique external handle of a booking.
///
/// Uses UUIDv4 (random) rather than a time-ordered UUID: references must not be
/// guessable or enumerable from one another.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BookingReference(Uuid);

impl BookingReference {
    /// Generate a fresh random reference.
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl core::fmt::Display for BookingReference {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0.hyphenated(), f)
    }
}

impl From<Uuid> for BookingReference {
    fn from(value: Uuid) -> Self {
        Self(value)
    }
}

impl FromStr for BookingReference {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let uuid = Uuid::from_str(s.trim())
            .map_err(|e| DomainError::invalid_input(format!("BookingReference: {e}")))?;
        Ok(Self(uuid))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn references_are_unique() {
        let refs: HashSet<BookingReference> = (0..1000).map(|_| BookingReference::generate()).collect();
        assert_eq!(refs.len(), 1000);
    }

    #[test]
    fn reference_parses_its_display_form() {
        let r = BookingReference::generate();
        let parsed: BookingReference = r.to_string().parse().unwrap();
        assert_eq!(r, parsed);
        assert_eq!(r.to_string().len(), 36);
    }

    #[test]
    fn malformed_reference_is_invalid_input() {
        let err = "FAKE-REF".parse::<BookingReference>().unwrap_err();
        assert!(matches!(err, DomainError::InvalidInput(_)));
    }

    #[test]
    fn integer_ids_parse_trimmed() {
        let id: MemberId = " 42 ".parse().unwrap();
        assert_eq!(id.get(), 42);
        assert!("abc".parse::<InventoryItemId>().is_err());
    }
}
