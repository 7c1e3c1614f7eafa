use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use booking_core::{
    BookingId, BookingReference, DomainError, DomainResult, Entity, EntityKind, InventoryItemId,
    MemberId,
};

/// A member's reservation of one unit of an inventory item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: BookingId,
    /// External handle; assigned once at creation and never changed.
    pub reference: BookingReference,
    pub member_id: MemberId,
    pub item_id: InventoryItemId,
    pub created_at: DateTime<Utc>,
    pub is_active: bool,
}

/// A booking that has not been stored yet (no id assigned).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewBooking {
    pub reference: BookingReference,
    pub member_id: MemberId,
    pub item_id: InventoryItemId,
    pub created_at: DateTime<Utc>,
    pub is_active: bool,
}

impl NewBooking {
    /// A fresh active booking with a newly generated reference.
    pub fn active(member_id: MemberId, item_id: InventoryItemId, created_at: DateTime<Utc>) -> Self {
        Self {
            reference: BookingReference::generate(),
            member_id,
            item_id,
            created_at,
            is_active: true,
        }
    }

    pub fn into_booking(self, id: BookingId) -> Booking {
        Booking {
            id,
            reference: self.reference,
            member_id: self.member_id,
            item_id: self.item_id,
            created_at: self.created_at,
            is_active: self.is_active,
        }
    }
}

impl Booking {
    /// Active → inactive. The only transition a booking supports.
    ///
    /// An inactive booking is reported as a missing active booking, exactly
    /// like an unknown reference.
    pub fn deactivate(&mut self) -> DomainResult<()> {
        if !self.is_active {
            return Err(DomainError::not_found(EntityKind::ActiveBooking));
        }
        self.is_active = false;
        Ok(())
    }
}

impl Entity for Booking {
    type Id = BookingId;

    const KIND: EntityKind = EntityKind::Booking;

    fn id(&self) -> Self::Id {
        self.id
    }
}

/// Command: book one unit of `item_id` for `member_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateBooking {
    pub member_id: MemberId,
    pub item_id: InventoryItemId,
    /// Server time of the request; becomes the booking's `created_at` and its
    /// UTC date is "today" for the expiry check.
    pub requested_at: DateTime<Utc>,
}

/// Command: cancel the active booking identified by `reference`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelBooking {
    pub reference: BookingReference,
    pub requested_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_booking_is_active_with_fresh_reference() {
        let now = Utc::now();
        let a = NewBooking::active(MemberId::new(1), InventoryItemId::new(2), now);
        let b = NewBooking::active(MemberId::new(1), InventoryItemId::new(2), now);
        assert!(a.is_active);
        assert_ne!(a.reference, b.reference);
    }

    #[test]
    fn deactivate_only_once() {
        let mut booking = NewBooking::active(MemberId::new(1), InventoryItemId::new(2), Utc::now())
            .into_booking(BookingId::new(10));

        booking.deactivate().unwrap();
        assert!(!booking.is_active);

        let err = booking.deactivate().unwrap_err();
        assert_eq!(err, DomainError::NotFound(EntityKind::ActiveBooking));
    }
}
