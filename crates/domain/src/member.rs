use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use booking_core::{Entity, EntityKind, MemberId};

/// A member who can hold bookings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Member {
    pub id: MemberId,
    pub name: String,
    pub surname: String,
    /// Cached number of this member's active bookings.
    ///
    /// Must always equal the number of `Booking` rows for this member with
    /// `is_active`; only the booking engine changes it.
    pub booking_count: i64,
    pub date_joined: DateTime<Utc>,
}

/// A member that has not been stored yet (no id assigned).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewMember {
    pub name: String,
    pub surname: String,
    pub booking_count: i64,
    pub date_joined: DateTime<Utc>,
}

impl NewMember {
    pub fn new(name: impl Into<String>, surname: impl Into<String>, date_joined: DateTime<Utc>) -> Self {
        Self {
            name: name.into(),
            surname: surname.into(),
            booking_count: 0,
            date_joined,
        }
    }

    pub fn into_member(self, id: MemberId) -> Member {
        Member {
            id,
            name: self.name,
            surname: self.surname,
            booking_count: self.booking_count,
            date_joined: self.date_joined,
        }
    }
}

impl Member {
    /// Account for one more active booking.
    pub fn record_booking(&mut self) {
        self.booking_count += 1;
    }

    /// Account for one booking fewer; never drops below zero.
    pub fn release_booking(&mut self) {
        self.booking_count = (self.booking_count - 1).max(0);
    }
}

impl Entity for Member {
    type Id = MemberId;

    const KIND: EntityKind = EntityKind::Member;

    fn id(&self) -> Self::Id {
        self.id
    }
}
