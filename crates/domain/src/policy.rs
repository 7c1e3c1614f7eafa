//! Booking admission rules.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use booking_core::{DomainError, DomainResult};

use crate::item::InventoryItem;

/// Maximum number of simultaneously active bookings per member.
pub const DEFAULT_MAX_ACTIVE_BOOKINGS: i64 = 2;

/// Pure decision logic for admitting a new booking.
///
/// Existence of the member and item is checked by the caller (it needs the
/// store for that); everything else is decided here from plain values.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookingPolicy {
    pub max_active_bookings: i64,
}

impl Default for BookingPolicy {
    fn default() -> Self {
        Self {
            max_active_bookings: DEFAULT_MAX_ACTIVE_BOOKINGS,
        }
    }
}

impl BookingPolicy {
    /// Check, in order: member quota, item stock, item expiry.
    ///
    /// `active_bookings` is the member's current number of active bookings and
    /// `today` the date of the request.
    pub fn check_create(
        &self,
        active_bookings: i64,
        item: &InventoryItem,
        today: NaiveDate,
    ) -> DomainResult<()> {
        if active_bookings >= self.max_active_bookings {
            return Err(DomainError::QuotaExceeded {
                limit: self.max_active_bookings,
            });
        }
        if !item.in_stock() {
            return Err(DomainError::OutOfStock);
        }
        if item.is_expired_on(today) {
            return Err(DomainError::Expired);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::item::NewInventoryItem;
    use booking_core::InventoryItemId;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn item(remaining: i64, expires: NaiveDate) -> InventoryItem {
        NewInventoryItem {
            title: "Wine tasting".to_string(),
            description: Some("Evening session".to_string()),
            remaining_count: remaining,
            expiration_date: expires,
        }
        .into_item(InventoryItemId::new(1))
    }

    #[test]
    fn admits_when_all_rules_pass() {
        let today = date(2025, 6, 1);
        let policy = BookingPolicy::default();
        assert_eq!(policy.check_create(0, &item(1, date(2030, 12, 31)), today), Ok(()));
        assert_eq!(policy.check_create(1, &item(1, today), today), Ok(()));
    }

    #[test]
    fn quota_is_checked_before_stock_and_expiry() {
        let today = date(2025, 6, 1);
        let policy = BookingPolicy::default();
        let empty_and_expired = item(0, date(2020, 1, 1));

        assert_eq!(
            policy.check_create(2, &empty_and_expired, today),
            Err(DomainError::QuotaExceeded { limit: 2 })
        );
        assert_eq!(
            policy.check_create(1, &empty_and_expired, today),
            Err(DomainError::OutOfStock)
        );
        assert_eq!(
            policy.check_create(1, &item(3, date(2020, 1, 1)), today),
            Err(DomainError::Expired)
        );
    }

    #[test]
    fn expiry_boundary_is_date_only() {
        let today = date(2025, 6, 1);
        let policy = BookingPolicy::default();
        assert!(policy.check_create(0, &item(1, today), today).is_ok());
        assert_eq!(
            policy.check_create(0, &item(1, date(2025, 5, 31)), today),
            Err(DomainError::Expired)
        );
    }

    #[cfg(test)]
    mod proptest_tests {
        use super::*;
        use crate::member::NewMember;
        use booking_core::MemberId;
        use chrono::Utc;
        use proptest::prelude::*;

        proptest! {
            #![proptest_config(ProptestConfig {
                cases: 500,
                ..ProptestConfig::default()
            })]

            /// Property: any sequence of admitted bookings and cancellations keeps
            /// the member within quota and conserves the item's stock.
            #[test]
            fn quota_and_stock_are_conserved(
                initial_stock in 0i64..5,
                ops in proptest::collection::vec(any::<bool>(), 0..40),
            ) {
                let today = date(2025, 1, 1);
                let policy = BookingPolicy::default();
                let mut it = item(initial_stock, date(2030, 1, 1));
                let mut member = NewMember::new("A", "B", Utc::now()).into_member(MemberId::new(1));
                let mut active = 0i64;

                for book in ops {
                    if book {
                        if policy.check_create(active, &it, today).is_ok() {
                            it.reserve_unit().unwrap();
                            member.record_booking();
                            active += 1;
                        }
                    } else if active > 0 {
                        it.restore_unit();
                        member.release_booking();
                        active -= 1;
                    }

                    prop_assert!(active <= policy.max_active_bookings);
                    prop_assert!(it.remaining_count >= 0);
                    prop_assert_eq!(member.booking_count, active);
                    prop_assert_eq!(it.remaining_count + active, initial_stock);
                }
            }

            /// Property: the decision is a pure function of its inputs.
            #[test]
            fn check_create_is_deterministic(
                active in 0i64..4,
                remaining in 0i64..3,
                offset in -3i64..3,
            ) {
                let today = date(2025, 1, 10);
                let expires = today + chrono::Duration::days(offset);
                let policy = BookingPolicy::default();
                let it = item(remaining, expires);

                let a = policy.check_create(active, &it, today);
                let b = policy.check_create(active, &it, today);
                prop_assert_eq!(a.clone(), b);
                prop_assert_eq!(a.is_ok(), active < 2 && remaining >= 1 && offset >= 0);
            }
        }
    }
}
