use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use booking_core::{DomainError, DomainResult, Entity, EntityKind, InventoryItemId};

/// A bookable inventory item (an experience with a limited number of places).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryItem {
    pub id: InventoryItemId,
    pub title: String,
    pub description: Option<String>,
    /// Units still available for booking. Never negative.
    pub remaining_count: i64,
    pub expiration_date: NaiveDate,
}

/// An inventory item that has not been stored yet (no id assigned).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewInventoryItem {
    pub title: String,
    pub description: Option<String>,
    pub remaining_count: i64,
    pub expiration_date: NaiveDate,
}

impl NewInventoryItem {
    pub fn into_item(self, id: InventoryItemId) -> InventoryItem {
        InventoryItem {
            id,
            title: self.title,
            description: self.description,
            remaining_count: self.remaining_count,
            expiration_date: self.expiration_date,
        }
    }
}

impl InventoryItem {
    /// Whether the item can no longer be booked on `today`.
    ///
    /// Date-only comparison: an item expiring today is still bookable.
    pub fn is_expired_on(&self, today: NaiveDate) -> bool {
        self.expiration_date < today
    }

    pub fn in_stock(&self) -> bool {
        self.remaining_count >= 1
    }

    /// Take one unit out of stock.
    pub fn reserve_unit(&mut self) -> DomainResult<()> {
        if !self.in_stock() {
            return Err(DomainError::OutOfStock);
        }
        self.remaining_count -= 1;
        Ok(())
    }

    /// Put one unit back (cancellation).
    pub fn restore_unit(&mut self) {
        self.remaining_count += 1;
    }
}

impl Entity for InventoryItem {
    type Id = InventoryItemId;

    const KIND: EntityKind = EntityKind::InventoryItem;

    fn id(&self) -> Self::Id {
        self.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn item(remaining: i64, expires: NaiveDate) -> InventoryItem {
        NewInventoryItem {
            title: "Kayak tour".to_string(),
            description: None,
            remaining_count: remaining,
            expiration_date: expires,
        }
        .into_item(InventoryItemId::new(7))
    }

    #[test]
    fn expiring_today_is_not_expired() {
        let today = date(2025, 3, 10);
        assert!(!item(1, today).is_expired_on(today));
        assert!(item(1, date(2025, 3, 9)).is_expired_on(today));
        assert!(!item(1, date(2025, 3, 11)).is_expired_on(today));
    }

    #[test]
    fn reserve_unit_rejects_empty_stock() {
        let mut i = item(0, date(2030, 1, 1));
        assert_eq!(i.reserve_unit(), Err(DomainError::OutOfStock));
        assert_eq!(i.remaining_count, 0);
    }

    #[test]
    fn reserve_and_restore_conserve_stock() {
        let mut i = item(2, date(2030, 1, 1));
        i.reserve_unit().unwrap();
        i.reserve_unit().unwrap();
        assert_eq!(i.remaining_count, 0);
        assert!(i.reserve_unit().is_err());
        i.restore_unit();
        assert_eq!(i.remaining_count, 1);
    }
}
