//! Entity store boundary.
//!
//! This module defines an infrastructure-facing abstraction for storing
//! members, inventory items and bookings with referential integrity, without
//! making any storage assumptions. Multi-row changes go through a
//! [`StoreTransaction`] so that a half-applied booking is never observable.

pub mod in_memory;
pub mod postgres;

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use booking_core::{BookingId, BookingReference, InventoryItemId, MemberId};
use booking_domain::{Booking, InventoryItem, Member, NewBooking, NewInventoryItem, NewMember};

pub use in_memory::InMemoryEntityStore;
pub use postgres::PostgresEntityStore;

/// Store operation error.
///
/// These are **infrastructure errors** (locking, constraints, connectivity) as
/// opposed to domain errors (quota, stock, expiry).
#[derive(Debug, Error)]
pub enum StoreError {
    /// Transient concurrency failure (lock timeout, deadlock, serialization
    /// failure). The whole operation may be retried.
    #[error("storage conflict: {0}")]
    Conflict(String),

    /// A referential or check constraint rejected the write.
    #[error("integrity violation: {0}")]
    Integrity(String),

    /// An update targeted a row that does not exist.
    #[error("row not found: {0}")]
    NotFound(String),

    /// Any other backend failure (connectivity, decoding, ...).
    #[error("storage backend error: {0}")]
    Backend(String),
}

impl StoreError {
    /// Whether retrying the same operation may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Conflict(_))
    }
}

/// Predicate for counting bookings. `None` fields match everything.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct BookingFilter {
    pub member_id: Option<MemberId>,
    pub item_id: Option<InventoryItemId>,
    pub active: Option<bool>,
}

impl BookingFilter {
    /// Active bookings held by one member.
    pub fn active_for_member(member_id: MemberId) -> Self {
        Self {
            member_id: Some(member_id),
            item_id: None,
            active: Some(true),
        }
    }

    /// Active bookings of one inventory item.
    pub fn active_for_item(item_id: InventoryItemId) -> Self {
        Self {
            member_id: None,
            item_id: Some(item_id),
            active: Some(true),
        }
    }

    pub fn matches(&self, booking: &Booking) -> bool {
        self.member_id.is_none_or(|m| booking.member_id == m)
            && self.item_id.is_none_or(|i| booking.item_id == i)
            && self.active.is_none_or(|a| booking.is_active == a)
    }
}

/// A unit of work against the store.
///
/// Rows read through the `lock_*` methods stay locked until the transaction
/// commits or is dropped, so a check made on them still holds when the writes
/// land. Dropping a transaction without calling [`commit`](Self::commit) rolls
/// every write back.
///
/// Callers lock rows in a fixed order (booking, then member, then item) so two
/// concurrent transactions never wait on each other in a cycle.
#[async_trait]
pub trait StoreTransaction: Send {
    async fn lock_member(&mut self, id: MemberId) -> Result<Option<Member>, StoreError>;

    async fn lock_item(&mut self, id: InventoryItemId) -> Result<Option<InventoryItem>, StoreError>;

    async fn lock_booking_by_reference(
        &mut self,
        reference: &BookingReference,
    ) -> Result<Option<Booking>, StoreError>;

    async fn count_bookings(&mut self, filter: &BookingFilter) -> Result<i64, StoreError>;

    async fn insert_member(&mut self, member: NewMember) -> Result<Member, StoreError>;

    async fn insert_item(&mut self, item: NewInventoryItem) -> Result<InventoryItem, StoreError>;

    async fn insert_booking(&mut self, booking: NewBooking) -> Result<Booking, StoreError>;

    async fn update_member(&mut self, member: &Member) -> Result<(), StoreError>;

    async fn update_item(&mut self, item: &InventoryItem) -> Result<(), StoreError>;

    async fn update_booking(&mut self, booking: &Booking) -> Result<(), StoreError>;

    /// Make every write of this transaction visible at once.
    async fn commit(self: Box<Self>) -> Result<(), StoreError>;
}

/// Durable storage of members, inventory items and bookings.
///
/// ## Referential integrity
///
/// A booking always references an existing member and item. Deleting a member
/// or an item deletes its bookings in the same step, and every active booking
/// removed that way is released from its member's `booking_count`.
///
/// ## Atomicity
///
/// Single-row reads and the cascading deletes are atomic on their own. Anything
/// spanning several rows must use [`begin`](Self::begin).
#[async_trait]
pub trait EntityStore: Send + Sync {
    /// Open a new transaction.
    async fn begin(&self) -> Result<Box<dyn StoreTransaction>, StoreError>;

    async fn get_member(&self, id: MemberId) -> Result<Option<Member>, StoreError>;

    async fn get_item(&self, id: InventoryItemId) -> Result<Option<InventoryItem>, StoreError>;

    async fn get_booking(&self, id: BookingId) -> Result<Option<Booking>, StoreError>;

    async fn find_booking_by_reference(
        &self,
        reference: &BookingReference,
    ) -> Result<Option<Booking>, StoreError>;

    async fn find_bookings_by_member(&self, member_id: MemberId) -> Result<Vec<Booking>, StoreError>;

    async fn find_bookings_by_item(&self, item_id: InventoryItemId) -> Result<Vec<Booking>, StoreError>;

    async fn count_bookings(&self, filter: &BookingFilter) -> Result<i64, StoreError>;

    /// Delete a member and, by cascade, its bookings. Returns whether the
    /// member existed.
    async fn delete_member(&self, id: MemberId) -> Result<bool, StoreError>;

    /// Delete an inventory item and, by cascade, its bookings. Returns whether
    /// the item existed.
    async fn delete_item(&self, id: InventoryItemId) -> Result<bool, StoreError>;

    /// Delete one booking, releasing it from the member's counter if it was
    /// active. Returns whether the booking existed.
    async fn delete_booking(&self, id: BookingId) -> Result<bool, StoreError>;

    /// Insert a single member in its own transaction.
    async fn insert_member(&self, member: NewMember) -> Result<Member, StoreError> {
        let mut tx = self.begin().await?;
        let stored = tx.insert_member(member).await?;
        tx.commit().await?;
        Ok(stored)
    }

    /// Insert a single inventory item in its own transaction.
    async fn insert_item(&self, item: NewInventoryItem) -> Result<InventoryItem, StoreError> {
        let mut tx = self.begin().await?;
        let stored = tx.insert_item(item).await?;
        tx.commit().await?;
        Ok(stored)
    }
}

#[async_trait]
impl<S> EntityStore for Arc<S>
where
    S: EntityStore + ?Sized,
{
    async fn begin(&self) -> Result<Box<dyn StoreTransaction>, StoreError> {
        (**self).begin().await
    }

    async fn get_member(&self, id: MemberId) -> Result<Option<Member>, StoreError> {
        (**self).get_member(id).await
    }

    async fn get_item(&self, id: InventoryItemId) -> Result<Option<InventoryItem>, StoreError> {
        (**self).get_item(id).await
    }

    async fn get_booking(&self, id: BookingId) -> Result<Option<Booking>, StoreError> {
        (**self).get_booking(id).await
    }

    async fn find_booking_by_reference(
        &self,
        reference: &BookingReference,
    ) -> Result<Option<Booking>, StoreError> {
        (**self).find_booking_by_reference(reference).await
    }

    async fn find_bookings_by_member(&self, member_id: MemberId) -> Result<Vec<Booking>, StoreError> {
        (**self).find_bookings_by_member(member_id).await
    }

    async fn find_bookings_by_item(&self, item_id: InventoryItemId) -> Result<Vec<Booking>, StoreError> {
        (**self).find_bookings_by_item(item_id).await
    }

    async fn count_bookings(&self, filter: &BookingFilter) -> Result<i64, StoreError> {
        (**self).count_bookings(filter).await
    }

    async fn delete_member(&self, id: MemberId) -> Result<bool, StoreError> {
        (**self).delete_member(id).await
    }

    async fn delete_item(&self, id: InventoryItemId) -> Result<bool, StoreError> {
        (**self).delete_item(id).await
    }

    async fn delete_booking(&self, id: BookingId) -> Result<bool, StoreError> {
        (**self).delete_booking(id).await
    }

    async fn insert_member(&self, member: NewMember) -> Result<Member, StoreError> {
        (**self).insert_member(member).await
    }

    async fn insert_item(&self, item: NewInventoryItem) -> Result<InventoryItem, StoreError> {
        (**self).insert_item(item).await
    }
}
