use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, OwnedMutexGuard};

use booking_core::{BookingId, BookingReference, InventoryItemId, MemberId};
use booking_domain::{Booking, InventoryItem, Member, NewBooking, NewInventoryItem, NewMember};

use super::{BookingFilter, EntityStore, StoreError, StoreTransaction};

/// Default bound on how long an operation waits for the store lock.
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Default)]
struct Tables {
    members: BTreeMap<MemberId, Member>,
    items: BTreeMap<InventoryItemId, InventoryItem>,
    bookings: BTreeMap<BookingId, Booking>,
    references: HashMap<BookingReference, BookingId>,
    sequences: Sequences,
}

#[derive(Debug, Copy, Clone, Default)]
struct Sequences {
    member: i64,
    item: i64,
    booking: i64,
}

/// Prior state of one row touched by an open transaction; `None` means the
/// row did not exist.
#[derive(Debug)]
enum Undo {
    Member(MemberId, Option<Member>),
    Item(InventoryItemId, Option<InventoryItem>),
    Booking(BookingId, Option<Booking>),
}

impl Tables {
    fn count_bookings(&self, filter: &BookingFilter) -> i64 {
        self.bookings.values().filter(|b| filter.matches(b)).count() as i64
    }

    fn booking_by_reference(&self, reference: &BookingReference) -> Option<&Booking> {
        self.references
            .get(reference)
            .and_then(|id| self.bookings.get(id))
    }

    fn insert_member(&mut self, member: NewMember) -> Member {
        self.sequences.member += 1;
        let stored = member.into_member(MemberId::new(self.sequences.member));
        self.members.insert(stored.id, stored.clone());
        stored
    }

    fn insert_item(&mut self, item: NewInventoryItem) -> Result<InventoryItem, StoreError> {
        if item.remaining_count < 0 {
            return Err(StoreError::Integrity(
                "remaining_count cannot be negative".to_string(),
            ));
        }
        self.sequences.item += 1;
        let stored = item.into_item(InventoryItemId::new(self.sequences.item));
        self.items.insert(stored.id, stored.clone());
        Ok(stored)
    }

    fn insert_booking(&mut self, booking: NewBooking) -> Result<Booking, StoreError> {
        if !self.members.contains_key(&booking.member_id) {
            return Err(StoreError::Integrity(format!(
                "booking references unknown member {}",
                booking.member_id
            )));
        }
        if !self.items.contains_key(&booking.item_id) {
            return Err(StoreError::Integrity(format!(
                "booking references unknown inventory item {}",
                booking.item_id
            )));
        }
        if self.references.contains_key(&booking.reference) {
            return Err(StoreError::Integrity(format!(
                "booking reference {} already exists",
                booking.reference
            )));
        }

        self.sequences.booking += 1;
        let stored = booking.into_booking(BookingId::new(self.sequences.booking));
        self.references.insert(stored.reference, stored.id);
        self.bookings.insert(stored.id, stored.clone());
        Ok(stored)
    }

    fn update_member(&mut self, member: &Member) -> Result<Member, StoreError> {
        if member.booking_count < 0 {
            return Err(StoreError::Integrity(
                "booking_count cannot be negative".to_string(),
            ));
        }
        let existing = self
            .members
            .get_mut(&member.id)
            .ok_or_else(|| StoreError::NotFound(format!("member {}", member.id)))?;
        Ok(std::mem::replace(existing, member.clone()))
    }

    fn update_item(&mut self, item: &InventoryItem) -> Result<InventoryItem, StoreError> {
        if item.remaining_count < 0 {
            return Err(StoreError::Integrity(
                "remaining_count cannot be negative".to_string(),
            ));
        }
        let existing = self
            .items
            .get_mut(&item.id)
            .ok_or_else(|| StoreError::NotFound(format!("inventory item {}", item.id)))?;
        Ok(std::mem::replace(existing, item.clone()))
    }

    fn update_booking(&mut self, booking: &Booking) -> Result<Booking, StoreError> {
        let existing = self
            .bookings
            .get_mut(&booking.id)
            .ok_or_else(|| StoreError::NotFound(format!("booking {}", booking.id)))?;
        if existing.reference != booking.reference {
            return Err(StoreError::Integrity(
                "booking reference is immutable".to_string(),
            ));
        }
        Ok(std::mem::replace(existing, booking.clone()))
    }

    /// Remove the matching bookings. Members holding an active one get their
    /// counter lowered so it keeps matching their active bookings.
    fn remove_bookings_where(&mut self, pred: impl Fn(&Booking) -> bool) -> usize {
        let doomed: Vec<BookingId> = self
            .bookings
            .values()
            .filter(|b| pred(b))
            .map(|b| b.id)
            .collect();
        for id in &doomed {
            let Some(booking) = self.bookings.remove(id) else {
                continue;
            };
            self.references.remove(&booking.reference);
            if booking.is_active {
                if let Some(member) = self.members.get_mut(&booking.member_id) {
                    member.release_booking();
                }
            }
        }
        doomed.len()
    }

    fn revert(&mut self, entry: Undo) {
        match entry {
            Undo::Member(id, Some(member)) => {
                self.members.insert(id, member);
            }
            Undo::Member(id, None) => {
                self.members.remove(&id);
            }
            Undo::Item(id, Some(item)) => {
                self.items.insert(id, item);
            }
            Undo::Item(id, None) => {
                self.items.remove(&id);
            }
            Undo::Booking(id, Some(booking)) => {
                self.references.insert(booking.reference, id);
                self.bookings.insert(id, booking);
            }
            Undo::Booking(id, None) => {
                if let Some(booking) = self.bookings.remove(&id) {
                    self.references.remove(&booking.reference);
                }
            }
        }
    }
}

/// In-memory entity store.
///
/// Intended for tests/dev. A transaction holds the single store lock from
/// `begin` until commit/drop, so transactions are fully serialized. Writes go
/// straight to the tables and are recorded in an undo log that a dropped
/// transaction replays backwards.
#[derive(Debug, Clone)]
pub struct InMemoryEntityStore {
    tables: Arc<Mutex<Tables>>,
    lock_timeout: Duration,
}

impl Default for InMemoryEntityStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryEntityStore {
    pub fn new() -> Self {
        Self::with_lock_timeout(DEFAULT_LOCK_TIMEOUT)
    }

    pub fn with_lock_timeout(lock_timeout: Duration) -> Self {
        Self {
            tables: Arc::new(Mutex::new(Tables::default())),
            lock_timeout,
        }
    }

    async fn acquire(&self) -> Result<OwnedMutexGuard<Tables>, StoreError> {
        tokio::time::timeout(self.lock_timeout, self.tables.clone().lock_owned())
            .await
            .map_err(|_| {
                StoreError::Conflict(format!(
                    "timed out after {:?} waiting for the store lock",
                    self.lock_timeout
                ))
            })
    }
}

struct InMemoryTransaction {
    tables: OwnedMutexGuard<Tables>,
    undo: Vec<Undo>,
    sequences: Sequences,
    committed: bool,
}

impl Drop for InMemoryTransaction {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        while let Some(entry) = self.undo.pop() {
            self.tables.revert(entry);
        }
        self.tables.sequences = self.sequences;
    }
}

#[async_trait]
impl StoreTransaction for InMemoryTransaction {
    async fn lock_member(&mut self, id: MemberId) -> Result<Option<Member>, StoreError> {
        Ok(self.tables.members.get(&id).cloned())
    }

    async fn lock_item(&mut self, id: InventoryItemId) -> Result<Option<InventoryItem>, StoreError> {
        Ok(self.tables.items.get(&id).cloned())
    }

    async fn lock_booking_by_reference(
        &mut self,
        reference: &BookingReference,
    ) -> Result<Option<Booking>, StoreError> {
        Ok(self.tables.booking_by_reference(reference).cloned())
    }

    async fn count_bookings(&mut self, filter: &BookingFilter) -> Result<i64, StoreError> {
        Ok(self.tables.count_bookings(filter))
    }

    async fn insert_member(&mut self, member: NewMember) -> Result<Member, StoreError> {
        let stored = self.tables.insert_member(member);
        self.undo.push(Undo::Member(stored.id, None));
        Ok(stored)
    }

    async fn insert_item(&mut self, item: NewInventoryItem) -> Result<InventoryItem, StoreError> {
        let stored = self.tables.insert_item(item)?;
        self.undo.push(Undo::Item(stored.id, None));
        Ok(stored)
    }

    async fn insert_booking(&mut self, booking: NewBooking) -> Result<Booking, StoreError> {
        let stored = self.tables.insert_booking(booking)?;
        self.undo.push(Undo::Booking(stored.id, None));
        Ok(stored)
    }

    async fn update_member(&mut self, member: &Member) -> Result<(), StoreError> {
        let previous = self.tables.update_member(member)?;
        self.undo.push(Undo::Member(member.id, Some(previous)));
        Ok(())
    }

    async fn update_item(&mut self, item: &InventoryItem) -> Result<(), StoreError> {
        let previous = self.tables.update_item(item)?;
        self.undo.push(Undo::Item(item.id, Some(previous)));
        Ok(())
    }

    async fn update_booking(&mut self, booking: &Booking) -> Result<(), StoreError> {
        let previous = self.tables.update_booking(booking)?;
        self.undo.push(Undo::Booking(booking.id, Some(previous)));
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let mut tx = self;
        tx.committed = true;
        Ok(())
    }
}

#[async_trait]
impl EntityStore for InMemoryEntityStore {
    async fn begin(&self) -> Result<Box<dyn StoreTransaction>, StoreError> {
        let tables = self.acquire().await?;
        let sequences = tables.sequences;
        Ok(Box::new(InMemoryTransaction {
            tables,
            undo: Vec::new(),
            sequences,
            committed: false,
        }))
    }

    async fn get_member(&self, id: MemberId) -> Result<Option<Member>, StoreError> {
        Ok(self.acquire().await?.members.get(&id).cloned())
    }

    async fn get_item(&self, id: InventoryItemId) -> Result<Option<InventoryItem>, StoreError> {
        Ok(self.acquire().await?.items.get(&id).cloned())
    }

    async fn get_booking(&self, id: BookingId) -> Result<Option<Booking>, StoreError> {
        Ok(self.acquire().await?.bookings.get(&id).cloned())
    }

    async fn find_booking_by_reference(
        &self,
        reference: &BookingReference,
    ) -> Result<Option<Booking>, StoreError> {
        Ok(self.acquire().await?.booking_by_reference(reference).cloned())
    }

    async fn find_bookings_by_member(&self, member_id: MemberId) -> Result<Vec<Booking>, StoreError> {
        let tables = self.acquire().await?;
        Ok(tables
            .bookings
            .values()
            .filter(|b| b.member_id == member_id)
            .cloned()
            .collect())
    }

    async fn find_bookings_by_item(&self, item_id: InventoryItemId) -> Result<Vec<Booking>, StoreError> {
        let tables = self.acquire().await?;
        Ok(tables
            .bookings
            .values()
            .filter(|b| b.item_id == item_id)
            .cloned()
            .collect())
    }

    async fn count_bookings(&self, filter: &BookingFilter) -> Result<i64, StoreError> {
        Ok(self.acquire().await?.count_bookings(filter))
    }

    async fn delete_member(&self, id: MemberId) -> Result<bool, StoreError> {
        let mut tables = self.acquire().await?;
        if tables.members.remove(&id).is_none() {
            return Ok(false);
        }
        tables.remove_bookings_where(|b| b.member_id == id);
        Ok(true)
    }

    async fn delete_item(&self, id: InventoryItemId) -> Result<bool, StoreError> {
        let mut tables = self.acquire().await?;
        if tables.items.remove(&id).is_none() {
            return Ok(false);
        }
        let removed = tables.remove_bookings_where(|b| b.item_id == id);
        tracing::debug!(item_id = %id, bookings = removed, "inventory item deleted");
        Ok(true)
    }

    async fn delete_booking(&self, id: BookingId) -> Result<bool, StoreError> {
        let mut tables = self.acquire().await?;
        Ok(tables.remove_bookings_where(|b| b.id == id) > 0)
    }
}
