//! Booking rule engine (application-level orchestration).
//!
//! Every command runs as one store transaction:
//!
//! ```text
//! CreateBooking
//!   ↓
//! 1. Lock member row (absent → NotFound(member))
//!   ↓
//! 2. Lock item row (absent → NotFound(inventory item))
//!   ↓
//! 3. Count the member's active bookings
//!   ↓
//! 4. BookingPolicy::check_create (quota, stock, expiry; pure)
//!   ↓
//! 5. Insert booking, decrement stock, increment member counter
//!   ↓
//! 6. Commit
//! ```
//!
//! Cancellation locks the booking first, then the member, then the item, in the
//! same order creation uses for member and item. Any failure before commit
//! drops the transaction, which rolls everything back.

use std::future::Future;

use thiserror::Error;
use tracing::instrument;

use booking_core::{DomainError, EntityKind, require};
use booking_domain::{Booking, BookingPolicy, CancelBooking, CreateBooking, NewBooking};

use crate::store::{BookingFilter, EntityStore, StoreError};

/// How many times callers retry an operation that failed on a storage
/// conflict before giving up.
pub const DEFAULT_RETRY_ATTEMPTS: usize = 3;

#[derive(Debug, Error)]
pub enum EngineError {
    /// A business rule rejected the command (deterministic; never retried).
    #[error(transparent)]
    Domain(#[from] DomainError),

    /// The store failed; see [`EngineError::is_retryable`].
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl EngineError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, EngineError::Store(e) if e.is_retryable())
    }
}

/// Executes booking commands against an [`EntityStore`].
#[derive(Debug, Clone)]
pub struct BookingEngine<S> {
    store: S,
    policy: BookingPolicy,
}

impl<S> BookingEngine<S>
where
    S: EntityStore,
{
    pub fn new(store: S) -> Self {
        Self {
            store,
            policy: BookingPolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: BookingPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Book one unit of an inventory item for a member.
    ///
    /// On success the stored booking is active, the item has one unit less and
    /// the member's counter is one higher, all committed together.
    #[instrument(
        skip(self, cmd),
        fields(member_id = %cmd.member_id, item_id = %cmd.item_id),
        err
    )]
    pub async fn create_booking(&self, cmd: CreateBooking) -> Result<Booking, EngineError> {
        let mut tx = self.store.begin().await?;

        let mut member = require(tx.lock_member(cmd.member_id).await?)?;
        let mut item = require(tx.lock_item(cmd.item_id).await?)?;

        let active = tx
            .count_bookings(&BookingFilter::active_for_member(member.id))
            .await?;
        self.policy
            .check_create(active, &item, cmd.requested_at.date_naive())?;

        let booking = tx
            .insert_booking(NewBooking::active(member.id, item.id, cmd.requested_at))
            .await?;
        item.reserve_unit()?;
        member.record_booking();
        tx.update_item(&item).await?;
        tx.update_member(&member).await?;
        tx.commit().await?;

        tracing::info!(
            reference = %booking.reference,
            remaining_count = item.remaining_count,
            booking_count = member.booking_count,
            "booking created"
        );
        Ok(booking)
    }

    /// Cancel an active booking by its reference.
    ///
    /// Unknown and already-cancelled references both fail with
    /// `NotFound(active booking)`. If the item has vanished in the meantime only
    /// the booking and member are updated.
    #[instrument(skip(self, cmd), fields(reference = %cmd.reference), err)]
    pub async fn cancel_booking(&self, cmd: CancelBooking) -> Result<Booking, EngineError> {
        let mut tx = self.store.begin().await?;

        let mut booking = tx
            .lock_booking_by_reference(&cmd.reference)
            .await?
            .ok_or(DomainError::NotFound(EntityKind::ActiveBooking))?;
        booking.deactivate()?;

        let mut member = tx
            .lock_member(booking.member_id)
            .await?
            .ok_or_else(|| {
                DomainError::invariant(format!(
                    "booking {} references missing member {}",
                    booking.reference, booking.member_id
                ))
            })?;
        member.release_booking();

        let item = match tx.lock_item(booking.item_id).await? {
            Some(mut item) => {
                item.restore_unit();
                Some(item)
            }
            None => {
                tracing::warn!(item_id = %booking.item_id, "cancelled booking's item no longer exists");
                None
            }
        };

        tx.update_booking(&booking).await?;
        tx.update_member(&member).await?;
        if let Some(item) = &item {
            tx.update_item(item).await?;
        }
        tx.commit().await?;

        tracing::info!(member_id = %member.id, "booking cancelled");
        Ok(booking)
    }
}

/// Run `op` up to `attempts` times, retrying only on retryable failures.
///
/// Domain errors and non-retryable store errors are returned immediately.
pub async fn with_retry<T, F, Fut>(attempts: usize, mut op: F) -> Result<T, EngineError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, EngineError>>,
{
    let attempts = attempts.max(1);
    let mut attempt = 1;
    loop {
        match op().await {
            Err(err) if err.is_retryable() && attempt < attempts => {
                tracing::warn!(attempt, error = %err, "retrying after storage conflict");
                attempt += 1;
            }
            result => return result,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use chrono::{NaiveDate, TimeZone, Utc};

    use async_trait::async_trait;

    use booking_core::{BookingId, BookingReference, InventoryItemId, MemberId};
    use booking_domain::{InventoryItem, Member, NewInventoryItem, NewMember};

    use crate::store::{InMemoryEntityStore, StoreTransaction};

    fn at(y: i32, m: u32, d: u32) -> chrono::DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 12, 0, 0).unwrap()
    }

    async fn seed(
        store: &InMemoryEntityStore,
        stock: i64,
        expires: NaiveDate,
    ) -> (MemberId, InventoryItemId) {
        let member = store
            .insert_member(NewMember::new("Sophie", "Davis", at(2024, 1, 1)))
            .await
            .unwrap();
        let item = store
            .insert_item(NewInventoryItem {
                title: "Bali".to_string(),
                description: None,
                remaining_count: stock,
                expiration_date: expires,
            })
            .await
            .unwrap();
        (member.id, item.id)
    }

    #[tokio::test]
    async fn create_then_cancel_restores_counters() {
        let store = InMemoryEntityStore::new();
        let (member_id, item_id) = seed(&store, 1, NaiveDate::from_ymd_opt(2030, 1, 1).unwrap()).await;
        let engine = BookingEngine::new(store.clone());

        let booking = engine
            .create_booking(CreateBooking {
                member_id,
                item_id,
                requested_at: at(2025, 1, 1),
            })
            .await
            .unwrap();
        assert!(booking.is_active);
        assert_eq!(store.get_item(item_id).await.unwrap().unwrap().remaining_count, 0);
        assert_eq!(store.get_member(member_id).await.unwrap().unwrap().booking_count, 1);

        let cancelled = engine
            .cancel_booking(CancelBooking {
                reference: booking.reference,
                requested_at: at(2025, 1, 2),
            })
            .await
            .unwrap();
        assert!(!cancelled.is_active);
        assert_eq!(store.get_item(item_id).await.unwrap().unwrap().remaining_count, 1);
        assert_eq!(store.get_member(member_id).await.unwrap().unwrap().booking_count, 0);
    }

    #[tokio::test]
    async fn rejected_create_leaves_no_trace() {
        let store = InMemoryEntityStore::new();
        let (member_id, item_id) = seed(&store, 0, NaiveDate::from_ymd_opt(2030, 1, 1).unwrap()).await;
        let engine = BookingEngine::new(store.clone());

        let err = engine
            .create_booking(CreateBooking {
                member_id,
                item_id,
                requested_at: at(2025, 1, 1),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Domain(DomainError::OutOfStock)));
        assert_eq!(store.count_bookings(&BookingFilter::default()).await.unwrap(), 0);
        assert_eq!(store.get_member(member_id).await.unwrap().unwrap().booking_count, 0);
    }

    #[tokio::test]
    async fn unknown_member_and_item_are_reported_separately() {
        let store = InMemoryEntityStore::new();
        let (member_id, item_id) = seed(&store, 1, NaiveDate::from_ymd_opt(2030, 1, 1).unwrap()).await;
        let engine = BookingEngine::new(store);

        let err = engine
            .create_booking(CreateBooking {
                member_id: MemberId::new(999),
                item_id,
                requested_at: at(2025, 1, 1),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Domain(DomainError::NotFound(EntityKind::Member))));

        let err = engine
            .create_booking(CreateBooking {
                member_id,
                item_id: InventoryItemId::new(999),
                requested_at: at(2025, 1, 1),
            })
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            EngineError::Domain(DomainError::NotFound(EntityKind::InventoryItem))
        ));
    }

    #[tokio::test]
    async fn cancel_unknown_reference_is_not_found() {
        let engine = BookingEngine::new(InMemoryEntityStore::new());
        let err = engine
            .cancel_booking(CancelBooking {
                reference: BookingReference::generate(),
                requested_at: at(2025, 1, 1),
            })
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            EngineError::Domain(DomainError::NotFound(EntityKind::ActiveBooking))
        ));
    }

    #[tokio::test]
    async fn custom_policy_limits_quota() {
        let store = InMemoryEntityStore::new();
        let (member_id, item_id) = seed(&store, 5, NaiveDate::from_ymd_opt(2030, 1, 1).unwrap()).await;
        let engine = BookingEngine::new(store).with_policy(BookingPolicy {
            max_active_bookings: 1,
        });
        let cmd = CreateBooking {
            member_id,
            item_id,
            requested_at: at(2025, 1, 1),
        };

        engine.create_booking(cmd.clone()).await.unwrap();
        let err = engine.create_booking(cmd).await.unwrap_err();
        assert!(matches!(
            err,
            EngineError::Domain(DomainError::QuotaExceeded { limit: 1 })
        ));
    }

    /// Store whose transactions never find an inventory item, as if it was
    /// removed after the booking was made.
    struct VanishingItems(InMemoryEntityStore);

    struct VanishingItemsTx(Box<dyn StoreTransaction>);

    #[async_trait]
    impl StoreTransaction for VanishingItemsTx {
        async fn lock_member(&mut self, id: MemberId) -> Result<Option<Member>, StoreError> {
            self.0.lock_member(id).await
        }

        async fn lock_item(&mut self, _id: InventoryItemId) -> Result<Option<InventoryItem>, StoreError> {
            Ok(None)
        }

        async fn lock_booking_by_reference(
            &mut self,
            reference: &BookingReference,
        ) -> Result<Option<Booking>, StoreError> {
            self.0.lock_booking_by_reference(reference).await
        }

        async fn count_bookings(&mut self, filter: &BookingFilter) -> Result<i64, StoreError> {
            self.0.count_bookings(filter).await
        }

        async fn insert_member(&mut self, member: NewMember) -> Result<Member, StoreError> {
            self.0.insert_member(member).await
        }

        async fn insert_item(&mut self, item: NewInventoryItem) -> Result<InventoryItem, StoreError> {
            self.0.insert_item(item).await
        }

        async fn insert_booking(&mut self, booking: NewBooking) -> Result<Booking, StoreError> {
            self.0.insert_booking(booking).await
        }

        async fn update_member(&mut self, member: &Member) -> Result<(), StoreError> {
            self.0.update_member(member).await
        }

        async fn update_item(&mut self, item: &InventoryItem) -> Result<(), StoreError> {
            self.0.update_item(item).await
        }

        async fn update_booking(&mut self, booking: &Booking) -> Result<(), StoreError> {
            self.0.update_booking(booking).await
        }

        async fn commit(self: Box<Self>) -> Result<(), StoreError> {
            self.0.commit().await
        }
    }

    #[async_trait]
    impl EntityStore for VanishingItems {
        async fn begin(&self) -> Result<Box<dyn StoreTransaction>, StoreError> {
            Ok(Box::new(VanishingItemsTx(self.0.begin().await?)))
        }

        async fn get_member(&self, id: MemberId) -> Result<Option<Member>, StoreError> {
            self.0.get_member(id).await
        }

        async fn get_item(&self, id: InventoryItemId) -> Result<Option<InventoryItem>, StoreError> {
            self.0.get_item(id).await
        }

        async fn get_booking(&self, id: BookingId) -> Result<Option<Booking>, StoreError> {
            self.0.get_booking(id).await
        }

        async fn find_booking_by_reference(
            &self,
            reference: &BookingReference,
        ) -> Result<Option<Booking>, StoreError> {
            self.0.find_booking_by_reference(reference).await
        }

        async fn find_bookings_by_member(&self, member_id: MemberId) -> Result<Vec<Booking>, StoreError> {
            self.0.find_bookings_by_member(member_id).await
        }

        async fn find_bookings_by_item(&self, item_id: InventoryItemId) -> Result<Vec<Booking>, StoreError> {
            self.0.find_bookings_by_item(item_id).await
        }

        async fn count_bookings(&self, filter: &BookingFilter) -> Result<i64, StoreError> {
            self.0.count_bookings(filter).await
        }

        async fn delete_member(&self, id: MemberId) -> Result<bool, StoreError> {
            self.0.delete_member(id).await
        }

        async fn delete_item(&self, id: InventoryItemId) -> Result<bool, StoreError> {
            self.0.delete_item(id).await
        }

        async fn delete_booking(&self, id: BookingId) -> Result<bool, StoreError> {
            self.0.delete_booking(id).await
        }
    }

    #[tokio::test]
    async fn cancel_tolerates_missing_item() {
        let store = InMemoryEntityStore::new();
        let (member_id, item_id) = seed(&store, 2, NaiveDate::from_ymd_opt(2030, 1, 1).unwrap()).await;
        let booking = BookingEngine::new(store.clone())
            .create_booking(CreateBooking {
                member_id,
                item_id,
                requested_at: at(2025, 1, 1),
            })
            .await
            .unwrap();

        let cancelled = BookingEngine::new(VanishingItems(store.clone()))
            .cancel_booking(CancelBooking {
                reference: booking.reference,
                requested_at: at(2025, 1, 2),
            })
            .await
            .unwrap();

        assert!(!cancelled.is_active);
        let stored = store.get_booking(booking.id).await.unwrap().unwrap();
        assert!(!stored.is_active);
        assert_eq!(store.get_member(member_id).await.unwrap().unwrap().booking_count, 0);
        // No unit is handed back to an item the transaction could not see.
        assert_eq!(store.get_item(item_id).await.unwrap().unwrap().remaining_count, 1);
    }

    #[tokio::test]
    async fn retry_stops_on_domain_error() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let result: Result<(), EngineError> = with_retry(3, || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(EngineError::Domain(DomainError::OutOfStock))
            }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retry_gives_up_after_attempts() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let result: Result<(), EngineError> = with_retry(3, || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(EngineError::Store(StoreError::Conflict("busy".to_string())))
            }
        })
        .await;
        assert!(matches!(result, Err(EngineError::Store(StoreError::Conflict(_)))));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn retry_returns_first_success() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let result = with_retry(3, || {
            let counter = counter.clone();
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(EngineError::Store(StoreError::Conflict("busy".to_string())))
                } else {
                    Ok(7)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
