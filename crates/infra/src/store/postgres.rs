//! Postgres-backed entity store implementation.
//!
//! Referential integrity (`ON DELETE CASCADE`), reference uniqueness and the
//! non-negative counters are enforced by the schema in `schema.sql`. The rule
//! engine's read-check-write sequences are made safe by row locks
//! (`SELECT ... FOR UPDATE`) held until the transaction ends.
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Error Code | StoreError | Scenario |
//! |------------|----------------------|------------|----------|
//! | Database (serialization failure) | `40001` | `Conflict` | Concurrent transactions could not be serialized |
//! | Database (deadlock detected) | `40P01` | `Conflict` | Lock cycle broken by the server |
//! | Database (lock not available) | `55P03` | `Conflict` | `lock_timeout` elapsed |
//! | Database (integrity class) | `23xxx` | `Integrity` | FK, unique or check constraint |
//! | PoolTimedOut | N/A | `Conflict` | No connection became free in time |
//! | Other | N/A | `Backend` | Network errors, decoding, etc. |
//!
//! ## Thread Safety
//!
//! `PostgresEntityStore` is `Send + Sync` and can be shared across threads.
//! All operations use the SQLx connection pool.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{FromRow, PgPool, Postgres, Row, Transaction};
use tracing::instrument;
use uuid::Uuid;

use booking_core::{BookingId, BookingReference, InventoryItemId, MemberId};
use booking_domain::{Booking, InventoryItem, Member, NewBooking, NewInventoryItem, NewMember};

use super::{BookingFilter, EntityStore, StoreError, StoreTransaction};

const SCHEMA: &str = include_str!("schema.sql");

const MEMBER_COLUMNS: &str = "id, name, surname, booking_count, date_joined";
const ITEM_COLUMNS: &str = "id, title, description, remaining_count, expiration_date";
const BOOKING_COLUMNS: &str = "id, reference, member_id, item_id, created_at, is_active";

/// Postgres-backed entity store.
///
/// ## Locking
///
/// Every transaction sets `lock_timeout`, so no operation waits on a row lock
/// indefinitely; an elapsed timeout surfaces as a retryable
/// [`StoreError::Conflict`].
#[derive(Debug, Clone)]
pub struct PostgresEntityStore {
    pool: Arc<PgPool>,
    lock_timeout: Duration,
}

impl PostgresEntityStore {
    /// Create a new PostgresEntityStore with the given connection pool.
    pub fn new(pool: PgPool, lock_timeout: Duration) -> Self {
        Self {
            pool: Arc::new(pool),
            lock_timeout,
        }
    }

    /// Connect a pool to `database_url`.
    pub async fn connect(
        database_url: &str,
        max_connections: u32,
        lock_timeout: Duration,
    ) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(lock_timeout)
            .connect(database_url)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;
        Ok(Self::new(pool, lock_timeout))
    }

    /// Create the tables and indexes if they do not exist yet.
    #[instrument(skip(self), err)]
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::raw_sql(SCHEMA)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("migrate", e))?;
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Open a transaction whose row-lock waits are bounded by `lock_timeout`.
    async fn begin_bounded(&self) -> Result<Transaction<'static, Postgres>, StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        // SET does not accept bind parameters; the value is an integer we own.
        let millis = self.lock_timeout.as_millis().max(1);
        sqlx::query(&format!("SET LOCAL lock_timeout = '{millis}ms'"))
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("set_lock_timeout", e))?;
        Ok(tx)
    }
}

struct PostgresTransaction {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl StoreTransaction for PostgresTransaction {
    async fn lock_member(&mut self, id: MemberId) -> Result<Option<Member>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {MEMBER_COLUMNS} FROM members WHERE id = $1 FOR UPDATE"
        ))
        .bind(id.get())
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("lock_member", e))?;
        row.map(|r| decode::<MemberRow>(&r, "member").map(Into::into))
            .transpose()
    }

    async fn lock_item(&mut self, id: InventoryItemId) -> Result<Option<InventoryItem>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {ITEM_COLUMNS} FROM inventory_items WHERE id = $1 FOR UPDATE"
        ))
        .bind(id.get())
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("lock_item", e))?;
        row.map(|r| decode::<ItemRow>(&r, "inventory item").map(Into::into))
            .transpose()
    }

    async fn lock_booking_by_reference(
        &mut self,
        reference: &BookingReference,
    ) -> Result<Option<Booking>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {BOOKING_COLUMNS} FROM bookings WHERE reference = $1 FOR UPDATE"
        ))
        .bind(reference.as_uuid())
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("lock_booking_by_reference", e))?;
        row.map(|r| decode::<BookingRow>(&r, "booking").map(Into::into))
            .transpose()
    }

    async fn count_bookings(&mut self, filter: &BookingFilter) -> Result<i64, StoreError> {
        let (member_id, item_id, active) = filter_binds(filter);
        let count: i64 = sqlx::query_scalar(COUNT_BOOKINGS_SQL)
            .bind(member_id)
            .bind(item_id)
            .bind(active)
            .fetch_one(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("count_bookings", e))?;
        Ok(count)
    }

    async fn insert_member(&mut self, member: NewMember) -> Result<Member, StoreError> {
        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO members (name, surname, booking_count, date_joined)
            VALUES ($1, $2, $3, $4)
            RETURNING id
            "#,
        )
        .bind(&member.name)
        .bind(&member.surname)
        .bind(member.booking_count)
        .bind(member.date_joined)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("insert_member", e))?;
        Ok(member.into_member(MemberId::new(id)))
    }

    async fn insert_item(&mut self, item: NewInventoryItem) -> Result<InventoryItem, StoreError> {
        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO inventory_items (title, description, remaining_count, expiration_date)
            VALUES ($1, $2, $3, $4)
            RETURNING id
            "#,
        )
        .bind(&item.title)
        .bind(&item.description)
        .bind(item.remaining_count)
        .bind(item.expiration_date)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("insert_item", e))?;
        Ok(item.into_item(InventoryItemId::new(id)))
    }

    async fn insert_booking(&mut self, booking: NewBooking) -> Result<Booking, StoreError> {
        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO bookings (reference, member_id, item_id, created_at, is_active)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id
            "#,
        )
        .bind(booking.reference.as_uuid())
        .bind(booking.member_id.get())
        .bind(booking.item_id.get())
        .bind(booking.created_at)
        .bind(booking.is_active)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("insert_booking", e))?;
        Ok(booking.into_booking(BookingId::new(id)))
    }

    async fn update_member(&mut self, member: &Member) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE members
            SET name = $2, surname = $3, booking_count = $4, date_joined = $5
            WHERE id = $1
            "#,
        )
        .bind(member.id.get())
        .bind(&member.name)
        .bind(&member.surname)
        .bind(member.booking_count)
        .bind(member.date_joined)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("update_member", e))?;
        expect_one_row(result.rows_affected(), || format!("member {}", member.id))
    }

    async fn update_item(&mut self, item: &InventoryItem) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE inventory_items
            SET title = $2, description = $3, remaining_count = $4, expiration_date = $5
            WHERE id = $1
            "#,
        )
        .bind(item.id.get())
        .bind(&item.title)
        .bind(&item.description)
        .bind(item.remaining_count)
        .bind(item.expiration_date)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("update_item", e))?;
        expect_one_row(result.rows_affected(), || format!("inventory item {}", item.id))
    }

    async fn update_booking(&mut self, booking: &Booking) -> Result<(), StoreError> {
        // Only the active flag is mutable; the reference takes part in the
        // match so a changed reference finds no row.
        let result = sqlx::query(
            r#"
            UPDATE bookings
            SET is_active = $3
            WHERE id = $1 AND reference = $2
            "#,
        )
        .bind(booking.id.get())
        .bind(booking.reference.as_uuid())
        .bind(booking.is_active)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("update_booking", e))?;
        expect_one_row(result.rows_affected(), || format!("booking {}", booking.id))
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        self.tx
            .commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))
    }
}

const COUNT_BOOKINGS_SQL: &str = r#"
    SELECT COUNT(*)
    FROM bookings
    WHERE ($1::BIGINT IS NULL OR member_id = $1)
      AND ($2::BIGINT IS NULL OR item_id = $2)
      AND ($3::BOOLEAN IS NULL OR is_active = $3)
"#;

/// Lower each member's counter by its active bookings on item `$1`.
const RELEASE_ITEM_BOOKINGS_SQL: &str = r#"
    UPDATE members AS m
    SET booking_count = GREATEST(m.booking_count - released.active, 0)
    FROM (
        SELECT member_id, COUNT(*) AS active
        FROM bookings
        WHERE item_id = $1 AND is_active
        GROUP BY member_id
    ) AS released
    WHERE m.id = released.member_id
"#;

fn filter_binds(filter: &BookingFilter) -> (Option<i64>, Option<i64>, Option<bool>) {
    (
        filter.member_id.map(MemberId::get),
        filter.item_id.map(InventoryItemId::get),
        filter.active,
    )
}

#[async_trait]
impl EntityStore for PostgresEntityStore {
    #[instrument(skip(self), err)]
    async fn begin(&self) -> Result<Box<dyn StoreTransaction>, StoreError> {
        let tx = self.begin_bounded().await?;
        Ok(Box::new(PostgresTransaction { tx }))
    }

    async fn get_member(&self, id: MemberId) -> Result<Option<Member>, StoreError> {
        let row = sqlx::query(&format!("SELECT {MEMBER_COLUMNS} FROM members WHERE id = $1"))
            .bind(id.get())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("get_member", e))?;
        row.map(|r| decode::<MemberRow>(&r, "member").map(Into::into))
            .transpose()
    }

    async fn get_item(&self, id: InventoryItemId) -> Result<Option<InventoryItem>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {ITEM_COLUMNS} FROM inventory_items WHERE id = $1"
        ))
        .bind(id.get())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("get_item", e))?;
        row.map(|r| decode::<ItemRow>(&r, "inventory item").map(Into::into))
            .transpose()
    }

    async fn get_booking(&self, id: BookingId) -> Result<Option<Booking>, StoreError> {
        let row = sqlx::query(&format!("SELECT {BOOKING_COLUMNS} FROM bookings WHERE id = $1"))
            .bind(id.get())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("get_booking", e))?;
        row.map(|r| decode::<BookingRow>(&r, "booking").map(Into::into))
            .transpose()
    }

    async fn find_booking_by_reference(
        &self,
        reference: &BookingReference,
    ) -> Result<Option<Booking>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {BOOKING_COLUMNS} FROM bookings WHERE reference = $1"
        ))
        .bind(reference.as_uuid())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("find_booking_by_reference", e))?;
        row.map(|r| decode::<BookingRow>(&r, "booking").map(Into::into))
            .transpose()
    }

    async fn find_bookings_by_member(&self, member_id: MemberId) -> Result<Vec<Booking>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {BOOKING_COLUMNS} FROM bookings WHERE member_id = $1 ORDER BY id ASC"
        ))
        .bind(member_id.get())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("find_bookings_by_member", e))?;
        rows.iter()
            .map(|r| decode::<BookingRow>(r, "booking").map(Into::into))
            .collect()
    }

    async fn find_bookings_by_item(&self, item_id: InventoryItemId) -> Result<Vec<Booking>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {BOOKING_COLUMNS} FROM bookings WHERE item_id = $1 ORDER BY id ASC"
        ))
        .bind(item_id.get())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("find_bookings_by_item", e))?;
        rows.iter()
            .map(|r| decode::<BookingRow>(r, "booking").map(Into::into))
            .collect()
    }

    async fn count_bookings(&self, filter: &BookingFilter) -> Result<i64, StoreError> {
        let (member_id, item_id, active) = filter_binds(filter);
        let count: i64 = sqlx::query_scalar(COUNT_BOOKINGS_SQL)
            .bind(member_id)
            .bind(item_id)
            .bind(active)
            .fetch_one(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("count_bookings", e))?;
        Ok(count)
    }

    #[instrument(skip(self), fields(member_id = %id), err)]
    async fn delete_member(&self, id: MemberId) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM members WHERE id = $1")
            .bind(id.get())
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("delete_member", e))?;
        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self), fields(item_id = %id), err)]
    async fn delete_item(&self, id: InventoryItemId) -> Result<bool, StoreError> {
        let mut tx = self.begin_bounded().await?;

        // Lock the item first so no booking lands on it between the counter
        // release and the cascade.
        let exists = sqlx::query("SELECT id FROM inventory_items WHERE id = $1 FOR UPDATE")
            .bind(id.get())
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("delete_item", e))?
            .is_some();
        if !exists {
            return Ok(false);
        }

        let released = sqlx::query(RELEASE_ITEM_BOOKINGS_SQL)
            .bind(id.get())
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("release_item_bookings", e))?;
        sqlx::query("DELETE FROM inventory_items WHERE id = $1")
            .bind(id.get())
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("delete_item", e))?;
        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;

        tracing::debug!(members = released.rows_affected(), "inventory item deleted");
        Ok(true)
    }

    async fn delete_booking(&self, id: BookingId) -> Result<bool, StoreError> {
        let mut tx = self.begin_bounded().await?;

        let removed = sqlx::query("DELETE FROM bookings WHERE id = $1 RETURNING member_id, is_active")
            .bind(id.get())
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("delete_booking", e))?;
        let Some(row) = removed else {
            return Ok(false);
        };

        let member_id: i64 = row
            .try_get("member_id")
            .map_err(|e| StoreError::Backend(format!("failed to decode booking row: {e}")))?;
        let is_active: bool = row
            .try_get("is_active")
            .map_err(|e| StoreError::Backend(format!("failed to decode booking row: {e}")))?;
        if is_active {
            sqlx::query(
                "UPDATE members SET booking_count = GREATEST(booking_count - 1, 0) WHERE id = $1",
            )
            .bind(member_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("release_booking", e))?;
        }
        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;
        Ok(true)
    }
}

fn expect_one_row(affected: u64, what: impl FnOnce() -> String) -> Result<(), StoreError> {
    if affected == 0 {
        Err(StoreError::NotFound(what()))
    } else {
        Ok(())
    }
}

fn decode<T>(row: &PgRow, what: &str) -> Result<T, StoreError>
where
    T: for<'r> FromRow<'r, PgRow>,
{
    T::from_row(row).map_err(|e| StoreError::Backend(format!("failed to decode {what} row: {e}")))
}

/// Map SQLx errors to store errors.
fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            match db_err.code().as_deref() {
                Some("40001") | Some("40P01") | Some("55P03") => StoreError::Conflict(msg),
                Some(code) if code.starts_with("23") => StoreError::Integrity(msg),
                _ => StoreError::Backend(msg),
            }
        }
        sqlx::Error::PoolTimedOut => {
            StoreError::Conflict(format!("timed out acquiring a connection in {}", operation))
        }
        sqlx::Error::PoolClosed => {
            StoreError::Backend(format!("connection pool closed in {}", operation))
        }
        _ => StoreError::Backend(format!("sqlx error in {}: {}", operation, err)),
    }
}

// SQLx row types

#[derive(Debug)]
struct MemberRow {
    id: i64,
    name: String,
    surname: String,
    booking_count: i64,
    date_joined: DateTime<Utc>,
}

impl<'r> FromRow<'r, PgRow> for MemberRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(MemberRow {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            surname: row.try_get("surname")?,
            booking_count: row.try_get("booking_count")?,
            date_joined: row.try_get("date_joined")?,
        })
    }
}

impl From<MemberRow> for Member {
    fn from(row: MemberRow) -> Self {
        Member {
            id: MemberId::new(row.id),
            name: row.name,
            surname: row.surname,
            booking_count: row.booking_count,
            date_joined: row.date_joined,
        }
    }
}

#[derive(Debug)]
struct ItemRow {
    id: i64,
    title: String,
    description: Option<String>,
    remaining_count: i64,
    expiration_date: NaiveDate,
}

impl<'r> FromRow<'r, PgRow> for ItemRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(ItemRow {
            id: row.try_get("id")?,
            title: row.try_get("title")?,
            description: row.try_get("description")?,
            remaining_count: row.try_get("remaining_count")?,
            expiration_date: row.try_get("expiration_date")?,
        })
    }
}

impl From<ItemRow> for InventoryItem {
    fn from(row: ItemRow) -> Self {
        InventoryItem {
            id: InventoryItemId::new(row.id),
            title: row.title,
            description: row.description,
            remaining_count: row.remaining_count,
            expiration_date: row.expiration_date,
        }
    }
}

#[derive(Debug)]
struct BookingRow {
    id: i64,
    reference: Uuid,
    member_id: i64,
    item_id: i64,
    created_at: DateTime<Utc>,
    is_active: bool,
}

impl<'r> FromRow<'r, PgRow> for BookingRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(BookingRow {
            id: row.try_get("id")?,
            reference: row.try_get("reference")?,
            member_id: row.try_get("member_id")?,
            item_id: row.try_get("item_id")?,
            created_at: row.try_get("created_at")?,
            is_active: row.try_get("is_active")?,
        })
    }
}

impl From<BookingRow> for Booking {
    fn from(row: BookingRow) -> Self {
        Booking {
            id: BookingId::new(row.id),
            reference: BookingReference::from_uuid(row.reference),
            member_id: MemberId::new(row.member_id),
            item_id: InventoryItemId::new(row.item_id),
            created_at: row.created_at,
            is_active: row.is_active,
        }
    }
}
