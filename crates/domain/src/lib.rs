//! Booking domain module.
//!
//! This crate contains the business rules for members, inventory and bookings,
//! implemented purely as deterministic domain logic (no IO, no HTTP, no
//! storage). Stores and the booking engine in `booking-infra` load entities,
//! call into these rules, and persist whatever the rules changed.

pub mod booking;
pub mod item;
pub mod member;
pub mod policy;

pub use booking::{Booking, CancelBooking, CreateBooking, NewBooking};
pub use item::{InventoryItem, NewInventoryItem};
pub use member::{Member, NewMember};
pub use policy::{BookingPolicy, DEFAULT_MAX_ACTIVE_BOOKINGS};
