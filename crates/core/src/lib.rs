//! `booking-core`: domain foundation building blocks.
//!
//! This crate contains **pure domain** primitives (no infrastructure concerns):
//! identifiers, the entity contract and the domain error model shared by the
//! booking rules, the stores and the HTTP layer.

pub mod entity;
pub mod error;
pub mod id;

pub use entity::{Entity, require};
pub use error::{DomainError, DomainResult, EntityKind};
pub use id::{BookingId, BookingReference, InventoryItemId, MemberId};
