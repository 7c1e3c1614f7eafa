//! `booking-auth`: shared-secret authorization gate.
//!
//! This crate is intentionally decoupled from HTTP and storage: the API layer
//! extracts the supplied token from the request and asks [`ApiKey::verify`]
//! for a pass/fail decision before any core logic runs.

pub mod api_key;

pub use api_key::{ApiKey, AuthError};
