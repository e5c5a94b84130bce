#![deny(missing_docs)]

//! # tourbook-core — Domain Records for the Tour Booking Service
//!
//! This crate holds the records the HTTP layer stores and serves. It has no
//! web dependencies: only `serde`, `thiserror`, `chrono`, `uuid`, and the
//! hashing crates (`argon2`, `sha2`) from the external ecosystem.
//!
//! ## Design Principles
//!
//! 1. **Validation lives with the record.** Every draft type (`NewUser`,
//!    [`TourDraft`], [`ReviewDraft`], [`BookingDraft`]) produces either a
//!    complete record or a [`ValidationErrors`] list carrying one message
//!    per offending field.
//!
//! 2. **Persistence-shaped errors.** [`StoreError`] mirrors the raw failures
//!    a document store reports (malformed id, duplicate unique field,
//!    failed validation). The API layer translates them into user-facing
//!    messages; this crate never decides HTTP status codes.
//!
//! 3. **Credentials never leave as plain text.** Passwords are stored as
//!    argon2 PHC strings and reset tokens as SHA-256 digests.

pub mod booking;
pub mod error;
pub mod id;
pub mod review;
pub mod role;
pub mod tour;
pub mod user;

pub use booking::{BookingDraft, BookingRecord};
pub use error::{FieldError, PasswordError, StoreError, ValidationErrors};
pub use id::{parse_id, parse_ids};
pub use review::{rating_stats, ReviewDraft, ReviewRecord};
pub use role::Role;
pub use tour::{slugify, Difficulty, GeoPoint, TourDraft, TourRecord, TourStop};
pub use user::{
    hash_password, reset_token_digest, validate_password_pair, verify_password, NewUser,
    PublicUser, UserPatch, UserRecord,
};
