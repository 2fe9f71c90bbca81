//! Roster domain model.
//!
//! # Responsibility
//! - Define guests, groups and their associations.
//! - Own the field rules every write path must pass.
//!
//! # Invariants
//! - Every guest and group is identified by a stable v4 `Uuid`.
//! - Timestamps are Unix epoch milliseconds.

pub mod group;
pub mod guest;
pub mod membership;
pub mod validation;

use std::time::{SystemTime, UNIX_EPOCH};

/// Unix epoch milliseconds. Server timestamps order remote changes.
pub type Timestamp = i64;

/// Local wall clock in epoch milliseconds, used for optimistic values only.
pub fn now_ms() -> Timestamp {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as Timestamp)
        .unwrap_or_default()
}

pub use group::{Group, GroupId, GroupPatch, GroupType, NewGroup};
pub use guest::{
    Address, AddressFields, Guest, GuestId, GuestPatch, InclusionStatus, NewGuest, RsvpStatus,
    Side,
};
pub use membership::{EntityKey, EntityRef, Membership};
pub use validation::ValidationError;
