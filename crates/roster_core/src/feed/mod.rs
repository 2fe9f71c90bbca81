//! Inbound change notifications from the storage backend.
//!
//! # Responsibility
//! - Define the wire shape of remote mutation events and table rows.
//! - Translate rows into store-shaped `RemoteChange` values.
//! - Drop duplicate deliveries.
//!
//! # Invariants
//! - The adapter never mutates the entity store; the reconciler does.
//! - A malformed or rule-violating row never reaches the reconciler.

mod adapter;
mod event;
mod rows;

pub use adapter::{ChangeFeedAdapter, FeedError, RemoteChange, RemoteKind};
pub use event::{ChangeEvent, ChangeOp, Table};
pub use rows::{GroupRow, GuestGroupRow, GuestRow, RowId};
