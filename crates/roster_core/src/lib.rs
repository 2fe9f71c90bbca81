//! Multi-client optimistic sync core for a shared wedding guest roster.
//! This crate is the single source of truth for roster invariants.

pub mod aggregate;
pub mod backend;
pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod feed;
pub mod logging;
pub mod model;
pub mod service;
pub mod store;
pub mod sync;

pub use aggregate::{summarize, RosterCounts, RosterSummary, SubscriptionId};
pub use backend::{
    flush, pull, BackendError, BackendResult, ChangeBatch, FeedCursor, PersistAck, PersistOp,
    PersistRequest, SqliteBackend, StorageBackend,
};
pub use config::{LoggingSettings, SettingsError, SyncSettings};
pub use engine::RosterEngine;
pub use error::{SyncError, SyncResult};
pub use feed::{ChangeEvent, ChangeOp, FeedError, Table};
pub use logging::{default_log_level, init_logging, logging_status};
pub use model::{
    Address, AddressFields, EntityKey, EntityRef, Group, GroupId, GroupPatch, GroupType, Guest,
    GuestId, GuestPatch, InclusionStatus, Membership, NewGroup, NewGuest, RsvpStatus, Side,
    Timestamp, ValidationError,
};
pub use service::{MutationOutcome, MutationStatus, MutationTicket, TicketState};
pub use store::{EntityStore, RosterSnapshot};
pub use sync::{Disposition, MutationId};

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
