//! Storage backend boundary.
//!
//! # Responsibility
//! - Define the durable-write requests the engine issues and the acks and
//!   change feed the backend answers with.
//! - Provide a synchronous driver and a SQLite reference implementation.
//!
//! # Invariants
//! - A request commits all of its rows or none of them.
//! - The backend is authoritative for group-name uniqueness and for the
//!   existence of referenced ids.
//! - Server timestamps are strictly increasing per backend.

pub mod driver;
pub mod sqlite;

use crate::db::DbError;
use crate::error::SyncError;
use crate::feed::{ChangeEvent, Table};
use crate::model::{
    EntityKey, Group, GroupId, GroupPatch, Guest, GuestId, GuestPatch, Membership, Timestamp,
    ValidationError,
};
use crate::sync::MutationId;
use thiserror::Error;

pub use driver::{flush, pull};
pub use sqlite::SqliteBackend;

pub type BackendResult<T> = Result<T, BackendError>;

/// Position in the backend change feed.
pub type FeedCursor = u64;

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("rejected by backend: {0}")]
    Rejected(#[from] ValidationError),
    #[error("group name `{0}` is already taken")]
    Conflict(String),
    #[error("referenced {0} does not exist")]
    MissingReference(EntityKey),
    #[error("{0} not found")]
    NotFound(EntityKey),
    #[error("backend unavailable: {0}")]
    Unavailable(String),
    #[error("request timed out after {elapsed_ms} ms")]
    Timeout { elapsed_ms: u64 },
    #[error("storage error: {0}")]
    Storage(#[from] DbError),
}

impl From<rusqlite::Error> for BackendError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Storage(DbError::Sqlite(value))
    }
}

impl From<BackendError> for SyncError {
    fn from(value: BackendError) -> Self {
        match value {
            BackendError::Rejected(err) => Self::Validation(err),
            BackendError::Conflict(name) => {
                Self::Conflict(format!("group name `{name}` is already taken"))
            }
            BackendError::MissingReference(key) | BackendError::NotFound(key) => {
                Self::NotFound(key)
            }
            other => Self::BackendFailure(other.to_string()),
        }
    }
}

/// Durable write for one logical mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PersistOp {
    /// New guest, linked to `group_ids`.
    CreateGuest {
        guest: Guest,
        group_ids: Vec<GroupId>,
    },
    /// Field update applied to the backend's current row.
    UpdateGuest { id: GuestId, patch: GuestPatch },
    DeleteGuest { id: GuestId },
    /// New group plus a batch: `new_guests` are inserted and every id in
    /// `member_ids` (existing and new) is linked.
    CreateGroup {
        group: Group,
        new_guests: Vec<Guest>,
        member_ids: Vec<GuestId>,
    },
    UpdateGroup { id: GroupId, patch: GroupPatch },
    DeleteGroup { id: GroupId },
    /// Links one guest to several groups; pairs already present are kept.
    LinkGuest {
        guest_id: GuestId,
        group_ids: Vec<GroupId>,
    },
    UnlinkGuest { pair: Membership },
}

impl PersistOp {
    pub fn name(&self) -> &'static str {
        match self {
            Self::CreateGuest { .. } => "create_guest",
            Self::UpdateGuest { .. } => "update_guest",
            Self::DeleteGuest { .. } => "delete_guest",
            Self::CreateGroup { .. } => "create_group",
            Self::UpdateGroup { .. } => "update_group",
            Self::DeleteGroup { .. } => "delete_group",
            Self::LinkGuest { .. } => "link_guest",
            Self::UnlinkGuest { .. } => "unlink_guest",
        }
    }

    /// Table the primary row of this write lives in.
    pub fn table(&self) -> Table {
        match self {
            Self::CreateGuest { .. } | Self::UpdateGuest { .. } | Self::DeleteGuest { .. } => {
                Table::Guests
            }
            Self::CreateGroup { .. } | Self::UpdateGroup { .. } | Self::DeleteGroup { .. } => {
                Table::Groups
            }
            Self::LinkGuest { .. } | Self::UnlinkGuest { .. } => Table::GuestGroups,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistRequest {
    pub id: MutationId,
    pub op: PersistOp,
}

/// Successful commit, stamped with the server timestamp of the write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PersistAck {
    pub server_ts: Timestamp,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChangeBatch {
    pub events: Vec<ChangeEvent>,
    /// Cursor to pass to the next `changes_since` call.
    pub next_cursor: FeedCursor,
}

/// Shared source of truth consumed by the engine.
pub trait StorageBackend {
    /// Commits one request atomically.
    fn execute(&mut self, request: &PersistRequest) -> BackendResult<PersistAck>;

    /// Returns up to `limit` committed changes after `cursor`, oldest first.
    fn changes_since(&mut self, cursor: FeedCursor, limit: usize) -> BackendResult<ChangeBatch>;
}
