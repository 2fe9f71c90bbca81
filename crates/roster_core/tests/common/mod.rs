#![allow(dead_code)]

use roster_core::{
    BackendError, BackendResult, ChangeBatch, EntityRef, FeedCursor, GroupId, GuestId,
    MutationTicket, NewGuest, PersistAck, PersistRequest, RosterEngine, Side, SqliteBackend,
    StorageBackend, SyncSettings,
};
use std::thread;
use std::time::Duration;

pub fn engine() -> RosterEngine {
    RosterEngine::new(SyncSettings::default())
}

pub fn engine_with_timeout(request_timeout_ms: u64) -> RosterEngine {
    RosterEngine::new(SyncSettings {
        request_timeout_ms,
        ..SyncSettings::default()
    })
}

pub fn backend() -> SqliteBackend {
    SqliteBackend::open_in_memory().unwrap()
}

pub fn guest(first_name: &str, last_name: &str) -> NewGuest {
    NewGuest::new(first_name, last_name, Side::Both)
}

pub fn guest_id(ticket: &MutationTicket) -> GuestId {
    ticket
        .created
        .iter()
        .find_map(|entity| match entity {
            EntityRef::Guest(id) => Some(*id),
            EntityRef::Group(_) => None,
        })
        .expect("ticket should report a created guest")
}

pub fn group_id(ticket: &MutationTicket) -> GroupId {
    ticket
        .created
        .iter()
        .find_map(|entity| match entity {
            EntityRef::Group(id) => Some(*id),
            EntityRef::Guest(_) => None,
        })
        .expect("ticket should report a created group")
}

pub fn created_guests(ticket: &MutationTicket) -> Vec<GuestId> {
    ticket
        .created
        .iter()
        .filter_map(|entity| match entity {
            EntityRef::Guest(id) => Some(*id),
            EntityRef::Group(_) => None,
        })
        .collect()
}

/// SQLite backend that can be switched offline or slowed down.
pub struct FlakyBackend {
    pub inner: SqliteBackend,
    pub offline: bool,
    pub delay: Option<Duration>,
}

impl FlakyBackend {
    pub fn new() -> Self {
        Self {
            inner: backend(),
            offline: false,
            delay: None,
        }
    }
}

impl StorageBackend for FlakyBackend {
    fn execute(&mut self, request: &PersistRequest) -> BackendResult<PersistAck> {
        if self.offline {
            return Err(BackendError::Unavailable("connection refused".to_string()));
        }
        if let Some(delay) = self.delay {
            thread::sleep(delay);
        }
        self.inner.execute(request)
    }

    fn changes_since(&mut self, cursor: FeedCursor, limit: usize) -> BackendResult<ChangeBatch> {
        if self.offline {
            return Err(BackendError::Unavailable("connection refused".to_string()));
        }
        self.inner.changes_since(cursor, limit)
    }
}
