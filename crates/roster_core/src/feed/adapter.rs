use super::event::{ChangeEvent, ChangeOp, Table};
use super::rows::{GroupRow, GuestGroupRow, GuestRow, RowId};
use crate::model::{
    EntityKey, EntityRef, Group, GroupId, Guest, GuestId, Membership, Timestamp, ValidationError,
};
use log::{debug, warn};
use serde::de::DeserializeOwned;
use std::collections::{HashSet, VecDeque};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FeedError {
    #[error("malformed {table} row: {source}")]
    MalformedRow {
        table: Table,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid {table} row: {source}")]
    InvalidRow {
        table: Table,
        #[source]
        source: ValidationError,
    },
}

/// Store-shaped remote change, tagged with its server timestamp.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteChange {
    pub server_ts: Timestamp,
    pub kind: RemoteKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteKind {
    UpsertGuest(Guest),
    UpsertGroup(Group),
    Link(Membership),
    RemoveGuest(GuestId),
    RemoveGroup(GroupId),
    Unlink(Membership),
}

impl RemoteChange {
    /// The single key this change is about.
    pub fn key(&self) -> EntityKey {
        match &self.kind {
            RemoteKind::UpsertGuest(guest) => EntityKey::Guest(guest.id),
            RemoteKind::UpsertGroup(group) => EntityKey::Group(group.id),
            RemoteKind::Link(pair) | RemoteKind::Unlink(pair) => EntityKey::Membership(*pair),
            RemoteKind::RemoveGuest(id) => EntityKey::Guest(*id),
            RemoteKind::RemoveGroup(id) => EntityKey::Group(*id),
        }
    }

    /// Entity this change deletes, if it is an entity delete.
    pub fn removed_entity(&self) -> Option<EntityRef> {
        match self.kind {
            RemoteKind::RemoveGuest(id) => Some(EntityRef::Guest(id)),
            RemoteKind::RemoveGroup(id) => Some(EntityRef::Group(id)),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct Fingerprint {
    key: EntityKey,
    operation: ChangeOp,
    server_ts: Timestamp,
}

/// Translates backend events and filters repeated deliveries.
///
/// Remembers the last `window` event fingerprints; a delivery whose
/// fingerprint is still remembered is dropped.
#[derive(Debug)]
pub struct ChangeFeedAdapter {
    window: usize,
    seen: HashSet<Fingerprint>,
    order: VecDeque<Fingerprint>,
}

impl ChangeFeedAdapter {
    pub fn new(window: usize) -> Self {
        Self {
            window: window.max(1),
            seen: HashSet::new(),
            order: VecDeque::new(),
        }
    }

    /// Returns `Ok(None)` for a duplicate delivery.
    pub fn translate(&mut self, event: &ChangeEvent) -> Result<Option<RemoteChange>, FeedError> {
        let kind = match event.table {
            Table::Guests => translate_guest(event)?,
            Table::Groups => translate_group(event)?,
            Table::GuestGroups => translate_membership(event)?,
        };
        let change = RemoteChange {
            server_ts: event.server_ts,
            kind,
        };

        let fingerprint = Fingerprint {
            key: change.key(),
            operation: event.operation,
            server_ts: event.server_ts,
        };
        if !self.remember(fingerprint) {
            debug!(
                "event=feed_duplicate module=feed status=skipped table={} op={} server_ts={}",
                event.table,
                event.operation.as_str(),
                event.server_ts
            );
            return Ok(None);
        }
        Ok(Some(change))
    }

    fn remember(&mut self, fingerprint: Fingerprint) -> bool {
        if !self.seen.insert(fingerprint) {
            return false;
        }
        self.order.push_back(fingerprint);
        while self.order.len() > self.window {
            if let Some(evicted) = self.order.pop_front() {
                self.seen.remove(&evicted);
            }
        }
        true
    }
}

fn parse_row<T: DeserializeOwned>(event: &ChangeEvent) -> Result<T, FeedError> {
    serde_json::from_value(event.row.clone()).map_err(|source| {
        warn!(
            "event=feed_translate module=feed status=error table={} op={} error_code=malformed_row",
            event.table,
            event.operation.as_str()
        );
        FeedError::MalformedRow {
            table: event.table,
            source,
        }
    })
}

fn invalid(table: Table) -> impl FnOnce(ValidationError) -> FeedError {
    move |source| {
        warn!(
            "event=feed_translate module=feed status=error table={} error_code=invalid_row",
            table
        );
        FeedError::InvalidRow { table, source }
    }
}

fn translate_guest(event: &ChangeEvent) -> Result<RemoteKind, FeedError> {
    match event.operation {
        ChangeOp::Delete => Ok(RemoteKind::RemoveGuest(parse_row::<RowId>(event)?.id)),
        ChangeOp::Insert | ChangeOp::Update => {
            let row: GuestRow = parse_row(event)?;
            let guest = row.into_guest().map_err(invalid(event.table))?;
            Ok(RemoteKind::UpsertGuest(guest))
        }
    }
}

fn translate_group(event: &ChangeEvent) -> Result<RemoteKind, FeedError> {
    match event.operation {
        ChangeOp::Delete => Ok(RemoteKind::RemoveGroup(parse_row::<RowId>(event)?.id)),
        ChangeOp::Insert | ChangeOp::Update => {
            let row: GroupRow = parse_row(event)?;
            let group = row.into_group().map_err(invalid(event.table))?;
            Ok(RemoteKind::UpsertGroup(group))
        }
    }
}

fn translate_membership(event: &ChangeEvent) -> Result<RemoteKind, FeedError> {
    let pair: Membership = parse_row::<GuestGroupRow>(event)?.into();
    match event.operation {
        ChangeOp::Delete => Ok(RemoteKind::Unlink(pair)),
        ChangeOp::Insert | ChangeOp::Update => Ok(RemoteKind::Link(pair)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use uuid::Uuid;

    fn guest_row(id: Uuid) -> serde_json::Value {
        json!({
            "id": id,
            "first_name": "Ana",
            "last_name": "Silva",
            "email": null,
            "street": null,
            "city": null,
            "state": null,
            "zip": null,
            "inclusion_status": "definitely",
            "rsvp_status": null,
            "side": "bride",
            "notes": null,
            "created_at": 100,
            "updated_at": 100
        })
    }

    fn event(table: Table, operation: ChangeOp, row: serde_json::Value, ts: i64) -> ChangeEvent {
        ChangeEvent {
            table,
            operation,
            row,
            server_ts: ts,
        }
    }

    #[test]
    fn translates_guest_insert() {
        let mut adapter = ChangeFeedAdapter::new(16);
        let id = Uuid::new_v4();
        let change = adapter
            .translate(&event(Table::Guests, ChangeOp::Insert, guest_row(id), 100))
            .unwrap()
            .expect("first delivery is not a duplicate");
        assert_eq!(change.key(), EntityKey::Guest(id));
        assert_eq!(change.server_ts, 100);
        match change.kind {
            RemoteKind::UpsertGuest(guest) => {
                assert_eq!(guest.first_name, "Ana");
                assert!(guest.address.is_none());
            }
            other => panic!("unexpected change: {other:?}"),
        }
    }

    #[test]
    fn duplicate_delivery_is_dropped() {
        let mut adapter = ChangeFeedAdapter::new(16);
        let id = Uuid::new_v4();
        let insert = event(Table::Guests, ChangeOp::Insert, guest_row(id), 100);
        assert!(adapter.translate(&insert).unwrap().is_some());
        assert!(adapter.translate(&insert).unwrap().is_none());

        let later = event(Table::Guests, ChangeOp::Update, guest_row(id), 101);
        assert!(adapter.translate(&later).unwrap().is_some());
    }

    #[test]
    fn window_forgets_oldest_fingerprints() {
        let mut adapter = ChangeFeedAdapter::new(1);
        let first = event(Table::Groups, ChangeOp::Delete, json!({ "id": Uuid::new_v4() }), 1);
        let second = event(Table::Groups, ChangeOp::Delete, json!({ "id": Uuid::new_v4() }), 2);
        assert!(adapter.translate(&first).unwrap().is_some());
        assert!(adapter.translate(&second).unwrap().is_some());
        assert!(adapter.translate(&first).unwrap().is_some());
    }

    #[test]
    fn partial_address_row_is_rejected() {
        let mut adapter = ChangeFeedAdapter::new(16);
        let mut row = guest_row(Uuid::new_v4());
        row["street"] = json!("1 Chapel Row");
        let err = adapter
            .translate(&event(Table::Guests, ChangeOp::Insert, row, 5))
            .unwrap_err();
        assert!(matches!(
            err,
            FeedError::InvalidRow {
                source: ValidationError::PartialAddress { .. },
                ..
            }
        ));
    }

    #[test]
    fn unknown_enum_value_is_malformed() {
        let mut adapter = ChangeFeedAdapter::new(16);
        let mut row = guest_row(Uuid::new_v4());
        row["side"] = json!("neither");
        let err = adapter
            .translate(&event(Table::Guests, ChangeOp::Insert, row, 5))
            .unwrap_err();
        assert!(matches!(err, FeedError::MalformedRow { .. }));
    }

    #[test]
    fn membership_delete_becomes_unlink() {
        let mut adapter = ChangeFeedAdapter::new(16);
        let pair = Membership::new(Uuid::new_v4(), Uuid::new_v4());
        let row = serde_json::to_value(GuestGroupRow::from(pair)).unwrap();
        let change = adapter
            .translate(&event(Table::GuestGroups, ChangeOp::Delete, row, 9))
            .unwrap()
            .unwrap();
        assert_eq!(change.kind, RemoteKind::Unlink(pair));
        assert_eq!(change.removed_entity(), None);
    }
}
