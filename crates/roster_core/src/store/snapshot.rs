//! Owned, comparable copy of the full store state.

use super::Stored;
use crate::model::{Group, GroupId, Guest, GuestId, Membership, Timestamp};
use serde::Serialize;
use std::collections::BTreeMap;

/// Point-in-time copy handed to readers.
///
/// The store version is deliberately excluded: two snapshots compare equal
/// when the roster content and last-applied timestamps are equal.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RosterSnapshot {
    pub guests: BTreeMap<GuestId, Stored<Guest>>,
    pub groups: BTreeMap<GroupId, Stored<Group>>,
    pub memberships: BTreeMap<Membership, Option<Timestamp>>,
}

impl RosterSnapshot {
    pub fn guest(&self, id: GuestId) -> Option<&Guest> {
        self.guests.get(&id).map(|stored| &stored.value)
    }

    pub fn group(&self, id: GroupId) -> Option<&Group> {
        self.groups.get(&id).map(|stored| &stored.value)
    }

    pub fn members_of(&self, group_id: GroupId) -> Vec<GuestId> {
        self.memberships
            .keys()
            .filter(|pair| pair.group_id == group_id)
            .map(|pair| pair.guest_id)
            .collect()
    }
}
