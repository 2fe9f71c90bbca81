//! Guest/group association.

use super::group::GroupId;
use super::guest::GuestId;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

/// One `(guest_id, group_id)` pair. Presence is the only state a pair has.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Membership {
    pub guest_id: GuestId,
    pub group_id: GroupId,
}

impl Membership {
    pub fn new(guest_id: GuestId, group_id: GroupId) -> Self {
        Self { guest_id, group_id }
    }

    pub fn mentions(&self, entity: EntityRef) -> bool {
        match entity {
            EntityRef::Guest(id) => self.guest_id == id,
            EntityRef::Group(id) => self.group_id == id,
        }
    }
}

impl Display for Membership {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.guest_id, self.group_id)
    }
}

/// Reference to a top-level entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum EntityRef {
    Guest(GuestId),
    Group(GroupId),
}

impl Display for EntityRef {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Guest(id) => write!(f, "guest {id}"),
            Self::Group(id) => write!(f, "group {id}"),
        }
    }
}

/// Unit of ownership for pending mutations and remote changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum EntityKey {
    Guest(GuestId),
    Group(GroupId),
    Membership(Membership),
}

impl From<EntityRef> for EntityKey {
    fn from(value: EntityRef) -> Self {
        match value {
            EntityRef::Guest(id) => Self::Guest(id),
            EntityRef::Group(id) => Self::Group(id),
        }
    }
}

impl From<Membership> for EntityKey {
    fn from(value: Membership) -> Self {
        Self::Membership(value)
    }
}

impl Display for EntityKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Guest(id) => write!(f, "guest {id}"),
            Self::Group(id) => write!(f, "group {id}"),
            Self::Membership(pair) => write!(f, "membership {pair}"),
        }
    }
}
