use super::RosterSnapshot;
use crate::model::{
    EntityKey, EntityRef, Group, GroupId, Guest, GuestId, Membership, Timestamp, ValidationError,
};
use log::debug;
use serde::Serialize;
use std::collections::BTreeMap;
use thiserror::Error;
use uuid::Uuid;

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("{0} not found")]
    NotFound(EntityKey),
    #[error("group name `{name}` is already used by group {existing}")]
    Conflict { name: String, existing: GroupId },
    #[error("{entity} still has {count} association(s)")]
    StillLinked { entity: EntityRef, count: usize },
    #[error("invalid record: {0}")]
    Invalid(#[from] ValidationError),
}

/// A stored value with the server timestamp it was last reconciled at.
///
/// `last_applied` is `None` while the value is only known optimistically.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Stored<T> {
    pub value: T,
    pub last_applied: Option<Timestamp>,
}

/// Everything `remove_cascading` took out of the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CascadeRemoval {
    pub entity: EntityRef,
    pub memberships: Vec<Membership>,
}

/// Locally-known roster state.
#[derive(Debug, Default)]
pub struct EntityStore {
    guests: BTreeMap<GuestId, Stored<Guest>>,
    groups: BTreeMap<GroupId, Stored<Group>>,
    memberships: BTreeMap<Membership, Option<Timestamp>>,
    version: u64,
}

impl EntityStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of successful mutations so far.
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn get_guest(&self, id: GuestId) -> Option<&Guest> {
        self.guests.get(&id).map(|stored| &stored.value)
    }

    pub fn guest_entry(&self, id: GuestId) -> Option<&Stored<Guest>> {
        self.guests.get(&id)
    }

    pub fn get_group(&self, id: GroupId) -> Option<&Group> {
        self.groups.get(&id).map(|stored| &stored.value)
    }

    pub fn group_entry(&self, id: GroupId) -> Option<&Stored<Group>> {
        self.groups.get(&id)
    }

    pub fn guests(&self) -> impl Iterator<Item = &Guest> {
        self.guests.values().map(|stored| &stored.value)
    }

    pub fn groups(&self) -> impl Iterator<Item = &Group> {
        self.groups.values().map(|stored| &stored.value)
    }

    pub fn memberships(&self) -> impl Iterator<Item = &Membership> {
        self.memberships.keys()
    }

    pub fn guest_count(&self) -> usize {
        self.guests.len()
    }

    pub fn group_count(&self) -> usize {
        self.groups.len()
    }

    pub fn contains(&self, entity: EntityRef) -> bool {
        match entity {
            EntityRef::Guest(id) => self.guests.contains_key(&id),
            EntityRef::Group(id) => self.groups.contains_key(&id),
        }
    }

    pub fn contains_membership(&self, pair: Membership) -> bool {
        self.memberships.contains_key(&pair)
    }

    /// `None` when the pair is absent, otherwise its last-applied timestamp.
    pub fn membership_entry(&self, pair: Membership) -> Option<Option<Timestamp>> {
        self.memberships.get(&pair).copied()
    }

    /// Last-applied server timestamp for any key, if present and confirmed.
    pub fn last_applied(&self, key: EntityKey) -> Option<Timestamp> {
        match key {
            EntityKey::Guest(id) => self.guests.get(&id).and_then(|stored| stored.last_applied),
            EntityKey::Group(id) => self.groups.get(&id).and_then(|stored| stored.last_applied),
            EntityKey::Membership(pair) => self.memberships.get(&pair).copied().flatten(),
        }
    }

    pub fn groups_of(&self, guest_id: GuestId) -> Vec<GroupId> {
        let first = Membership::new(guest_id, Uuid::nil());
        let last = Membership::new(guest_id, Uuid::from_u128(u128::MAX));
        self.memberships
            .range(first..=last)
            .map(|(pair, _)| pair.group_id)
            .collect()
    }

    pub fn members_of(&self, group_id: GroupId) -> Vec<GuestId> {
        self.memberships
            .keys()
            .filter(|pair| pair.group_id == group_id)
            .map(|pair| pair.guest_id)
            .collect()
    }

    /// Every association mentioning `entity`.
    pub fn memberships_of(&self, entity: EntityRef) -> Vec<Membership> {
        match entity {
            EntityRef::Guest(guest_id) => self
                .groups_of(guest_id)
                .into_iter()
                .map(|group_id| Membership::new(guest_id, group_id))
                .collect(),
            EntityRef::Group(group_id) => self
                .members_of(group_id)
                .into_iter()
                .map(|guest_id| Membership::new(guest_id, group_id))
                .collect(),
        }
    }

    /// Group whose trimmed name equals the trimmed `name`, case-sensitively.
    pub fn find_group_by_name(&self, name: &str) -> Option<&Group> {
        let key = name.trim();
        self.groups().find(|group| group.name_key() == key)
    }

    /// Inserts or fully replaces a guest.
    pub fn upsert_guest(&mut self, guest: Guest, last_applied: Option<Timestamp>) -> StoreResult<()> {
        guest.validate()?;
        self.guests.insert(
            guest.id,
            Stored {
                value: guest,
                last_applied,
            },
        );
        self.bump();
        Ok(())
    }

    /// Inserts or fully replaces a group.
    ///
    /// # Errors
    /// - `Conflict` when another group already uses the trimmed name.
    pub fn upsert_group(&mut self, group: Group, last_applied: Option<Timestamp>) -> StoreResult<()> {
        group.validate()?;
        if let Some(existing) = self
            .groups()
            .find(|other| other.id != group.id && other.name_key() == group.name_key())
        {
            return Err(StoreError::Conflict {
                name: group.name_key().to_string(),
                existing: existing.id,
            });
        }
        self.groups.insert(
            group.id,
            Stored {
                value: group,
                last_applied,
            },
        );
        self.bump();
        Ok(())
    }

    /// Removes an unlinked guest.
    pub fn remove_guest(&mut self, id: GuestId) -> StoreResult<Stored<Guest>> {
        self.ensure_unlinked(EntityRef::Guest(id))?;
        let removed = self
            .guests
            .remove(&id)
            .ok_or(StoreError::NotFound(EntityKey::Guest(id)))?;
        self.bump();
        Ok(removed)
    }

    /// Removes an unlinked group.
    pub fn remove_group(&mut self, id: GroupId) -> StoreResult<Stored<Group>> {
        self.ensure_unlinked(EntityRef::Group(id))?;
        let removed = self
            .groups
            .remove(&id)
            .ok_or(StoreError::NotFound(EntityKey::Group(id)))?;
        self.bump();
        Ok(removed)
    }

    /// Adds an association, or refreshes its last-applied timestamp when it
    /// already exists.
    ///
    /// # Errors
    /// - `NotFound` when either endpoint is missing.
    pub fn link(&mut self, pair: Membership, last_applied: Option<Timestamp>) -> StoreResult<()> {
        if !self.guests.contains_key(&pair.guest_id) {
            return Err(StoreError::NotFound(EntityKey::Guest(pair.guest_id)));
        }
        if !self.groups.contains_key(&pair.group_id) {
            return Err(StoreError::NotFound(EntityKey::Group(pair.group_id)));
        }
        self.memberships.insert(pair, last_applied);
        self.bump();
        Ok(())
    }

    /// Removes an association and returns its last-applied timestamp.
    pub fn unlink(&mut self, pair: Membership) -> StoreResult<Option<Timestamp>> {
        let removed = self
            .memberships
            .remove(&pair)
            .ok_or(StoreError::NotFound(EntityKey::Membership(pair)))?;
        self.bump();
        Ok(removed)
    }

    /// Deletes an entity and every association mentioning it in one step.
    pub fn remove_cascading(&mut self, entity: EntityRef) -> StoreResult<CascadeRemoval> {
        if !self.contains(entity) {
            return Err(StoreError::NotFound(entity.into()));
        }
        let memberships = self.memberships_of(entity);
        for pair in &memberships {
            self.memberships.remove(pair);
        }
        match entity {
            EntityRef::Guest(id) => {
                self.guests.remove(&id);
            }
            EntityRef::Group(id) => {
                self.groups.remove(&id);
            }
        }
        self.bump();
        debug!(
            "event=store_cascade module=store status=ok entity={} memberships_removed={}",
            entity,
            memberships.len()
        );
        Ok(CascadeRemoval {
            entity,
            memberships,
        })
    }

    /// Records the server timestamp a present key was reconciled at.
    pub fn mark_applied(&mut self, key: EntityKey, ts: Timestamp) -> StoreResult<()> {
        self.set_applied(key, Some(ts))
    }

    /// Forgets the reconcile timestamp of a present key, so the next remote
    /// row for it is accepted whatever its timestamp.
    pub fn clear_applied(&mut self, key: EntityKey) -> StoreResult<()> {
        self.set_applied(key, None)
    }

    fn set_applied(&mut self, key: EntityKey, ts: Option<Timestamp>) -> StoreResult<()> {
        let slot = match key {
            EntityKey::Guest(id) => self.guests.get_mut(&id).map(|stored| &mut stored.last_applied),
            EntityKey::Group(id) => self.groups.get_mut(&id).map(|stored| &mut stored.last_applied),
            EntityKey::Membership(pair) => self.memberships.get_mut(&pair),
        };
        let slot = slot.ok_or(StoreError::NotFound(key))?;
        *slot = ts;
        self.bump();
        Ok(())
    }

    pub fn snapshot(&self) -> RosterSnapshot {
        RosterSnapshot {
            guests: self.guests.clone(),
            groups: self.groups.clone(),
            memberships: self.memberships.clone(),
        }
    }

    fn ensure_unlinked(&self, entity: EntityRef) -> StoreResult<()> {
        let count = self
            .memberships
            .keys()
            .filter(|pair| pair.mentions(entity))
            .count();
        if count > 0 {
            return Err(StoreError::StillLinked { entity, count });
        }
        Ok(())
    }

    fn bump(&mut self) {
        self.version += 1;
    }
}
