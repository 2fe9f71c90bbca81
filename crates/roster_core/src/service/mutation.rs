//! Local mutations: the keys they touch and their optimistic effect.

use crate::backend::PersistOp;
use crate::error::{SyncError, SyncResult};
use crate::model::{
    now_ms, EntityKey, EntityRef, Group, GroupId, GroupPatch, Guest, GuestId, GuestPatch,
    Membership,
};
use crate::store::{EntityStore, StoreError};
use std::collections::BTreeSet;

/// One validated local operation waiting to be applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Mutation {
    CreateGuest {
        guest: Guest,
        group_ids: Vec<GroupId>,
    },
    UpdateGuest {
        id: GuestId,
        patch: GuestPatch,
    },
    DeleteGuest {
        id: GuestId,
    },
    CreateGroup {
        group: Group,
        new_guests: Vec<Guest>,
        existing_ids: Vec<GuestId>,
    },
    UpdateGroup {
        id: GroupId,
        patch: GroupPatch,
    },
    DeleteGroup {
        id: GroupId,
    },
    AddGuestToGroups {
        guest_id: GuestId,
        group_ids: Vec<GroupId>,
    },
    RemoveGuestFromGroup {
        pair: Membership,
    },
}

/// Result of an optimistic apply.
#[derive(Debug)]
pub(crate) struct Applied {
    pub op: PersistOp,
    pub written: Vec<EntityRef>,
    pub created: Vec<EntityRef>,
    pub removed: Vec<EntityRef>,
    pub unlinked: Vec<Membership>,
}

impl Applied {
    fn new(op: PersistOp) -> Self {
        Self {
            op,
            written: Vec::new(),
            created: Vec::new(),
            removed: Vec::new(),
            unlinked: Vec::new(),
        }
    }
}

impl Mutation {
    pub(crate) fn name(&self) -> &'static str {
        match self {
            Self::CreateGuest { .. } => "create_guest",
            Self::UpdateGuest { .. } => "update_guest",
            Self::DeleteGuest { .. } => "delete_guest",
            Self::CreateGroup { .. } => "create_group",
            Self::UpdateGroup { .. } => "update_group",
            Self::DeleteGroup { .. } => "delete_group",
            Self::AddGuestToGroups { .. } => "add_guest_to_groups",
            Self::RemoveGuestFromGroup { .. } => "remove_guest_from_group",
        }
    }

    /// Field updates on one entity; a newer edit may replace them in flight.
    pub(crate) fn is_supersedable(&self) -> bool {
        matches!(self, Self::UpdateGuest { .. } | Self::UpdateGroup { .. })
    }

    /// Entities this mutation brings into existence.
    pub(crate) fn created(&self) -> Vec<EntityRef> {
        match self {
            Self::CreateGuest { guest, .. } => vec![EntityRef::Guest(guest.id)],
            Self::CreateGroup {
                group, new_guests, ..
            } => std::iter::once(EntityRef::Group(group.id))
                .chain(new_guests.iter().map(|guest| EntityRef::Guest(guest.id)))
                .collect(),
            _ => Vec::new(),
        }
    }

    /// Every key the mutation reads or writes, against the current store.
    ///
    /// Deletes include the entity's current associations, since the cascade
    /// removes them.
    pub(crate) fn keys(&self, store: &EntityStore) -> BTreeSet<EntityKey> {
        let mut keys = BTreeSet::new();
        match self {
            Self::CreateGuest { guest, group_ids } => {
                keys.insert(EntityKey::Guest(guest.id));
                keys.extend(
                    group_ids
                        .iter()
                        .map(|group_id| EntityKey::Membership(Membership::new(guest.id, *group_id))),
                );
            }
            Self::UpdateGuest { id, .. } => {
                keys.insert(EntityKey::Guest(*id));
            }
            Self::DeleteGuest { id } => {
                keys.insert(EntityKey::Guest(*id));
                keys.extend(
                    store
                        .memberships_of(EntityRef::Guest(*id))
                        .into_iter()
                        .map(EntityKey::Membership),
                );
            }
            Self::CreateGroup {
                group,
                new_guests,
                existing_ids,
            } => {
                keys.insert(EntityKey::Group(group.id));
                for guest in new_guests {
                    keys.insert(EntityKey::Guest(guest.id));
                }
                for guest_id in existing_ids
                    .iter()
                    .chain(new_guests.iter().map(|guest| &guest.id))
                {
                    keys.insert(EntityKey::Membership(Membership::new(*guest_id, group.id)));
                }
            }
            Self::UpdateGroup { id, .. } => {
                keys.insert(EntityKey::Group(*id));
            }
            Self::DeleteGroup { id } => {
                keys.insert(EntityKey::Group(*id));
                keys.extend(
                    store
                        .memberships_of(EntityRef::Group(*id))
                        .into_iter()
                        .map(EntityKey::Membership),
                );
            }
            Self::AddGuestToGroups {
                guest_id,
                group_ids,
            } => {
                keys.insert(EntityKey::Guest(*guest_id));
                keys.extend(
                    group_ids
                        .iter()
                        .map(|group_id| EntityKey::Membership(Membership::new(*guest_id, *group_id))),
                );
            }
            Self::RemoveGuestFromGroup { pair } => {
                keys.insert(EntityKey::Guest(pair.guest_id));
                keys.insert(EntityKey::Membership(*pair));
            }
        }
        keys
    }

    /// Checks existence and uniqueness, then writes the optimistic result.
    ///
    /// Every check runs before the first write, so an error leaves the store
    /// untouched.
    pub(crate) fn apply(self, store: &mut EntityStore) -> SyncResult<Applied> {
        match self {
            Self::CreateGuest { guest, group_ids } => {
                for group_id in &group_ids {
                    require(store, EntityRef::Group(*group_id))?;
                }
                let id = guest.id;
                store.upsert_guest(guest.clone(), None).map_err(store_error)?;
                for group_id in &group_ids {
                    store
                        .link(Membership::new(id, *group_id), None)
                        .map_err(store_error)?;
                }
                let mut applied = Applied::new(PersistOp::CreateGuest { guest, group_ids });
                applied.written.push(EntityRef::Guest(id));
                applied.created.push(EntityRef::Guest(id));
                Ok(applied)
            }
            Self::UpdateGuest { id, patch } => {
                let current = store
                    .guest_entry(id)
                    .ok_or(SyncError::NotFound(EntityKey::Guest(id)))?;
                let next = patch.apply_to(&current.value, now_ms());
                let last_applied = current.last_applied;
                store.upsert_guest(next, last_applied).map_err(store_error)?;
                let mut applied = Applied::new(PersistOp::UpdateGuest { id, patch });
                applied.written.push(EntityRef::Guest(id));
                Ok(applied)
            }
            Self::DeleteGuest { id } => {
                let entity = EntityRef::Guest(id);
                store.remove_cascading(entity).map_err(store_error)?;
                let mut applied = Applied::new(PersistOp::DeleteGuest { id });
                applied.removed.push(entity);
                Ok(applied)
            }
            Self::CreateGroup {
                group,
                new_guests,
                existing_ids,
            } => {
                if let Some(existing) = store.find_group_by_name(group.name_key()) {
                    return Err(SyncError::Conflict(format!(
                        "group name `{}` is already used by group {}",
                        group.name_key(),
                        existing.id
                    )));
                }
                for guest_id in &existing_ids {
                    require(store, EntityRef::Guest(*guest_id))?;
                }
                store.upsert_group(group.clone(), None).map_err(store_error)?;
                for guest in &new_guests {
                    store.upsert_guest(guest.clone(), None).map_err(store_error)?;
                }
                let member_ids: Vec<GuestId> = existing_ids
                    .iter()
                    .copied()
                    .chain(new_guests.iter().map(|guest| guest.id))
                    .collect();
                for guest_id in &member_ids {
                    store
                        .link(Membership::new(*guest_id, group.id), None)
                        .map_err(store_error)?;
                }

                let created: Vec<EntityRef> = std::iter::once(EntityRef::Group(group.id))
                    .chain(new_guests.iter().map(|guest| EntityRef::Guest(guest.id)))
                    .collect();
                let mut applied = Applied::new(PersistOp::CreateGroup {
                    group,
                    new_guests,
                    member_ids,
                });
                applied.written = created.clone();
                applied.created = created;
                Ok(applied)
            }
            Self::UpdateGroup { id, patch } => {
                let current = store
                    .group_entry(id)
                    .ok_or(SyncError::NotFound(EntityKey::Group(id)))?;
                let next = patch.apply_to(&current.value, now_ms());
                let last_applied = current.last_applied;
                store.upsert_group(next, last_applied).map_err(store_error)?;
                let mut applied = Applied::new(PersistOp::UpdateGroup { id, patch });
                applied.written.push(EntityRef::Group(id));
                Ok(applied)
            }
            Self::DeleteGroup { id } => {
                let entity = EntityRef::Group(id);
                store.remove_cascading(entity).map_err(store_error)?;
                let mut applied = Applied::new(PersistOp::DeleteGroup { id });
                applied.removed.push(entity);
                Ok(applied)
            }
            Self::AddGuestToGroups {
                guest_id,
                group_ids,
            } => {
                require(store, EntityRef::Guest(guest_id))?;
                for group_id in &group_ids {
                    require(store, EntityRef::Group(*group_id))?;
                }
                for group_id in &group_ids {
                    let pair = Membership::new(guest_id, *group_id);
                    if !store.contains_membership(pair) {
                        store.link(pair, None).map_err(store_error)?;
                    }
                }
                Ok(Applied::new(PersistOp::LinkGuest {
                    guest_id,
                    group_ids,
                }))
            }
            Self::RemoveGuestFromGroup { pair } => {
                require(store, EntityRef::Guest(pair.guest_id))?;
                store.unlink(pair).map_err(store_error)?;
                let mut applied = Applied::new(PersistOp::UnlinkGuest { pair });
                applied.unlinked.push(pair);
                Ok(applied)
            }
        }
    }
}

fn require(store: &EntityStore, entity: EntityRef) -> SyncResult<()> {
    if store.contains(entity) {
        Ok(())
    } else {
        Err(SyncError::NotFound(entity.into()))
    }
}

pub(crate) fn store_error(err: StoreError) -> SyncError {
    match err {
        StoreError::NotFound(key) => SyncError::NotFound(key),
        StoreError::Conflict { name, existing } => SyncError::Conflict(format!(
            "group name `{name}` is already used by group {existing}"
        )),
        StoreError::Invalid(err) => SyncError::Validation(err),
        StoreError::StillLinked { entity, count } => {
            SyncError::Conflict(format!("{entity} still has {count} association(s)"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{GroupType, NewGroup, NewGuest, Side};
    use uuid::Uuid;

    fn seeded() -> (EntityStore, Guest, Group) {
        let mut store = EntityStore::new();
        let ana = NewGuest::new("Ana", "Silva", Side::Bride).into_guest(Uuid::new_v4(), 1);
        let silvas = NewGroup::new("Silvas", GroupType::Family).to_group(Uuid::new_v4(), 1);
        store.upsert_guest(ana.clone(), Some(1)).unwrap();
        store.upsert_group(silvas.clone(), Some(1)).unwrap();
        store.link(Membership::new(ana.id, silvas.id), Some(1)).unwrap();
        (store, ana, silvas)
    }

    #[test]
    fn delete_keys_cover_current_memberships() {
        let (store, ana, silvas) = seeded();
        let keys = Mutation::DeleteGroup { id: silvas.id }.keys(&store);
        assert_eq!(
            keys,
            BTreeSet::from([
                EntityKey::Group(silvas.id),
                EntityKey::Membership(Membership::new(ana.id, silvas.id)),
            ])
        );
    }

    #[test]
    fn create_group_with_taken_name_writes_nothing() {
        let (mut store, ana, _) = seeded();
        let version = store.version();
        let clash = NewGroup::new(" Silvas", GroupType::Couple);
        let mutation = Mutation::CreateGroup {
            group: clash.to_group(Uuid::new_v4(), 2),
            new_guests: vec![NewGuest::new("Ben", "Silva", Side::Groom).into_guest(Uuid::new_v4(), 2)],
            existing_ids: vec![ana.id],
        };
        assert!(matches!(mutation.apply(&mut store), Err(SyncError::Conflict(_))));
        assert_eq!(store.version(), version);
        assert_eq!(store.guest_count(), 1);
    }

    #[test]
    fn removing_last_group_leaves_solo_guest() {
        let (mut store, ana, silvas) = seeded();
        let pair = Membership::new(ana.id, silvas.id);
        let applied = Mutation::RemoveGuestFromGroup { pair }
            .apply(&mut store)
            .unwrap();
        assert_eq!(applied.unlinked, vec![pair]);
        assert!(store.groups_of(ana.id).is_empty());
        assert!(store.get_guest(ana.id).is_some());
    }

    #[test]
    fn add_to_unknown_group_is_not_found() {
        let (mut store, ana, _) = seeded();
        let missing = Uuid::new_v4();
        let result = Mutation::AddGuestToGroups {
            guest_id: ana.id,
            group_ids: vec![missing],
        }
        .apply(&mut store);
        assert_eq!(
            result.map(|_| ()),
            Err(SyncError::NotFound(EntityKey::Group(missing)))
        );
    }
}
