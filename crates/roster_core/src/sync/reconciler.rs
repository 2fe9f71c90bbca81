use crate::feed::{RemoteChange, RemoteKind};
use crate::model::{EntityKey, EntityRef, Membership, Timestamp};
use crate::store::{EntityStore, StoreError};
use log::{debug, warn};
use std::collections::HashMap;

/// What happened to one remote change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Written to the store.
    Applied,
    /// Older than the local last-applied timestamp; discarded.
    Stale,
    /// Refers to a deleted id; discarded.
    Tombstoned,
    /// Cannot apply yet (missing endpoint, name collision); retried later.
    Parked,
    /// Nothing to do, e.g. a delete for an unknown id.
    Unchanged,
    /// Held back until the in-flight local mutation on its key resolves.
    Buffered,
    /// Repeated delivery of an already seen event.
    Duplicate,
}

impl Disposition {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Applied => "applied",
            Self::Stale => "stale",
            Self::Tombstoned => "tombstoned",
            Self::Parked => "parked",
            Self::Unchanged => "unchanged",
            Self::Buffered => "buffered",
            Self::Duplicate => "duplicate",
        }
    }
}

/// Last-write-wins reconciliation of remote changes into the store.
#[derive(Debug, Default)]
pub struct Reconciler {
    tombstones: HashMap<EntityRef, Timestamp>,
    unlinked: HashMap<Membership, Timestamp>,
    parked: Vec<RemoteChange>,
}

impl Reconciler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies `change` unless something newer already won.
    ///
    /// Equal timestamps resolve in favour of the remote change.
    pub fn reconcile(&mut self, store: &mut EntityStore, change: RemoteChange) -> Disposition {
        let key = change.key();
        let ts = change.server_ts;
        let disposition = match change.kind {
            RemoteKind::UpsertGuest(ref guest) => {
                if self.is_tombstoned(EntityRef::Guest(guest.id)) {
                    Disposition::Tombstoned
                } else if is_stale(store, key, ts) {
                    Disposition::Stale
                } else {
                    match store.upsert_guest(guest.clone(), Some(ts)) {
                        Ok(()) => Disposition::Applied,
                        Err(err) => unapplied(key, &err),
                    }
                }
            }
            RemoteKind::UpsertGroup(ref group) => {
                if self.is_tombstoned(EntityRef::Group(group.id)) {
                    Disposition::Tombstoned
                } else if is_stale(store, key, ts) {
                    Disposition::Stale
                } else {
                    match store.upsert_group(group.clone(), Some(ts)) {
                        Ok(()) => Disposition::Applied,
                        Err(StoreError::Conflict { .. }) => {
                            self.park(change.clone());
                            Disposition::Parked
                        }
                        Err(err) => unapplied(key, &err),
                    }
                }
            }
            RemoteKind::Link(pair) => {
                if self.is_tombstoned(EntityRef::Guest(pair.guest_id))
                    || self.is_tombstoned(EntityRef::Group(pair.group_id))
                {
                    Disposition::Tombstoned
                } else if self.unlinked.get(&pair).is_some_and(|&removed| ts <= removed)
                    || is_stale(store, key, ts)
                {
                    Disposition::Stale
                } else {
                    match store.link(pair, Some(ts)) {
                        Ok(()) => Disposition::Applied,
                        Err(StoreError::NotFound(_)) => {
                            self.park(change.clone());
                            Disposition::Parked
                        }
                        Err(err) => unapplied(key, &err),
                    }
                }
            }
            RemoteKind::RemoveGuest(id) => self.remove_entity(store, EntityRef::Guest(id), ts),
            RemoteKind::RemoveGroup(id) => self.remove_entity(store, EntityRef::Group(id), ts),
            RemoteKind::Unlink(pair) => {
                self.record_unlink(pair, ts);
                match store.unlink(pair) {
                    Ok(_) => Disposition::Applied,
                    Err(_) => Disposition::Unchanged,
                }
            }
        };
        debug!(
            "event=reconcile module=sync status={} key={} server_ts={}",
            disposition.as_str(),
            key,
            ts
        );
        disposition
    }

    /// Re-evaluates parked changes until none of them makes progress.
    ///
    /// Changes for which `held` returns true stay parked untouched.
    pub fn retry_parked(
        &mut self,
        store: &mut EntityStore,
        held: impl Fn(&RemoteChange) -> bool,
    ) -> usize {
        let mut applied = 0;
        loop {
            let mut progressed = false;
            for change in std::mem::take(&mut self.parked) {
                if held(&change) {
                    self.parked.push(change);
                    continue;
                }
                match self.reconcile(store, change) {
                    Disposition::Parked => {}
                    Disposition::Applied => {
                        applied += 1;
                        progressed = true;
                    }
                    _ => progressed = true,
                }
            }
            if !progressed {
                return applied;
            }
        }
    }

    /// Marks `entity` as deleted at `ts`; later writes for it are ignored.
    pub fn tombstone(&mut self, entity: EntityRef, ts: Timestamp) {
        let slot = self.tombstones.entry(entity).or_insert(ts);
        *slot = (*slot).max(ts);
        self.parked.retain(|change| !mentions(change, entity));
    }

    /// Records that `pair` was removed at `ts`.
    pub fn record_unlink(&mut self, pair: Membership, ts: Timestamp) {
        let slot = self.unlinked.entry(pair).or_insert(ts);
        *slot = (*slot).max(ts);
        self.parked.retain(|change| {
            !matches!(change.kind, RemoteKind::Link(parked) if parked == pair && change.server_ts <= ts)
        });
    }

    pub fn is_tombstoned(&self, entity: EntityRef) -> bool {
        self.tombstones.contains_key(&entity)
    }

    pub fn parked_len(&self) -> usize {
        self.parked.len()
    }

    fn park(&mut self, change: RemoteChange) {
        debug!(
            "event=reconcile_park module=sync status=parked key={} parked={}",
            change.key(),
            self.parked.len() + 1
        );
        self.parked.push(change);
    }

    fn remove_entity(
        &mut self,
        store: &mut EntityStore,
        entity: EntityRef,
        ts: Timestamp,
    ) -> Disposition {
        self.tombstone(entity, ts);
        if !store.contains(entity) {
            return Disposition::Unchanged;
        }
        match store.remove_cascading(entity) {
            Ok(removal) => {
                for pair in removal.memberships {
                    self.record_unlink(pair, ts);
                }
                Disposition::Applied
            }
            Err(err) => unapplied(entity.into(), &err),
        }
    }
}

fn is_stale(store: &EntityStore, key: EntityKey, ts: Timestamp) -> bool {
    store.last_applied(key).is_some_and(|applied| ts < applied)
}

fn mentions(change: &RemoteChange, entity: EntityRef) -> bool {
    match (&change.kind, entity) {
        (RemoteKind::Link(pair) | RemoteKind::Unlink(pair), _) => pair.mentions(entity),
        (RemoteKind::UpsertGuest(guest), EntityRef::Guest(id)) => guest.id == id,
        (RemoteKind::UpsertGroup(group), EntityRef::Group(id)) => group.id == id,
        _ => false,
    }
}

fn unapplied(key: EntityKey, err: &StoreError) -> Disposition {
    warn!(
        "event=reconcile module=sync status=error key={} error={}",
        key, err
    );
    Disposition::Unchanged
}
