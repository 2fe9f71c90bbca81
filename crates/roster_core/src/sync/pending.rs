use crate::feed::RemoteChange;
use crate::model::{EntityKey, EntityRef, Group, Guest, Membership, Timestamp};
use crate::store::{EntityStore, StoreError, Stored};
use log::warn;
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::fmt::{Display, Formatter};
use std::time::Instant;

/// Identity of one local mutation and of the backend request carrying it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MutationId(pub u64);

impl Display for MutationId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "m{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Prior {
    Guest(Option<Stored<Guest>>),
    Group(Option<Stored<Group>>),
    Membership(Option<Option<Timestamp>>),
}

/// Pre-mutation state of every key a mutation touches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct KeySnapshot {
    entries: Vec<(EntityKey, Prior)>,
}

impl KeySnapshot {
    pub(crate) fn capture(store: &EntityStore, keys: &BTreeSet<EntityKey>) -> Self {
        let entries = keys
            .iter()
            .map(|key| {
                let prior = match *key {
                    EntityKey::Guest(id) => Prior::Guest(store.guest_entry(id).cloned()),
                    EntityKey::Group(id) => Prior::Group(store.group_entry(id).cloned()),
                    EntityKey::Membership(pair) => {
                        Prior::Membership(store.membership_entry(pair))
                    }
                };
                (*key, prior)
            })
            .collect();
        Self { entries }
    }

    /// Puts every captured key back to its captured state.
    ///
    /// Removals run before re-inserts so that entities come back before the
    /// associations that reference them. A captured association whose
    /// endpoint has meanwhile been deleted remotely is not restored, and a
    /// group whose old name was taken meanwhile keeps its current state with
    /// no reconcile timestamp; both are returned as skipped.
    pub(crate) fn restore(self, store: &mut EntityStore) -> Vec<EntityKey> {
        let mut skipped = Vec::new();

        for (key, prior) in &self.entries {
            if let (EntityKey::Membership(pair), Prior::Membership(None)) = (key, prior) {
                if store.contains_membership(*pair) {
                    let _ = store.unlink(*pair);
                }
            }
        }
        for (key, prior) in &self.entries {
            let entity = match (key, prior) {
                (EntityKey::Guest(id), Prior::Guest(None)) => EntityRef::Guest(*id),
                (EntityKey::Group(id), Prior::Group(None)) => EntityRef::Group(*id),
                _ => continue,
            };
            if store.contains(entity) {
                let _ = store.remove_cascading(entity);
            }
        }
        for (key, prior) in &self.entries {
            let result = match prior {
                Prior::Group(Some(stored)) => {
                    if store.group_entry(stored.value.id) == Some(stored) {
                        continue;
                    }
                    store.upsert_group(stored.value.clone(), stored.last_applied)
                }
                Prior::Guest(Some(stored)) => {
                    if store.guest_entry(stored.value.id) == Some(stored) {
                        continue;
                    }
                    store.upsert_guest(stored.value.clone(), stored.last_applied)
                }
                _ => continue,
            };
            if let Err(err) = result {
                warn!(
                    "event=rollback_restore module=sync status=skipped key={} error={}",
                    key, err
                );
                // The kept value was never confirmed; let the next remote row replace it.
                let _ = store.clear_applied(*key);
                skipped.push(*key);
            }
        }
        for (key, prior) in &self.entries {
            if let (EntityKey::Membership(pair), Prior::Membership(Some(last_applied))) =
                (key, prior)
            {
                if store.membership_entry(*pair) == Some(*last_applied) {
                    continue;
                }
                if let Err(StoreError::NotFound(missing)) = store.link(*pair, *last_applied) {
                    warn!(
                        "event=rollback_restore module=sync status=skipped key={} missing={}",
                        key, missing
                    );
                    skipped.push(*key);
                }
            }
        }
        skipped
    }
}

/// One applied-but-unconfirmed local mutation.
#[derive(Debug)]
pub(crate) struct PendingMutation {
    pub id: MutationId,
    pub name: &'static str,
    pub keys: BTreeSet<EntityKey>,
    pub snapshot: KeySnapshot,
    /// Rows this mutation wrote; stamped with the server timestamp on confirm.
    pub written: Vec<EntityRef>,
    /// Subset of `written` created by this mutation.
    pub created: Vec<EntityRef>,
    /// Entities this mutation deleted; tombstoned on confirm.
    pub removed: Vec<EntityRef>,
    /// Associations this mutation removed on their own.
    pub unlinked: Vec<Membership>,
    pub issued_at: Instant,
    /// Single-key field update that a newer edit may replace.
    pub supersedable: bool,
}

/// In-flight mutations, key ownership and remote changes waiting on them.
#[derive(Debug, Default)]
pub(crate) struct PendingLedger {
    pending: BTreeMap<MutationId, PendingMutation>,
    owners: HashMap<EntityKey, MutationId>,
    buffered: VecDeque<RemoteChange>,
    /// Mutations resolved locally (superseded, timed out) whose backend
    /// completion may still arrive, with the instant they were given up.
    abandoned: HashMap<MutationId, Instant>,
}

impl PendingLedger {
    pub(crate) fn is_pending(&self, key: &EntityKey) -> bool {
        self.owners.contains_key(key)
    }

    pub(crate) fn owner(&self, key: &EntityKey) -> Option<&PendingMutation> {
        self.owners.get(key).and_then(|id| self.pending.get(id))
    }

    /// Whether `change` must wait for an in-flight mutation.
    ///
    /// An entity delete also waits on pending associations of that entity,
    /// since its cascade would remove them.
    pub(crate) fn blocks(&self, change: &RemoteChange) -> bool {
        if self.is_pending(&change.key()) {
            return true;
        }
        let Some(entity) = change.removed_entity() else {
            return false;
        };
        self.owners
            .keys()
            .any(|key| matches!(key, EntityKey::Membership(pair) if pair.mentions(entity)))
    }

    pub(crate) fn any_pending(&self, keys: &BTreeSet<EntityKey>) -> bool {
        keys.iter().any(|key| self.is_pending(key))
    }

    pub(crate) fn len(&self) -> usize {
        self.pending.len()
    }

    pub(crate) fn buffered_len(&self) -> usize {
        self.buffered.len()
    }

    pub(crate) fn insert(&mut self, mutation: PendingMutation) {
        for key in &mutation.keys {
            self.owners.insert(*key, mutation.id);
        }
        self.pending.insert(mutation.id, mutation);
    }

    /// Releases the mutation's keys and hands it back.
    pub(crate) fn take(&mut self, id: MutationId) -> Option<PendingMutation> {
        let mutation = self.pending.remove(&id)?;
        for key in &mutation.keys {
            if self.owners.get(key) == Some(&id) {
                self.owners.remove(key);
            }
        }
        Some(mutation)
    }

    pub(crate) fn abandon(&mut self, id: MutationId, at: Instant) {
        self.abandoned.insert(id, at);
    }

    /// Forgets an abandoned id; returns whether it was abandoned.
    pub(crate) fn settle_abandoned(&mut self, id: MutationId) -> bool {
        self.abandoned.remove(&id).is_some()
    }

    /// Drops abandoned ids given up before `cutoff`. A completion arriving
    /// for one of them afterwards is ignored as unknown.
    pub(crate) fn prune_abandoned(&mut self, cutoff: Instant) -> usize {
        let before = self.abandoned.len();
        self.abandoned.retain(|_, at| *at >= cutoff);
        before - self.abandoned.len()
    }

    /// Ids of mutations issued strictly before `cutoff`, oldest first.
    pub(crate) fn issued_before(&self, cutoff: Instant) -> Vec<MutationId> {
        self.pending
            .values()
            .filter(|mutation| mutation.issued_at < cutoff)
            .map(|mutation| mutation.id)
            .collect()
    }

    pub(crate) fn buffer(&mut self, change: RemoteChange) {
        self.buffered.push_back(change);
    }

    /// Removes and returns, in arrival order, buffered changes whose key is
    /// no longer owned.
    pub(crate) fn take_released(&mut self) -> Vec<RemoteChange> {
        let mut released = Vec::new();
        let mut kept = VecDeque::with_capacity(self.buffered.len());
        while let Some(change) = self.buffered.pop_front() {
            if self.blocks(&change) {
                kept.push_back(change);
            } else {
                released.push(change);
            }
        }
        self.buffered = kept;
        released
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::RemoteKind;
    use crate::sync::{Disposition, Reconciler};
    use crate::model::{GroupType, NewGroup, NewGuest, Side};
    use std::time::Duration;
    use uuid::Uuid;

    fn seeded_store() -> (EntityStore, Guest, Group) {
        let mut store = EntityStore::new();
        let guest = NewGuest::new("Ana", "Silva", Side::Bride).into_guest(Uuid::new_v4(), 1);
        let group = NewGroup::new("Silvas", GroupType::Family).to_group(Uuid::new_v4(), 1);
        store.upsert_guest(guest.clone(), Some(10)).unwrap();
        store.upsert_group(group.clone(), Some(11)).unwrap();
        store
            .link(Membership::new(guest.id, group.id), Some(12))
            .unwrap();
        (store, guest, group)
    }

    #[test]
    fn restore_undoes_cascade_delete_exactly() {
        let (mut store, guest, group) = seeded_store();
        let before = store.snapshot();
        let keys = BTreeSet::from([
            EntityKey::Guest(guest.id),
            EntityKey::Membership(Membership::new(guest.id, group.id)),
        ]);
        let snapshot = KeySnapshot::capture(&store, &keys);

        store.remove_cascading(EntityRef::Guest(guest.id)).unwrap();
        assert!(snapshot.restore(&mut store).is_empty());
        assert_eq!(store.snapshot(), before);
    }

    #[test]
    fn restore_removes_optimistically_created_entities() {
        let (mut store, _, group) = seeded_store();
        let before = store.snapshot();
        let new_guest = NewGuest::new("Ben", "Silva", Side::Groom).into_guest(Uuid::new_v4(), 2);
        let pair = Membership::new(new_guest.id, group.id);
        let keys = BTreeSet::from([EntityKey::Guest(new_guest.id), EntityKey::Membership(pair)]);
        let snapshot = KeySnapshot::capture(&store, &keys);

        store.upsert_guest(new_guest, None).unwrap();
        store.link(pair, None).unwrap();
        snapshot.restore(&mut store);
        assert_eq!(store.snapshot(), before);
    }

    #[test]
    fn restore_skips_association_with_deleted_endpoint() {
        let (mut store, guest, group) = seeded_store();
        let pair = Membership::new(guest.id, group.id);
        let keys = BTreeSet::from([EntityKey::Guest(guest.id), EntityKey::Membership(pair)]);
        let snapshot = KeySnapshot::capture(&store, &keys);

        store.unlink(pair).unwrap();
        store.remove_cascading(EntityRef::Group(group.id)).unwrap();
        let skipped = snapshot.restore(&mut store);
        assert_eq!(skipped, vec![EntityKey::Membership(pair)]);
        assert!(store.get_guest(guest.id).is_some());
        assert!(!store.contains_membership(pair));
    }

    #[test]
    fn released_changes_keep_arrival_order() {
        let mut ledger = PendingLedger::default();
        let owned = Uuid::new_v4();
        let free = Uuid::new_v4();
        ledger.insert(PendingMutation {
            id: MutationId(1),
            name: "delete_guest",
            keys: BTreeSet::from([EntityKey::Guest(owned)]),
            snapshot: KeySnapshot { entries: vec![] },
            written: vec![],
            created: vec![],
            removed: vec![],
            unlinked: vec![],
            issued_at: Instant::now(),
            supersedable: false,
        });
        for (ts, id) in [(1, owned), (2, free), (3, owned)] {
            ledger.buffer(RemoteChange {
                server_ts: ts,
                kind: RemoteKind::RemoveGuest(id),
            });
        }

        let released = ledger.take_released();
        assert_eq!(released.len(), 1);
        assert_eq!(released[0].server_ts, 2);

        ledger.take(MutationId(1)).unwrap();
        let released = ledger.take_released();
        let order: Vec<_> = released.iter().map(|change| change.server_ts).collect();
        assert_eq!(order, vec![1, 3]);
        assert_eq!(ledger.buffered_len(), 0);
    }

    #[test]
    fn old_abandoned_ids_are_pruned() {
        let mut ledger = PendingLedger::default();
        let start = Instant::now();
        let later = start + Duration::from_secs(10);
        ledger.abandon(MutationId(1), start);
        ledger.abandon(MutationId(2), later);

        assert_eq!(ledger.prune_abandoned(start + Duration::from_secs(5)), 1);
        assert!(!ledger.settle_abandoned(MutationId(1)));
        assert!(ledger.settle_abandoned(MutationId(2)));
        assert_eq!(ledger.prune_abandoned(later), 0);
    }

    #[test]
    fn restore_blocked_by_name_clash_forgets_reconcile_timestamp() {
        let (mut store, _, group) = seeded_store();
        let key = EntityKey::Group(group.id);
        let snapshot = KeySnapshot::capture(&store, &BTreeSet::from([key]));

        let mut renamed = group.clone();
        renamed.name = "Costas".to_string();
        store.upsert_group(renamed.clone(), Some(11)).unwrap();
        let other = NewGroup::new("Silvas", GroupType::Family).to_group(Uuid::new_v4(), 2);
        store.upsert_group(other, Some(13)).unwrap();

        assert_eq!(snapshot.restore(&mut store), vec![key]);
        assert_eq!(store.get_group(group.id), Some(&renamed));
        assert_eq!(store.last_applied(key), None);

        let mut remote = group.clone();
        remote.name = "Costa Family".to_string();
        let change = RemoteChange {
            server_ts: 5,
            kind: RemoteKind::UpsertGroup(remote.clone()),
        };
        assert_eq!(
            Reconciler::new().reconcile(&mut store, change),
            Disposition::Applied
        );
        assert_eq!(store.get_group(group.id), Some(&remote));
    }
}
