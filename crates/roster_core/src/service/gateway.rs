//! Mutation gateway: the only write path for presentation code.
//!
//! # Responsibility
//! - Validate caller input before any store mutation.
//! - Apply accepted mutations optimistically and emit one persist request
//!   per mutation.
//! - Confirm or roll back each mutation when its request resolves.
//!
//! # Invariants
//! - At most one in-flight mutation owns an entity key; later mutations on
//!   the same key wait in FIFO order.
//! - A rolled-back mutation restores every key it touched to its
//!   pre-mutation state.
//! - Every mutation id yields exactly one outcome, except mutations that
//!   fail synchronously with an error return.

use super::mutation::{store_error, Mutation};
use super::outcome::{MutationOutcome, MutationStatus, MutationTicket, TicketState};
use crate::backend::{BackendResult, PersistAck, PersistRequest};
use crate::engine::RosterEngine;
use crate::error::{SyncError, SyncResult};
use crate::model::validation::check_id_list;
use crate::model::{
    now_ms, EntityKey, EntityRef, GroupId, GroupPatch, GuestId, GuestPatch, Membership, NewGroup,
    NewGuest, Timestamp,
};
use crate::store::StoreError;
use crate::sync::{KeySnapshot, MutationId, PendingMutation};
use log::{debug, info, warn};
use std::collections::BTreeSet;
use std::time::Instant;
use uuid::Uuid;

/// Mutation waiting for its keys to be released.
#[derive(Debug)]
pub(crate) struct QueuedMutation {
    id: MutationId,
    mutation: Mutation,
    keys: BTreeSet<EntityKey>,
}

impl RosterEngine {
    /// Adds a guest, optionally linked to existing groups.
    ///
    /// # Errors
    /// - `Validation` for field rule violations or a bad `group_ids` list.
    /// - `NotFound` when a group does not exist at apply time.
    pub fn create_guest(
        &mut self,
        input: NewGuest,
        group_ids: &[GroupId],
    ) -> SyncResult<MutationTicket> {
        input.validate()?;
        check_id_list("group", "group_ids", group_ids)?;
        let guest = input.into_guest(Uuid::new_v4(), now_ms());
        self.submit(Mutation::CreateGuest {
            guest,
            group_ids: group_ids.to_vec(),
        })
    }

    pub fn update_guest(&mut self, id: GuestId, patch: GuestPatch) -> SyncResult<MutationTicket> {
        patch.validate()?;
        self.submit(Mutation::UpdateGuest { id, patch })
    }

    /// Deletes a guest together with every association it has.
    pub fn delete_guest(&mut self, id: GuestId) -> SyncResult<MutationTicket> {
        self.submit(Mutation::DeleteGuest { id })
    }

    /// Creates a group, optionally with existing and new members, as one
    /// atomic mutation.
    ///
    /// # Errors
    /// - `Conflict` when another group already uses the trimmed name.
    /// - `NotFound` when an existing member id is unknown.
    pub fn create_group(&mut self, input: NewGroup) -> SyncResult<MutationTicket> {
        input.validate()?;
        let now = now_ms();
        let group = input.to_group(Uuid::new_v4(), now);
        let new_guests = input
            .new_guests
            .into_iter()
            .map(|guest| guest.into_guest(Uuid::new_v4(), now))
            .collect();
        self.submit(Mutation::CreateGroup {
            group,
            new_guests,
            existing_ids: input.existing_guest_ids,
        })
    }

    pub fn update_group(&mut self, id: GroupId, patch: GroupPatch) -> SyncResult<MutationTicket> {
        patch.validate()?;
        self.submit(Mutation::UpdateGroup { id, patch })
    }

    /// Deletes a group and its associations; member guests stay.
    pub fn delete_group(&mut self, id: GroupId) -> SyncResult<MutationTicket> {
        self.submit(Mutation::DeleteGroup { id })
    }

    /// Links a guest to groups. Groups the guest already belongs to are kept
    /// as they are.
    pub fn add_guest_to_groups(
        &mut self,
        guest_id: GuestId,
        group_ids: &[GroupId],
    ) -> SyncResult<MutationTicket> {
        check_id_list("group", "group_ids", group_ids)?;
        self.submit(Mutation::AddGuestToGroups {
            guest_id,
            group_ids: group_ids.to_vec(),
        })
    }

    /// Unlinks a guest from one group. Leaving the last group yields a solo
    /// guest, never an error.
    pub fn remove_guest_from_group(
        &mut self,
        guest_id: GuestId,
        group_id: GroupId,
    ) -> SyncResult<MutationTicket> {
        self.submit(Mutation::RemoveGuestFromGroup {
            pair: Membership::new(guest_id, group_id),
        })
    }

    /// Like `update_guest`, but replaces an in-flight update of the same
    /// guest instead of queueing behind it.
    ///
    /// The replaced mutation is reported as `Superseded` and its late
    /// completion is ignored. A rollback of the new mutation restores the
    /// optimistic state the replaced one had produced.
    pub fn replace_pending_guest_update(
        &mut self,
        id: GuestId,
        patch: GuestPatch,
    ) -> SyncResult<MutationTicket> {
        patch.validate()?;
        self.replace_pending(EntityKey::Guest(id), Mutation::UpdateGuest { id, patch })
    }

    /// Group counterpart of `replace_pending_guest_update`.
    pub fn replace_pending_group_update(
        &mut self,
        id: GroupId,
        patch: GroupPatch,
    ) -> SyncResult<MutationTicket> {
        patch.validate()?;
        self.replace_pending(EntityKey::Group(id), Mutation::UpdateGroup { id, patch })
    }

    /// Resolves an in-flight mutation with its backend result.
    ///
    /// Returns `None` for ids that are unknown or were already resolved
    /// locally (superseded, timed out).
    pub fn complete(
        &mut self,
        id: MutationId,
        result: BackendResult<PersistAck>,
    ) -> Option<MutationOutcome> {
        if self.ledger.settle_abandoned(id) {
            info!(
                "event=mutation_complete module=service status=ignored mutation={} reason=abandoned",
                id
            );
            return None;
        }
        self.outbox.retain(|request| request.id != id);
        let Some(pending) = self.ledger.take(id) else {
            warn!(
                "event=mutation_complete module=service status=ignored mutation={} reason=unknown",
                id
            );
            return None;
        };

        let status = match result {
            Ok(ack) => {
                self.confirm(&pending, ack.server_ts);
                MutationStatus::Confirmed {
                    server_ts: ack.server_ts,
                }
            }
            Err(err) => {
                let err = SyncError::from(err);
                self.roll_back(pending, &err);
                MutationStatus::Failed(err)
            }
        };
        let outcome = MutationOutcome { id, status };
        self.outcomes.push(outcome.clone());
        self.settle();
        Some(outcome)
    }

    /// Rolls back every in-flight mutation issued longer than the request
    /// timeout before `now`.
    pub fn expire_overdue(&mut self, now: Instant) -> Vec<MutationOutcome> {
        let timeout = self.settings().request_timeout();
        let Some(cutoff) = now.checked_sub(timeout) else {
            return Vec::new();
        };
        let pruned = self.ledger.prune_abandoned(cutoff);
        if pruned > 0 {
            debug!(
                "event=abandoned_prune module=service status=ok pruned={}",
                pruned
            );
        }
        let expired = self.ledger.issued_before(cutoff);
        if expired.is_empty() {
            return Vec::new();
        }

        let mut outcomes = Vec::with_capacity(expired.len());
        for id in expired {
            let Some(pending) = self.ledger.take(id) else {
                continue;
            };
            self.discard_request(id);
            let err = SyncError::BackendFailure(format!(
                "request timed out after {} ms",
                timeout.as_millis()
            ));
            self.roll_back(pending, &err);
            outcomes.push(MutationOutcome {
                id,
                status: MutationStatus::Failed(err),
            });
        }
        self.outcomes.extend(outcomes.iter().cloned());
        self.settle();
        outcomes
    }

    /// Applies queued mutations whose keys are free, in arrival order.
    pub(crate) fn drain_queue(&mut self) {
        let mut index = 0;
        while index < self.queue.len() {
            let keys = &self.queue[index].keys;
            let ready = !self.ledger.any_pending(keys)
                && !self
                    .queue
                    .iter()
                    .take(index)
                    .any(|earlier| !earlier.keys.is_disjoint(keys));
            if !ready {
                index += 1;
                continue;
            }
            let Some(entry) = self.queue.remove(index) else {
                break;
            };
            if let Err(err) = self.apply_now(entry.id, entry.mutation) {
                self.outcomes.push(MutationOutcome {
                    id: entry.id,
                    status: MutationStatus::Failed(err),
                });
            }
        }
    }

    fn submit(&mut self, mutation: Mutation) -> SyncResult<MutationTicket> {
        let keys = mutation.keys(&self.store);
        let created = mutation.created();
        let id = self.next_mutation_id();

        let blocked = self.ledger.any_pending(&keys)
            || self
                .queue
                .iter()
                .any(|queued| !queued.keys.is_disjoint(&keys));
        if blocked {
            debug!(
                "event=mutation_queue module=service status=queued mutation={} op={} queue_len={}",
                id,
                mutation.name(),
                self.queue.len() + 1
            );
            self.queue.push_back(QueuedMutation { id, mutation, keys });
            return Ok(MutationTicket {
                id,
                state: TicketState::Queued,
                created,
            });
        }

        self.apply_now(id, mutation)?;
        self.after_store_change();
        Ok(MutationTicket {
            id,
            state: TicketState::InFlight,
            created,
        })
    }

    fn replace_pending(
        &mut self,
        key: EntityKey,
        mutation: Mutation,
    ) -> SyncResult<MutationTicket> {
        let queued_behind = self.queue.iter().any(|queued| queued.keys.contains(&key));
        let replaceable = self
            .ledger
            .owner(&key)
            .filter(|pending| pending.supersedable && !queued_behind)
            .map(|pending| pending.id);
        let Some(old_id) = replaceable else {
            return self.submit(mutation);
        };

        // The new marker snapshots the replaced edit's optimistic result.
        let Some(replaced) = self.ledger.take(old_id) else {
            return self.submit(mutation);
        };
        let id = self.next_mutation_id();
        if let Err(err) = self.apply_now(id, mutation) {
            self.ledger.insert(replaced);
            return Err(err);
        }
        self.discard_request(old_id);
        self.outcomes.push(MutationOutcome {
            id: old_id,
            status: MutationStatus::Superseded { by: id },
        });
        info!(
            "event=mutation_supersede module=service status=ok mutation={} by={}",
            old_id, id
        );
        self.after_store_change();
        Ok(MutationTicket {
            id,
            state: TicketState::InFlight,
            created: Vec::new(),
        })
    }

    fn apply_now(&mut self, id: MutationId, mutation: Mutation) -> SyncResult<()> {
        let name = mutation.name();
        let supersedable = mutation.is_supersedable();
        let keys = mutation.keys(&self.store);
        let snapshot = KeySnapshot::capture(&self.store, &keys);

        let applied = match mutation.apply(&mut self.store) {
            Ok(applied) => applied,
            Err(err) => {
                warn!(
                    "event=mutation_apply module=service status=error mutation={} op={} error_code={}",
                    id,
                    name,
                    err.code()
                );
                return Err(err);
            }
        };
        info!(
            "event=mutation_apply module=service status=in_flight mutation={} op={} keys={}",
            id,
            name,
            keys.len()
        );

        self.outbox.push(PersistRequest { id, op: applied.op });
        self.ledger.insert(PendingMutation {
            id,
            name,
            keys,
            snapshot,
            written: applied.written,
            created: applied.created,
            removed: applied.removed,
            unlinked: applied.unlinked,
            issued_at: Instant::now(),
            supersedable,
        });
        Ok(())
    }

    /// Drops an unsent request, or marks a sent one so its completion is
    /// ignored.
    fn discard_request(&mut self, id: MutationId) {
        let before = self.outbox.len();
        self.outbox.retain(|request| request.id != id);
        if self.outbox.len() == before {
            self.ledger.abandon(id, Instant::now());
        }
    }

    fn confirm(&mut self, pending: &PendingMutation, ts: Timestamp) {
        for entity in &pending.written {
            let created = pending.created.contains(entity);
            let result = match *entity {
                EntityRef::Guest(id) => match self.store.get_guest(id).cloned() {
                    Some(mut guest) => {
                        guest.updated_at = ts;
                        if created {
                            guest.created_at = ts;
                        }
                        self.store.upsert_guest(guest, Some(ts))
                    }
                    None => continue,
                },
                EntityRef::Group(id) => match self.store.get_group(id).cloned() {
                    Some(mut group) => {
                        group.updated_at = ts;
                        if created {
                            group.created_at = ts;
                        }
                        self.store.upsert_group(group, Some(ts))
                    }
                    None => continue,
                },
            };
            if let Err(err) = result {
                warn!(
                    "event=mutation_confirm module=service status=error mutation={} entity={} error_code={}",
                    pending.id,
                    entity,
                    store_error(err).code()
                );
            }
        }

        // Entity keys held only for ordering keep their own timestamps.
        for key in pending
            .keys
            .iter()
            .filter(|key| matches!(key, EntityKey::Membership(_)))
        {
            match self.store.mark_applied(*key, ts) {
                Ok(()) | Err(StoreError::NotFound(_)) => {}
                Err(err) => warn!(
                    "event=mutation_confirm module=service status=error mutation={} key={} error_code={}",
                    pending.id,
                    key,
                    store_error(err).code()
                ),
            }
        }
        for entity in &pending.removed {
            self.reconciler.tombstone(*entity, ts);
        }
        for pair in &pending.unlinked {
            self.reconciler.record_unlink(*pair, ts);
        }

        info!(
            "event=mutation_complete module=service status=confirmed mutation={} op={} server_ts={}",
            pending.id, pending.name, ts
        );
    }

    fn roll_back(&mut self, pending: PendingMutation, err: &SyncError) {
        let id = pending.id;
        let name = pending.name;
        let skipped = pending.snapshot.restore(&mut self.store);
        warn!(
            "event=mutation_complete module=service status=rolled_back mutation={} op={} error_code={} skipped_keys={}",
            id,
            name,
            err.code(),
            skipped.len()
        );
    }
}
