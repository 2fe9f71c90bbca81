//! Single owner of all client-side roster state.
//!
//! # Responsibility
//! - Own the entity store, the pending ledger, the reconciler and the
//!   summary publisher, and expose the store read-only.
//! - Accept remote change events and hand out persist requests as a sans-IO
//!   state machine; the host moves bytes, the engine decides.
//!
//! # Invariants
//! - Every store change is followed by a summary refresh before control
//!   returns to the caller.
//! - A remote change waits in the buffer while an in-flight mutation owns
//!   its key.

use crate::aggregate::{RosterSummary, SubscriptionId, SummaryPublisher};
use crate::backend::{FeedCursor, PersistRequest};
use crate::config::SyncSettings;
use crate::feed::{ChangeEvent, ChangeFeedAdapter, FeedError, RemoteChange};
use crate::service::{MutationOutcome, QueuedMutation};
use crate::store::{EntityStore, RosterSnapshot};
use crate::sync::{Disposition, MutationId, PendingLedger, Reconciler};
use log::info;
use std::collections::VecDeque;

#[derive(Debug)]
pub struct RosterEngine {
    pub(crate) store: EntityStore,
    pub(crate) ledger: PendingLedger,
    pub(crate) queue: VecDeque<QueuedMutation>,
    pub(crate) reconciler: Reconciler,
    pub(crate) outbox: Vec<PersistRequest>,
    pub(crate) outcomes: Vec<MutationOutcome>,
    feed: ChangeFeedAdapter,
    publisher: SummaryPublisher,
    settings: SyncSettings,
    feed_cursor: FeedCursor,
    next_id: u64,
}

impl RosterEngine {
    pub fn new(settings: SyncSettings) -> Self {
        let store = EntityStore::new();
        let publisher = SummaryPublisher::new(&store);
        info!(
            "event=engine_init module=engine status=ok request_timeout_ms={} dedupe_window={}",
            settings.request_timeout_ms, settings.dedupe_window
        );
        Self {
            store,
            ledger: PendingLedger::default(),
            queue: VecDeque::new(),
            reconciler: Reconciler::new(),
            outbox: Vec::new(),
            outcomes: Vec::new(),
            feed: ChangeFeedAdapter::new(settings.dedupe_window),
            publisher,
            settings,
            feed_cursor: 0,
            next_id: 1,
        }
    }

    pub fn settings(&self) -> &SyncSettings {
        &self.settings
    }

    /// Read-only view of the current, optimistic roster.
    pub fn store(&self) -> &EntityStore {
        &self.store
    }

    pub fn snapshot(&self) -> RosterSnapshot {
        self.store.snapshot()
    }

    pub fn summary(&self) -> &RosterSummary {
        self.publisher.current()
    }

    /// Registers a callback invoked whenever the summary counts change.
    pub fn subscribe(
        &mut self,
        listener: impl FnMut(&RosterSummary) + 'static,
    ) -> SubscriptionId {
        self.publisher.subscribe(listener)
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        self.publisher.unsubscribe(id)
    }

    /// Hands over the persist requests issued since the last call.
    pub fn take_requests(&mut self) -> Vec<PersistRequest> {
        std::mem::take(&mut self.outbox)
    }

    /// Every outcome produced since the last call, in resolution order.
    pub fn drain_outcomes(&mut self) -> Vec<MutationOutcome> {
        std::mem::take(&mut self.outcomes)
    }

    pub fn pending_len(&self) -> usize {
        self.ledger.len()
    }

    pub fn queued_len(&self) -> usize {
        self.queue.len()
    }

    /// Remote changes held back by in-flight mutations.
    pub fn buffered_len(&self) -> usize {
        self.ledger.buffered_len()
    }

    pub fn parked_len(&self) -> usize {
        self.reconciler.parked_len()
    }

    pub fn feed_cursor(&self) -> FeedCursor {
        self.feed_cursor
    }

    /// Moves the feed cursor forward; it never moves back.
    pub fn advance_feed_cursor(&mut self, cursor: FeedCursor) {
        self.feed_cursor = self.feed_cursor.max(cursor);
    }

    /// Feeds one remote change event into the engine.
    ///
    /// # Errors
    /// - `FeedError` when the row is malformed or violates field rules; the
    ///   store is not touched.
    pub fn ingest(&mut self, event: &ChangeEvent) -> Result<Disposition, FeedError> {
        let Some(change) = self.feed.translate(event)? else {
            return Ok(Disposition::Duplicate);
        };
        let disposition = self.route(change);
        self.after_store_change();
        Ok(disposition)
    }

    pub(crate) fn next_mutation_id(&mut self) -> MutationId {
        let id = MutationId(self.next_id);
        self.next_id += 1;
        id
    }

    /// Follow-up after a mutation resolved: replay released remote changes,
    /// start queued mutations, then retry parked changes.
    pub(crate) fn settle(&mut self) {
        for change in self.ledger.take_released() {
            self.reconciler.reconcile(&mut self.store, change);
        }
        self.drain_queue();
        self.after_store_change();
    }

    pub(crate) fn after_store_change(&mut self) {
        let ledger = &self.ledger;
        self.reconciler
            .retry_parked(&mut self.store, |change| ledger.blocks(change));
        self.publisher.refresh(&self.store);
    }

    fn route(&mut self, change: RemoteChange) -> Disposition {
        if self.ledger.blocks(&change) {
            self.ledger.buffer(change);
            return Disposition::Buffered;
        }
        self.reconciler.reconcile(&mut self.store, change)
    }
}

impl Default for RosterEngine {
    fn default() -> Self {
        Self::new(SyncSettings::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{BackendError, PersistAck, PersistOp};
    use crate::error::SyncError;
    use crate::feed::{ChangeOp, GroupRow, GuestRow, RowId, Table};
    use crate::model::{EntityRef, GroupType, GuestId, GuestPatch, NewGroup, NewGuest, Side};
    use crate::service::{MutationStatus, TicketState};
    use std::time::{Duration, Instant};

    fn ana() -> NewGuest {
        NewGuest::new("Ana", "Silva", Side::Bride)
    }

    fn notes(text: &str) -> GuestPatch {
        GuestPatch {
            notes: Some(Some(text.to_string())),
            ..GuestPatch::default()
        }
    }

    #[test]
    fn second_update_on_same_guest_is_queued_until_first_resolves() {
        let mut engine = RosterEngine::default();
        let ticket = engine.create_guest(ana(), &[]).unwrap();
        let EntityRef::Guest(id) = ticket.created[0] else {
            panic!("create_guest must report the guest id");
        };
        let create = engine.take_requests();
        engine.complete(create[0].id, Ok(PersistAck { server_ts: 10 }));

        let first = engine.update_guest(id, notes("one")).unwrap();
        let second = engine.update_guest(id, notes("two")).unwrap();
        assert_eq!(first.state, TicketState::InFlight);
        assert_eq!(second.state, TicketState::Queued);
        assert_eq!(engine.take_requests().len(), 1);

        engine.complete(first.id, Ok(PersistAck { server_ts: 11 }));
        let released = engine.take_requests();
        assert_eq!(released.len(), 1);
        assert_eq!(released[0].id, second.id);
        assert!(matches!(released[0].op, PersistOp::UpdateGuest { .. }));
        assert_eq!(
            engine.store().get_guest(id).unwrap().notes.as_deref(),
            Some("two")
        );
    }

    #[test]
    fn remote_change_for_pending_key_is_buffered_then_replayed() {
        let mut engine = RosterEngine::default();
        let ticket = engine.create_guest(ana(), &[]).unwrap();
        let request = engine.take_requests().remove(0);
        let PersistOp::CreateGuest { guest, .. } = &request.op else {
            panic!("unexpected op");
        };

        let mut remote = guest.clone();
        remote.notes = Some("remote".to_string());
        remote.created_at = 20;
        remote.updated_at = 20;
        let event = ChangeEvent::new(
            Table::Guests,
            ChangeOp::Update,
            &GuestRow::from_guest(&remote),
            20,
        )
        .unwrap();
        assert_eq!(engine.ingest(&event).unwrap(), Disposition::Buffered);
        assert_eq!(engine.buffered_len(), 1);

        engine.complete(ticket.id, Ok(PersistAck { server_ts: 10 }));
        assert_eq!(engine.buffered_len(), 0);
        assert_eq!(engine.store().get_guest(guest.id), Some(&remote));
    }

    #[test]
    fn overdue_mutation_is_rolled_back_and_late_completion_ignored() {
        let mut engine = RosterEngine::default();
        let before = engine.snapshot();
        let ticket = engine.create_guest(ana(), &[]).unwrap();
        let requests = engine.take_requests();

        let later = Instant::now() + Duration::from_millis(engine.settings().request_timeout_ms + 50);
        let expired = engine.expire_overdue(later);
        assert_eq!(expired.len(), 1);
        assert!(matches!(
            expired[0].status,
            MutationStatus::Failed(SyncError::BackendFailure(_))
        ));
        assert_eq!(engine.snapshot(), before);

        assert!(engine
            .complete(requests[0].id, Ok(PersistAck { server_ts: 5 }))
            .is_none());
        assert_eq!(engine.snapshot(), before);
        assert_eq!(engine.drain_outcomes().len(), 1);
        assert_eq!(ticket.id, requests[0].id);
    }

    #[test]
    fn failed_completion_restores_snapshot() {
        let mut engine = RosterEngine::default();
        let before = engine.snapshot();
        let ticket = engine.create_guest(ana(), &[]).unwrap();
        let outcome = engine
            .complete(ticket.id, Err(BackendError::Unavailable("offline".to_string())))
            .unwrap();
        assert!(matches!(
            outcome.status,
            MutationStatus::Failed(SyncError::BackendFailure(_))
        ));
        assert_eq!(engine.snapshot(), before);
        assert_eq!(engine.pending_len(), 0);
    }

    fn confirmed_guest(engine: &mut RosterEngine, server_ts: i64) -> GuestId {
        let ticket = engine.create_guest(ana(), &[]).unwrap();
        engine.take_requests();
        engine.complete(ticket.id, Ok(PersistAck { server_ts }));
        let EntityRef::Guest(id) = ticket.created[0] else {
            panic!("create_guest must report the guest id");
        };
        id
    }

    fn guest_delete(id: GuestId, server_ts: i64) -> ChangeEvent {
        ChangeEvent::new(Table::Guests, ChangeOp::Delete, &RowId { id }, server_ts).unwrap()
    }

    #[test]
    fn buffered_remote_delete_wins_after_local_update_confirms() {
        let mut engine = RosterEngine::default();
        let id = confirmed_guest(&mut engine, 10);
        let update = engine.update_guest(id, notes("mine")).unwrap();

        assert_eq!(engine.ingest(&guest_delete(id, 15)).unwrap(), Disposition::Buffered);
        assert!(engine.store().get_guest(id).is_some());

        engine.complete(update.id, Ok(PersistAck { server_ts: 20 }));
        assert!(engine.store().get_guest(id).is_none());
        assert_eq!(engine.buffered_len(), 0);

        let revived = ana().into_guest(id, 30);
        let event = ChangeEvent::new(
            Table::Guests,
            ChangeOp::Update,
            &GuestRow::from_guest(&revived),
            30,
        )
        .unwrap();
        assert_eq!(engine.ingest(&event).unwrap(), Disposition::Tombstoned);
        assert!(engine.store().get_guest(id).is_none());
    }

    #[test]
    fn buffered_remote_delete_wins_after_local_update_rolls_back() {
        let mut engine = RosterEngine::default();
        let id = confirmed_guest(&mut engine, 10);
        let update = engine.update_guest(id, notes("mine")).unwrap();
        assert_eq!(engine.ingest(&guest_delete(id, 15)).unwrap(), Disposition::Buffered);

        let outcome = engine
            .complete(update.id, Err(BackendError::Unavailable("offline".to_string())))
            .unwrap();
        assert!(matches!(outcome.status, MutationStatus::Failed(_)));
        assert!(engine.store().get_guest(id).is_none());
        assert_eq!(engine.summary().counts.total_guests, 0);
    }

    #[test]
    fn group_delete_waits_for_pending_membership() {
        let mut engine = RosterEngine::default();
        let id = confirmed_guest(&mut engine, 10);
        let group = NewGroup::new("Silvas", GroupType::Family).to_group(uuid::Uuid::new_v4(), 11);
        let insert =
            ChangeEvent::new(Table::Groups, ChangeOp::Insert, &GroupRow::from_group(&group), 11)
                .unwrap();
        engine.ingest(&insert).unwrap();

        let link = engine.add_guest_to_groups(id, &[group.id]).unwrap();
        let delete =
            ChangeEvent::new(Table::Groups, ChangeOp::Delete, &RowId { id: group.id }, 12).unwrap();
        assert_eq!(engine.ingest(&delete).unwrap(), Disposition::Buffered);
        assert!(engine.store().get_group(group.id).is_some());

        engine.complete(link.id, Ok(PersistAck { server_ts: 13 }));
        assert!(engine.store().get_group(group.id).is_none());
        assert!(engine.store().groups_of(id).is_empty());
        assert_eq!(engine.summary().counts.solo_guests, 1);
    }

    #[test]
    fn echo_arriving_before_completion_keeps_confirmed_state() {
        let mut engine = RosterEngine::default();
        let id = confirmed_guest(&mut engine, 10);
        let update = engine.update_guest(id, notes("mine")).unwrap();
        let mut echoed = engine.store().get_guest(id).unwrap().clone();
        echoed.created_at = 10;
        echoed.updated_at = 20;
        let echo = ChangeEvent::new(
            Table::Guests,
            ChangeOp::Update,
            &GuestRow::from_guest(&echoed),
            20,
        )
        .unwrap();
        assert_eq!(engine.ingest(&echo).unwrap(), Disposition::Buffered);

        let outcome = engine
            .complete(update.id, Ok(PersistAck { server_ts: 20 }))
            .unwrap();
        assert!(outcome.is_confirmed());
        let entry = engine.store().guest_entry(id).unwrap();
        assert_eq!(entry.value, echoed);
        assert_eq!(entry.last_applied, Some(20));
        assert_eq!(engine.buffered_len(), 0);
    }
}
