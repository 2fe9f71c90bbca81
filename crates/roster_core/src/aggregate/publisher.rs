use super::summary::{summarize, RosterSummary};
use crate::store::EntityStore;
use log::debug;
use std::fmt::{Debug, Formatter};

/// Handle returned by `subscribe`, used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Listener = Box<dyn FnMut(&RosterSummary)>;

/// Holds the latest summary and the callbacks interested in it.
pub struct SummaryPublisher {
    current: RosterSummary,
    listeners: Vec<(SubscriptionId, Listener)>,
    next_id: u64,
}

impl Debug for SummaryPublisher {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SummaryPublisher")
            .field("current", &self.current)
            .field("listeners", &self.listeners.len())
            .finish()
    }
}

impl SummaryPublisher {
    pub fn new(store: &EntityStore) -> Self {
        Self {
            current: summarize(store),
            listeners: Vec::new(),
            next_id: 1,
        }
    }

    pub fn current(&self) -> &RosterSummary {
        &self.current
    }

    pub fn subscribe(&mut self, listener: impl FnMut(&RosterSummary) + 'static) -> SubscriptionId {
        let id = SubscriptionId(self.next_id);
        self.next_id += 1;
        self.listeners.push((id, Box::new(listener)));
        id
    }

    /// Returns whether `id` was subscribed.
    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|(candidate, _)| *candidate != id);
        self.listeners.len() != before
    }

    /// Recomputes after a store version bump and notifies listeners when the
    /// counts changed. Returns whether listeners were notified.
    pub fn refresh(&mut self, store: &EntityStore) -> bool {
        if store.version() == self.current.version {
            return false;
        }
        let next = summarize(store);
        let changed = next.counts != self.current.counts;
        self.current = next;
        if !changed {
            return false;
        }
        debug!(
            "event=summary_publish module=aggregate status=ok version={} listeners={}",
            self.current.version,
            self.listeners.len()
        );
        for (_, listener) in &mut self.listeners {
            listener(&self.current);
        }
        true
    }
}
