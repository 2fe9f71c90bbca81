use crate::error::SyncError;
use crate::model::{EntityRef, Timestamp};
use crate::sync::MutationId;

/// Where a mutation stands right after it was accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TicketState {
    /// Applied optimistically; its request is in the outbox or at the backend.
    InFlight,
    /// Waiting behind an in-flight mutation on a shared key.
    Queued,
}

/// Receipt for an accepted mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MutationTicket {
    pub id: MutationId,
    pub state: TicketState,
    /// Ids of entities the mutation creates, known before confirmation.
    pub created: Vec<EntityRef>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MutationStatus {
    Confirmed { server_ts: Timestamp },
    /// Rolled back, or never applied when it failed after queueing.
    Failed(SyncError),
    /// Replaced by a newer edit of the same entity.
    Superseded { by: MutationId },
}

/// Final result of one mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MutationOutcome {
    pub id: MutationId,
    pub status: MutationStatus,
}

impl MutationOutcome {
    pub fn is_confirmed(&self) -> bool {
        matches!(self.status, MutationStatus::Confirmed { .. })
    }
}
