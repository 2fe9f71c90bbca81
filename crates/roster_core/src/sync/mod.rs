//! Optimistic-mutation bookkeeping and remote-change reconciliation.
//!
//! # Responsibility
//! - Track in-flight local mutations with the snapshots needed to undo them.
//! - Buffer remote changes for keys that have an in-flight mutation.
//! - Decide the local outcome of every remote change (last-write-wins).
//!
//! # Invariants
//! - At most one in-flight mutation owns a given entity key.
//! - A remote change for an owned key is applied only after the owner
//!   resolves.
//! - Remote deletes win and tombstone the id.

mod pending;
mod reconciler;

pub use pending::MutationId;
pub(crate) use pending::{KeySnapshot, PendingLedger, PendingMutation};
pub use reconciler::{Disposition, Reconciler};
