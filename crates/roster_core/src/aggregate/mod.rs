//! Derived roster counts for presentation code.
//!
//! # Responsibility
//! - Compute status, side and per-group counts from the entity store.
//! - Notify subscribers when the counts change.
//!
//! # Invariants
//! - Computation is pure and reads nothing but the store.
//! - A summary always names the store version it was computed from.

mod publisher;
mod summary;

pub use publisher::{SubscriptionId, SummaryPublisher};
pub use summary::{summarize, InclusionCounts, RosterCounts, RosterSummary, RsvpCounts, SideCounts};
