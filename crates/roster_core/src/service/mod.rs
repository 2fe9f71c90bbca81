//! Mutation gateway and the outcome types it reports.
//!
//! # Responsibility
//! - Turn caller intents into validated local mutations.
//! - Drive each mutation through optimistic apply, persistence and
//!   confirmation or rollback.

mod gateway;
mod mutation;
mod outcome;

pub(crate) use gateway::QueuedMutation;
pub use outcome::{MutationOutcome, MutationStatus, MutationTicket, TicketState};
