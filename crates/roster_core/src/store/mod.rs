//! In-memory normalized roster state.
//!
//! # Responsibility
//! - Hold guests, groups and associations keyed by id.
//! - Enforce field rules, group-name uniqueness and referential integrity on
//!   every write.
//! - Count successful mutations with a monotonically increasing version.
//!
//! # Invariants
//! - A failed operation leaves the store untouched.
//! - Every association references a guest and a group that are present.
//! - Only `remove_cascading` removes an entity that still has associations.

mod entity_store;
mod snapshot;

pub use entity_store::{CascadeRemoval, EntityStore, StoreError, StoreResult, Stored};
pub use snapshot::RosterSnapshot;
