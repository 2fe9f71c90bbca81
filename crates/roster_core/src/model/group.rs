//! Group domain model.
//!
//! # Invariants
//! - `name` is stored trimmed and is unique across groups.
//! - Deleting a group never deletes its member guests.

use super::guest::{GuestId, NewGuest};
use super::validation::{check_group_name, check_id_list, ValidationError, ValidationResult};
use super::Timestamp;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type GroupId = Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupType {
    Family,
    Couple,
    FriendGroup,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Group {
    pub id: GroupId,
    pub name: String,
    /// Serialized as `type` to match the table column.
    #[serde(rename = "type")]
    pub kind: GroupType,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl Group {
    pub fn validate(&self) -> ValidationResult {
        if self.id.is_nil() {
            return Err(ValidationError::NilId { entity: "group" });
        }
        check_group_name(&self.name)
    }

    /// Key used for name uniqueness: surrounding whitespace removed, case kept.
    pub fn name_key(&self) -> &str {
        self.name.trim()
    }
}

/// Caller input for a new group, optionally bundled with members.
///
/// `existing_guest_ids` must already exist; `new_guests` are created in the
/// same atomic operation and linked to the group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewGroup {
    pub name: String,
    pub kind: GroupType,
    pub existing_guest_ids: Vec<GuestId>,
    pub new_guests: Vec<NewGuest>,
}

impl NewGroup {
    pub fn new(name: impl Into<String>, kind: GroupType) -> Self {
        Self {
            name: name.into(),
            kind,
            existing_guest_ids: Vec::new(),
            new_guests: Vec::new(),
        }
    }

    pub fn with_existing(mut self, guest_ids: impl IntoIterator<Item = GuestId>) -> Self {
        self.existing_guest_ids.extend(guest_ids);
        self
    }

    pub fn with_new_guests(mut self, guests: impl IntoIterator<Item = NewGuest>) -> Self {
        self.new_guests.extend(guests);
        self
    }

    pub fn validate(&self) -> ValidationResult {
        check_group_name(&self.name)?;
        check_id_list("guest", "existing_guest_ids", &self.existing_guest_ids)?;
        for guest in &self.new_guests {
            guest.validate()?;
        }
        Ok(())
    }

    /// Materializes the group record; the name is stored trimmed.
    pub fn to_group(&self, id: GroupId, now: Timestamp) -> Group {
        Group {
            id,
            name: self.name.trim().to_string(),
            kind: self.kind,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Rename and/or retype.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GroupPatch {
    pub name: Option<String>,
    pub kind: Option<GroupType>,
}

impl GroupPatch {
    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.kind.is_none()
    }

    pub fn validate(&self) -> ValidationResult {
        if self.is_empty() {
            return Err(ValidationError::EmptyPatch);
        }
        if let Some(name) = &self.name {
            check_group_name(name)?;
        }
        Ok(())
    }

    pub fn apply_to(&self, group: &Group, now: Timestamp) -> Group {
        let mut next = group.clone();
        if let Some(name) = &self.name {
            next.name = name.trim().to_string();
        }
        if let Some(kind) = self.kind {
            next.kind = kind;
        }
        next.updated_at = now;
        next
    }
}
