//! Table row shapes shared by the change feed and the SQLite backend.

use crate::model::{
    AddressFields, Group, GroupId, GroupType, Guest, GuestId, InclusionStatus, Membership,
    RsvpStatus, Side, Timestamp, ValidationError,
};
use serde::{Deserialize, Serialize};

/// Flat `guests` row. Address columns are nullable individually.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuestRow {
    pub id: GuestId,
    pub first_name: String,
    pub last_name: String,
    pub email: Option<String>,
    pub street: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub zip: Option<String>,
    #[serde(default)]
    pub inclusion_status: InclusionStatus,
    pub rsvp_status: Option<RsvpStatus>,
    pub side: Side,
    pub notes: Option<String>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl GuestRow {
    pub fn from_guest(guest: &Guest) -> Self {
        let address = AddressFields::from_address(guest.address.as_ref());
        Self {
            id: guest.id,
            first_name: guest.first_name.clone(),
            last_name: guest.last_name.clone(),
            email: guest.email.clone(),
            street: address.street,
            city: address.city,
            state: address.state,
            zip: address.zip,
            inclusion_status: guest.inclusion,
            rsvp_status: guest.rsvp,
            side: guest.side,
            notes: guest.notes.clone(),
            created_at: guest.created_at,
            updated_at: guest.updated_at,
        }
    }

    /// Rebuilds the guest, rejecting partial addresses and rule violations.
    pub fn into_guest(self) -> Result<Guest, ValidationError> {
        let address = AddressFields {
            street: self.street,
            city: self.city,
            state: self.state,
            zip: self.zip,
        }
        .into_address()?;
        let guest = Guest {
            id: self.id,
            first_name: self.first_name,
            last_name: self.last_name,
            email: self.email,
            address,
            inclusion: self.inclusion_status,
            rsvp: self.rsvp_status,
            side: self.side,
            notes: self.notes,
            created_at: self.created_at,
            updated_at: self.updated_at,
        };
        guest.validate()?;
        Ok(guest)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupRow {
    pub id: GroupId,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: GroupType,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl GroupRow {
    pub fn from_group(group: &Group) -> Self {
        Self {
            id: group.id,
            name: group.name.clone(),
            kind: group.kind,
            created_at: group.created_at,
            updated_at: group.updated_at,
        }
    }

    pub fn into_group(self) -> Result<Group, ValidationError> {
        let group = Group {
            id: self.id,
            name: self.name.trim().to_string(),
            kind: self.kind,
            created_at: self.created_at,
            updated_at: self.updated_at,
        };
        group.validate()?;
        Ok(group)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuestGroupRow {
    pub guest_id: GuestId,
    pub group_id: GroupId,
}

impl From<Membership> for GuestGroupRow {
    fn from(value: Membership) -> Self {
        Self {
            guest_id: value.guest_id,
            group_id: value.group_id,
        }
    }
}

impl From<GuestGroupRow> for Membership {
    fn from(value: GuestGroupRow) -> Self {
        Membership::new(value.guest_id, value.group_id)
    }
}

/// Key-only projection used by delete events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowId {
    pub id: uuid::Uuid,
}
