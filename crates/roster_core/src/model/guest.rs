//! Guest domain model.
//!
//! # Responsibility
//! - Define the guest record, its enums and the partial-update patch.
//! - Keep the address all-or-nothing by construction.
//!
//! # Invariants
//! - `id` is never nil and never reused for another guest.
//! - `address` is either complete or absent; there is no partial state.
//! - Inclusion status and RSVP status are independent axes.

use super::validation::{
    check_email, check_length, check_notes, check_person_name, ValidationError, ValidationResult,
    CITY_MAX_CHARS, STATE_MAX_CHARS, STREET_MAX_CHARS, ZIP_MAX_CHARS,
};
use super::Timestamp;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type GuestId = Uuid;

/// Curation flag deciding whether a guest makes the final list.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InclusionStatus {
    Definitely,
    #[default]
    Maybe,
    NotInvited,
}

/// Guest response state. Absence (`None`) means no invitation tracked yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RsvpStatus {
    Invited,
    Attending,
    Declined,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Bride,
    Groom,
    Both,
}

/// Complete postal address. Every field is required.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Address {
    pub street: String,
    pub city: String,
    pub state: String,
    pub zip: String,
}

impl Address {
    pub fn validate(&self) -> ValidationResult {
        check_length("address.street", &self.street, 1, STREET_MAX_CHARS)?;
        check_length("address.city", &self.city, 1, CITY_MAX_CHARS)?;
        check_length("address.state", &self.state, 1, STATE_MAX_CHARS)?;
        check_length("address.zip", &self.zip, 1, ZIP_MAX_CHARS)
    }
}

/// Flat address input as it arrives from forms and table rows.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressFields {
    pub street: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub zip: Option<String>,
}

impl AddressFields {
    /// Collapses flat fields into an optional complete address.
    ///
    /// All four absent yields `None`; all four present yields `Some`; any
    /// other combination is rejected.
    pub fn into_address(self) -> Result<Option<Address>, ValidationError> {
        match (self.street, self.city, self.state, self.zip) {
            (None, None, None, None) => Ok(None),
            (Some(street), Some(city), Some(state), Some(zip)) => {
                let address = Address {
                    street,
                    city,
                    state,
                    zip,
                };
                address.validate()?;
                Ok(Some(address))
            }
            (street, city, state, zip) => {
                let missing = [
                    ("street", street.is_none()),
                    ("city", city.is_none()),
                    ("state", state.is_none()),
                    ("zip", zip.is_none()),
                ]
                .iter()
                .filter(|(_, absent)| *absent)
                .map(|(name, _)| *name)
                .collect::<Vec<_>>()
                .join(", ");
                Err(ValidationError::PartialAddress { missing })
            }
        }
    }

    pub fn from_address(address: Option<&Address>) -> Self {
        match address {
            Some(address) => Self {
                street: Some(address.street.clone()),
                city: Some(address.city.clone()),
                state: Some(address.state.clone()),
                zip: Some(address.zip.clone()),
            },
            None => Self::default(),
        }
    }
}

/// Canonical guest record held by the entity store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Guest {
    pub id: GuestId,
    pub first_name: String,
    pub last_name: String,
    pub email: Option<String>,
    pub address: Option<Address>,
    pub inclusion: InclusionStatus,
    pub rsvp: Option<RsvpStatus>,
    pub side: Side,
    pub notes: Option<String>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl Guest {
    /// Checks every field rule on the full record.
    pub fn validate(&self) -> ValidationResult {
        if self.id.is_nil() {
            return Err(ValidationError::NilId { entity: "guest" });
        }
        validate_fields(
            &self.first_name,
            &self.last_name,
            self.email.as_deref(),
            self.address.as_ref(),
            self.notes.as_deref(),
        )
    }
}

fn validate_fields(
    first_name: &str,
    last_name: &str,
    email: Option<&str>,
    address: Option<&Address>,
    notes: Option<&str>,
) -> ValidationResult {
    check_person_name("first_name", first_name)?;
    check_person_name("last_name", last_name)?;
    if let Some(email) = email {
        check_email(email)?;
    }
    if let Some(address) = address {
        address.validate()?;
    }
    if let Some(notes) = notes {
        check_notes(notes)?;
    }
    Ok(())
}

/// Caller input for a new guest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewGuest {
    pub first_name: String,
    pub last_name: String,
    pub email: Option<String>,
    pub address: Option<Address>,
    pub inclusion: InclusionStatus,
    pub rsvp: Option<RsvpStatus>,
    pub side: Side,
    pub notes: Option<String>,
}

impl NewGuest {
    /// Creates input with the required fields and defaults for the rest.
    pub fn new(first_name: impl Into<String>, last_name: impl Into<String>, side: Side) -> Self {
        Self {
            first_name: first_name.into(),
            last_name: last_name.into(),
            email: None,
            address: None,
            inclusion: InclusionStatus::default(),
            rsvp: None,
            side,
            notes: None,
        }
    }

    /// Materializes the input into a record with a fresh id.
    pub fn into_guest(self, id: GuestId, now: Timestamp) -> Guest {
        Guest {
            id,
            first_name: self.first_name,
            last_name: self.last_name,
            email: self.email,
            address: self.address,
            inclusion: self.inclusion,
            rsvp: self.rsvp,
            side: self.side,
            notes: self.notes,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn validate(&self) -> ValidationResult {
        validate_fields(
            &self.first_name,
            &self.last_name,
            self.email.as_deref(),
            self.address.as_ref(),
            self.notes.as_deref(),
        )
    }
}

/// Partial guest update. `None` leaves a field unchanged; for optional
/// fields `Some(None)` clears the value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GuestPatch {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub email: Option<Option<String>>,
    pub address: Option<Option<Address>>,
    pub inclusion: Option<InclusionStatus>,
    pub rsvp: Option<Option<RsvpStatus>>,
    pub side: Option<Side>,
    pub notes: Option<Option<String>>,
}

impl GuestPatch {
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }

    /// Returns `guest` with the patch applied and `updated_at` set to `now`.
    pub fn apply_to(&self, guest: &Guest, now: Timestamp) -> Guest {
        let mut next = guest.clone();
        if let Some(value) = &self.first_name {
            next.first_name = value.clone();
        }
        if let Some(value) = &self.last_name {
            next.last_name = value.clone();
        }
        if let Some(value) = &self.email {
            next.email = value.clone();
        }
        if let Some(value) = &self.address {
            next.address = value.clone();
        }
        if let Some(value) = self.inclusion {
            next.inclusion = value;
        }
        if let Some(value) = self.rsvp {
            next.rsvp = value;
        }
        if let Some(value) = self.side {
            next.side = value;
        }
        if let Some(value) = &self.notes {
            next.notes = value.clone();
        }
        next.updated_at = now;
        next
    }

    /// Checks the fields carried by the patch.
    pub fn validate(&self) -> ValidationResult {
        if self.is_empty() {
            return Err(ValidationError::EmptyPatch);
        }
        if let Some(value) = &self.first_name {
            check_person_name("first_name", value)?;
        }
        if let Some(value) = &self.last_name {
            check_person_name("last_name", value)?;
        }
        if let Some(Some(value)) = &self.email {
            check_email(value)?;
        }
        if let Some(Some(address)) = &self.address {
            address.validate()?;
        }
        if let Some(Some(value)) = &self.notes {
            check_notes(value)?;
        }
        Ok(())
    }
}
