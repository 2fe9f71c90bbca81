//! Field rules shared by local mutations, feed translation and the backend.
//!
//! # Responsibility
//! - Check guest and group attributes against the roster field rules.
//! - Report the first violated rule as a typed `ValidationError`.
//!
//! # Invariants
//! - Lengths are counted in Unicode scalar values, not bytes.
//! - Validation never rewrites the value it checks.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;
use thiserror::Error;
use uuid::Uuid;

pub const NAME_MAX_CHARS: usize = 100;
pub const EMAIL_MAX_CHARS: usize = 254;
pub const STREET_MAX_CHARS: usize = 200;
pub const CITY_MAX_CHARS: usize = 100;
pub const STATE_MAX_CHARS: usize = 100;
pub const ZIP_MAX_CHARS: usize = 20;
pub const NOTES_MAX_CHARS: usize = 1000;
pub const GROUP_NAME_MAX_CHARS: usize = 200;

static PERSON_NAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[\p{L}\p{M} '’\-]+$").expect("valid person name regex"));
static EMAIL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("valid email regex"));

/// Violated field rule.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("{field} must be {min}..={max} characters, got {actual}")]
    Length {
        field: &'static str,
        min: usize,
        max: usize,
        actual: usize,
    },
    #[error("{field} may only contain letters, spaces, hyphens and apostrophes")]
    NameCharacters { field: &'static str },
    #[error("email address is not valid")]
    Email,
    #[error("address is incomplete, missing: {missing}")]
    PartialAddress { missing: String },
    #[error("update contains no fields")]
    EmptyPatch,
    #[error("{entity} id must not be nil")]
    NilId { entity: &'static str },
    #[error("{field} contains a duplicate id")]
    DuplicateId { field: &'static str },
}

pub type ValidationResult = Result<(), ValidationError>;

/// Rejects nil and repeated ids in a caller-supplied id list.
pub fn check_id_list(entity: &'static str, field: &'static str, ids: &[Uuid]) -> ValidationResult {
    let mut seen = HashSet::with_capacity(ids.len());
    for id in ids {
        if id.is_nil() {
            return Err(ValidationError::NilId { entity });
        }
        if !seen.insert(*id) {
            return Err(ValidationError::DuplicateId { field });
        }
    }
    Ok(())
}

pub fn check_length(field: &'static str, value: &str, min: usize, max: usize) -> ValidationResult {
    let actual = value.chars().count();
    if actual < min || actual > max {
        return Err(ValidationError::Length {
            field,
            min,
            max,
            actual,
        });
    }
    Ok(())
}

/// First/last name rule: 1..=100 letters, spaces, hyphens or apostrophes.
pub fn check_person_name(field: &'static str, value: &str) -> ValidationResult {
    check_length(field, value, 1, NAME_MAX_CHARS)?;
    if !PERSON_NAME_RE.is_match(value) {
        return Err(ValidationError::NameCharacters { field });
    }
    Ok(())
}

pub fn check_email(value: &str) -> ValidationResult {
    check_length("email", value, 1, EMAIL_MAX_CHARS)?;
    if !EMAIL_RE.is_match(value) {
        return Err(ValidationError::Email);
    }
    Ok(())
}

pub fn check_notes(value: &str) -> ValidationResult {
    check_length("notes", value, 0, NOTES_MAX_CHARS)
}

/// Group names are checked after trimming surrounding whitespace.
pub fn check_group_name(value: &str) -> ValidationResult {
    check_length("group name", value.trim(), 1, GROUP_NAME_MAX_CHARS)
}
