use crate::model::Timestamp;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Table {
    Guests,
    Groups,
    GuestGroups,
}

impl Table {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Guests => "guests",
            Self::Groups => "groups",
            Self::GuestGroups => "guest_groups",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "guests" => Some(Self::Guests),
            "groups" => Some(Self::Groups),
            "guest_groups" => Some(Self::GuestGroups),
            _ => None,
        }
    }
}

impl Display for Table {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeOp {
    Insert,
    Update,
    Delete,
}

impl ChangeOp {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Insert => "insert",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "insert" => Some(Self::Insert),
            "update" => Some(Self::Update),
            "delete" => Some(Self::Delete),
            _ => None,
        }
    }
}

/// One committed row change as published by the backend.
///
/// `row` holds the new row for inserts/updates and at least the key
/// columns of the old row for deletes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub table: Table,
    pub operation: ChangeOp,
    pub row: serde_json::Value,
    pub server_ts: Timestamp,
}

impl ChangeEvent {
    pub fn new(
        table: Table,
        operation: ChangeOp,
        row: &impl Serialize,
        server_ts: Timestamp,
    ) -> Result<Self, serde_json::Error> {
        Ok(Self {
            table,
            operation,
            row: serde_json::to_value(row)?,
            server_ts,
        })
    }
}
