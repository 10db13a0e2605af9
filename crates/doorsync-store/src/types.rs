//! Entity and outbox record types shared across the doorsync crates.
//!
//! Field naming on the wire follows the remote authority's JSON
//! (`camelCase`), so these types double as the gateway DTOs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StoreError;

/// Site buildings. The remote authority identifies them by number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum Building {
    Main,
    Annex,
    Depot,
}

impl Building {
    pub fn as_u8(self) -> u8 {
        match self {
            Building::Main => 1,
            Building::Annex => 2,
            Building::Depot => 3,
        }
    }
}

impl From<Building> for u8 {
    fn from(building: Building) -> Self {
        building.as_u8()
    }
}

impl TryFrom<u8> for Building {
    type Error = StoreError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Building::Main),
            2 => Ok(Building::Annex),
            3 => Ok(Building::Depot),
            other => Err(StoreError::Invalid(format!("unknown building {other}"))),
        }
    }
}

/// A room as stored locally and exchanged with the remote authority.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Room {
    pub id: i64,
    pub number: String,
    pub building: Building,
    pub floor: u32,
}

/// Caller-supplied room fields for create/update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomFields {
    pub number: String,
    pub building: Building,
    pub floor: u32,
}

/// An employee. `access_rooms` is a denormalized copy of the access
/// relation, written only by the access-rights engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Employee {
    pub id: i64,
    pub last_name: String,
    pub first_name: String,
    pub middle_name: String,
    /// External badge identifier, unique.
    pub employee_id: String,
    pub access_rooms: Vec<i64>,
}

/// Caller-supplied employee fields for create/update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmployeeFields {
    pub last_name: String,
    pub first_name: String,
    pub middle_name: String,
    pub employee_id: String,
}

/// One row of the employee-to-room access relation. The `(employee_id,
/// room_id)` pair is unique; `id` is assigned by whichever store holds
/// the row, so it is absent on freshly granted wire payloads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessRight {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    pub employee_id: i64,
    pub room_id: i64,
}

/// Kind of local mutation recorded in the outbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeOp {
    Create,
    Update,
    Delete,
    Grant,
    Revoke,
    Bulk,
}

impl ChangeOp {
    pub fn as_str(self) -> &'static str {
        match self {
            ChangeOp::Create => "create",
            ChangeOp::Update => "update",
            ChangeOp::Delete => "delete",
            ChangeOp::Grant => "grant",
            ChangeOp::Revoke => "revoke",
            ChangeOp::Bulk => "bulk",
        }
    }
}

impl std::str::FromStr for ChangeOp {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "create" => Ok(ChangeOp::Create),
            "update" => Ok(ChangeOp::Update),
            "delete" => Ok(ChangeOp::Delete),
            "grant" => Ok(ChangeOp::Grant),
            "revoke" => Ok(ChangeOp::Revoke),
            "bulk" => Ok(ChangeOp::Bulk),
            other => Err(StoreError::Invalid(format!("unknown operation {other:?}"))),
        }
    }
}

/// Entity a pending change applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Room,
    Employee,
    Access,
}

impl EntityKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EntityKind::Room => "room",
            EntityKind::Employee => "employee",
            EntityKind::Access => "access",
        }
    }
}

impl std::str::FromStr for EntityKind {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "room" => Ok(EntityKind::Room),
            "employee" => Ok(EntityKind::Employee),
            "access" => Ok(EntityKind::Access),
            other => Err(StoreError::Invalid(format!("unknown entity {other:?}"))),
        }
    }
}

/// A queued local mutation awaiting remote replay.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingChange {
    /// Client-generated unique token.
    pub id: String,
    /// Origination time; replay order is ascending by this value.
    pub timestamp: DateTime<Utc>,
    pub operation: ChangeOp,
    pub entity: EntityKind,
    /// Payload sufficient to replay against the remote authority
    /// without re-reading local state.
    pub data: serde_json::Value,
}
