//! The closed table of cargo events the pipeline acts on.
//!
//! Every event kind with a business consequence is a variant of
//! [`CargoEvent`]. Anything else in the contract interface is reported as
//! unhandled by [`CargoEvent::from_decoded`] returning `Ok(None)`.

use crate::error::DecodeError;
use crate::event::DecodedEvent;
use crate::types::NormalizedValue;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Lifecycle status of a cargo record. Discriminants follow the contract's
/// `uint8` encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CargoStatus {
    #[serde(rename = "created")]
    Created,
    #[serde(rename = "inTransit")]
    InTransit,
    #[serde(rename = "delivered")]
    Delivered,
    #[serde(rename = "cancelled")]
    Cancelled,
}

impl CargoStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CargoStatus::Created => "created",
            CargoStatus::InTransit => "inTransit",
            CargoStatus::Delivered => "delivered",
            CargoStatus::Cancelled => "cancelled",
        }
    }

    pub fn from_index(index: u128) -> Option<Self> {
        match index {
            0 => Some(CargoStatus::Created),
            1 => Some(CargoStatus::InTransit),
            2 => Some(CargoStatus::Delivered),
            3 => Some(CargoStatus::Cancelled),
            _ => None,
        }
    }
}

impl fmt::Display for CargoStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CargoStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "created" => Ok(CargoStatus::Created),
            "inTransit" => Ok(CargoStatus::InTransit),
            "delivered" => Ok(CargoStatus::Delivered),
            "cancelled" => Ok(CargoStatus::Cancelled),
            other => Err(format!("unknown cargo status '{other}'")),
        }
    }
}

/// A field change the entity mutator is allowed to apply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "field", content = "value", rename_all = "snake_case")]
pub enum EntityChange {
    Status(CargoStatus),
    DescriptionHash(String),
}

impl fmt::Display for EntityChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityChange::Status(s) => write!(f, "status={s}"),
            EntityChange::DescriptionHash(h) => write!(f, "description_ipfs_hash={h}"),
        }
    }
}

/// Cargo events with a registered handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CargoEvent {
    /// `CargoCreated(cargoId, sender, receiver, ipfsHash)`. Recorded only;
    /// the cargo row itself is created through the off-chain path.
    Created { cargo_id: u64 },
    /// `CargoUpdated(cargoId, newHash, updater)`
    Updated { cargo_id: u64, new_hash: String },
    /// `CargoStatusChanged(cargoId, status)`
    StatusChanged { cargo_id: u64, status: CargoStatus },
}

impl CargoEvent {
    pub const CREATED: &'static str = "CargoCreated";
    pub const UPDATED: &'static str = "CargoUpdated";
    pub const STATUS_CHANGED: &'static str = "CargoStatusChanged";

    /// Every event name with a handler.
    pub const HANDLED: [&'static str; 3] = [Self::CREATED, Self::UPDATED, Self::STATUS_CHANGED];

    /// Map a decoded event onto the handler table.
    ///
    /// `Ok(None)` means the name has no handler. An error means the name is
    /// handled but the fields do not carry what the handler needs.
    pub fn from_decoded(event: &DecodedEvent) -> Result<Option<Self>, DecodeError> {
        let parsed = match event.name.as_str() {
            Self::CREATED => CargoEvent::Created {
                cargo_id: cargo_id(event)?,
            },
            Self::UPDATED => CargoEvent::Updated {
                cargo_id: cargo_id(event)?,
                new_hash: string_field(event, "newHash")?,
            },
            Self::STATUS_CHANGED => CargoEvent::StatusChanged {
                cargo_id: cargo_id(event)?,
                status: status_field(event, "status")?,
            },
            _ => return Ok(None),
        };
        Ok(Some(parsed))
    }

    pub fn name(&self) -> &'static str {
        match self {
            CargoEvent::Created { .. } => Self::CREATED,
            CargoEvent::Updated { .. } => Self::UPDATED,
            CargoEvent::StatusChanged { .. } => Self::STATUS_CHANGED,
        }
    }

    pub fn cargo_id(&self) -> u64 {
        match self {
            CargoEvent::Created { cargo_id }
            | CargoEvent::Updated { cargo_id, .. }
            | CargoEvent::StatusChanged { cargo_id, .. } => *cargo_id,
        }
    }

    /// The entity change this event implies, if any.
    pub fn change(&self) -> Option<EntityChange> {
        match self {
            CargoEvent::Created { .. } => None,
            CargoEvent::Updated { new_hash, .. } => {
                Some(EntityChange::DescriptionHash(new_hash.clone()))
            }
            CargoEvent::StatusChanged { status, .. } => Some(EntityChange::Status(*status)),
        }
    }
}

fn require<'a>(event: &'a DecodedEvent, field: &str) -> Result<&'a NormalizedValue, DecodeError> {
    event.field(field).ok_or_else(|| DecodeError::MissingField {
        event: event.name.clone(),
        field: field.to_string(),
    })
}

fn invalid(event: &DecodedEvent, field: &str, reason: impl Into<String>) -> DecodeError {
    DecodeError::InvalidField {
        event: event.name.clone(),
        field: field.to_string(),
        reason: reason.into(),
    }
}

fn cargo_id(event: &DecodedEvent) -> Result<u64, DecodeError> {
    let value = require(event, "cargoId")?;
    value
        .as_u64()
        .ok_or_else(|| invalid(event, "cargoId", format!("expected an id fitting u64, got {value}")))
}

fn string_field(event: &DecodedEvent, field: &str) -> Result<String, DecodeError> {
    match require(event, field)? {
        NormalizedValue::Str(s) => Ok(s.clone()),
        other => Err(invalid(event, field, format!("expected a string, got {other}"))),
    }
}

fn status_field(event: &DecodedEvent, field: &str) -> Result<CargoStatus, DecodeError> {
    match require(event, field)? {
        NormalizedValue::Uint(index) => CargoStatus::from_index(*index)
            .ok_or_else(|| invalid(event, field, format!("status index {index} out of range"))),
        NormalizedValue::Str(name) => name.parse().map_err(|e: String| invalid(event, field, e)),
        other => Err(invalid(event, field, format!("expected uint8 or string, got {other}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventFingerprint;
    use indexmap::IndexMap;

    fn decoded(name: &str, fields: Vec<(&str, NormalizedValue)>) -> DecodedEvent {
        DecodedEvent {
            name: name.into(),
            fingerprint: EventFingerprint::from_bytes([0u8; 32]),
            fields: fields
                .into_iter()
                .map(|(k, v)| (k.to_string(), v))
                .collect::<IndexMap<_, _>>(),
        }
    }

    #[test]
    fn created_has_no_change() {
        let ev = decoded(
            "CargoCreated",
            vec![
                ("cargoId", NormalizedValue::Uint(7)),
                ("ipfsHash", NormalizedValue::Str("Qm".into())),
            ],
        );
        let cargo = CargoEvent::from_decoded(&ev).unwrap().unwrap();
        assert_eq!(cargo, CargoEvent::Created { cargo_id: 7 });
        assert_eq!(cargo.change(), None);
    }

    #[test]
    fn updated_changes_description_hash() {
        let ev = decoded(
            "CargoUpdated",
            vec![
                ("cargoId", NormalizedValue::Uint(9)),
                ("newHash", NormalizedValue::Str("QmNew".into())),
                ("updater", NormalizedValue::Address("0x01".into())),
            ],
        );
        let cargo = CargoEvent::from_decoded(&ev).unwrap().unwrap();
        assert_eq!(cargo.cargo_id(), 9);
        assert_eq!(
            cargo.change(),
            Some(EntityChange::DescriptionHash("QmNew".into()))
        );
    }

    #[test]
    fn status_accepts_index_or_name() {
        let by_index = decoded(
            "CargoStatusChanged",
            vec![("cargoId", NormalizedValue::Uint(1)), ("status", NormalizedValue::Uint(2))],
        );
        let by_name = decoded(
            "CargoStatusChanged",
            vec![
                ("cargoId", NormalizedValue::Uint(1)),
                ("status", NormalizedValue::Str("inTransit".into())),
            ],
        );
        assert_eq!(
            CargoEvent::from_decoded(&by_index).unwrap().unwrap().change(),
            Some(EntityChange::Status(CargoStatus::Delivered))
        );
        assert_eq!(
            CargoEvent::from_decoded(&by_name).unwrap().unwrap().change(),
            Some(EntityChange::Status(CargoStatus::InTransit))
        );
    }

    #[test]
    fn out_of_range_status_is_a_decode_error() {
        let ev = decoded(
            "CargoStatusChanged",
            vec![("cargoId", NormalizedValue::Uint(1)), ("status", NormalizedValue::Uint(9))],
        );
        assert!(matches!(
            CargoEvent::from_decoded(&ev),
            Err(DecodeError::InvalidField { .. })
        ));
    }

    #[test]
    fn unknown_name_is_unhandled() {
        let ev = decoded("OwnershipTransferred", vec![]);
        assert_eq!(CargoEvent::from_decoded(&ev).unwrap(), None);
    }

    #[test]
    fn missing_or_oversized_id_is_rejected() {
        let missing = decoded("CargoCreated", vec![]);
        assert!(matches!(
            CargoEvent::from_decoded(&missing),
            Err(DecodeError::MissingField { .. })
        ));
        let huge = decoded(
            "CargoCreated",
            vec![("cargoId", NormalizedValue::BigUint("1".repeat(60)))],
        );
        assert!(matches!(
            CargoEvent::from_decoded(&huge),
            Err(DecodeError::InvalidField { .. })
        ));
    }

    #[test]
    fn status_serde_uses_contract_names() {
        let json = serde_json::to_string(&CargoStatus::InTransit).unwrap();
        assert_eq!(json, "\"inTransit\"");
        assert_eq!("cancelled".parse::<CargoStatus>().unwrap(), CargoStatus::Cancelled);
    }
}
