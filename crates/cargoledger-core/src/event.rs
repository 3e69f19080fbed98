//! Raw logs, decoded events and the persisted event record.

use crate::error::DecodeError;
use crate::types::NormalizedValue;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// A log entry as delivered by the ledger node. Exists only in transit
/// between the subscription and the dispatcher.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawLogEntry {
    /// Emitting contract address (0x-prefixed hex)
    pub address: String,
    /// topics[0] is the event signature hash; topics[1..] are indexed arguments.
    pub topics: Vec<String>,
    /// ABI-encoded non-indexed arguments.
    pub data: Vec<u8>,
    pub block_number: u64,
    pub tx_hash: String,
    /// Position of the log within its block.
    pub log_index: u32,
}

impl RawLogEntry {
    /// The (tx hash, log index) pair that identifies this log on the ledger.
    pub fn key(&self) -> (&str, u32) {
        (&self.tx_hash, self.log_index)
    }
}

/// keccak-256 of an event's canonical signature, 0x-prefixed lowercase hex.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EventFingerprint(String);

impl EventFingerprint {
    /// Wrap a 32-byte digest.
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(format!("0x{}", hex::encode(bytes)))
    }

    /// Parse a topic string. Accepts mixed case, with or without `0x`;
    /// anything that is not exactly 32 bytes of hex is rejected.
    pub fn from_topic(topic: &str) -> Result<Self, DecodeError> {
        let hex_part = topic.strip_prefix("0x").unwrap_or(topic);
        if hex_part.len() != 64 || !hex_part.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(DecodeError::InvalidTopic {
                topic: topic.to_string(),
                reason: "expected 32 bytes of hex".into(),
            });
        }
        Ok(Self(format!("0x{}", hex_part.to_ascii_lowercase())))
    }

    pub fn as_hex(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for EventFingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The typed result of unpacking a raw log with its matching descriptor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecodedEvent {
    /// Event name from the interface, e.g. "CargoCreated"
    pub name: String,
    pub fingerprint: EventFingerprint,
    /// Argument name → value, in declaration order.
    pub fields: IndexMap<String, NormalizedValue>,
}

impl DecodedEvent {
    pub fn field(&self, name: &str) -> Option<&NormalizedValue> {
        self.fields.get(name)
    }

    /// Payload as a JSON object in declaration order.
    pub fn payload_json(&self) -> serde_json::Value {
        serde_json::Value::Object(
            self.fields
                .iter()
                .map(|(k, v)| (k.clone(), v.to_json()))
                .collect(),
        )
    }
}

/// The persisted, immutable audit record of one ledger log.
///
/// `(tx_hash, log_index)` identifies the log; stores must keep at most one
/// record per pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    pub event_type: String,
    pub entity_id: u64,
    pub tx_hash: String,
    pub block_number: u64,
    pub log_index: u32,
    /// Emitting contract address.
    pub sender_address: String,
    pub payload: serde_json::Value,
}

impl EventRecord {
    /// Build a record from the raw log and its decoded form.
    pub fn new(raw: &RawLogEntry, event: &DecodedEvent, entity_id: u64) -> Self {
        Self {
            event_type: event.name.clone(),
            entity_id,
            tx_hash: raw.tx_hash.clone(),
            block_number: raw.block_number,
            log_index: raw.log_index,
            sender_address: raw.address.clone(),
            payload: event.payload_json(),
        }
    }

    pub fn key(&self) -> (&str, u32) {
        (&self.tx_hash, self.log_index)
    }
}
