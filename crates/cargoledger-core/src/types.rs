//! Canonical argument types and decoded values.
//!
//! The ABI loader maps every declared argument type onto `CanonicalType`,
//! and the decoder produces `NormalizedValue`s, so nothing downstream of the
//! decoder deals with ABI library types.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Argument types an event descriptor may declare.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CanonicalType {
    /// Unsigned integer. Width in bits.
    Uint(u16),
    /// Signed integer. Width in bits.
    Int(u16),
    Bool,
    /// Fixed-size byte array (bytes1 .. bytes32). Length in bytes.
    Bytes(u8),
    /// Variable-length byte array
    BytesVec,
    Str,
    /// 20-byte EVM address
    Address,
    /// Fixed-length array of a type
    Array { elem: Box<CanonicalType>, len: u64 },
    /// Variable-length array of a type
    Vec(Box<CanonicalType>),
    Tuple(Vec<(String, CanonicalType)>),
}

impl CanonicalType {
    /// Reference types are stored as their keccak hash when indexed, so the
    /// original value cannot be recovered from a topic.
    pub fn is_reference(&self) -> bool {
        matches!(
            self,
            CanonicalType::Str
                | CanonicalType::BytesVec
                | CanonicalType::Vec(_)
                | CanonicalType::Array { .. }
                | CanonicalType::Tuple(_)
        )
    }
}

impl fmt::Display for CanonicalType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CanonicalType::Uint(bits) => write!(f, "uint{bits}"),
            CanonicalType::Int(bits) => write!(f, "int{bits}"),
            CanonicalType::Bool => write!(f, "bool"),
            CanonicalType::Bytes(n) => write!(f, "bytes{n}"),
            CanonicalType::BytesVec => write!(f, "bytes"),
            CanonicalType::Str => write!(f, "string"),
            CanonicalType::Address => write!(f, "address"),
            CanonicalType::Array { elem, len } => write!(f, "{elem}[{len}]"),
            CanonicalType::Vec(elem) => write!(f, "{elem}[]"),
            CanonicalType::Tuple(fields) => {
                let parts: Vec<_> = fields.iter().map(|(_, t)| t.to_string()).collect();
                write!(f, "({})", parts.join(","))
            }
        }
    }
}

/// A decoded argument value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum NormalizedValue {
    Uint(u128),
    /// Unsigned values that do not fit in u128, as a decimal string
    BigUint(String),
    Int(i128),
    /// Signed values that do not fit in i128, as a decimal string
    BigInt(String),
    Bool(bool),
    Bytes(Vec<u8>),
    Str(String),
    /// EIP-55 checksummed, 0x-prefixed
    Address(String),
    Array(Vec<NormalizedValue>),
    Tuple(Vec<(String, NormalizedValue)>),
    Null,
}

impl NormalizedValue {
    pub fn as_address(&self) -> Option<&str> {
        match self {
            NormalizedValue::Address(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            NormalizedValue::Str(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn as_u128(&self) -> Option<u128> {
        match self {
            NormalizedValue::Uint(v) => Some(*v),
            _ => None,
        }
    }

    /// Narrow an unsigned value to u64. `None` for other variants or when
    /// the value does not fit.
    pub fn as_u64(&self) -> Option<u64> {
        self.as_u128().and_then(|v| u64::try_from(v).ok())
    }

    /// Plain JSON rendering used for persisted payloads.
    ///
    /// Integers that fit in 64 bits become JSON numbers, larger ones become
    /// decimal strings. Bytes are 0x-prefixed hex.
    pub fn to_json(&self) -> serde_json::Value {
        use serde_json::Value;
        match self {
            NormalizedValue::Uint(v) => match u64::try_from(*v) {
                Ok(n) => Value::from(n),
                Err(_) => Value::String(v.to_string()),
            },
            NormalizedValue::Int(v) => match i64::try_from(*v) {
                Ok(n) => Value::from(n),
                Err(_) => Value::String(v.to_string()),
            },
            NormalizedValue::BigUint(s) | NormalizedValue::BigInt(s) => Value::String(s.clone()),
            NormalizedValue::Bool(b) => Value::Bool(*b),
            NormalizedValue::Bytes(b) => Value::String(format!("0x{}", hex::encode(b))),
            NormalizedValue::Str(s) | NormalizedValue::Address(s) => Value::String(s.clone()),
            NormalizedValue::Array(items) => {
                Value::Array(items.iter().map(NormalizedValue::to_json).collect())
            }
            NormalizedValue::Tuple(fields) => Value::Object(
                fields
                    .iter()
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect(),
            ),
            NormalizedValue::Null => Value::Null,
        }
    }
}

impl fmt::Display for NormalizedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NormalizedValue::Uint(v) => write!(f, "{v}"),
            NormalizedValue::BigUint(v) => write!(f, "{v}"),
            NormalizedValue::Int(v) => write!(f, "{v}"),
            NormalizedValue::BigInt(v) => write!(f, "{v}"),
            NormalizedValue::Bool(v) => write!(f, "{v}"),
            NormalizedValue::Bytes(b) => write!(f, "0x{}", hex::encode(b)),
            NormalizedValue::Str(s) => write!(f, "{s}"),
            NormalizedValue::Address(a) => write!(f, "{a}"),
            NormalizedValue::Array(v) => {
                let parts: Vec<_> = v.iter().map(|x| x.to_string()).collect();
                write!(f, "[{}]", parts.join(", "))
            }
            NormalizedValue::Tuple(fields) => {
                let parts: Vec<_> = fields.iter().map(|(k, v)| format!("{k}: {v}")).collect();
                write!(f, "{{{}}}", parts.join(", "))
            }
            NormalizedValue::Null => write!(f, "null"),
        }
    }
}
