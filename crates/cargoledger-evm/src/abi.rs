//! Interface descriptor loader.
//!
//! Reads a Solidity JSON ABI (a bare array, or a Hardhat/Foundry build
//! artifact carrying an `abi` field) and produces the immutable
//! [`ContractInterface`] the decoder matches logs against.

use std::path::Path;

use alloy_dyn_abi::{DynSolType, Specifier};
use alloy_json_abi::{Event, JsonAbi, Param};
use cargoledger_core::{
    error::SchemaError,
    interface::{ContractInterface, EventDescriptor, ParamSlot},
    types::CanonicalType,
};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::fingerprint;

pub struct AbiLoader;

impl AbiLoader {
    /// Load the interface document at `path`.
    pub fn from_path(path: &Path) -> Result<ContractInterface, SchemaError> {
        let json = std::fs::read_to_string(path)?;
        let iface = Self::from_json_str(&json)?;
        info!(
            path = %path.display(),
            events = iface.len(),
            "loaded contract interface"
        );
        Ok(iface)
    }

    /// Parse an interface document from a JSON string.
    pub fn from_json_str(json: &str) -> Result<ContractInterface, SchemaError> {
        let value: Value =
            serde_json::from_str(json).map_err(|e| SchemaError::Malformed(e.to_string()))?;

        let items = match value {
            Value::Array(_) => value,
            Value::Object(mut artifact) => artifact.remove("abi").ok_or_else(|| {
                SchemaError::Malformed("object document has no `abi` field".into())
            })?,
            _ => {
                return Err(SchemaError::Malformed(
                    "expected a JSON ABI array or a build artifact".into(),
                ))
            }
        };

        let abi: JsonAbi =
            serde_json::from_value(items).map_err(|e| SchemaError::Malformed(e.to_string()))?;

        let mut descriptors = Vec::new();
        for event in abi.events() {
            if event.anonymous {
                warn!(event = %event.name, "skipping anonymous event: it has no signature topic");
                continue;
            }
            descriptors.push(describe(event)?);
        }

        ContractInterface::new(descriptors)
    }
}

/// Build a descriptor for one ABI event.
fn describe(event: &Event) -> Result<EventDescriptor, SchemaError> {
    let signature = event.signature();
    let fingerprint = fingerprint::keccak256_signature(&signature);

    let mut params = Vec::with_capacity(event.inputs.len());
    for (i, input) in event.inputs.iter().enumerate() {
        let unsupported = || SchemaError::UnsupportedType {
            event: event.name.clone(),
            param: input.name.clone(),
            ty: input.ty.clone(),
        };
        let resolved: DynSolType = input.resolve().map_err(|_| unsupported())?;
        let ty = to_canonical(&resolved, &input.components).ok_or_else(unsupported)?;
        let name = if input.name.is_empty() {
            format!("arg{i}")
        } else {
            input.name.clone()
        };
        params.push(ParamSlot {
            name,
            ty,
            indexed: input.indexed,
        });
    }

    debug!(event = %event.name, %signature, %fingerprint, "registered event");
    Ok(EventDescriptor {
        name: event.name.clone(),
        signature,
        fingerprint,
        params,
    })
}

/// Map an alloy type onto the canonical type system. Tuple members take
/// their names from the ABI components when present.
fn to_canonical(ty: &DynSolType, components: &[Param]) -> Option<CanonicalType> {
    let canonical = match ty {
        DynSolType::Bool => CanonicalType::Bool,
        DynSolType::Int(bits) => CanonicalType::Int(u16::try_from(*bits).ok()?),
        DynSolType::Uint(bits) => CanonicalType::Uint(u16::try_from(*bits).ok()?),
        DynSolType::FixedBytes(n) => CanonicalType::Bytes(u8::try_from(*n).ok()?),
        DynSolType::Address => CanonicalType::Address,
        DynSolType::Bytes => CanonicalType::BytesVec,
        DynSolType::String => CanonicalType::Str,
        DynSolType::Array(inner) => CanonicalType::Vec(Box::new(to_canonical(inner, components)?)),
        DynSolType::FixedArray(inner, len) => CanonicalType::Array {
            elem: Box::new(to_canonical(inner, components)?),
            len: *len as u64,
        },
        DynSolType::Tuple(members) => {
            let mut fields = Vec::with_capacity(members.len());
            for (i, member) in members.iter().enumerate() {
                let component = components.get(i);
                let name = component
                    .map(|c| c.name.clone())
                    .filter(|n| !n.is_empty())
                    .unwrap_or_else(|| i.to_string());
                let nested = component.map(|c| c.components.as_slice()).unwrap_or(&[]);
                fields.push((name, to_canonical(member, nested)?));
            }
            CanonicalType::Tuple(fields)
        }
        DynSolType::Function => return None,
    };
    Some(canonical)
}

/// Map a canonical type back to the alloy type used for decoding.
pub(crate) fn to_dyn(ty: &CanonicalType) -> DynSolType {
    match ty {
        CanonicalType::Uint(bits) => DynSolType::Uint(*bits as usize),
        CanonicalType::Int(bits) => DynSolType::Int(*bits as usize),
        CanonicalType::Bool => DynSolType::Bool,
        CanonicalType::Bytes(n) => DynSolType::FixedBytes(*n as usize),
        CanonicalType::BytesVec => DynSolType::Bytes,
        CanonicalType::Str => DynSolType::String,
        CanonicalType::Address => DynSolType::Address,
        CanonicalType::Array { elem, len } => {
            DynSolType::FixedArray(Box::new(to_dyn(elem)), *len as usize)
        }
        CanonicalType::Vec(elem) => DynSolType::Array(Box::new(to_dyn(elem))),
        CanonicalType::Tuple(fields) => {
            DynSolType::Tuple(fields.iter().map(|(_, t)| to_dyn(t)).collect())
        }
    }
}
