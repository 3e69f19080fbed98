//! Converts alloy `DynSolValue` → `NormalizedValue`.

use alloy_dyn_abi::DynSolValue;
use cargoledger_core::types::NormalizedValue;

/// Convert a decoded `DynSolValue` into a `NormalizedValue`.
///
/// Integers are narrowed by value, not by declared width: a `uint256`
/// holding 7 becomes `Uint(7)`.
pub fn normalize(val: DynSolValue) -> NormalizedValue {
    match val {
        DynSolValue::Bool(b) => NormalizedValue::Bool(b),

        DynSolValue::Int(i, _bits) => match i128::try_from(i) {
            Ok(v) => NormalizedValue::Int(v),
            Err(_) => NormalizedValue::BigInt(i.to_string()),
        },

        DynSolValue::Uint(u, _bits) => match u128::try_from(u) {
            Ok(v) => NormalizedValue::Uint(v),
            Err(_) => NormalizedValue::BigUint(u.to_string()),
        },

        DynSolValue::FixedBytes(word, size) => {
            NormalizedValue::Bytes(word[..size.min(32)].to_vec())
        }

        DynSolValue::Bytes(b) => NormalizedValue::Bytes(b),

        DynSolValue::String(s) => NormalizedValue::Str(s),

        DynSolValue::Address(a) => NormalizedValue::Address(a.to_checksum(None)),

        DynSolValue::Array(vals) | DynSolValue::FixedArray(vals) => {
            NormalizedValue::Array(vals.into_iter().map(normalize).collect())
        }

        DynSolValue::Tuple(fields) => {
            // Unnamed tuple fields get positional names "0", "1", ...
            let named = fields
                .into_iter()
                .enumerate()
                .map(|(i, v)| (i.to_string(), normalize(v)))
                .collect();
            NormalizedValue::Tuple(named)
        }

        DynSolValue::Function(f) => NormalizedValue::Bytes(f.to_vec()),
    }
}
