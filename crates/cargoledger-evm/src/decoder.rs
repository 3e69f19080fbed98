//! EVM log decoder.
//!
//! Matches topics[0] against the loaded [`ContractInterface`] and decodes
//! indexed arguments from the remaining topics and non-indexed arguments
//! from the ABI-encoded `data` payload.
//!
//! Decoding is strict: every value must fit its declared width and the
//! payload must be exactly the canonical encoding of the decoded values, so
//! trailing bytes, dirty padding and lossy strings are decode failures.

use alloy_dyn_abi::{DynSolType, DynSolValue};
use alloy_primitives::U256;
use cargoledger_core::{
    error::DecodeError,
    event::{DecodedEvent, EventFingerprint, RawLogEntry},
    interface::{ContractInterface, EventDescriptor},
    types::{CanonicalType, NormalizedValue},
};
use indexmap::IndexMap;
use tracing::trace;

use crate::{abi::to_dyn, fingerprint, normalizer::normalize};

/// What the decoder made of one raw log.
#[derive(Debug, Clone, PartialEq)]
pub enum DecodeOutcome {
    /// The log matched a declared event and every argument decoded.
    Decoded(DecodedEvent),
    /// No declared event has this signature, or the log has no topics.
    Unknown { fingerprint: Option<EventFingerprint> },
    /// The log could not be decoded. `event` names the matched declaration
    /// when the signature was recognized.
    Malformed {
        event: Option<String>,
        error: DecodeError,
    },
}

/// Stateless decoder; the interface is passed per call so one decoder can be
/// shared by every pipeline.
#[derive(Debug, Default, Clone, Copy)]
pub struct EvmDecoder;

impl EvmDecoder {
    pub fn new() -> Self {
        Self
    }

    pub fn decode(&self, raw: &RawLogEntry, iface: &ContractInterface) -> DecodeOutcome {
        let fp = match fingerprint::from_topics(&raw.topics) {
            Ok(Some(fp)) => fp,
            Ok(None) => return DecodeOutcome::Unknown { fingerprint: None },
            Err(error) => return DecodeOutcome::Malformed { event: None, error },
        };

        let Some(descriptor) = iface.get(&fp) else {
            return DecodeOutcome::Unknown {
                fingerprint: Some(fp),
            };
        };

        match self.decode_with(raw, descriptor) {
            Ok(event) => DecodeOutcome::Decoded(event),
            Err(error) => DecodeOutcome::Malformed {
                event: Some(descriptor.name.clone()),
                error,
            },
        }
    }

    /// Decode `raw` against a specific descriptor. The caller is responsible
    /// for having matched the signature topic.
    pub fn decode_with(
        &self,
        raw: &RawLogEntry,
        descriptor: &EventDescriptor,
    ) -> Result<DecodedEvent, DecodeError> {
        let expected = descriptor.expected_topics();
        if raw.topics.len() != expected {
            return Err(DecodeError::TopicCount {
                event: descriptor.name.clone(),
                expected,
                got: raw.topics.len(),
            });
        }

        let data_types: Vec<DynSolType> = descriptor.data_params().map(|p| to_dyn(&p.ty)).collect();
        let data = DynSolType::Tuple(data_types)
            .abi_decode_params(&raw.data)
            .map_err(|e| abi_failed(descriptor, e.to_string()))?;
        check_width(&data).map_err(|reason| abi_failed(descriptor, reason))?;
        if data.abi_encode_params() != raw.data {
            return Err(abi_failed(
                descriptor,
                "data is not the canonical encoding of its arguments".into(),
            ));
        }
        let mut data_values = match data {
            DynSolValue::Tuple(values) => values.into_iter(),
            other => vec![other].into_iter(),
        };
        let mut topics = raw.topics.iter().skip(1);

        let mut fields = IndexMap::with_capacity(descriptor.params.len());
        for param in &descriptor.params {
            let value = if param.indexed {
                let topic = topics.next().ok_or_else(|| DecodeError::MissingField {
                    event: descriptor.name.clone(),
                    field: param.name.clone(),
                })?;
                decode_topic(topic, &param.ty, descriptor)?
            } else {
                let value = data_values.next().ok_or_else(|| DecodeError::MissingField {
                    event: descriptor.name.clone(),
                    field: param.name.clone(),
                })?;
                name_fields(normalize(value), &param.ty)
            };
            fields.insert(param.name.clone(), value);
        }

        trace!(event = %descriptor.name, tx = %raw.tx_hash, index = raw.log_index, "decoded log");
        Ok(DecodedEvent {
            name: descriptor.name.clone(),
            fingerprint: descriptor.fingerprint.clone(),
            fields,
        })
    }
}

/// Decode one indexed argument. Reference types are stored in topics as the
/// keccak256 of their encoding, so the raw 32-byte hash is returned.
fn decode_topic(
    topic: &str,
    ty: &CanonicalType,
    descriptor: &EventDescriptor,
) -> Result<NormalizedValue, DecodeError> {
    let hex_part = topic.strip_prefix("0x").unwrap_or(topic);
    let word = hex::decode(hex_part).map_err(|e| DecodeError::InvalidTopic {
        topic: topic.to_string(),
        reason: e.to_string(),
    })?;
    if word.len() != 32 {
        return Err(DecodeError::InvalidTopic {
            topic: topic.to_string(),
            reason: format!("expected 32 bytes, got {}", word.len()),
        });
    }

    if ty.is_reference() {
        return Ok(NormalizedValue::Bytes(word));
    }

    let value = to_dyn(ty)
        .abi_decode(&word)
        .map_err(|e| abi_failed(descriptor, format!("topic {topic}: {e}")))?;
    check_width(&value).map_err(|reason| abi_failed(descriptor, format!("topic {topic}: {reason}")))?;
    if value.abi_encode() != word {
        return Err(abi_failed(
            descriptor,
            format!("topic {topic} is not a canonical {ty} word"),
        ));
    }
    Ok(normalize(value))
}

fn abi_failed(descriptor: &EventDescriptor, reason: String) -> DecodeError {
    DecodeError::AbiDecodeFailed {
        event: descriptor.name.clone(),
        reason,
    }
}

/// Values must fit their declared width; the ABI decoder reads whole words
/// without masking them.
fn check_width(value: &DynSolValue) -> Result<(), String> {
    match value {
        DynSolValue::Uint(u, bits) if u.bit_len() > *bits => {
            Err(format!("{u} does not fit uint{bits}"))
        }
        DynSolValue::Int(i, bits) if *bits < 256 => {
            // Two's complement: everything above the sign bit must repeat it.
            let high = i.into_raw() >> (*bits - 1);
            if high.is_zero() || high == U256::MAX >> (*bits - 1) {
                Ok(())
            } else {
                Err(format!("{i} does not fit int{bits}"))
            }
        }
        DynSolValue::FixedBytes(word, size) if word.0[*size..].iter().any(|b| *b != 0) => {
            Err(format!("bytes{size} carries non-zero padding"))
        }
        DynSolValue::Array(items) | DynSolValue::FixedArray(items) | DynSolValue::Tuple(items) => {
            items.iter().try_for_each(check_width)
        }
        _ => Ok(()),
    }
}

/// Replace the positional names the normalizer gives tuple members with the
/// component names declared in the interface.
fn name_fields(value: NormalizedValue, ty: &CanonicalType) -> NormalizedValue {
    match (value, ty) {
        (NormalizedValue::Tuple(members), CanonicalType::Tuple(decl)) => NormalizedValue::Tuple(
            members
                .into_iter()
                .zip(decl)
                .map(|((_, v), (name, member_ty))| (name.clone(), name_fields(v, member_ty)))
                .collect(),
        ),
        (NormalizedValue::Array(items), CanonicalType::Vec(elem))
        | (NormalizedValue::Array(items), CanonicalType::Array { elem, .. }) => {
            NormalizedValue::Array(items.into_iter().map(|v| name_fields(v, elem)).collect())
        }
        (value, _) => value,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abi::AbiLoader;
    use alloy_primitives::Address;

    const ABI: &str = r#"[
        {"type": "event", "name": "CargoUpdated", "anonymous": false, "inputs": [
            {"name": "cargoId", "type": "uint256", "indexed": true},
            {"name": "newHash", "type": "string",  "indexed": false},
            {"name": "updater", "type": "address", "indexed": false}
        ]},
        {"type": "event", "name": "Tagged", "anonymous": false, "inputs": [
            {"name": "label", "type": "string", "indexed": true},
            {"name": "by",    "type": "address", "indexed": true}
        ]},
        {"type": "event", "name": "Inspected", "anonymous": false, "inputs": [
            {"name": "cargoId", "type": "uint256", "indexed": true},
            {"name": "grade",   "type": "uint8",   "indexed": true},
            {"name": "score",   "type": "uint8",   "indexed": false},
            {"name": "sealed",  "type": "bool",    "indexed": false}
        ]}
    ]"#;

    const UPDATER: &str = "0x70997970C51812dc3A010C7d01b50e0d17dc79C8";

    fn iface() -> ContractInterface {
        AbiLoader::from_json_str(ABI).unwrap()
    }

    fn word(n: u64) -> String {
        format!("0x{:064x}", n)
    }

    fn updated_log(cargo_id: u64, hash: &str) -> RawLogEntry {
        let iface = iface();
        let desc = iface.by_name("CargoUpdated").unwrap();
        let updater: Address = UPDATER.parse().unwrap();
        let data = DynSolValue::Tuple(vec![
            DynSolValue::String(hash.into()),
            DynSolValue::Address(updater),
        ])
        .abi_encode_params();
        RawLogEntry {
            address: "0x5FbDB2315678afecb367f032d93F642f64180aa3".into(),
            topics: vec![desc.fingerprint.as_hex().to_string(), word(cargo_id)],
            data,
            block_number: 10,
            tx_hash: "0xfeed".into(),
            log_index: 0,
        }
    }

    #[test]
    fn decodes_indexed_and_data_arguments_in_declaration_order() {
        let outcome = EvmDecoder::new().decode(&updated_log(42, "QmNew"), &iface());
        let DecodeOutcome::Decoded(event) = outcome else {
            panic!("expected decoded, got {outcome:?}");
        };
        assert_eq!(event.name, "CargoUpdated");
        let keys: Vec<_> = event.fields.keys().map(String::as_str).collect();
        assert_eq!(keys, ["cargoId", "newHash", "updater"]);
        assert_eq!(event.field("cargoId"), Some(&NormalizedValue::Uint(42)));
        assert_eq!(event.field("newHash").and_then(|v| v.as_str()), Some("QmNew"));
        assert_eq!(event.field("updater").and_then(|v| v.as_address()), Some(UPDATER));
    }

    #[test]
    fn unknown_signature_is_reported_with_its_fingerprint() {
        let mut log = updated_log(1, "Qm");
        log.topics[0] = word(0xdead);
        match EvmDecoder::new().decode(&log, &iface()) {
            DecodeOutcome::Unknown { fingerprint } => {
                assert_eq!(fingerprint.unwrap().as_hex(), word(0xdead));
            }
            other => panic!("expected unknown, got {other:?}"),
        }
    }

    #[test]
    fn log_without_topics_is_unknown() {
        let mut log = updated_log(1, "Qm");
        log.topics.clear();
        assert_eq!(
            EvmDecoder::new().decode(&log, &iface()),
            DecodeOutcome::Unknown { fingerprint: None }
        );
    }

    #[test]
    fn garbage_signature_topic_is_malformed() {
        let mut log = updated_log(1, "Qm");
        log.topics[0] = "0xnothex".into();
        assert!(matches!(
            EvmDecoder::new().decode(&log, &iface()),
            DecodeOutcome::Malformed { event: None, .. }
        ));
    }

    #[test]
    fn topic_count_mismatch_is_malformed() {
        let mut log = updated_log(1, "Qm");
        log.topics.push(word(9));
        match EvmDecoder::new().decode(&log, &iface()) {
            DecodeOutcome::Malformed { event, error } => {
                assert_eq!(event.as_deref(), Some("CargoUpdated"));
                assert!(matches!(
                    error,
                    DecodeError::TopicCount { expected: 2, got: 3, .. }
                ));
            }
            other => panic!("expected malformed, got {other:?}"),
        }
    }

    #[test]
    fn truncated_data_is_malformed() {
        let mut log = updated_log(1, "QmSomething");
        log.data.truncate(40);
        assert!(matches!(
            EvmDecoder::new().decode(&log, &iface()),
            DecodeOutcome::Malformed {
                error: DecodeError::AbiDecodeFailed { .. },
                ..
            }
        ));
    }

    #[test]
    fn indexed_reference_type_yields_topic_hash() {
        let iface = iface();
        let desc = iface.by_name("Tagged").unwrap();
        let hash_topic = format!("0x{}", "ab".repeat(32));
        let by = format!("0x{:0>64}", "70997970c51812dc3a010c7d01b50e0d17dc79c8");
        let log = RawLogEntry {
            address: "0x5FbDB2315678afecb367f032d93F642f64180aa3".into(),
            topics: vec![desc.fingerprint.as_hex().to_string(), hash_topic, by],
            data: Vec::new(),
            block_number: 1,
            tx_hash: "0x01".into(),
            log_index: 3,
        };
        let event = EvmDecoder::new().decode_with(&log, desc).unwrap();
        assert_eq!(event.field("label"), Some(&NormalizedValue::Bytes(vec![0xab; 32])));
        assert_eq!(event.field("by").and_then(|v| v.as_address()), Some(UPDATER));
    }

    #[test]
    fn tuple_members_are_named_from_components() {
        let abi = r#"[{"type": "event", "name": "Routed", "anonymous": false, "inputs": [
            {"name": "leg", "type": "tuple", "indexed": false, "components": [
                {"name": "eta",  "type": "uint64"},
                {"name": "port", "type": "string"}
            ]}
        ]}]"#;
        let iface = AbiLoader::from_json_str(abi).unwrap();
        let desc = iface.by_name("Routed").unwrap();
        let data = DynSolValue::Tuple(vec![DynSolValue::Tuple(vec![
            DynSolValue::Uint(U256::from(1_700_000_000u64), 64),
            DynSolValue::String("Rotterdam".into()),
        ])])
        .abi_encode_params();
        let log = RawLogEntry {
            address: "0x5FbDB2315678afecb367f032d93F642f64180aa3".into(),
            topics: vec![desc.fingerprint.as_hex().to_string()],
            data,
            block_number: 1,
            tx_hash: "0x02".into(),
            log_index: 0,
        };
        let event = EvmDecoder::new().decode_with(&log, desc).unwrap();
        assert_eq!(
            event.payload_json(),
            serde_json::json!({ "leg": { "eta": 1_700_000_000u64, "port": "Rotterdam" } })
        );
    }

    fn inspected_log(grade_topic: String, data: Vec<u8>) -> RawLogEntry {
        let iface = iface();
        let desc = iface.by_name("Inspected").unwrap();
        RawLogEntry {
            address: "0x5FbDB2315678afecb367f032d93F642f64180aa3".into(),
            topics: vec![desc.fingerprint.as_hex().to_string(), word(5), grade_topic],
            data,
            block_number: 3,
            tx_hash: "0x03".into(),
            log_index: 1,
        }
    }

    fn inspected_data(score: u64, sealed: bool) -> Vec<u8> {
        DynSolValue::Tuple(vec![
            DynSolValue::Uint(U256::from(score), 8),
            DynSolValue::Bool(sealed),
        ])
        .abi_encode_params()
    }

    fn assert_abi_failure(log: &RawLogEntry) {
        match EvmDecoder::new().decode(log, &iface()) {
            DecodeOutcome::Malformed {
                error: DecodeError::AbiDecodeFailed { .. },
                ..
            } => {}
            other => panic!("expected ABI decode failure, got {other:?}"),
        }
    }

    #[test]
    fn in_range_small_integers_decode() {
        let event = EvmDecoder::new()
            .decode_with(&inspected_log(word(4), inspected_data(200, true)), iface().by_name("Inspected").unwrap())
            .unwrap();
        assert_eq!(event.field("grade"), Some(&NormalizedValue::Uint(4)));
        assert_eq!(event.field("score"), Some(&NormalizedValue::Uint(200)));
        assert_eq!(event.field("sealed"), Some(&NormalizedValue::Bool(true)));
    }

    #[test]
    fn trailing_bytes_after_payload_are_malformed() {
        let mut log = updated_log(1, "QmSomething");
        log.data.extend_from_slice(&[0u8; 32]);
        assert_abi_failure(&log);
    }

    #[test]
    fn uint8_word_above_255_is_malformed() {
        // 0x0102 in the `score` slot.
        let mut data = inspected_data(2, false);
        data[30] = 0x01;
        assert_abi_failure(&inspected_log(word(4), data));
        // The same in the indexed `grade` topic.
        assert_abi_failure(&inspected_log(word(258), inspected_data(2, false)));
    }

    #[test]
    fn bool_word_other_than_zero_or_one_is_malformed() {
        let mut data = inspected_data(2, true);
        data[63] = 5;
        assert_abi_failure(&inspected_log(word(4), data));
    }

    #[test]
    fn address_topic_with_dirty_high_bytes_is_malformed() {
        let iface = iface();
        let desc = iface.by_name("Tagged").unwrap();
        let by = format!("0xff{:0>62}", "70997970c51812dc3a010c7d01b50e0d17dc79c8");
        let log = RawLogEntry {
            address: "0x5FbDB2315678afecb367f032d93F642f64180aa3".into(),
            topics: vec![desc.fingerprint.as_hex().to_string(), format!("0x{}", "ab".repeat(32)), by],
            data: Vec::new(),
            block_number: 1,
            tx_hash: "0x04".into(),
            log_index: 0,
        };
        assert_abi_failure(&log);
    }

    #[test]
    fn invalid_utf8_string_is_malformed() {
        let mut log = updated_log(1, "QmAbc");
        // String payload starts after two head words and the length word.
        log.data[96] = 0xff;
        assert_abi_failure(&log);
    }
}
