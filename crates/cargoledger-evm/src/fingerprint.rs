//! Signature hashes for CargoLedger events.
//!
//! A log's topics[0] is keccak256 over the event's canonical signature, so
//! `CargoStatusChanged(uint256,uint8)` always arrives as
//! `0x2fee3dfd2825c8fbfe0cd58b2f780bf6c7a1bb6bdf86be8a781d390a7427cbf9`.
//! The loader hashes each declared event once; incoming logs are matched on
//! the topic as delivered.

use cargoledger_core::{error::DecodeError, event::EventFingerprint};
use tiny_keccak::{Hasher, Keccak};

pub fn keccak256_signature(signature: &str) -> EventFingerprint {
    let mut output = [0u8; 32];
    let mut keccak = Keccak::v256();
    keccak.update(signature.as_bytes());
    keccak.finalize(&mut output);
    EventFingerprint::from_bytes(output)
}

/// The signature topic of a log.
///
/// A log without topics has no signature to match and yields `Ok(None)`.
/// A first topic that is not 32 bytes of hex is a malformed log.
pub fn from_topics(topics: &[String]) -> Result<Option<EventFingerprint>, DecodeError> {
    topics.first().map(|t| EventFingerprint::from_topic(t)).transpose()
}
