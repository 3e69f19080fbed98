//! # cargoledger-evm
//!
//! Loads a Solidity JSON ABI into a [`ContractInterface`] and decodes EVM
//! logs against it.
//!
//! ## Implementation notes
//! - `alloy-json-abi` parses the interface document, `alloy-dyn-abi` decodes
//! - topics[0] → event signature fingerprint (keccak256), exact match only
//! - topics[1..] → indexed arguments (each 32 bytes, ABI-encoded)
//! - `data` → non-indexed arguments (ABI-encoded parameter sequence)
//!
//! [`ContractInterface`]: cargoledger_core::ContractInterface

pub mod abi;
pub mod decoder;
pub mod fingerprint;
pub mod normalizer;

pub use abi::AbiLoader;
pub use decoder::{DecodeOutcome, EvmDecoder};
