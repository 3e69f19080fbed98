//! # cargoledger-core
//!
//! Chain-agnostic types shared by every CargoLedger crate: raw and decoded
//! log types, the contract interface model, the closed table of cargo events
//! the ingestion pipeline acts on, and the storage traits it writes through.

pub mod cargo;
pub mod error;
pub mod event;
pub mod interface;
pub mod store;
pub mod types;

pub use cargo::{CargoEvent, CargoStatus, EntityChange};
pub use error::{
    ConfigError, DecodeError, MutationError, PipelineError, SchemaError, StoreError, StreamError,
};
pub use event::{DecodedEvent, EventFingerprint, EventRecord, RawLogEntry};
pub use interface::{ContractInterface, EventDescriptor, ParamSlot};
pub use store::{AppendOutcome, DeadLetter, DeadLetterSink, EntityMutator, EventStore};
pub use types::{CanonicalType, NormalizedValue};
