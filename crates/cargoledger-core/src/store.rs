//! Storage traits the pipeline writes through.
//!
//! Concrete backends (memory, SQLite, Postgres) live in `cargoledger-storage`.

use crate::cargo::EntityChange;
use crate::error::{MutationError, StoreError};
use crate::event::EventRecord;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Result of a successful append.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    /// A new record was written.
    Inserted,
    /// A record with the same (tx hash, log index) already exists; nothing
    /// was written.
    Duplicate,
}

/// Append-only store of event records.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Persist `record` unless its (tx hash, log index) is already present.
    /// Re-delivery is reported as `AppendOutcome::Duplicate`, never as an error.
    async fn append(&self, record: &EventRecord) -> Result<AppendOutcome, StoreError>;
}

/// Conditional updates against the externally owned cargo table.
#[async_trait]
pub trait EntityMutator: Send + Sync {
    /// Apply `change` to cargo `entity_id`. Zero matching rows is
    /// `MutationError::NotFound`.
    async fn apply(&self, entity_id: u64, change: &EntityChange) -> Result<(), MutationError>;
}

/// A record that could not be appended after every retry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadLetter {
    pub record: EventRecord,
    pub error: String,
    pub attempts: u32,
}

/// Destination for records the event store refused.
#[async_trait]
pub trait DeadLetterSink: Send + Sync {
    async fn dead_letter(&self, letter: &DeadLetter) -> Result<(), StoreError>;
}
