//! cargoledger-storage: backends for the ingestion pipeline's storage
//! traits ([`EventStore`], [`EntityMutator`], [`DeadLetterSink`]).
//!
//! Backends:
//! - [`memory`]: in-memory (dev/testing, no persistence)
//! - `sqlite`: SQLite via `sqlx` (embedded, creates its own `cargos` table)
//! - `postgres`: PostgreSQL via `sqlx` (production; `cargos` is owned by the
//!   CRUD service)
//!
//! [`EventStore`]: cargoledger_core::EventStore
//! [`EntityMutator`]: cargoledger_core::EntityMutator
//! [`DeadLetterSink`]: cargoledger_core::DeadLetterSink

pub mod memory;

#[cfg(feature = "sqlite")]
pub mod sqlite;

#[cfg(feature = "postgres")]
pub mod postgres;

pub use memory::{CargoRow, InMemoryStorage};
