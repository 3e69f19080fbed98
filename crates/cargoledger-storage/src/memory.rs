//! In-memory storage backend.
//!
//! Holds event records, cargo rows and dead letters in RAM. Useful for tests
//! and local runs that don't need persistence.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};

use cargoledger_core::cargo::{CargoStatus, EntityChange};
use cargoledger_core::error::{MutationError, StoreError};
use cargoledger_core::event::EventRecord;
use cargoledger_core::store::{AppendOutcome, DeadLetter, DeadLetterSink, EntityMutator, EventStore};

/// The mutable part of a cargo as this crate sees it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CargoRow {
    pub id: u64,
    pub status: CargoStatus,
    pub description_ipfs_hash: Option<String>,
}

impl CargoRow {
    pub fn new(id: u64) -> Self {
        Self {
            id,
            status: CargoStatus::Created,
            description_ipfs_hash: None,
        }
    }
}

#[derive(Default)]
struct Inner {
    records: Vec<EventRecord>,
    keys: HashSet<(String, u32)>,
    cargos: HashMap<u64, CargoRow>,
    dead_letters: Vec<DeadLetter>,
}

/// In-memory storage. All data is lost when the process exits.
///
/// Appends and key checks happen under one lock, so concurrent appends of
/// the same (tx hash, log index) still produce exactly one record.
#[derive(Default)]
pub struct InMemoryStorage {
    inner: Mutex<Inner>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create (or reset) cargo `id` in the `created` state, standing in for
    /// the CRUD service that owns cargo rows.
    pub fn insert_cargo(&self, id: u64) {
        self.inner.lock().cargos.insert(id, CargoRow::new(id));
    }

    /// Drop cargo `id`; later changes report not-found.
    pub fn remove_cargo(&self, id: u64) -> Option<CargoRow> {
        self.inner.lock().cargos.remove(&id)
    }

    pub fn cargo(&self, id: u64) -> Option<CargoRow> {
        self.inner.lock().cargos.get(&id).cloned()
    }

    /// Every record, in append order.
    pub fn records(&self) -> Vec<EventRecord> {
        self.inner.lock().records.clone()
    }

    /// Records for one cargo, in append order.
    pub fn records_for_entity(&self, entity_id: u64) -> Vec<EventRecord> {
        self.inner
            .lock()
            .records
            .iter()
            .filter(|r| r.entity_id == entity_id)
            .cloned()
            .collect()
    }

    pub fn record_count(&self) -> usize {
        self.inner.lock().records.len()
    }

    pub fn dead_letters(&self) -> Vec<DeadLetter> {
        self.inner.lock().dead_letters.clone()
    }
}

#[async_trait]
impl EventStore for InMemoryStorage {
    async fn append(&self, record: &EventRecord) -> Result<AppendOutcome, StoreError> {
        let mut inner = self.inner.lock();
        if !inner.keys.insert((record.tx_hash.clone(), record.log_index)) {
            return Ok(AppendOutcome::Duplicate);
        }
        inner.records.push(record.clone());
        Ok(AppendOutcome::Inserted)
    }
}

#[async_trait]
impl EntityMutator for InMemoryStorage {
    async fn apply(&self, entity_id: u64, change: &EntityChange) -> Result<(), MutationError> {
        let mut inner = self.inner.lock();
        let cargo = inner
            .cargos
            .get_mut(&entity_id)
            .ok_or(MutationError::NotFound { entity_id })?;
        match change {
            EntityChange::Status(status) => cargo.status = *status,
            EntityChange::DescriptionHash(hash) => cargo.description_ipfs_hash = Some(hash.clone()),
        }
        Ok(())
    }
}

#[async_trait]
impl DeadLetterSink for InMemoryStorage {
    async fn dead_letter(&self, letter: &DeadLetter) -> Result<(), StoreError> {
        self.inner.lock().dead_letters.push(letter.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn record(tx: &str, log_index: u32, entity_id: u64) -> EventRecord {
        EventRecord {
            event_type: "CargoCreated".into(),
            entity_id,
            tx_hash: tx.into(),
            block_number: 1,
            log_index,
            sender_address: "0x5FbDB2315678afecb367f032d93F642f64180aa3".into(),
            payload: serde_json::json!({ "cargoId": entity_id }),
        }
    }

    #[tokio::test]
    async fn append_is_idempotent() {
        let store = InMemoryStorage::new();
        assert_eq!(store.append(&record("0xa", 0, 7)).await.unwrap(), AppendOutcome::Inserted);
        assert_eq!(store.append(&record("0xa", 0, 7)).await.unwrap(), AppendOutcome::Duplicate);
        assert_eq!(store.append(&record("0xa", 1, 7)).await.unwrap(), AppendOutcome::Inserted);
        assert_eq!(store.record_count(), 2);
        assert_eq!(store.records_for_entity(7).len(), 2);
    }

    #[tokio::test]
    async fn concurrent_duplicate_appends_store_once() {
        let store = Arc::new(InMemoryStorage::new());
        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let store = Arc::clone(&store);
                tokio::spawn(async move { store.append(&record("0xb", 3, 1)).await.unwrap() })
            })
            .collect();
        let mut inserted = 0;
        for t in tasks {
            if t.await.unwrap() == AppendOutcome::Inserted {
                inserted += 1;
            }
        }
        assert_eq!(inserted, 1);
        assert_eq!(store.record_count(), 1);
    }

    #[tokio::test]
    async fn apply_updates_existing_cargo() {
        let store = InMemoryStorage::new();
        store.insert_cargo(5);
        store.apply(5, &EntityChange::Status(CargoStatus::Delivered)).await.unwrap();
        store
            .apply(5, &EntityChange::DescriptionHash("QmNew".into()))
            .await
            .unwrap();
        let cargo = store.cargo(5).unwrap();
        assert_eq!(cargo.status, CargoStatus::Delivered);
        assert_eq!(cargo.description_ipfs_hash.as_deref(), Some("QmNew"));
    }

    #[tokio::test]
    async fn apply_to_missing_cargo_is_not_found() {
        let store = InMemoryStorage::new();
        store.insert_cargo(5);
        store.remove_cargo(5);
        let err = store
            .apply(5, &EntityChange::Status(CargoStatus::Cancelled))
            .await
            .unwrap_err();
        assert_eq!(err, MutationError::NotFound { entity_id: 5 });
    }
}
