//! SQLite storage backend.
//!
//! Keeps the `events` audit table, the `event_dead_letters` table and a
//! local `cargos` table in a single SQLite file. Intended for embedded and
//! single-node deployments; production uses the Postgres backend against
//! the CRUD service's database.
//!
//! # Usage
//! ```rust,no_run
//! use cargoledger_storage::sqlite::SqliteStorage;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! // File-backed (persistent)
//! let store = SqliteStorage::open("./cargoledger.db").await?;
//!
//! // In-memory (tests / ephemeral)
//! let store = SqliteStorage::in_memory().await?;
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{sqlite::SqlitePoolOptions, Row, SqlitePool};
use tracing::debug;

use cargoledger_core::cargo::{CargoStatus, EntityChange};
use cargoledger_core::error::{MutationError, StoreError};
use cargoledger_core::event::EventRecord;
use cargoledger_core::store::{AppendOutcome, DeadLetter, DeadLetterSink, EntityMutator, EventStore};

use crate::memory::CargoRow;

fn db_err(e: sqlx::Error) -> StoreError {
    StoreError::Database(e.to_string())
}

fn is_memory_target(path: &str) -> bool {
    path == ":memory:" || path.starts_with("sqlite::memory:") || path.contains("mode=memory")
}

/// SQLite-backed event store, cargo mutator and dead-letter sink.
pub struct SqliteStorage {
    pool: SqlitePool,
}

impl SqliteStorage {
    /// Open (or create) a SQLite database at `path`.
    ///
    /// The path may be a plain file path (`"./cargoledger.db"`) or a full
    /// SQLite URL (`"sqlite:./cargoledger.db?mode=rwc"`). In-memory targets
    /// (`":memory:"`, `"sqlite::memory:"`, `mode=memory`) go through
    /// [`in_memory`](Self::in_memory).
    pub async fn open(path: &str) -> Result<Self, StoreError> {
        if is_memory_target(path) {
            return Self::in_memory().await;
        }
        let url = if path.starts_with("sqlite:") {
            path.to_string()
        } else {
            format!("sqlite:{path}?mode=rwc")
        };

        let pool = SqlitePool::connect(&url).await.map_err(db_err)?;
        let storage = Self { pool };
        storage.init_schema(true).await?;
        Ok(storage)
    }

    /// Open an in-memory SQLite database.
    ///
    /// Every connection to `sqlite::memory:` is a separate database, so the
    /// pool is limited to one connection. All data is lost when the pool is
    /// dropped.
    pub async fn in_memory() -> Result<Self, StoreError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .map_err(db_err)?;

        let storage = Self { pool };
        storage.init_schema(false).await?;
        Ok(storage)
    }

    /// Create tables and, for file databases, enable WAL mode.
    async fn init_schema(&self, wal: bool) -> Result<(), StoreError> {
        if wal {
            sqlx::query("PRAGMA journal_mode=WAL;")
                .execute(&self.pool)
                .await
                .map_err(db_err)?;
        }

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS events (
                id             INTEGER PRIMARY KEY AUTOINCREMENT,
                event_type     TEXT    NOT NULL,
                cargo_id       INTEGER NOT NULL,
                tx_hash        TEXT    NOT NULL,
                block_number   INTEGER NOT NULL,
                event_index    INTEGER NOT NULL,
                sender_address TEXT    NOT NULL,
                data           TEXT    NOT NULL,
                created_at     TEXT    NOT NULL,
                UNIQUE (tx_hash, event_index)
            );",
        )
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_events_cargo ON events (cargo_id);")
            .execute(&self.pool)
            .await
            .map_err(db_err)?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS event_dead_letters (
                id           INTEGER PRIMARY KEY AUTOINCREMENT,
                tx_hash      TEXT    NOT NULL,
                event_index  INTEGER NOT NULL,
                record       TEXT    NOT NULL,
                error        TEXT    NOT NULL,
                attempts     INTEGER NOT NULL,
                created_at   TEXT    NOT NULL
            );",
        )
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS cargos (
                id                    INTEGER PRIMARY KEY,
                status                TEXT    NOT NULL DEFAULT 'created',
                description_ipfs_hash TEXT,
                created_at            TEXT,
                updated_at            TEXT,
                deleted_at            TEXT
            );",
        )
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(())
    }

    // ─── Cargo rows ─────────────────────────────────────────────────────────────

    /// Create cargo `id` in the `created` state (no-op if it exists).
    pub async fn insert_cargo(&self, id: u64) -> Result<(), StoreError> {
        let now = Utc::now().to_rfc3339();
        sqlx::query(
            "INSERT INTO cargos (id, status, created_at, updated_at)
             VALUES (?, 'created', ?, ?)
             ON CONFLICT (id) DO NOTHING",
        )
        .bind(id as i64)
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    /// Soft-delete cargo `id`, as the CRUD service does.
    pub async fn delete_cargo(&self, id: u64) -> Result<(), StoreError> {
        sqlx::query("UPDATE cargos SET deleted_at = ? WHERE id = ?")
            .bind(Utc::now().to_rfc3339())
            .bind(id as i64)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }

    /// Live (not soft-deleted) cargo `id`.
    pub async fn cargo(&self, id: u64) -> Result<Option<CargoRow>, StoreError> {
        let row = sqlx::query(
            "SELECT id, status, description_ipfs_hash FROM cargos
             WHERE id = ? AND deleted_at IS NULL",
        )
        .bind(id as i64)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        row.map(|r| {
            let status: String = r.try_get("status").map_err(db_err)?;
            Ok(CargoRow {
                id: r.try_get::<i64, _>("id").map_err(db_err)? as u64,
                status: status.parse::<CargoStatus>().map_err(StoreError::Database)?,
                description_ipfs_hash: r.try_get("description_ipfs_hash").map_err(db_err)?,
            })
        })
        .transpose()
    }

    // ─── Event queries ──────────────────────────────────────────────────────────

    /// Records for one cargo, ordered by block and log index.
    pub async fn records_for_entity(&self, entity_id: u64) -> Result<Vec<EventRecord>, StoreError> {
        let rows = sqlx::query(
            "SELECT event_type, cargo_id, tx_hash, block_number, event_index, sender_address, data
             FROM events WHERE cargo_id = ? ORDER BY block_number, event_index",
        )
        .bind(entity_id as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            let data: String = row.try_get("data").map_err(db_err)?;
            records.push(EventRecord {
                event_type: row.try_get("event_type").map_err(db_err)?,
                entity_id: row.try_get::<i64, _>("cargo_id").map_err(db_err)? as u64,
                tx_hash: row.try_get("tx_hash").map_err(db_err)?,
                block_number: row.try_get::<i64, _>("block_number").map_err(db_err)? as u64,
                log_index: row.try_get::<i64, _>("event_index").map_err(db_err)? as u32,
                sender_address: row.try_get("sender_address").map_err(db_err)?,
                payload: serde_json::from_str(&data)
                    .map_err(|e| StoreError::Serialize(e.to_string()))?,
            });
        }
        Ok(records)
    }

    pub async fn record_count(&self) -> Result<u64, StoreError> {
        let row = sqlx::query("SELECT COUNT(*) AS cnt FROM events")
            .fetch_one(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(row.try_get::<i64, _>("cnt").map_err(db_err)? as u64)
    }

    pub async fn dead_letter_count(&self) -> Result<u64, StoreError> {
        let row = sqlx::query("SELECT COUNT(*) AS cnt FROM event_dead_letters")
            .fetch_one(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(row.try_get::<i64, _>("cnt").map_err(db_err)? as u64)
    }
}

// ─── Trait impls ─────────────────────────────────────────────────────────────

#[async_trait]
impl EventStore for SqliteStorage {
    async fn append(&self, record: &EventRecord) -> Result<AppendOutcome, StoreError> {
        let data = serde_json::to_string(&record.payload)
            .map_err(|e| StoreError::Serialize(e.to_string()))?;

        let result = sqlx::query(
            "INSERT INTO events
             (event_type, cargo_id, tx_hash, block_number, event_index, sender_address, data, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT (tx_hash, event_index) DO NOTHING",
        )
        .bind(&record.event_type)
        .bind(record.entity_id as i64)
        .bind(&record.tx_hash)
        .bind(record.block_number as i64)
        .bind(record.log_index as i64)
        .bind(&record.sender_address)
        .bind(&data)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        if result.rows_affected() == 0 {
            return Ok(AppendOutcome::Duplicate);
        }
        debug!(tx_hash = %record.tx_hash, log_index = record.log_index, "event stored");
        Ok(AppendOutcome::Inserted)
    }
}

#[async_trait]
impl EntityMutator for SqliteStorage {
    async fn apply(&self, entity_id: u64, change: &EntityChange) -> Result<(), MutationError> {
        let (sql, value) = match change {
            EntityChange::Status(status) => (
                "UPDATE cargos SET status = ?, updated_at = ? WHERE id = ? AND deleted_at IS NULL",
                status.as_str().to_string(),
            ),
            EntityChange::DescriptionHash(hash) => (
                "UPDATE cargos SET description_ipfs_hash = ?, updated_at = ? WHERE id = ? AND deleted_at IS NULL",
                hash.clone(),
            ),
        };

        let result = sqlx::query(sql)
            .bind(value)
            .bind(Utc::now().to_rfc3339())
            .bind(entity_id as i64)
            .execute(&self.pool)
            .await
            .map_err(|e| MutationError::Storage(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(MutationError::NotFound { entity_id });
        }
        Ok(())
    }
}

#[async_trait]
impl DeadLetterSink for SqliteStorage {
    async fn dead_letter(&self, letter: &DeadLetter) -> Result<(), StoreError> {
        let record = serde_json::to_string(&letter.record)
            .map_err(|e| StoreError::Serialize(e.to_string()))?;

        sqlx::query(
            "INSERT INTO event_dead_letters (tx_hash, event_index, record, error, attempts, created_at)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&letter.record.tx_hash)
        .bind(letter.record.log_index as i64)
        .bind(&record)
        .bind(&letter.error)
        .bind(letter.attempts as i64)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
