//! Per-log processing: decode, classify through the closed [`CargoEvent`]
//! table, append the record, then apply the entity change.
//!
//! Per-log failures never escape [`Dispatcher::handle`]; each becomes a
//! [`LogOutcome`] and a structured log line.

use crate::{config::PipelineConfig, metrics::PipelineMetrics, retry::RetryPolicy};
use cargoledger_core::{
    cargo::{CargoEvent, EntityChange},
    error::{DecodeError, MutationError, StoreError},
    event::{EventFingerprint, EventRecord, RawLogEntry},
    interface::ContractInterface,
    store::{AppendOutcome, DeadLetter, DeadLetterSink, EntityMutator, EventStore},
};
use cargoledger_evm::{DecodeOutcome, EvmDecoder};
use std::{sync::Arc, time::Duration};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// The storage collaborators a pipeline writes through.
#[derive(Clone)]
pub struct Backends {
    pub events: Arc<dyn EventStore>,
    pub entities: Arc<dyn EntityMutator>,
    pub dead_letters: Arc<dyn DeadLetterSink>,
}

impl Backends {
    /// Use one backend for all three roles.
    pub fn shared<S>(store: Arc<S>) -> Self
    where
        S: EventStore + EntityMutator + DeadLetterSink + 'static,
    {
        Self {
            events: store.clone(),
            entities: store.clone(),
            dead_letters: store,
        }
    }
}

/// What happened to one raw log.
#[derive(Debug, Clone, PartialEq)]
pub enum LogOutcome {
    /// Record appended; `mutation` tells what happened to the cargo.
    Stored {
        event: &'static str,
        entity_id: u64,
        mutation: MutationOutcome,
    },
    /// The (tx hash, log index) was already recorded; nothing re-applied.
    Duplicate { event: &'static str, entity_id: u64 },
    /// Signature not in the interface, or no topics at all.
    Unknown { fingerprint: Option<EventFingerprint> },
    /// Declared in the interface but not in the handler table.
    Unhandled { event: String },
    DecodeFailed {
        event: Option<String>,
        error: DecodeError,
    },
    /// Persistence retries exhausted; the record went to the dead-letter sink.
    DeadLettered {
        event: &'static str,
        entity_id: u64,
        attempts: u32,
    },
    /// Shutdown arrived while waiting to retry the append; the record went
    /// to the dead-letter sink without waiting out the backoff.
    Abandoned { event: &'static str, entity_id: u64 },
}

/// Result of the entity update following a fresh append.
#[derive(Debug, Clone, PartialEq)]
pub enum MutationOutcome {
    /// The event kind carries no entity change.
    NotRequired,
    Applied,
    /// The cargo does not exist (after any configured retries).
    NotFound { attempts: u32 },
    /// The entity store kept failing; the event record stands.
    Failed(String),
    /// Shutdown arrived while waiting to retry the update.
    Abandoned,
}

pub struct Dispatcher {
    interface: Arc<ContractInterface>,
    decoder: EvmDecoder,
    backends: Backends,
    persistence: RetryPolicy,
    not_found_retries: u32,
    not_found_backoff: Duration,
    metrics: Arc<PipelineMetrics>,
}

impl Dispatcher {
    pub fn new(
        config: &PipelineConfig,
        interface: Arc<ContractInterface>,
        backends: Backends,
        metrics: Arc<PipelineMetrics>,
    ) -> Self {
        Self {
            interface,
            decoder: EvmDecoder::new(),
            backends,
            persistence: RetryPolicy::new(config.persistence_retry.clone()),
            not_found_retries: config.not_found_retries,
            not_found_backoff: config.not_found_backoff(),
            metrics,
        }
    }

    /// Process one log to completion. `cancel` is only observed while
    /// waiting between retries.
    pub async fn handle(&self, raw: &RawLogEntry, cancel: &CancellationToken) -> LogOutcome {
        self.metrics.record_received();

        let decoded = match self.decoder.decode(raw, &self.interface) {
            DecodeOutcome::Decoded(event) => event,
            DecodeOutcome::Unknown { fingerprint } => {
                self.metrics.record_unknown();
                warn!(
                    tx_hash = %raw.tx_hash,
                    log_index = raw.log_index,
                    fingerprint = ?fingerprint.as_ref().map(EventFingerprint::as_hex),
                    "unknown event signature; skipping"
                );
                return LogOutcome::Unknown { fingerprint };
            }
            DecodeOutcome::Malformed { event, error } => {
                return self.decode_failed(raw, event, error);
            }
        };

        let cargo_event = match CargoEvent::from_decoded(&decoded) {
            Ok(Some(ev)) => ev,
            Ok(None) => {
                self.metrics.record_unhandled();
                info!(
                    tx_hash = %raw.tx_hash,
                    log_index = raw.log_index,
                    event = %decoded.name,
                    "unhandled event; skipping"
                );
                return LogOutcome::Unhandled {
                    event: decoded.name,
                };
            }
            Err(error) => return self.decode_failed(raw, Some(decoded.name), error),
        };

        let event = cargo_event.name();
        let entity_id = cargo_event.cargo_id();
        let record = EventRecord::new(raw, &decoded, entity_id);

        match self.append_with_retry(&record, cancel).await {
            Appended::Inserted => {}
            Appended::Duplicate => {
                self.metrics.record_duplicate();
                debug!(
                    tx_hash = %raw.tx_hash,
                    log_index = raw.log_index,
                    event,
                    "event already recorded; skipping mutation"
                );
                return LogOutcome::Duplicate { event, entity_id };
            }
            Appended::DeadLettered { attempts } => {
                return LogOutcome::DeadLettered {
                    event,
                    entity_id,
                    attempts,
                };
            }
            Appended::Abandoned => {
                self.metrics.record_abandoned();
                return LogOutcome::Abandoned { event, entity_id };
            }
        }

        self.metrics.record_stored();
        info!(
            tx_hash = %raw.tx_hash,
            log_index = raw.log_index,
            block = raw.block_number,
            event,
            cargo_id = entity_id,
            "event recorded"
        );

        let mutation = match cargo_event.change() {
            None => MutationOutcome::NotRequired,
            Some(change) => self.mutate_with_retry(raw, entity_id, &change, cancel).await,
        };

        LogOutcome::Stored {
            event,
            entity_id,
            mutation,
        }
    }

    fn decode_failed(&self, raw: &RawLogEntry, event: Option<String>, error: DecodeError) -> LogOutcome {
        self.metrics.record_decode_error();
        warn!(
            tx_hash = %raw.tx_hash,
            log_index = raw.log_index,
            event = event.as_deref().unwrap_or("?"),
            error = %error,
            "failed to decode log; skipping"
        );
        LogOutcome::DecodeFailed { event, error }
    }

    async fn append_with_retry(&self, record: &EventRecord, cancel: &CancellationToken) -> Appended {
        let mut attempt = 0u32;
        loop {
            let err: StoreError = match self.backends.events.append(record).await {
                Ok(AppendOutcome::Inserted) => return Appended::Inserted,
                Ok(AppendOutcome::Duplicate) => return Appended::Duplicate,
                Err(e) => e,
            };
            attempt += 1;

            let Some(delay) = self.persistence.next_delay(attempt) else {
                error!(
                    tx_hash = %record.tx_hash,
                    log_index = record.log_index,
                    attempts = attempt,
                    error = %err,
                    "event append retries exhausted; dead-lettering"
                );
                self.dead_letter(record, &err, attempt).await;
                return Appended::DeadLettered { attempts: attempt };
            };

            warn!(
                tx_hash = %record.tx_hash,
                log_index = record.log_index,
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "event append failed; retrying"
            );
            if !sleep_or_cancel(delay, cancel).await {
                warn!(
                    tx_hash = %record.tx_hash,
                    log_index = record.log_index,
                    attempts = attempt,
                    error = %err,
                    "shutdown during append retry; dead-lettering"
                );
                self.dead_letter(record, &err, attempt).await;
                return Appended::Abandoned;
            }
        }
    }

    async fn dead_letter(&self, record: &EventRecord, err: &StoreError, attempts: u32) {
        self.metrics.record_dead_letter();
        let letter = DeadLetter {
            record: record.clone(),
            error: err.to_string(),
            attempts,
        };
        if let Err(dl_err) = self.backends.dead_letters.dead_letter(&letter).await {
            let json = serde_json::to_string(record).unwrap_or_else(|_| format!("{record:?}"));
            error!(
                tx_hash = %record.tx_hash,
                log_index = record.log_index,
                error = %dl_err,
                record = %json,
                "dead-letter write failed; event lost"
            );
        }
    }

    async fn mutate_with_retry(
        &self,
        raw: &RawLogEntry,
        entity_id: u64,
        change: &EntityChange,
        cancel: &CancellationToken,
    ) -> MutationOutcome {
        let mut not_found_attempts = 0u32;
        let mut storage_attempts = 0u32;
        loop {
            let delay = match self.backends.entities.apply(entity_id, change).await {
                Ok(()) => {
                    debug!(cargo_id = entity_id, %change, "cargo updated");
                    return MutationOutcome::Applied;
                }
                Err(MutationError::NotFound { .. }) => {
                    not_found_attempts += 1;
                    if not_found_attempts > self.not_found_retries {
                        self.metrics.record_not_found();
                        warn!(
                            tx_hash = %raw.tx_hash,
                            log_index = raw.log_index,
                            cargo_id = entity_id,
                            %change,
                            attempts = not_found_attempts,
                            "cargo not found; change needs reconciliation"
                        );
                        return MutationOutcome::NotFound {
                            attempts: not_found_attempts,
                        };
                    }
                    debug!(cargo_id = entity_id, attempt = not_found_attempts, "cargo not found yet; retrying");
                    self.not_found_backoff
                }
                Err(MutationError::Storage(reason)) => {
                    storage_attempts += 1;
                    match self.persistence.next_delay(storage_attempts) {
                        Some(delay) => {
                            warn!(cargo_id = entity_id, attempt = storage_attempts, error = %reason, "cargo update failed; retrying");
                            delay
                        }
                        None => {
                            self.metrics.record_mutation_error();
                            error!(
                                tx_hash = %raw.tx_hash,
                                log_index = raw.log_index,
                                cargo_id = entity_id,
                                %change,
                                error = %reason,
                                "cargo update failed; record kept without its change"
                            );
                            return MutationOutcome::Failed(reason);
                        }
                    }
                }
            };

            if !sleep_or_cancel(delay, cancel).await {
                self.metrics.record_abandoned();
                warn!(
                    tx_hash = %raw.tx_hash,
                    log_index = raw.log_index,
                    cargo_id = entity_id,
                    "shutdown during cargo update retry; abandoning change"
                );
                return MutationOutcome::Abandoned;
            }
        }
    }
}

enum Appended {
    Inserted,
    Duplicate,
    DeadLettered { attempts: u32 },
    Abandoned,
}

/// `false` if `cancel` fired before `delay` elapsed.
async fn sleep_or_cancel(delay: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(delay) => true,
    }
}
