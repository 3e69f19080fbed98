//! # cargoledger-ingest
//!
//! Long-running ingestion of CargoLedger contract events.
//!
//! A [`LogSubscriber`] (the WebSocket [`EvmWsListener`] in production) feeds
//! raw logs in node order to a [`Dispatcher`], which decodes them against the
//! loaded ABI, appends an idempotent event record, and applies the cargo
//! change for lifecycle events. [`IngestPipeline`] runs that loop as one
//! cancellable task; [`supervise`] restarts it after transport failures.

pub mod config;
pub mod dispatcher;
pub mod listener;
pub mod metrics;
pub mod pipeline;
pub mod retry;
pub mod supervisor;
pub mod ws_listener;

pub use config::{PipelineConfig, RetryConfig, SupervisorConfig};
pub use dispatcher::{Backends, Dispatcher, LogOutcome, MutationOutcome};
pub use listener::{LogSubscriber, LogSubscription};
pub use metrics::{MetricsSnapshot, PipelineMetrics};
pub use pipeline::{IngestPipeline, PipelineHandle};
pub use retry::RetryPolicy;
pub use supervisor::supervise;
pub use ws_listener::EvmWsListener;
