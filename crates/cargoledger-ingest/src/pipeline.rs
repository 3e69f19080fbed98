//! `IngestPipeline`: one ordered, cancellable ingestion task per contract.
//!
//! ```text
//! LogSubscriber ──entries──▶ Dispatcher ──▶ EventStore ──▶ EntityMutator
//!               ──errors───▶ (terminal: surfaced from PipelineHandle::join)
//! ```

use crate::{
    config::PipelineConfig,
    dispatcher::{Backends, Dispatcher},
    listener::{LogSubscriber, LogSubscription},
    metrics::{MetricsSnapshot, PipelineMetrics},
};
use cargoledger_core::{
    error::{PipelineError, StreamError},
    interface::ContractInterface,
};
use std::{sync::Arc, time::Duration};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Immutable context for running the pipeline, possibly many times under a
/// supervisor.
pub struct IngestPipeline {
    config: PipelineConfig,
    subscriber: Arc<dyn LogSubscriber>,
    dispatcher: Arc<Dispatcher>,
    metrics: Arc<PipelineMetrics>,
}

impl IngestPipeline {
    /// Build a pipeline. The config is validated here, before anything
    /// touches the network.
    pub fn new(
        config: PipelineConfig,
        interface: Arc<ContractInterface>,
        subscriber: Arc<dyn LogSubscriber>,
        backends: Backends,
    ) -> Result<Self, PipelineError> {
        config.validate()?;
        let metrics = Arc::new(PipelineMetrics::default());
        let dispatcher = Arc::new(Dispatcher::new(
            &config,
            interface,
            backends,
            Arc::clone(&metrics),
        ));
        Ok(Self {
            config,
            subscriber,
            dispatcher,
            metrics,
        })
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Open the subscription and spawn the processing task.
    ///
    /// Errors here are pre-start: the subscription was never confirmed and
    /// no log was processed.
    pub async fn start(&self, cancel: CancellationToken) -> Result<PipelineHandle, PipelineError> {
        info!(
            endpoint = %self.subscriber.endpoint(),
            contract = %self.config.contract_address,
            "starting ingestion pipeline"
        );
        let subscription = self.subscriber.open().await?;

        let task = tokio::spawn(run_loop(
            subscription,
            Arc::clone(&self.dispatcher),
            cancel.clone(),
            self.config.close_timeout(),
        ));

        Ok(PipelineHandle { cancel, task })
    }

    /// Start and wait for the pipeline to end.
    pub async fn run(&self, cancel: CancellationToken) -> Result<(), PipelineError> {
        self.start(cancel).await?.join().await
    }
}

/// Handle to a running pipeline task.
pub struct PipelineHandle {
    cancel: CancellationToken,
    task: JoinHandle<Result<(), PipelineError>>,
}

impl PipelineHandle {
    /// Request shutdown. The in-flight log is finished (or dead-lettered if
    /// it is waiting on an append retry) and the subscription closed.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    /// Wait for the task to end. `Ok(())` after a requested shutdown; the
    /// terminal transport error otherwise. The subscription is closed
    /// before this returns.
    pub async fn join(self) -> Result<(), PipelineError> {
        match self.task.await {
            Ok(result) => result,
            Err(e) => Err(PipelineError::Task(e.to_string())),
        }
    }
}

async fn run_loop(
    mut subscription: LogSubscription,
    dispatcher: Arc<Dispatcher>,
    cancel: CancellationToken,
    close_timeout: Duration,
) -> Result<(), PipelineError> {
    let mut errors_open = true;

    let result = loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                let dropped = subscription.entries.len();
                if dropped > 0 {
                    warn!(dropped, "shutdown with buffered logs; they were not processed");
                }
                info!("pipeline shutdown requested");
                break Ok(());
            }
            entry = subscription.entries.recv() => match entry {
                Some(raw) => {
                    let outcome = dispatcher.handle(&raw, &cancel).await;
                    debug!(tx_hash = %raw.tx_hash, log_index = raw.log_index, ?outcome, "log processed");
                }
                None => {
                    let err = subscription.errors.try_recv().unwrap_or(StreamError::Closed);
                    warn!(error = %err, "subscription ended");
                    break Err(PipelineError::Subscription(err));
                }
            },
            err = subscription.errors.recv(), if errors_open => match err {
                // Entries are preferred above, so anything buffered before
                // the failure has already been processed.
                Some(err) => {
                    warn!(error = %err, "subscription failed");
                    break Err(PipelineError::Subscription(err));
                }
                None => errors_open = false,
            },
        }
    };

    if !subscription.close(close_timeout).await {
        warn!("subscription did not close cleanly");
    }
    info!(?result, "pipeline stopped");
    result
}
