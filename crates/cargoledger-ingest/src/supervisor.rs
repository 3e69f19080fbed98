//! Restart-with-backoff layer around [`IngestPipeline::run`].
//!
//! Transport failures (disconnects, timeouts, refused connections) restart
//! the pipeline after a capped exponential delay. Configuration errors, a
//! filter rejected by the node, and cancellation end supervision.

use crate::{config::SupervisorConfig, pipeline::IngestPipeline, retry::RetryPolicy};
use cargoledger_core::error::PipelineError;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Run `pipeline` until `cancel` fires or a non-restartable error occurs.
pub async fn supervise(
    pipeline: &IngestPipeline,
    config: &SupervisorConfig,
    cancel: CancellationToken,
) -> Result<(), PipelineError> {
    let schedule = RetryPolicy::new(config.restart_schedule());
    let mut restarts = 0u32;
    // Backoff step; reset whenever a run made progress.
    let mut step = 0u32;

    loop {
        let received_before = pipeline.metrics().received;
        let result = pipeline.run(cancel.clone()).await;

        if cancel.is_cancelled() {
            info!(restarts, "supervisor stopping: shutdown requested");
            return result;
        }

        let err = match result {
            Ok(()) => {
                // Only a requested shutdown ends a run cleanly.
                return Ok(());
            }
            Err(e) if !e.is_restartable() => {
                error!(error = %e, "pipeline failed permanently");
                return Err(e);
            }
            Err(e) => e,
        };

        if pipeline.metrics().received > received_before {
            step = 0;
        }
        step += 1;
        restarts += 1;

        let Some(delay) = schedule.next_delay(step).filter(|_| schedule.should_retry(restarts)) else {
            error!(restarts, error = %err, "restart limit reached");
            return Err(err);
        };

        warn!(
            restarts,
            delay_ms = delay.as_millis() as u64,
            error = %err,
            "pipeline stopped; restarting"
        );
        tokio::select! {
            _ = cancel.cancelled() => {
                info!("supervisor stopping during restart backoff");
                return Ok(());
            }
            _ = tokio::time::sleep(delay) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::PipelineConfig,
        dispatcher::Backends,
        listener::{LogSubscriber, LogSubscription},
    };
    use async_trait::async_trait;
    use cargoledger_core::{error::StreamError, interface::ContractInterface};
    use cargoledger_evm::AbiLoader;
    use cargoledger_storage::InMemoryStorage;
    use parking_lot::Mutex;
    use std::sync::Arc;

    const ABI: &str = r#"[{"type": "event", "name": "CargoCreated", "anonymous": false, "inputs": [
        {"name": "cargoId", "type": "uint256", "indexed": false}
    ]}]"#;

    /// Fails `open` with the queued errors, one per call.
    struct FailingSubscriber {
        errors: Mutex<Vec<StreamError>>,
        opens: Mutex<u32>,
    }

    #[async_trait]
    impl LogSubscriber for FailingSubscriber {
        async fn open(&self) -> Result<LogSubscription, StreamError> {
            *self.opens.lock() += 1;
            Err(self.errors.lock().pop().unwrap_or(StreamError::Closed))
        }

        fn endpoint(&self) -> &str {
            "failing://"
        }
    }

    fn pipeline(errors: Vec<StreamError>) -> (IngestPipeline, Arc<FailingSubscriber>) {
        let subscriber = Arc::new(FailingSubscriber {
            errors: Mutex::new(errors),
            opens: Mutex::new(0),
        });
        let iface: Arc<ContractInterface> = Arc::new(AbiLoader::from_json_str(ABI).unwrap());
        let p = IngestPipeline::new(
            PipelineConfig::new("ws://localhost:8545", "0x5FbDB2315678afecb367f032d93F642f64180aa3"),
            iface,
            subscriber.clone(),
            Backends::shared(Arc::new(InMemoryStorage::new())),
        )
        .unwrap();
        (p, subscriber)
    }

    fn fast(max_restarts: Option<u32>) -> SupervisorConfig {
        SupervisorConfig {
            max_restarts,
            initial_backoff_ms: 1,
            max_backoff_ms: 4,
        }
    }

    #[tokio::test]
    async fn gives_up_after_max_restarts() {
        let (p, subscriber) = pipeline(Vec::new());
        let err = supervise(&p, &fast(Some(3)), CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Subscription(StreamError::Closed)));
        // First run plus three restarts.
        assert_eq!(*subscriber.opens.lock(), 4);
    }

    #[tokio::test]
    async fn rejection_is_not_retried() {
        let (p, subscriber) = pipeline(vec![StreamError::Rejected {
            code: -32601,
            message: "method not found".into(),
        }]);
        let err = supervise(&p, &fast(None), CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Subscription(StreamError::Rejected { .. })));
        assert_eq!(*subscriber.opens.lock(), 1);
    }

    #[tokio::test]
    async fn cancellation_during_backoff_stops_cleanly() {
        let (p, _) = pipeline(Vec::new());
        let cancel = CancellationToken::new();
        let config = SupervisorConfig {
            max_restarts: None,
            initial_backoff_ms: 60_000,
            max_backoff_ms: 60_000,
        };
        let stopper = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            stopper.cancel();
        });
        supervise(&p, &config, cancel).await.unwrap();
    }
}
