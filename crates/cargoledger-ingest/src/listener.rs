//! `LogSubscriber` trait: abstraction over the node connection that feeds
//! the pipeline.
//!
//! A subscriber produces a [`LogSubscription`]: a bounded channel of raw log
//! entries in node order, a separate channel carrying the terminal transport
//! error, and a closer that tears the connection down.

use async_trait::async_trait;
use cargoledger_core::{error::StreamError, event::RawLogEntry};
use std::time::Duration;
use tokio::{sync::mpsc, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Opens live log subscriptions for one contract.
#[async_trait]
pub trait LogSubscriber: Send + Sync {
    /// Establish the subscription. Returns only once the node has confirmed
    /// it; a rejected filter is `StreamError::Rejected`.
    async fn open(&self) -> Result<LogSubscription, StreamError>;

    /// Endpoint description for logs.
    fn endpoint(&self) -> &str;
}

/// A confirmed, running subscription.
pub struct LogSubscription {
    /// Raw entries in delivery order.
    pub entries: mpsc::Receiver<RawLogEntry>,
    /// At most one terminal error; the entry channel closes after it.
    pub errors: mpsc::Receiver<StreamError>,
    closer: SubscriptionCloser,
}

impl LogSubscription {
    /// Wrap the receiving ends of a subscription. `cancel` stops the reader
    /// task, `task` is awaited on close.
    pub fn new(
        entries: mpsc::Receiver<RawLogEntry>,
        errors: mpsc::Receiver<StreamError>,
        cancel: CancellationToken,
        task: JoinHandle<()>,
    ) -> Self {
        Self {
            entries,
            errors,
            closer: SubscriptionCloser { cancel, task },
        }
    }

    /// Stop the reader task and wait at most `timeout` for it to finish.
    /// Returns `false` if the task had to be aborted.
    pub async fn close(self, timeout: Duration) -> bool {
        self.closer.close(timeout).await
    }
}

struct SubscriptionCloser {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl SubscriptionCloser {
    async fn close(self, timeout: Duration) -> bool {
        self.cancel.cancel();
        let abort = self.task.abort_handle();
        match tokio::time::timeout(timeout, self.task).await {
            Ok(_) => {
                debug!("subscription closed");
                true
            }
            Err(_) => {
                warn!(timeout_ms = timeout.as_millis() as u64, "subscription close timed out; aborting reader");
                abort.abort();
                false
            }
        }
    }
}
