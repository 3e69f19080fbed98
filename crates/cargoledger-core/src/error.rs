//! Error taxonomy for the ingestion pipeline.
//!
//! Pre-start errors (`ConfigError`, `SchemaError`) abort initialisation.
//! `StreamError` ends the current pipeline instance. Everything else is
//! per-log and is contained by the dispatcher.

use thiserror::Error;

/// Invalid or missing pipeline configuration. Fatal, raised before any
/// connection attempt.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("no contract address configured")]
    MissingContractAddress,

    #[error("invalid contract address '{value}': {reason}")]
    InvalidContractAddress { value: String, reason: String },

    #[error("no node endpoint configured")]
    MissingEndpoint,

    #[error("invalid node endpoint '{value}': {reason}")]
    InvalidEndpoint { value: String, reason: String },

    #[error("invalid setting '{field}': {reason}")]
    Invalid { field: String, reason: String },
}

/// The contract interface document could not be turned into a usable
/// event table. Fatal, raised before the subscription is opened.
#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("failed to read interface document: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed interface document: {0}")]
    Malformed(String),

    #[error("interface document declares no decodable events")]
    Empty,

    #[error("event '{event}' argument '{param}' has unsupported type '{ty}'")]
    UnsupportedType {
        event: String,
        param: String,
        ty: String,
    },
}

/// Subscription and transport failures. Terminal for the pipeline instance.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StreamError {
    #[error("connection to {url} failed: {reason}")]
    ConnectionFailed { url: String, reason: String },

    #[error("node rejected log subscription ({code}): {message}")]
    Rejected { code: i64, message: String },

    #[error("{operation} timed out after {ms}ms")]
    Timeout { operation: String, ms: u64 },

    #[error("subscription closed by node")]
    Closed,

    #[error("transport error: {0}")]
    Transport(String),
}

impl StreamError {
    /// Whether restarting the pipeline could plausibly succeed.
    /// A filter rejection will be rejected again.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::Rejected { .. })
    }
}

/// A raw log matched a known signature but could not be unpacked.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("invalid topic hex '{topic}': {reason}")]
    InvalidTopic { topic: String, reason: String },

    #[error("event '{event}' expects {expected} topics, log has {got}")]
    TopicCount {
        event: String,
        expected: usize,
        got: usize,
    },

    #[error("ABI decode failed for '{event}': {reason}")]
    AbiDecodeFailed { event: String, reason: String },

    #[error("event '{event}' is missing field '{field}'")]
    MissingField { event: String, field: String },

    #[error("event '{event}' field '{field}' has an unexpected value: {reason}")]
    InvalidField {
        event: String,
        field: String,
        reason: String,
    },
}

/// The event store or dead-letter sink could not be written.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(String),

    #[error("failed to serialize record: {0}")]
    Serialize(String),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Outcome of a conditional entity update that did not apply.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MutationError {
    /// No entity with this id exists (yet). Expected when a ledger event
    /// races ahead of the off-chain creation path.
    #[error("cargo {entity_id} not found")]
    NotFound { entity_id: u64 },

    #[error("entity store error: {0}")]
    Storage(String),
}

impl MutationError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// Errors that end pipeline start-up or a running pipeline instance.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("schema error: {0}")]
    Schema(#[from] SchemaError),

    #[error("subscription error: {0}")]
    Subscription(#[from] StreamError),

    #[error("pipeline task failed: {0}")]
    Task(String),
}

impl PipelineError {
    /// Errors a supervisor may answer with a restart.
    pub fn is_restartable(&self) -> bool {
        match self {
            Self::Subscription(e) => e.is_retryable(),
            Self::Task(_) => true,
            Self::Config(_) | Self::Schema(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejection_is_not_restartable() {
        let err = PipelineError::from(StreamError::Rejected {
            code: -32601,
            message: "the method eth_subscribe does not exist".into(),
        });
        assert!(!err.is_restartable());
    }

    #[test]
    fn disconnect_is_restartable() {
        assert!(PipelineError::from(StreamError::Closed).is_restartable());
        assert!(!PipelineError::from(ConfigError::MissingContractAddress).is_restartable());
    }

    #[test]
    fn not_found_is_distinct_from_storage() {
        assert!(MutationError::NotFound { entity_id: 3 }.is_not_found());
        assert!(!MutationError::Storage("connection reset".into()).is_not_found());
    }
}
