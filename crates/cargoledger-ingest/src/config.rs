//! Pipeline configuration.

use cargoledger_core::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Settings for one ingestion pipeline (one contract on one node).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// WebSocket JSON-RPC endpoint, e.g. "wss://eth-sepolia.example/ws"
    #[serde(default)]
    pub node_url: String,
    /// Contract whose logs are ingested (0x-prefixed, 20 bytes)
    #[serde(default)]
    pub contract_address: String,
    /// Capacity of the subscription → dispatcher channel
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
    /// Bound on connecting and awaiting the subscription confirmation
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// Bound on closing the subscription at shutdown
    #[serde(default = "default_close_timeout_ms")]
    pub close_timeout_ms: u64,
    /// Retry schedule for event-store writes
    #[serde(default)]
    pub persistence_retry: RetryConfig,
    /// Extra attempts when the target cargo does not exist yet (0 = log only)
    #[serde(default)]
    pub not_found_retries: u32,
    /// Fixed delay between not-found attempts
    #[serde(default = "default_not_found_backoff_ms")]
    pub not_found_backoff_ms: u64,
}

fn default_channel_capacity() -> usize { 1_024 }
fn default_connect_timeout_ms() -> u64 { 10_000 }
fn default_close_timeout_ms() -> u64 { 5_000 }
fn default_not_found_backoff_ms() -> u64 { 1_000 }

impl PipelineConfig {
    /// Config with defaults for everything but the endpoint and contract.
    pub fn new(node_url: impl Into<String>, contract_address: impl Into<String>) -> Self {
        Self {
            node_url: node_url.into(),
            contract_address: contract_address.into(),
            channel_capacity: default_channel_capacity(),
            connect_timeout_ms: default_connect_timeout_ms(),
            close_timeout_ms: default_close_timeout_ms(),
            persistence_retry: RetryConfig::default(),
            not_found_retries: 0,
            not_found_backoff_ms: default_not_found_backoff_ms(),
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn close_timeout(&self) -> Duration {
        Duration::from_millis(self.close_timeout_ms)
    }

    pub fn not_found_backoff(&self) -> Duration {
        Duration::from_millis(self.not_found_backoff_ms)
    }

    /// Check the config before any connection is attempted.
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_endpoint(&self.node_url)?;
        validate_contract_address(&self.contract_address)?;
        if self.channel_capacity == 0 {
            return Err(ConfigError::Invalid {
                field: "channel_capacity".into(),
                reason: "must be at least 1".into(),
            });
        }
        if self.connect_timeout_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "connect_timeout_ms".into(),
                reason: "must be positive".into(),
            });
        }
        self.persistence_retry.validate()
    }
}

/// Exponential backoff schedule, in milliseconds so it reads naturally from
/// YAML.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Retries after the first attempt
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    /// Cap on any single delay
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
}

fn default_max_retries() -> u32 { 5 }
fn default_initial_backoff_ms() -> u64 { 200 }
fn default_max_backoff_ms() -> u64 { 10_000 }
fn default_multiplier() -> f64 { 2.0 }

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            multiplier: default_multiplier(),
        }
    }
}

impl RetryConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.multiplier.is_finite() && self.multiplier >= 1.0) {
            return Err(ConfigError::Invalid {
                field: "persistence_retry.multiplier".into(),
                reason: format!("must be a finite number >= 1.0, got {}", self.multiplier),
            });
        }
        if self.max_backoff_ms < self.initial_backoff_ms {
            return Err(ConfigError::Invalid {
                field: "persistence_retry.max_backoff_ms".into(),
                reason: "must not be below initial_backoff_ms".into(),
            });
        }
        Ok(())
    }
}

/// Restart policy for a supervised pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SupervisorConfig {
    /// Give up after this many restarts (None = never)
    #[serde(default)]
    pub max_restarts: Option<u32>,
    #[serde(default = "default_restart_initial_ms")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_restart_max_ms")]
    pub max_backoff_ms: u64,
}

fn default_restart_initial_ms() -> u64 { 500 }
fn default_restart_max_ms() -> u64 { 60_000 }

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            max_restarts: None,
            initial_backoff_ms: default_restart_initial_ms(),
            max_backoff_ms: default_restart_max_ms(),
        }
    }
}

impl SupervisorConfig {
    /// The restart schedule as a retry config: doubling, capped, unbounded
    /// unless `max_restarts` is set.
    pub fn restart_schedule(&self) -> RetryConfig {
        RetryConfig {
            max_retries: self.max_restarts.unwrap_or(u32::MAX),
            initial_backoff_ms: self.initial_backoff_ms,
            max_backoff_ms: self.max_backoff_ms,
            multiplier: 2.0,
        }
    }
}

fn validate_endpoint(raw: &str) -> Result<(), ConfigError> {
    if raw.trim().is_empty() {
        return Err(ConfigError::MissingEndpoint);
    }
    let url = url::Url::parse(raw).map_err(|e| ConfigError::InvalidEndpoint {
        value: raw.to_string(),
        reason: e.to_string(),
    })?;
    match url.scheme() {
        "ws" | "wss" => Ok(()),
        other => Err(ConfigError::InvalidEndpoint {
            value: raw.to_string(),
            reason: format!("expected a ws:// or wss:// URL, got scheme `{other}`"),
        }),
    }
}

fn validate_contract_address(raw: &str) -> Result<(), ConfigError> {
    if raw.trim().is_empty() {
        return Err(ConfigError::MissingContractAddress);
    }
    let invalid = |reason: &str| ConfigError::InvalidContractAddress {
        value: raw.to_string(),
        reason: reason.to_string(),
    };
    let hex_part = raw.strip_prefix("0x").ok_or_else(|| invalid("missing 0x prefix"))?;
    if hex_part.len() != 40 {
        return Err(invalid("expected 20 bytes (40 hex digits)"));
    }
    if !hex_part.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(invalid("contains non-hex characters"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONTRACT: &str = "0x5FbDB2315678afecb367f032d93F642f64180aa3";

    #[test]
    fn defaults_from_empty_yaml_fields() {
        let cfg: PipelineConfig = serde_json::from_str(&format!(
            r#"{{"node_url": "ws://localhost:8545", "contract_address": "{CONTRACT}"}}"#
        ))
        .unwrap();
        assert_eq!(cfg, PipelineConfig::new("ws://localhost:8545", CONTRACT));
        assert_eq!(cfg.channel_capacity, 1_024);
        assert_eq!(cfg.persistence_retry.max_retries, 5);
        assert_eq!(cfg.close_timeout(), Duration::from_secs(5));
        cfg.validate().unwrap();
    }

    #[test]
    fn contract_address_is_checked_before_connecting() {
        let missing = PipelineConfig::new("ws://localhost:8545", "");
        assert!(matches!(missing.validate(), Err(ConfigError::MissingContractAddress)));

        let not_hex = PipelineConfig::new("ws://localhost:8545", "0xZZbDB2315678afecb367f032d93F642f64180aa3");
        assert!(matches!(
            not_hex.validate(),
            Err(ConfigError::InvalidContractAddress { .. })
        ));

        let short = PipelineConfig::new("ws://localhost:8545", "0x5FbDB231");
        assert!(matches!(
            short.validate(),
            Err(ConfigError::InvalidContractAddress { .. })
        ));
    }

    #[test]
    fn endpoint_must_be_websocket() {
        assert!(matches!(
            PipelineConfig::new("", CONTRACT).validate(),
            Err(ConfigError::MissingEndpoint)
        ));
        assert!(matches!(
            PipelineConfig::new("http://localhost:8545", CONTRACT).validate(),
            Err(ConfigError::InvalidEndpoint { .. })
        ));
        assert!(PipelineConfig::new("wss://node.example/ws", CONTRACT).validate().is_ok());
    }

    #[test]
    fn zero_capacity_is_invalid() {
        let mut cfg = PipelineConfig::new("ws://localhost:8545", CONTRACT);
        cfg.channel_capacity = 0;
        assert!(matches!(cfg.validate(), Err(ConfigError::Invalid { .. })));
    }

    #[test]
    fn supervisor_schedule_is_unbounded_by_default() {
        let schedule = SupervisorConfig::default().restart_schedule();
        assert_eq!(schedule.max_retries, u32::MAX);
        assert_eq!(schedule.initial_backoff_ms, 500);
    }
}
