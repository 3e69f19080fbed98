//! Process configuration: a YAML file plus environment overrides.

use anyhow::{Context, Result};
use cargoledger_ingest::{PipelineConfig, SupervisorConfig};
use cargoledger_observability::LogConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Environment variables that take precedence over the file.
pub const ENV_RPC_URL: &str = "RPC_URL";
pub const ENV_CONTRACT_ADDR: &str = "CONTRACT_ADDR";
pub const ENV_DB_URL: &str = "DB_URL";
pub const ENV_ABI_PATH: &str = "ABI_PATH";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_pipeline")]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub supervisor: SupervisorConfig,
    /// Contract ABI (bare array or Hardhat/Foundry artifact)
    #[serde(default = "default_abi_path")]
    pub abi_path: PathBuf,
    /// `postgres://…`, `sqlite:…`, or empty for the in-memory store
    #[serde(default)]
    pub database_url: String,
    #[serde(default)]
    pub log: LogConfig,
}

fn default_pipeline() -> PipelineConfig {
    PipelineConfig::new("", "")
}

fn default_abi_path() -> PathBuf {
    PathBuf::from("./blockchain/abi/CargoLedger_ABI.json")
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            pipeline: default_pipeline(),
            supervisor: SupervisorConfig::default(),
            abi_path: default_abi_path(),
            database_url: String::new(),
            log: LogConfig::default(),
        }
    }
}

impl AppConfig {
    /// Read `path` (if given) and apply the process environment on top.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => {
                let text = std::fs::read_to_string(path)
                    .with_context(|| format!("read config file '{}'", path.display()))?;
                Self::from_yaml(&text)
                    .with_context(|| format!("parse config file '{}'", path.display()))?
            }
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn from_yaml(text: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(text)?)
    }

    /// Override file values with non-empty variables from `lookup`.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let var = |key| lookup(key).filter(|v| !v.trim().is_empty());
        if let Some(v) = var(ENV_RPC_URL) {
            self.pipeline.node_url = v;
        }
        if let Some(v) = var(ENV_CONTRACT_ADDR) {
            self.pipeline.contract_address = v;
        }
        if let Some(v) = var(ENV_DB_URL) {
            self.database_url = v;
        }
        if let Some(v) = var(ENV_ABI_PATH) {
            self.abi_path = PathBuf::from(v);
        }
    }
}

/// Which storage backend a database URL selects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreTarget {
    Memory,
    Sqlite(String),
    Postgres(String),
}

impl StoreTarget {
    pub fn parse(database_url: &str) -> Result<Self> {
        let url = database_url.trim();
        if url.is_empty() {
            Ok(Self::Memory)
        } else if url.starts_with("postgres://") || url.starts_with("postgresql://") {
            Ok(Self::Postgres(url.to_string()))
        } else if url.starts_with("sqlite:") {
            Ok(Self::Sqlite(url.to_string()))
        } else {
            anyhow::bail!("unsupported database url '{url}' (expected postgres://, sqlite: or empty)")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    const YAML: &str = r#"
pipeline:
  node_url: ws://127.0.0.1:8545
  contract_address: "0x5FbDB2315678afecb367f032d93F642f64180aa3"
  not_found_retries: 3
supervisor:
  max_restarts: 10
database_url: sqlite:./ledger.db
log:
  level: debug
  json: true
"#;

    #[test]
    fn yaml_fills_defaults() {
        let cfg = AppConfig::from_yaml(YAML).unwrap();
        assert_eq!(cfg.pipeline.node_url, "ws://127.0.0.1:8545");
        assert_eq!(cfg.pipeline.not_found_retries, 3);
        assert_eq!(cfg.pipeline.channel_capacity, 1_024);
        assert_eq!(cfg.supervisor.max_restarts, Some(10));
        assert_eq!(cfg.supervisor.initial_backoff_ms, 500);
        assert_eq!(cfg.abi_path, default_abi_path());
        assert!(cfg.log.json);
        cfg.pipeline.validate().unwrap();
    }

    #[test]
    fn environment_overrides_file() {
        let mut cfg = AppConfig::from_yaml(YAML).unwrap();
        let env: HashMap<&str, &str> = [
            (ENV_RPC_URL, "wss://node.example/ws"),
            (ENV_DB_URL, "postgres://ledger@db/ledger"),
            (ENV_CONTRACT_ADDR, "  "),
        ]
        .into_iter()
        .collect();
        cfg.apply_env(|k| env.get(k).map(|v| v.to_string()));

        assert_eq!(cfg.pipeline.node_url, "wss://node.example/ws");
        assert_eq!(cfg.database_url, "postgres://ledger@db/ledger");
        // Blank variables do not clobber the file.
        assert_eq!(
            cfg.pipeline.contract_address,
            "0x5FbDB2315678afecb367f032d93F642f64180aa3"
        );
    }

    #[test]
    fn empty_document_is_all_defaults() {
        let cfg = AppConfig::from_yaml("{}").unwrap();
        assert!(cfg.pipeline.node_url.is_empty());
        assert!(cfg.pipeline.validate().is_err());
        assert_eq!(StoreTarget::parse(&cfg.database_url).unwrap(), StoreTarget::Memory);
    }

    #[test]
    fn store_target_by_scheme() {
        assert!(matches!(
            StoreTarget::parse("postgresql://u@h/db").unwrap(),
            StoreTarget::Postgres(_)
        ));
        assert_eq!(
            StoreTarget::parse("sqlite::memory:").unwrap(),
            StoreTarget::Sqlite("sqlite::memory:".into())
        );
        assert!(StoreTarget::parse("mysql://u@h/db").is_err());
    }
}
