//! `cargoledger run`: the long-lived ingestion process.

use crate::config::{AppConfig, StoreTarget};
use anyhow::{Context, Result};
use cargoledger_evm::AbiLoader;
use cargoledger_ingest::{supervise, Backends, EvmWsListener, IngestPipeline};
use cargoledger_observability::init_tracing;
use cargoledger_storage::{
    postgres::PostgresStorage, sqlite::SqliteStorage, InMemoryStorage,
};
use std::{path::Path, sync::Arc};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

pub async fn run(config_path: Option<&Path>, verbose: bool) -> Result<()> {
    let mut config = AppConfig::load(config_path)?;
    if verbose {
        config.log.level = "debug".into();
    }
    if let Err(e) = init_tracing(&config.log) {
        eprintln!("warning: tracing already initialised: {e}");
    }

    let interface = AbiLoader::from_path(&config.abi_path)
        .with_context(|| format!("load contract ABI '{}'", config.abi_path.display()))?;
    info!(
        abi = %config.abi_path.display(),
        events = interface.len(),
        "contract interface loaded"
    );

    let listener = EvmWsListener::new(&config.pipeline).context("invalid pipeline config")?;
    let backends = open_backends(&config.database_url).await?;

    let pipeline = IngestPipeline::new(
        config.pipeline.clone(),
        Arc::new(interface),
        Arc::new(listener),
        backends,
    )
    .context("invalid pipeline config")?;

    let cancel = CancellationToken::new();
    let stopper = cancel.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("interrupt received; shutting down");
                stopper.cancel();
            }
            Err(e) => error!(error = %e, "cannot listen for ctrl-c"),
        }
    });

    let result = supervise(&pipeline, &config.supervisor, cancel).await;

    let metrics = pipeline.metrics();
    info!(?metrics, "ingestion stopped");
    println!("{}", serde_json::to_string_pretty(&metrics)?);

    result.context("ingestion pipeline failed")
}

async fn open_backends(database_url: &str) -> Result<Backends> {
    let backends = match StoreTarget::parse(database_url)? {
        StoreTarget::Memory => {
            warn!("no database_url configured; records are kept in memory only");
            Backends::shared(Arc::new(InMemoryStorage::new()))
        }
        StoreTarget::Sqlite(url) => {
            info!(%url, "opening SQLite store");
            let store = SqliteStorage::open(&url)
                .await
                .context("open SQLite store")?;
            Backends::shared(Arc::new(store))
        }
        StoreTarget::Postgres(url) => {
            info!("connecting to Postgres store");
            let store = PostgresStorage::connect(&url)
                .await
                .context("connect to Postgres store")?;
            Backends::shared(Arc::new(store))
        }
    };
    Ok(backends)
}
