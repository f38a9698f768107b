//! Pulse — tenant-scoped usage sync and reconciliation daemon.
//!
//! Composition root: wires the configured storage backend and the HTTP
//! source client into the scheduler, then runs until ctrl-c (or exits
//! after one pass with `--once`).

mod config;
mod github;

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::broadcast;

use pulse_core::{FileTenantDirectory, TenantDirectory};
use pulse_store::{FileBackend, RelationalBackend, SqlTenantDirectory, StorageBackend};
use pulse_sync::{ScopeOrchestrator, SourceClient, TenantScheduler};

use config::{Config, StorageType};
use github::GithubSourceClient;

fn main() -> Result<()> {
    let config = Config::parse();
    config.validate()?;
    init_tracing();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("building tokio runtime")?;
    runtime.block_on(run(config))
}

async fn run(config: Config) -> Result<()> {
    let source: Arc<dyn SourceClient> = Arc::new(GithubSourceClient::new(&config.api_base)?);

    let mut sql_pool = None;
    let (backend, directory): (Arc<dyn StorageBackend>, Arc<dyn TenantDirectory>) =
        match config.storage {
            StorageType::File => {
                tracing::info!(data_dir = %config.data_dir.display(), "using file storage");
                (
                    Arc::new(FileBackend::new(&config.data_dir)),
                    Arc::new(FileTenantDirectory::new(&config.data_dir)),
                )
            }
            StorageType::Sqlite => {
                let url = config
                    .database_url
                    .as_deref()
                    .context("--database-url is required when storage is 'sqlite'")?;
                tracing::info!("using sqlite storage");
                let backend = RelationalBackend::connect(url)
                    .await
                    .context("connecting to sqlite")?;
                let directory = SqlTenantDirectory::new(backend.pool().clone());
                sql_pool = Some(backend.pool().clone());
                (Arc::new(backend), Arc::new(directory))
            }
        };

    let orchestrator = Arc::new(ScopeOrchestrator::new(source, backend, config.fan_out));
    let scheduler = Arc::new(TenantScheduler::new(
        directory,
        orchestrator,
        config.interval(),
    ));

    if config.once {
        scheduler.trigger_pass().await;
    } else {
        let (shutdown_tx, shutdown_rx) = broadcast::channel::<()>(16);
        let signal_handle = tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    tracing::info!("received ctrl-c, shutting down");
                    let _ = shutdown_tx.send(());
                }
                Err(err) => {
                    tracing::error!(error = %err, "ctrl-c handler failed; shutting down");
                    let _ = shutdown_tx.send(());
                }
            }
        });
        scheduler.run(shutdown_rx).await;
        signal_handle.abort();
    }

    if let Some(pool) = sql_pool {
        pool.close().await;
    }
    Ok(())
}

fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).with_target(false).try_init();
}
