//! Daemon configuration: CLI flags with environment-variable fallbacks.
//!
//! Every flag can come from the environment, so the daemon runs the same
//! way under a service manager (env only) and on a developer shell
//! (flags). Flags win over env vars; env vars win over defaults.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Result};
use clap::{Parser, ValueEnum};

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageType {
    /// Flat-file JSON journal under the data directory.
    File,
    /// SQLite database addressed by `--database-url`.
    Sqlite,
}

#[derive(Parser, Debug)]
#[command(
    name = "pulse",
    version,
    about = "Tenant-scoped usage sync and reconciliation daemon",
    long_about = None,
)]
pub struct Config {
    /// Root directory for file-backed storage and the tenant registry.
    #[arg(long, env = "PULSE_DATA_DIR", default_value = "./data")]
    pub data_dir: PathBuf,

    /// Storage backend for series, rosters and the tenant registry.
    #[arg(long, env = "STORAGE_TYPE", value_enum, default_value_t = StorageType::File)]
    pub storage: StorageType,

    /// SQLite connection URL; required when `--storage sqlite`.
    #[arg(long, env = "DATABASE_URL")]
    pub database_url: Option<String>,

    /// Seconds between sync passes.
    #[arg(long, env = "PULSE_INTERVAL_SECS", default_value_t = 600)]
    pub interval_secs: u64,

    /// Expand organization tenants without a designated team into one
    /// scope per child team plus the tenant aggregate.
    #[arg(long, env = "CHILD_TEAM_ENABLED")]
    pub fan_out: bool,

    /// Run a single sync pass and exit instead of staying resident.
    #[arg(long)]
    pub once: bool,

    /// Base URL of the upstream API.
    #[arg(long, env = "PULSE_API_BASE", default_value = "https://api.github.com")]
    pub api_base: String,
}

impl Config {
    pub fn validate(&self) -> Result<()> {
        if self.storage == StorageType::Sqlite && self.database_url.is_none() {
            bail!("--database-url (or DATABASE_URL) is required when storage is 'sqlite'");
        }
        if self.interval_secs == 0 {
            bail!("--interval-secs must be at least 1");
        }
        Ok(())
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}
