use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use std::{env, str::FromStr, time::Duration};

/// Which [`ObjectStore`](crate::store::ObjectStore) implementation to run on.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Sqlite,
    Memory,
}

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub database_url: String,
    pub backend: StoreBackend,
    pub store_timeout: Duration,
    pub sweep_interval: Duration,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug, Default)]
#[command(author, version, about = "Self-destructing file sharing service")]
pub struct Args {
    /// Host to bind to (overrides SELF_DESTRUCT_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides SELF_DESTRUCT_PORT, then PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// SQLite database URL (overrides SELF_DESTRUCT_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// Storage backend (overrides SELF_DESTRUCT_BACKEND)
    #[arg(long, value_enum)]
    pub backend: Option<StoreBackend>,

    /// Per-call store timeout in milliseconds (overrides SELF_DESTRUCT_STORE_TIMEOUT_MS)
    #[arg(long)]
    pub store_timeout_ms: Option<u64>,

    /// Seconds between expired-entry sweeps (overrides SELF_DESTRUCT_SWEEP_INTERVAL_SECS)
    #[arg(long)]
    pub sweep_interval_secs: Option<u64>,

    /// Apply the database schema and exit
    #[arg(long)]
    pub migrate: bool,
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and migrate flag.
    pub fn from_env_and_args() -> Result<(Self, bool)> {
        let args = Args::parse();
        let migrate = args.migrate;
        let cfg = Self::resolve(args, |name| env::var(name).ok())?;
        Ok((cfg, migrate))
    }

    /// Merge `args` over the variables returned by `lookup` over defaults.
    pub fn resolve(args: Args, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let env_host = lookup("SELF_DESTRUCT_HOST").unwrap_or_else(|| "0.0.0.0".into());
        let env_port = match lookup("SELF_DESTRUCT_PORT").or_else(|| lookup("PORT")) {
            Some(value) => parse_var("SELF_DESTRUCT_PORT", &value)?,
            None => 8000,
        };
        let env_db = lookup("SELF_DESTRUCT_DATABASE_URL")
            .unwrap_or_else(|| "sqlite://./data/self_destruct.db".into());
        let env_backend = match lookup("SELF_DESTRUCT_BACKEND") {
            Some(value) => <StoreBackend as ValueEnum>::from_str(&value, true).map_err(|e| {
                anyhow::anyhow!("parsing SELF_DESTRUCT_BACKEND value `{}`: {}", value, e)
            })?,
            None => StoreBackend::Sqlite,
        };
        let env_timeout = match lookup("SELF_DESTRUCT_STORE_TIMEOUT_MS") {
            Some(value) => parse_var("SELF_DESTRUCT_STORE_TIMEOUT_MS", &value)?,
            None => 2_000,
        };
        let env_sweep = match lookup("SELF_DESTRUCT_SWEEP_INTERVAL_SECS") {
            Some(value) => parse_var("SELF_DESTRUCT_SWEEP_INTERVAL_SECS", &value)?,
            None => 30,
        };

        let store_timeout_ms = args.store_timeout_ms.unwrap_or(env_timeout);
        let sweep_interval_secs = args.sweep_interval_secs.unwrap_or(env_sweep);
        if store_timeout_ms == 0 || sweep_interval_secs == 0 {
            anyhow::bail!("store timeout and sweep interval must be positive");
        }

        Ok(Self {
            host: args.host.unwrap_or(env_host),
            port: args.port.unwrap_or(env_port),
            database_url: args.database_url.unwrap_or(env_db),
            backend: args.backend.unwrap_or(env_backend),
            store_timeout: Duration::from_millis(store_timeout_ms),
            sweep_interval: Duration::from_secs(sweep_interval_secs),
        })
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn parse_var<T>(name: &str, value: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    value
        .parse::<T>()
        .with_context(|| format!("parsing {} value `{}`", name, value))
}
