use anyhow::{Context, Result};
use clap::Parser;
use std::{env, str::FromStr};

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub database_url: String,
    pub max_connections: u32,
    pub owner_batch_size: usize,
    pub archive_batch_size: usize,
    pub export_idle_timeout_secs: u64,
    pub export_channel_capacity: usize,
    pub max_upload_bytes: usize,
    pub progress_retention_secs: u64,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug, Default)]
#[command(author, version, about = "Multibien document service")]
pub struct Args {
    /// Host to bind to (overrides MULTIBIEN_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides MULTIBIEN_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Database URL (overrides MULTIBIEN_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// Pool size (overrides MULTIBIEN_MAX_CONNECTIONS)
    #[arg(long)]
    pub max_connections: Option<u32>,

    /// Seconds an export may go without writing before it fails
    /// (overrides MULTIBIEN_EXPORT_IDLE_TIMEOUT_SECS)
    #[arg(long)]
    pub export_idle_timeout_secs: Option<u64>,

    /// Largest accepted upload in bytes (overrides MULTIBIEN_MAX_UPLOAD_BYTES)
    #[arg(long)]
    pub max_upload_bytes: Option<usize>,

    /// Run migrations and exit
    #[arg(long)]
    pub migrate: bool,
}

/// Read `name`, falling back to `default` when unset.
fn env_or<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(name) {
        Ok(value) => value
            .parse::<T>()
            .with_context(|| format!("parsing {} value `{}`", name, value)),
        Err(env::VarError::NotPresent) => Ok(default),
        Err(err) => Err(err).with_context(|| format!("reading {}", name)),
    }
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and migrate flag.
    pub fn from_env_and_args() -> Result<(Self, bool)> {
        // Parse CLI once
        let args = Args::parse();
        let migrate = args.migrate;
        Ok((Self::merge(args)?, migrate))
    }

    fn merge(args: Args) -> Result<Self> {
        // --- Environment fallback ---
        let env_host = env::var("MULTIBIEN_HOST").unwrap_or_else(|_| "0.0.0.0".into());
        let env_port = env_or("MULTIBIEN_PORT", 3000u16)?;
        let env_db = env::var("MULTIBIEN_DATABASE_URL")
            .unwrap_or_else(|_| "sqlite://./data/multibien.db".into());
        let env_max_connections = env_or("MULTIBIEN_MAX_CONNECTIONS", 5u32)?;
        let env_idle_timeout = env_or("MULTIBIEN_EXPORT_IDLE_TIMEOUT_SECS", 15 * 60u64)?;
        let env_max_upload = env_or("MULTIBIEN_MAX_UPLOAD_BYTES", 20 * 1024 * 1024usize)?;

        // --- Merge ---
        Ok(Self {
            host: args.host.unwrap_or(env_host),
            port: args.port.unwrap_or(env_port),
            database_url: args.database_url.unwrap_or(env_db),
            max_connections: args.max_connections.unwrap_or(env_max_connections).max(1),
            owner_batch_size: env_or("MULTIBIEN_OWNER_BATCH_SIZE", 20usize)?.max(1),
            archive_batch_size: env_or("MULTIBIEN_ARCHIVE_BATCH_SIZE", 10usize)?.max(1),
            export_idle_timeout_secs: args.export_idle_timeout_secs.unwrap_or(env_idle_timeout),
            export_channel_capacity: env_or("MULTIBIEN_EXPORT_CHANNEL_CAPACITY", 16usize)?,
            max_upload_bytes: args.max_upload_bytes.unwrap_or(env_max_upload),
            progress_retention_secs: env_or("MULTIBIEN_PROGRESS_RETENTION_SECS", 3600u64)?,
        })
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
