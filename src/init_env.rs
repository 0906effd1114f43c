use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use log::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::writer::MakeWriterExt;
use tracing_subscriber::EnvFilter;

use crate::error::{Error, Result};
use crate::flash::DEFAULT_FLASH_TTL;

/// Runtime settings, read from the environment (and `.env`).
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub bind_address: SocketAddr,
    pub download_dir: PathBuf,
    pub log_dir: PathBuf,
    pub log_file_name: String,
    pub session_cookie: String,
    pub max_download_bytes: Option<u64>,
    pub fetch_timeout: Duration,
    pub flash_ttl: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_address: SocketAddr::from(([127, 0, 0, 1], 8080)),
            download_dir: PathBuf::from("downloads"),
            log_dir: PathBuf::from("logs"),
            log_file_name: "dlform.log".to_string(),
            session_cookie: "dlform_sid".to_string(),
            max_download_bytes: None,
            fetch_timeout: Duration::from_secs(300),
            flash_ttl: DEFAULT_FLASH_TTL,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds a config from `lookup`, falling back to defaults for unset or
    /// blank variables.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let mut config = Config::default();

        if let Some(addr) = get("BIND_ADDRESS") {
            config.bind_address = addr
                .parse()
                .map_err(|e| Error::config("BIND_ADDRESS", format!("{}: {}", addr, e)))?;
        }
        if let Some(dir) = get("DOWNLOAD_DIR") {
            config.download_dir = PathBuf::from(dir);
        }
        if let Some(dir) = get("LOG_DIR") {
            config.log_dir = PathBuf::from(dir);
        }
        if let Some(name) = get("LOG_FILE_NAME") {
            config.log_file_name = name;
        }
        if let Some(name) = get("SESSION_COOKIE") {
            if !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-') {
                return Err(Error::config("SESSION_COOKIE", format!("invalid cookie name {}", name)));
            }
            config.session_cookie = name;
        }
        if let Some(limit) = get("MAX_DOWNLOAD_BYTES") {
            config.max_download_bytes = Some(
                limit
                    .parse()
                    .map_err(|e| Error::config("MAX_DOWNLOAD_BYTES", format!("{}: {}", limit, e)))?,
            );
        }
        if let Some(secs) = get("FETCH_TIMEOUT_SECS") {
            let secs: u64 = secs
                .parse()
                .map_err(|e| Error::config("FETCH_TIMEOUT_SECS", format!("{}: {}", secs, e)))?;
            if secs == 0 {
                return Err(Error::config("FETCH_TIMEOUT_SECS", "must be greater than zero"));
            }
            config.fetch_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = get("FLASH_TTL_SECS") {
            let secs: u64 = secs
                .parse()
                .map_err(|e| Error::config("FLASH_TTL_SECS", format!("{}: {}", secs, e)))?;
            config.flash_ttl = Duration::from_secs(secs);
        }

        Ok(config)
    }
}

/// Installs the global subscriber: stdout plus a daily rolling file, with
/// `log` records bridged in. Keep the guard alive until shutdown or the
/// file writer stops flushing.
pub fn init_logging(config: &Config) -> Result<WorkerGuard> {
    std::fs::create_dir_all(&config.log_dir)?;
    let file_appender = tracing_appender::rolling::daily(&config.log_dir, &config.log_file_name);
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_ansi(false)
        .with_writer(std::io::stdout.and(file_writer))
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| Error::Logging(e.to_string()))?;
    tracing_log::LogTracer::init().map_err(|e| Error::Logging(e.to_string()))?;

    info!("Logging to {}", config.log_dir.join(&config.log_file_name).display());
    Ok(guard)
}
