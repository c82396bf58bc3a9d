//! Configuration layer: typed settings with layered precedence (file → env → CLI).

mod cli;
#[cfg(test)]
mod tests;

pub use cli::{CliArgs, Command, MigrateArgs, ServeArgs, ServeOverrides};

use std::collections::HashSet;
use std::path::Path;

use clap::Parser;
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "spurgo";
const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 8080;
const DEFAULT_DATABASE_URL: &str = "postgres://localhost:5432/spurgo";
const DEFAULT_DB_MAX_CONNECTIONS: u32 = 8;
const DEFAULT_RING_CAPACITY: usize = 4096;
const DEFAULT_SCAN_LIMIT: u64 = 256;
const DEFAULT_SCAN_INTERVAL_SECS: u64 = 30;
const DEFAULT_BACKOFF_BASE_MS: u64 = 100;
const DEFAULT_BACKOFF_CAP_MS: u64 = 10_000;
const DEFAULT_FETCH_LIMIT: usize = 128;
const DEFAULT_FETCH_MAX_BYTES: u64 = 1024 * 1024;
const DEFAULT_DISPATCH_TIMEOUT_SECS: u64 = 10;
const DEFAULT_MAX_TOTAL_EVENTS: u64 = 100_000;
const DEFAULT_DELETE_BATCH_SIZE: u64 = 64;
const DEFAULT_RETENTION_INTERVAL_SECS: u64 = 5;

// A retention cap this small would churn the log constantly.
const MIN_RETENTION_EVENTS: u64 = 10;

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error(transparent)]
    Load(#[from] config::ConfigError),
    #[error("invalid configuration: {message}")]
    Invalid { message: String },
}

impl SettingsError {
    fn invalid(message: impl Into<String>) -> Self {
        Self::Invalid {
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct Settings {
    pub database: DatabaseSettings,
    pub server: ServerSettings,
    pub logging: LoggingSettings,
    pub engine: EngineSettings,
    pub consumer: ConsumerSettings,
    pub retention: RetentionSettings,
    pub redis_servers: Vec<RedisServerSettings>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseSettings {
    pub url: String,
    pub max_connections: u32,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            url: DEFAULT_DATABASE_URL.to_string(),
            max_connections: DEFAULT_DB_MAX_CONNECTIONS,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    /// When set, `/notify` requires this token in the
    /// `X-Notify-Access-Token` header.
    pub notify_access_token: Option<String>,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            notify_access_token: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl From<LogLevel> for LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => LevelFilter::TRACE,
            LogLevel::Debug => LevelFilter::DEBUG,
            LogLevel::Info => LevelFilter::INFO,
            LogLevel::Warn => LevelFilter::WARN,
            LogLevel::Error => LevelFilter::ERROR,
        }
    }
}

impl From<LogLevel> for tracing_subscriber::filter::Directive {
    fn from(level: LogLevel) -> Self {
        LevelFilter::from(level).into()
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    pub level: LogLevel,
    pub format: LogFormat,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            format: LogFormat::Compact,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    /// Capacity of the in-memory ring of recent sequenced events.
    pub ring_capacity: usize,
    /// Page size for scanning unsequenced events.
    pub scan_limit: u64,
    /// Fallback scan period for producers that never notify.
    pub scan_interval_secs: u64,
    pub backoff_base_ms: u64,
    pub backoff_cap_ms: u64,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            ring_capacity: DEFAULT_RING_CAPACITY,
            scan_limit: DEFAULT_SCAN_LIMIT,
            scan_interval_secs: DEFAULT_SCAN_INTERVAL_SECS,
            backoff_base_ms: DEFAULT_BACKOFF_BASE_MS,
            backoff_cap_ms: DEFAULT_BACKOFF_CAP_MS,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ConsumerSettings {
    /// Maximum events per delivery batch.
    pub fetch_limit: usize,
    /// Maximum payload bytes per delivery batch.
    pub fetch_max_bytes: u64,
    /// Upper bound on one cache-server call.
    pub dispatch_timeout_secs: u64,
}

impl Default for ConsumerSettings {
    fn default() -> Self {
        Self {
            fetch_limit: DEFAULT_FETCH_LIMIT,
            fetch_max_bytes: DEFAULT_FETCH_MAX_BYTES,
            dispatch_timeout_secs: DEFAULT_DISPATCH_TIMEOUT_SECS,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetentionSettings {
    /// Soft cap on live sequenced events before trimming starts.
    pub max_total_events: u64,
    /// Upper bound on how far one pass advances the deletion cutoff.
    pub delete_batch_size: u64,
    pub interval_secs: u64,
}

impl Default for RetentionSettings {
    fn default() -> Self {
        Self {
            max_total_events: DEFAULT_MAX_TOTAL_EVENTS,
            delete_batch_size: DEFAULT_DELETE_BATCH_SIZE,
            interval_secs: DEFAULT_RETENTION_INTERVAL_SECS,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RedisServerSettings {
    pub id: i64,
    pub addr: String,
}

impl Settings {
    pub fn apply_serve_overrides(&mut self, overrides: &ServeOverrides) {
        if let Some(host) = &overrides.server_host {
            self.server.host = host.clone();
        }
        if let Some(port) = overrides.server_port {
            self.server.port = port;
        }
        if let Some(url) = &overrides.database_url {
            self.database.url = url.clone();
        }
    }

    /// Boot-time validation. Anything wrong here is fatal: the engine
    /// must not start against an ambiguous server list.
    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.redis_servers.is_empty() {
            return Err(SettingsError::invalid("redis server list must not be empty"));
        }

        let mut ids = HashSet::new();
        let mut addrs = HashSet::new();
        for server in &self.redis_servers {
            if server.id <= 0 {
                return Err(SettingsError::invalid(format!(
                    "redis server id must be positive, got {}",
                    server.id
                )));
            }
            if server.addr.is_empty() {
                return Err(SettingsError::invalid(format!(
                    "redis server {} has an empty address",
                    server.id
                )));
            }
            if !ids.insert(server.id) {
                return Err(SettingsError::invalid(format!(
                    "duplicated redis server id '{}'",
                    server.id
                )));
            }
            if !addrs.insert(server.addr.as_str()) {
                return Err(SettingsError::invalid(format!(
                    "duplicated redis server address '{}'",
                    server.addr
                )));
            }
        }

        if self.engine.ring_capacity == 0 {
            return Err(SettingsError::invalid("engine.ring_capacity must be positive"));
        }
        if self.engine.scan_limit == 0 {
            return Err(SettingsError::invalid("engine.scan_limit must be positive"));
        }
        if self.consumer.fetch_limit == 0 {
            return Err(SettingsError::invalid("consumer.fetch_limit must be positive"));
        }
        if self.retention.max_total_events <= MIN_RETENTION_EVENTS {
            return Err(SettingsError::invalid(format!(
                "retention.max_total_events must be greater than {MIN_RETENTION_EVENTS}"
            )));
        }
        if self.retention.delete_batch_size == 0 {
            return Err(SettingsError::invalid(
                "retention.delete_batch_size must be positive",
            ));
        }

        Ok(())
    }
}

/// Parse the command line and load settings with the full precedence
/// chain. The returned settings are validated.
pub fn load_with_cli() -> Result<(CliArgs, Settings), SettingsError> {
    let cli = CliArgs::parse();
    let mut settings = load(cli.config_file.as_deref())?;

    match &cli.command {
        Some(Command::Serve(args)) => settings.apply_serve_overrides(&args.overrides),
        Some(Command::Migrate(args)) => {
            if let Some(url) = &args.database_url {
                settings.database.url = url.clone();
            }
        }
        None => {}
    }

    settings.validate()?;
    Ok((cli, settings))
}

/// Load settings from the default file locations, an optional explicit
/// file, and `SPURGO_*` environment variables. Does not validate.
pub fn load(config_file: Option<&Path>) -> Result<Settings, SettingsError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = config_file {
        builder = builder.add_source(File::from(path.to_path_buf()));
    }

    let loaded = builder
        .add_source(Environment::with_prefix("SPURGO").separator("__"))
        .build()?;

    Ok(loaded.try_deserialize()?)
}
