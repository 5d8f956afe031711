//! Configuration management for the EPOCH client
//!
//! `EngineConfig` holds the runtime settings the engine enforces (reward
//! address, GetWork port, worker and hash ceilings). `Config` is the binary's
//! command line, environment and file configuration that produces it.

use crate::{Error, Result};
use clap::{Parser, ValueEnum};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Default max thread value
pub const DEFAULT_MAX_THREADS: usize = 2;

/// Default GetWork port
pub const DEFAULT_WORK_PORT: u16 = 10100;

/// Default per-request hash ceiling
pub const DEFAULT_MAX_HASHES: usize = 1000;

/// Hard ceiling for hashes or submissions in a single request
pub const LIMIT_MAX_HASHES: usize = 10_000;

/// Default bound on the initial connection
pub const DEFAULT_DIAL_TIMEOUT: Duration = Duration::from_secs(10);

/// Clamp a worker count to `[1, available parallelism]`
pub fn clamp_threads(threads: usize) -> usize {
    threads.clamp(1, num_cpus::get().max(1))
}

/// Validate a GetWork port
pub fn validate_port(port: u32) -> Result<u16> {
    match u16::try_from(port) {
        Ok(port) if port > 0 => Ok(port),
        _ => Err(Error::config(format!("invalid EPOCH port {}", port))),
    }
}

/// Validate a per-request hash ceiling
pub fn validate_max_hashes(max_hashes: usize) -> Result<usize> {
    if max_hashes > LIMIT_MAX_HASHES {
        return Err(Error::config(format!(
            "cannot exceed {} hashes",
            LIMIT_MAX_HASHES
        )));
    }
    Ok(max_hashes)
}

/// Runtime settings enforced by the engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Reward address, empty until set
    pub address: String,
    /// GetWork port on the upstream host
    pub port: u16,
    /// Maximum concurrent attempt or submission tasks
    pub max_threads: usize,
    /// Maximum hashes or submissions accepted per request
    pub max_hashes: usize,
    /// Accept self-signed upstream certificates
    pub insecure: bool,
    /// Bound on establishing the upstream connection
    #[serde(with = "humantime_serde_compat")]
    pub dial_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            address: String::new(),
            port: DEFAULT_WORK_PORT,
            max_threads: clamp_threads(DEFAULT_MAX_THREADS),
            max_hashes: DEFAULT_MAX_HASHES,
            insecure: true,
            dial_timeout: DEFAULT_DIAL_TIMEOUT,
        }
    }
}

impl EngineConfig {
    /// Apply clamping rules and reject values that cannot be clamped
    pub fn normalized(mut self) -> Result<Self> {
        validate_port(u32::from(self.port))?;
        validate_max_hashes(self.max_hashes)?;
        self.max_threads = clamp_threads(self.max_threads);
        if self.dial_timeout.is_zero() {
            return Err(Error::config("dial timeout must be greater than 0"));
        }
        Ok(self)
    }
}

/// Durations as human readable strings ("10s", "1m 30s")
mod humantime_serde_compat {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&humantime::format_duration(*value).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let s = String::deserialize(deserializer)?;
        humantime::parse_duration(&s).map_err(serde::de::Error::custom)
    }
}

/// Log levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<LogLevel> for tracing::Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Error => tracing::Level::ERROR,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Trace => tracing::Level::TRACE,
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let level: tracing::Level = (*self).into();
        write!(f, "{}", level.as_str().to_lowercase())
    }
}

/// Log output formats
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Plain,
    Json,
}

/// Complete configuration for the EPOCH client binary
#[derive(Debug, Clone, Parser, Serialize, Deserialize)]
#[command(
    name = "epoch-client",
    version = env!("CARGO_PKG_VERSION"),
    about = "EPOCH crowd-hashing client",
    long_about = "Connects to a DERO GetWork server and serves hash attempt requests over JSON-RPC"
)]
pub struct Config {
    /// Print the parsed configuration and exit
    #[arg(long)]
    #[serde(skip)]
    pub print_config: bool,

    /// Configuration file path (YAML or JSON)
    #[arg(long, value_name = "FILE")]
    #[serde(skip)]
    pub config_file: Option<PathBuf>,

    /// Reward address for submitted miniblocks
    #[arg(short = 'a', long, env = "EPOCH_ADDRESS")]
    pub address: Option<String>,

    /// DERO daemon endpoint (host:port); the GetWork port replaces its port
    #[arg(short = 'd', long, env = "EPOCH_DAEMON", default_value = "127.0.0.1:10102")]
    #[serde(default = "default_daemon")]
    pub daemon: String,

    /// GetWork port
    #[arg(short = 'p', long, default_value_t = DEFAULT_WORK_PORT)]
    #[serde(default = "default_work_port")]
    pub work_port: u16,

    /// Maximum concurrent workers
    #[arg(short = 't', long, default_value_t = DEFAULT_MAX_THREADS)]
    #[serde(default = "default_threads")]
    pub threads: usize,

    /// Maximum hashes accepted per request
    #[arg(long, default_value_t = DEFAULT_MAX_HASHES)]
    #[serde(default = "default_max_hashes")]
    pub max_hashes: usize,

    /// Accept self-signed GetWork certificates
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    #[serde(default = "default_insecure")]
    pub insecure: bool,

    /// Bound on establishing the GetWork connection
    #[arg(long, default_value = "10s")]
    #[serde(default = "default_dial_timeout")]
    pub dial_timeout: String,

    /// How long to wait for the first job after connecting
    #[arg(long, default_value = "10s")]
    #[serde(default = "default_job_timeout")]
    pub job_timeout: String,

    /// JSON-RPC listen address
    #[arg(long, env = "EPOCH_RPC_BIND", default_value = "127.0.0.1:10200")]
    #[serde(default = "default_rpc_bind")]
    pub rpc_bind: String,

    /// Log level
    #[arg(short = 'l', long, default_value = "info")]
    #[serde(default = "default_log_level")]
    pub log_level: LogLevel,

    /// Log format
    #[arg(long, default_value = "plain")]
    #[serde(default = "default_log_format")]
    pub log_format: LogFormat,
}

impl Config {
    /// Parse command line and merge the config file if specified
    pub async fn load() -> Result<Self> {
        let mut config = Self::parse();

        if let Some(config_file) = &config.config_file {
            let file_config = Self::load_from_file(config_file).await?;
            config = config.merge_with_file(file_config);
        }

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from file
    async fn load_from_file(path: &PathBuf) -> Result<Self> {
        let content = tokio::fs::read_to_string(path).await?;

        if path.extension().and_then(|s| s.to_str()) == Some("json") {
            serde_json::from_str(&content).map_err(Error::from)
        } else {
            serde_yaml::from_str(&content).map_err(Error::from)
        }
    }

    /// Merge CLI config with file config (CLI takes precedence)
    fn merge_with_file(mut self, file_config: Self) -> Self {
        if self.address.is_none() {
            self.address = file_config.address;
        }

        // Other CLI values carry their defaults, so only replace untouched ones
        if self.daemon == default_daemon() {
            self.daemon = file_config.daemon;
        }
        if self.work_port == DEFAULT_WORK_PORT {
            self.work_port = file_config.work_port;
        }
        if self.threads == DEFAULT_MAX_THREADS {
            self.threads = file_config.threads;
        }
        if self.max_hashes == DEFAULT_MAX_HASHES {
            self.max_hashes = file_config.max_hashes;
        }
        if self.rpc_bind == default_rpc_bind() {
            self.rpc_bind = file_config.rpc_bind;
        }

        self
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.daemon.trim().is_empty() {
            return Err(Error::config("daemon endpoint is required"));
        }

        validate_port(u32::from(self.work_port))?;
        validate_max_hashes(self.max_hashes)?;

        if self.threads == 0 {
            return Err(Error::config("Thread count must be greater than 0"));
        }

        self.dial_timeout_duration()?;
        self.job_timeout_duration()?;
        self.rpc_socket_addr()?;

        Ok(())
    }

    /// Get dial timeout duration
    pub fn dial_timeout_duration(&self) -> Result<Duration> {
        humantime::parse_duration(&self.dial_timeout)
            .map_err(|e| Error::config(format!("Invalid dial timeout: {}", e)))
    }

    /// Get job wait duration
    pub fn job_timeout_duration(&self) -> Result<Duration> {
        humantime::parse_duration(&self.job_timeout)
            .map_err(|e| Error::config(format!("Invalid job timeout: {}", e)))
    }

    /// Get RPC socket address
    pub fn rpc_socket_addr(&self) -> Result<SocketAddr> {
        self.rpc_bind
            .parse()
            .map_err(|e| Error::config(format!("Invalid RPC bind address: {}", e)))
    }

    /// Build the engine settings
    pub fn engine_config(&self) -> Result<EngineConfig> {
        EngineConfig {
            address: self.address.clone().unwrap_or_default(),
            port: self.work_port,
            max_threads: self.threads,
            max_hashes: self.max_hashes,
            insecure: self.insecure,
            dial_timeout: self.dial_timeout_duration()?,
        }
        .normalized()
    }
}

// Default value functions for serde
fn default_daemon() -> String { "127.0.0.1:10102".to_string() }
fn default_work_port() -> u16 { DEFAULT_WORK_PORT }
fn default_threads() -> usize { DEFAULT_MAX_THREADS }
fn default_max_hashes() -> usize { DEFAULT_MAX_HASHES }
fn default_insecure() -> bool { true }
fn default_dial_timeout() -> String { "10s".to_string() }
fn default_job_timeout() -> String { "10s".to_string() }
fn default_rpc_bind() -> String { "127.0.0.1:10200".to_string() }
fn default_log_level() -> LogLevel { LogLevel::Info }
fn default_log_format() -> LogFormat { LogFormat::Plain }
