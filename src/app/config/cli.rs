use super::serde_helpers::{
    deserialize_severity, load_env_string, load_env_var, secs, serialize_severity,
};
use super::{ConfigError, LogFormat, LogLevel};
use crate::app::dispatcher::DispatcherConfig;
use crate::domain::Severity;
use crate::reliability::BackoffPolicy;
use crate::sender::{Endpoint, TransportConfig};
use clap::Parser;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_SERVER_URL: &str = "wss://api.codewatchman.com/v1/logs";

#[derive(Parser, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[command(name = "watchman-ship", author, version, about, long_about = None)]
#[serde(default)]
pub struct Config {
    /// Collector WebSocket URL (ws:// or wss://)
    #[arg(long, env = "WATCHMAN_SERVER_URL", default_value = DEFAULT_SERVER_URL)]
    pub server_url: String,

    /// Project identifier sent as x-project-id
    #[arg(long, env = "WATCHMAN_PROJECT_ID", default_value = "")]
    pub project_id: String,

    /// Project secret sent as x-project-secret
    #[arg(
        long,
        env = "WATCHMAN_PROJECT_SECRET",
        default_value = "",
        hide_env_values = true
    )]
    pub project_secret: String,

    /// Queue capacity in events (0 = unbounded)
    #[arg(long, env = "WATCHMAN_QUEUE_SIZE", default_value = "1000")]
    pub max_size: usize,

    /// Maximum events per batch
    #[arg(long, env = "WATCHMAN_BATCH_SIZE", default_value = "100")]
    pub batch_size: usize,

    /// Maximum wait for a full batch, in seconds
    #[arg(long, env = "WATCHMAN_BATCH_INTERVAL", default_value = "1.0")]
    pub batch_interval: f64,

    /// Delivery retries per event before it is dropped
    #[arg(long, env = "WATCHMAN_MAX_RETRIES", default_value = "3")]
    pub max_retries: u32,

    /// Pause after a failed batch, in seconds
    #[arg(long, env = "WATCHMAN_RETRY_DELAY", default_value = "1.0")]
    pub retry_delay: f64,

    /// First reconnect delay, in seconds
    #[arg(long, env = "WATCHMAN_INITIAL_RETRY_DELAY", default_value = "1.0")]
    pub initial_retry_delay: f64,

    /// Upper bound for reconnect delays, in seconds
    #[arg(long, env = "WATCHMAN_MAX_RETRY_DELAY", default_value = "60.0")]
    pub max_retry_delay: f64,

    /// Growth factor between reconnect delays
    #[arg(long, env = "WATCHMAN_RETRY_MULTIPLIER", default_value = "2.0")]
    pub retry_multiplier: f64,

    /// Failed connect attempts before giving up (-1 = retry forever)
    #[arg(
        long,
        env = "WATCHMAN_MAX_RETRY_ATTEMPTS",
        default_value = "10",
        allow_negative_numbers = true
    )]
    pub max_retry_attempts: i64,

    /// Randomise reconnect delays by +/-50%
    #[arg(long, env = "WATCHMAN_RETRY_JITTER")]
    pub retry_jitter: bool,

    /// Heartbeat ping interval, in seconds (0 disables)
    #[arg(long, env = "WATCHMAN_PING_INTERVAL", default_value = "20.0")]
    pub ping_interval: f64,

    /// Time to wait for a pong, in seconds
    #[arg(long, env = "WATCHMAN_PING_TIMEOUT", default_value = "10.0")]
    pub ping_timeout: f64,

    /// Handshake timeout, in seconds
    #[arg(long, env = "WATCHMAN_CONNECT_TIMEOUT", default_value = "5.0")]
    pub connect_timeout: f64,

    /// Per-frame send timeout, in seconds
    #[arg(long, env = "WATCHMAN_SEND_TIMEOUT", default_value = "5.0")]
    pub send_timeout: f64,

    /// Drain and task shutdown bound, in seconds
    #[arg(long, env = "WATCHMAN_SHUTDOWN_TIMEOUT", default_value = "5.0")]
    pub shutdown_timeout: f64,

    /// Metrics reporting interval, in seconds (0 disables)
    #[arg(long, env = "WATCHMAN_METRICS_INTERVAL", default_value = "5.0")]
    pub metrics_interval: f64,

    /// Records below this severity are dropped at the call site
    #[arg(long, env = "WATCHMAN_MIN_LEVEL", default_value = "DEBUG")]
    #[serde(
        deserialize_with = "deserialize_severity",
        serialize_with = "serialize_severity"
    )]
    pub min_level: Severity,

    /// Verbosity of the shipper's own diagnostics
    #[arg(long, env = "WATCHMAN_LOG_LEVEL", default_value = "info")]
    pub log_level: LogLevel,

    /// Output format of the shipper's own diagnostics
    #[arg(long, env = "WATCHMAN_LOG_FORMAT", default_value = "compact")]
    pub log_format: LogFormat,

    /// TOML configuration file; when given, it replaces flags and env
    #[arg(long, env = "WATCHMAN_CONFIG")]
    #[serde(skip)]
    pub config_file: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_url: DEFAULT_SERVER_URL.to_string(),
            project_id: String::new(),
            project_secret: String::new(),
            max_size: 1000,
            batch_size: 100,
            batch_interval: 1.0,
            max_retries: 3,
            retry_delay: 1.0,
            initial_retry_delay: 1.0,
            max_retry_delay: 60.0,
            retry_multiplier: 2.0,
            max_retry_attempts: 10,
            retry_jitter: false,
            ping_interval: 20.0,
            ping_timeout: 10.0,
            connect_timeout: 5.0,
            send_timeout: 5.0,
            shutdown_timeout: 5.0,
            metrics_interval: 5.0,
            min_level: Severity::Debug,
            log_level: LogLevel::Info,
            log_format: LogFormat::Compact,
            config_file: None,
        }
    }
}

impl Config {
    /// Parses flags (each also readable from its env var). A config file,
    /// if named, is loaded instead.
    pub fn from_args<I, T>(args: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        let config = Config::parse_from(args);
        if let Some(path) = &config.config_file {
            return Self::from_file(path);
        }
        config.validate()?;
        Ok(config)
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        // WATCHMAN_CONFIG names a TOML file that takes precedence
        if let Ok(path) = std::env::var("WATCHMAN_CONFIG") {
            return Self::from_file(path);
        }

        let mut config = Config::default();

        load_env_string("WATCHMAN_SERVER_URL", &mut config.server_url);
        load_env_string("WATCHMAN_PROJECT_ID", &mut config.project_id);
        load_env_string("WATCHMAN_PROJECT_SECRET", &mut config.project_secret);
        load_env_var("WATCHMAN_QUEUE_SIZE", &mut config.max_size)?;
        load_env_var("WATCHMAN_BATCH_SIZE", &mut config.batch_size)?;
        load_env_var("WATCHMAN_BATCH_INTERVAL", &mut config.batch_interval)?;
        load_env_var("WATCHMAN_MAX_RETRIES", &mut config.max_retries)?;
        load_env_var("WATCHMAN_RETRY_DELAY", &mut config.retry_delay)?;
        load_env_var("WATCHMAN_INITIAL_RETRY_DELAY", &mut config.initial_retry_delay)?;
        load_env_var("WATCHMAN_MAX_RETRY_DELAY", &mut config.max_retry_delay)?;
        load_env_var("WATCHMAN_RETRY_MULTIPLIER", &mut config.retry_multiplier)?;
        load_env_var("WATCHMAN_MAX_RETRY_ATTEMPTS", &mut config.max_retry_attempts)?;
        load_env_var("WATCHMAN_RETRY_JITTER", &mut config.retry_jitter)?;
        load_env_var("WATCHMAN_PING_INTERVAL", &mut config.ping_interval)?;
        load_env_var("WATCHMAN_PING_TIMEOUT", &mut config.ping_timeout)?;
        load_env_var("WATCHMAN_CONNECT_TIMEOUT", &mut config.connect_timeout)?;
        load_env_var("WATCHMAN_SEND_TIMEOUT", &mut config.send_timeout)?;
        load_env_var("WATCHMAN_SHUTDOWN_TIMEOUT", &mut config.shutdown_timeout)?;
        load_env_var("WATCHMAN_METRICS_INTERVAL", &mut config.metrics_interval)?;
        load_env_var("WATCHMAN_MIN_LEVEL", &mut config.min_level)?;
        load_env_var("WATCHMAN_LOG_LEVEL", &mut config.log_level)?;
        load_env_var("WATCHMAN_LOG_FORMAT", &mut config.log_format)?;

        config.validate()?;
        Ok(config)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let mut config: Config = toml::from_str(&content)?;
        config.config_file = Some(path.as_ref().to_path_buf());
        config.validate()?;
        Ok(config)
    }

    pub fn queue_capacity(&self) -> usize {
        self.max_size
    }

    pub fn metrics_interval(&self) -> Duration {
        secs(self.metrics_interval)
    }

    pub fn dispatcher_config(&self) -> DispatcherConfig {
        DispatcherConfig {
            batch_size: self.batch_size,
            batch_interval: secs(self.batch_interval),
            max_retries: self.max_retries,
            retry_delay: secs(self.retry_delay),
            shutdown_timeout: secs(self.shutdown_timeout),
        }
    }

    pub fn backoff_policy(&self) -> BackoffPolicy {
        BackoffPolicy {
            initial_delay: secs(self.initial_retry_delay),
            max_delay: secs(self.max_retry_delay),
            multiplier: self.retry_multiplier,
            max_attempts: BackoffPolicy::attempts_from_config(self.max_retry_attempts),
            jitter: self.retry_jitter,
        }
    }

    pub fn endpoint(&self) -> Result<Endpoint, ConfigError> {
        Endpoint::new(&self.server_url, &self.project_id, &self.project_secret)
            .map_err(|e| ConfigError::InvalidUrl(e.to_string()))
    }

    pub fn transport_config(&self) -> Result<TransportConfig, ConfigError> {
        Ok(TransportConfig {
            endpoint: self.endpoint()?,
            backoff: self.backoff_policy(),
            ping_interval: secs(self.ping_interval),
            ping_timeout: secs(self.ping_timeout),
            connect_timeout: secs(self.connect_timeout),
            send_timeout: secs(self.send_timeout),
            shutdown_timeout: secs(self.shutdown_timeout),
        })
    }
}
