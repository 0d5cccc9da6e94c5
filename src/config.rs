use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use codecs::decoding::FramingConfig;
use serde::{Deserialize, Serialize};

pub const SYSLOG_PORT: &str = "SYSLOG_PORT";
pub const SYSLOG_ADDRESS: &str = "SYSLOG_ADDRESS";
pub const DB_HOST: &str = "DB_HOST";
pub const DB_PORT: &str = "DB_PORT";
pub const DB_USER: &str = "DB_USER";
pub const DB_PASSWORD: &str = "DB_PASSWORD";
pub const DB_NAME: &str = "DB_NAME";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("read config file {path:?} failed, {err}")]
    Read { path: PathBuf, err: std::io::Error },

    #[error("parse config failed, {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("invalid value {value:?} of env {key}, {reason}")]
    Env {
        key: &'static str,
        value: String,
        reason: String,
    },

    #[error("invalid config, {0}")]
    Invalid(&'static str),
}

const fn default_port() -> u16 {
    514
}

const fn default_address() -> IpAddr {
    IpAddr::V4(Ipv4Addr::UNSPECIFIED)
}

// The default max length of one TCP frame
const fn default_max_length() -> usize {
    128 * 1024
}

const fn default_shutdown_timeout() -> Duration {
    Duration::from_secs(10)
}

const fn default_stats_interval() -> Duration {
    Duration::from_secs(60)
}

/// Socket options shared by the UDP and TCP listeners, both bind the same
/// address and port.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ListenConfig {
    #[serde(default = "default_address")]
    pub address: IpAddr,

    #[serde(default = "default_port")]
    pub port: u16,

    /// How a TCP byte stream is split into messages.
    #[serde(default)]
    pub framing: FramingConfig,

    /// Newline framed messages longer than this are discarded, so a peer
    /// that never sends a newline cannot grow the read buffer without bound.
    #[serde(default = "default_max_length", with = "humanize::bytes::serde")]
    pub max_length: usize,

    /// The time a TCP connection needs to be idle before sending keepalive
    /// packets.
    #[serde(default, with = "humanize::duration::serde_option")]
    pub keepalive: Option<Duration>,

    /// Configures the receive buffer size using the "SO_RCVBUF" option on the socket.
    #[serde(default, with = "humanize::bytes::serde_option")]
    pub receive_buffer_bytes: Option<usize>,

    /// The max number of TCP connections that will be processed.
    #[serde(default)]
    pub connection_limit: Option<usize>,
}

impl Default for ListenConfig {
    fn default() -> Self {
        Self {
            address: default_address(),
            port: default_port(),
            framing: FramingConfig::default(),
            max_length: default_max_length(),
            keepalive: None,
            receive_buffer_bytes: None,
            connection_limit: None,
        }
    }
}

impl ListenConfig {
    #[inline]
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.address, self.port)
    }
}

fn default_db_host() -> String {
    "db".to_string()
}

const fn default_db_port() -> u16 {
    5432
}

fn default_db_user() -> String {
    "logforge".to_string()
}

fn default_db_name() -> String {
    "logforge_db".to_string()
}

const fn default_max_connections() -> u32 {
    10
}

const fn default_connect_timeout() -> Duration {
    Duration::from_secs(5)
}

const fn default_alert_refresh_interval() -> Duration {
    Duration::from_secs(30)
}

const fn default_enabled() -> bool {
    true
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct DatabaseConfig {
    /// Keep records in memory only when disabled, which is meant for
    /// local testing.
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    #[serde(default = "default_db_host")]
    pub host: String,

    #[serde(default = "default_db_port")]
    pub port: u16,

    #[serde(default = "default_db_user")]
    pub user: String,

    #[serde(default)]
    pub password: Option<String>,

    #[serde(default = "default_db_name")]
    pub name: String,

    /// Size of the connection pool.
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// How long to wait for a pooled connection.
    #[serde(default = "default_connect_timeout", with = "humanize::duration::serde")]
    pub connect_timeout: Duration,

    /// How often alert rules are reloaded from the `alerts` table.
    #[serde(
        default = "default_alert_refresh_interval",
        with = "humanize::duration::serde"
    )]
    pub alert_refresh_interval: Duration,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            host: default_db_host(),
            port: default_db_port(),
            user: default_db_user(),
            password: None,
            name: default_db_name(),
            max_connections: default_max_connections(),
            connect_timeout: default_connect_timeout(),
            alert_refresh_interval: default_alert_refresh_interval(),
        }
    }
}

#[derive(Copy, Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum WhenFull {
    /// Wait for free space in the queue.
    ///
    /// This applies backpressure to the listeners. A TCP connection stops being read, a
    /// UDP socket stops being drained and the kernel drops datagrams once its own buffer
    /// is full.
    #[default]
    Block,

    /// Drops the record instead of waiting for free space in the queue.
    DropNewest,
}

const fn default_workers() -> usize {
    4
}

const fn default_queue_size() -> usize {
    8192
}

const fn default_max_retries() -> usize {
    3
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct DispatcherConfig {
    /// Number of store workers, each one owns a queue of its own.
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Total number of records queued across all workers.
    #[serde(default = "default_queue_size")]
    pub queue_size: usize,

    #[serde(default)]
    pub when_full: WhenFull,

    /// How many times a failed store is retried before the record is dropped.
    #[serde(default = "default_max_retries")]
    pub max_retries: usize,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            queue_size: default_queue_size(),
            when_full: WhenFull::default(),
            max_retries: default_max_retries(),
        }
    }
}

impl DispatcherConfig {
    /// Capacity of every worker queue.
    pub fn shard_capacity(&self) -> usize {
        (self.queue_size / self.workers.max(1)).max(1)
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub listen: ListenConfig,

    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub dispatcher: DispatcherConfig,

    /// How long open connections and queued records are waited for once
    /// shutdown begins.
    #[serde(
        default = "default_shutdown_timeout",
        with = "humanize::duration::serde"
    )]
    pub shutdown_timeout: Duration,

    /// Interval of the stats log, zero disables it.
    #[serde(default = "default_stats_interval", with = "humanize::duration::serde")]
    pub stats_interval: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen: ListenConfig::default(),
            database: DatabaseConfig::default(),
            dispatcher: DispatcherConfig::default(),
            shutdown_timeout: default_shutdown_timeout(),
            stats_interval: default_stats_interval(),
        }
    }
}

impl Config {
    /// Reads the optional config file, then applies environment overrides
    /// and validates the result.
    pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
        let mut config = match path {
            Some(path) => {
                let text = std::fs::read_to_string(path).map_err(|err| ConfigError::Read {
                    path: path.to_path_buf(),
                    err,
                })?;

                serde_yaml::from_str::<Config>(&text)?
            }
            None => Config::default(),
        };

        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;

        Ok(config)
    }

    /// Overrides fields with the environment, empty values are ignored.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let lookup = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        if let Some(value) = lookup(SYSLOG_PORT) {
            self.listen.port = parse_env(SYSLOG_PORT, value)?;
        }
        if let Some(value) = lookup(SYSLOG_ADDRESS) {
            self.listen.address = parse_env(SYSLOG_ADDRESS, value)?;
        }

        if let Some(value) = lookup(DB_HOST) {
            self.database.host = value;
        }
        if let Some(value) = lookup(DB_PORT) {
            self.database.port = parse_env(DB_PORT, value)?;
        }
        if let Some(value) = lookup(DB_USER) {
            self.database.user = value;
        }
        if let Some(value) = lookup(DB_PASSWORD) {
            self.database.password = Some(value);
        }
        if let Some(value) = lookup(DB_NAME) {
            self.database.name = value;
        }

        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.dispatcher.workers == 0 {
            return Err(ConfigError::Invalid("dispatcher.workers must be at least 1"));
        }

        if self.dispatcher.queue_size < self.dispatcher.workers {
            return Err(ConfigError::Invalid(
                "dispatcher.queue_size must not be less than dispatcher.workers",
            ));
        }

        if self.listen.max_length == 0 {
            return Err(ConfigError::Invalid("listen.max_length must be at least 1"));
        }

        if self.listen.connection_limit == Some(0) {
            return Err(ConfigError::Invalid(
                "listen.connection_limit must be at least 1",
            ));
        }

        if self.database.enabled && self.database.max_connections == 0 {
            return Err(ConfigError::Invalid(
                "database.max_connections must be at least 1",
            ));
        }

        Ok(())
    }
}

fn parse_env<T>(key: &'static str, value: String) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    let parsed = value.trim().parse::<T>();

    parsed.map_err(|err| ConfigError::Env {
        key,
        reason: err.to_string(),
        value,
    })
}
