//! Server configuration loaded from a TOML file.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),
}

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    let config: Config = toml::from_str(&content)?;
    Ok(config)
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub protocol: ProtocolConfig,
    /// Databases served, in index order. The first one is the default.
    #[serde(default = "default_databases")]
    pub databases: Vec<DatabaseConfig>,
    #[serde(default = "default_users")]
    pub users: Vec<UserConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            protocol: ProtocolConfig::default(),
            databases: default_databases(),
            users: default_users(),
        }
    }
}

fn default_databases() -> Vec<DatabaseConfig> {
    vec![DatabaseConfig {
        name: String::new(),
    }]
}

fn default_users() -> Vec<UserConfig> {
    vec![UserConfig {
        name: "SA".to_string(),
        password: String::new(),
    }]
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    #[serde(default = "default_listen_port")]
    pub listen_port: u16,
    #[serde(default = "default_tcp_nodelay")]
    pub tcp_nodelay: bool,
    #[serde(default)]
    pub tls: TlsConfig,
}

fn default_listen_addr() -> String {
    "127.0.0.1".to_string()
}

fn default_listen_port() -> u16 {
    9001
}

fn default_tcp_nodelay() -> bool {
    true
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            listen_port: default_listen_port(),
            tcp_nodelay: default_tcp_nodelay(),
            tls: TlsConfig::default(),
        }
    }
}

/// Server-side TLS. When enabled every accepted connection is encrypted
/// before protocol detection.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TlsConfig {
    #[serde(default)]
    pub enabled: bool,
    /// Certificate chain in PEM format
    pub cert_path: Option<PathBuf>,
    /// Private key in PEM format (PKCS#8, PKCS#1 or SEC1)
    pub key_path: Option<PathBuf>,
}

/// Protocol detection timing.
#[derive(Debug, Clone, Deserialize)]
pub struct ProtocolConfig {
    /// Interval between checks for the first byte (milliseconds)
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Give up on a silent client after this long (milliseconds)
    #[serde(default = "default_max_wait_ms")]
    pub max_wait_ms: u64,
}

fn default_poll_interval_ms() -> u64 {
    100
}

fn default_max_wait_ms() -> u64 {
    1000
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            max_wait_ms: default_max_wait_ms(),
        }
    }
}

impl ProtocolConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn max_wait(&self) -> Duration {
        Duration::from_millis(self.max_wait_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UserConfig {
    pub name: String,
    #[serde(default)]
    pub password: String,
}
