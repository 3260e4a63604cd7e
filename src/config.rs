//! Client configuration
//!
//! Loaded from a TOML file. Every section is optional and falls back to the
//! defaults for the public OneNET MQTTS endpoint. Device credentials are not
//! part of the file; they come from the command line or environment.

use crate::auth::token::{DEFAULT_TOKEN_VALIDITY_SECS, TOKEN_ALG_VERSION};
use crate::transport::mqtt::ReconnectConfig;
use crate::transport::trust_anchor::DEFAULT_CA_DIR;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::warn;
use url::Url;

/// Default broker endpoint
pub const DEFAULT_BROKER_URL: &str = "mqtts://mqttstls.heclouds.com:8883";

/// Upper bound for `[token] validity_secs`: 100 years
pub const MAX_TOKEN_VALIDITY_SECS: i64 = 100 * 365 * 86_400;

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ClientConfig {
    #[serde(default)]
    pub broker: BrokerSection,
    #[serde(default)]
    pub token: TokenSection,
    #[serde(default)]
    pub tls: TlsSection,
    #[serde(default)]
    pub reconnect: ReconnectSection,
}

/// Broker connection settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BrokerSection {
    /// Broker URL, `mqtts://host:port`
    #[serde(default = "default_broker_url")]
    pub url: String,
    /// MQTT client id; defaults to the device name
    pub client_id: Option<String>,
    /// Keep-alive interval in seconds
    #[serde(default = "default_keep_alive")]
    pub keep_alive_secs: u64,
    /// How long to wait for the broker's CONNACK (and a SUBACK)
    #[serde(default = "default_connack_timeout")]
    pub connack_timeout_secs: u64,
    /// Permit `mqtt://` URLs. The access token then travels in cleartext.
    #[serde(default)]
    pub allow_plaintext: bool,
}

impl Default for BrokerSection {
    fn default() -> Self {
        Self {
            url: default_broker_url(),
            client_id: None,
            keep_alive_secs: default_keep_alive(),
            connack_timeout_secs: default_connack_timeout(),
            allow_plaintext: false,
        }
    }
}

/// Token settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TokenSection {
    /// Token lifetime in seconds
    #[serde(default = "default_validity")]
    pub validity_secs: i64,
    /// Signature scheme version
    #[serde(default = "default_version")]
    pub version: String,
}

impl Default for TokenSection {
    fn default() -> Self {
        Self {
            validity_secs: default_validity(),
            version: default_version(),
        }
    }
}

/// Trust anchor settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TlsSection {
    /// Directory the CA file is written to
    #[serde(default = "default_ca_dir")]
    pub ca_dir: PathBuf,
    /// PEM file used instead of the compiled-in anchor
    pub ca_file: Option<PathBuf>,
}

impl Default for TlsSection {
    fn default() -> Self {
        Self {
            ca_dir: default_ca_dir(),
            ca_file: None,
        }
    }
}

/// Transport-level reconnection settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReconnectSection {
    /// Maximum consecutive attempts; unlimited when absent
    pub max_attempts: Option<u32>,
    /// Delay pattern in milliseconds
    #[serde(default = "default_backoff")]
    pub backoff_ms: Vec<u64>,
    /// Delay once the pattern is exhausted
    #[serde(default = "default_sustained_delay")]
    pub sustained_delay_ms: u64,
}

impl Default for ReconnectSection {
    fn default() -> Self {
        Self {
            max_attempts: None,
            backoff_ms: default_backoff(),
            sustained_delay_ms: default_sustained_delay(),
        }
    }
}

impl From<&ReconnectSection> for ReconnectConfig {
    fn from(section: &ReconnectSection) -> Self {
        ReconnectConfig {
            max_attempts: section.max_attempts,
            backoff_pattern: section.backoff_ms.clone(),
            sustained_delay: section.sustained_delay_ms,
        }
    }
}

fn default_broker_url() -> String {
    DEFAULT_BROKER_URL.to_string()
}

fn default_keep_alive() -> u64 {
    60
}

fn default_connack_timeout() -> u64 {
    30
}

fn default_validity() -> i64 {
    DEFAULT_TOKEN_VALIDITY_SECS
}

fn default_version() -> String {
    TOKEN_ALG_VERSION.to_string()
}

fn default_ca_dir() -> PathBuf {
    PathBuf::from(DEFAULT_CA_DIR)
}

fn default_backoff() -> Vec<u64> {
    vec![250, 500, 1000, 5000]
}

fn default_sustained_delay() -> u64 {
    5000
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),
    #[error("Failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("Invalid broker URL: {0}")]
    InvalidBrokerUrl(String),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl ClientConfig {
    /// Load and validate configuration from a TOML file
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Parse and validate configuration from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: ClientConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Check values that serde cannot
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_broker_url(&self.broker.url, self.broker.allow_plaintext)?;

        if self.broker.keep_alive_secs < 5 {
            return Err(ConfigError::InvalidConfig(format!(
                "keep_alive_secs must be at least 5, got {}",
                self.broker.keep_alive_secs
            )));
        }
        if self.broker.connack_timeout_secs == 0 {
            return Err(ConfigError::InvalidConfig(
                "connack_timeout_secs must be greater than 0".to_string(),
            ));
        }
        if let Some(client_id) = &self.broker.client_id {
            if client_id.is_empty() {
                return Err(ConfigError::InvalidConfig(
                    "client_id must not be empty".to_string(),
                ));
            }
        }
        if !(1..=MAX_TOKEN_VALIDITY_SECS).contains(&self.token.validity_secs) {
            return Err(ConfigError::InvalidConfig(format!(
                "token validity_secs must be between 1 and {MAX_TOKEN_VALIDITY_SECS}, got {}",
                self.token.validity_secs
            )));
        }
        if self.token.version.is_empty() {
            return Err(ConfigError::InvalidConfig(
                "token version must not be empty".to_string(),
            ));
        }

        ReconnectConfig::from(&self.reconnect)
            .validate()
            .map_err(ConfigError::InvalidConfig)?;

        Ok(())
    }

    pub fn reconnect_config(&self) -> ReconnectConfig {
        ReconnectConfig::from(&self.reconnect)
    }
}

/// Broker URL must carry an MQTT scheme and a host; plaintext only when allowed
fn validate_broker_url(raw: &str, allow_plaintext: bool) -> Result<(), ConfigError> {
    let url = Url::parse(raw).map_err(|_| ConfigError::InvalidBrokerUrl(raw.to_string()))?;
    match url.scheme() {
        "mqtts" | "ssl" => {}
        "mqtt" | "tcp" if allow_plaintext => {
            warn!(url = %raw, "plaintext broker URL, the access token is sent unencrypted");
        }
        "mqtt" | "tcp" => {
            return Err(ConfigError::InvalidBrokerUrl(format!(
                "{raw} is not TLS; set [broker] allow_plaintext = true to use it"
            )));
        }
        other => {
            return Err(ConfigError::InvalidBrokerUrl(format!(
                "unsupported scheme '{other}' in {raw}"
            )));
        }
    }
    if url.host_str().is_none() {
        return Err(ConfigError::InvalidBrokerUrl(raw.to_string()));
    }
    Ok(())
}
