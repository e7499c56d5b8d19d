//! Configuration types for the SASL client.
//!
//! Configuration is loaded from YAML files and validated before use.

use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, ConfigResult};
use crate::network::codec::{DEFAULT_MAX_FRAME_SIZE, SIZE_PREFIX_LEN};

/// Root configuration for a SASL client connection.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ClientConfig {
    /// Broker connection configuration.
    pub broker: BrokerConfig,

    /// SASL authentication configuration.
    #[serde(default)]
    pub sasl: SaslClientConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Broker connection configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BrokerConfig {
    /// Broker address, e.g., "localhost:9092".
    pub address: String,

    /// Connection timeout in milliseconds.
    #[serde(default = "default_connection_timeout_ms")]
    pub connection_timeout_ms: u64,

    /// Upper bound on the whole authentication exchange, in milliseconds.
    #[serde(default = "default_authentication_timeout_ms")]
    pub authentication_timeout_ms: u64,

    /// Largest frame accepted from the broker, in bytes.
    #[serde(default = "default_max_frame_size")]
    pub max_frame_size: usize,
}

/// SASL authentication mechanism.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
pub enum SaslMechanism {
    /// SASL/PLAIN - simple username/password authentication.
    #[default]
    #[serde(rename = "PLAIN")]
    Plain,
    /// SASL/SCRAM-SHA-256 - salted challenge-response authentication.
    #[serde(rename = "SCRAM-SHA-256")]
    ScramSha256,
    /// SASL/SCRAM-SHA-512 - salted challenge-response authentication.
    #[serde(rename = "SCRAM-SHA-512")]
    ScramSha512,
    /// SASL/OAUTHBEARER - OAuth 2.0 bearer token.
    #[serde(rename = "OAUTHBEARER")]
    OAuthBearer,
    /// SASL/GSSAPI - Kerberos; requires a caller-supplied mechanism.
    #[serde(rename = "GSSAPI")]
    Gssapi,
}

impl SaslMechanism {
    /// Get the Kafka mechanism name as used in the SASL handshake.
    #[must_use]
    pub fn mechanism_name(&self) -> &'static str {
        match self {
            Self::Plain => "PLAIN",
            Self::ScramSha256 => "SCRAM-SHA-256",
            Self::ScramSha512 => "SCRAM-SHA-512",
            Self::OAuthBearer => "OAUTHBEARER",
            Self::Gssapi => "GSSAPI",
        }
    }
}

/// SASL authentication configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SaslClientConfig {
    /// SASL mechanism to use.
    #[serde(default)]
    pub mechanism: SaslMechanism,

    /// Username for authentication.
    /// Supports environment variable expansion: "${KAFKA_USERNAME}"
    #[serde(default)]
    pub username: String,

    /// Password for authentication.
    /// Supports environment variable expansion: "${KAFKA_PASSWORD}"
    #[serde(default)]
    pub password: String,

    /// Bearer token for OAUTHBEARER.
    /// Supports environment variable expansion: "${KAFKA_TOKEN}"
    #[serde(default)]
    pub token: Option<String>,

    /// Discover capabilities and announce the mechanism before the exchange.
    ///
    /// Disable only for brokers that expect raw tokens from the first byte.
    #[serde(default = "default_handshake_request_enable")]
    pub handshake_request_enable: bool,

    /// Client id sent in every request header.
    #[serde(default = "default_client_id")]
    pub client_id: String,
}

impl SaslClientConfig {
    /// Get the username with environment variables expanded.
    #[must_use]
    pub fn username(&self) -> String {
        expand_env_vars(&self.username)
    }

    /// Get the password with environment variables expanded.
    #[must_use]
    pub fn password(&self) -> String {
        expand_env_vars(&self.password)
    }

    /// Get the bearer token with environment variables expanded.
    #[must_use]
    pub fn token(&self) -> Option<String> {
        self.token.as_deref().map(expand_env_vars)
    }

    /// Validate mechanism-specific required fields.
    ///
    /// # Errors
    ///
    /// Returns an error if a field the mechanism needs is missing.
    pub fn validate(&self) -> ConfigResult<()> {
        let mechanism = self.mechanism.mechanism_name();
        match self.mechanism {
            SaslMechanism::Plain | SaslMechanism::ScramSha256 | SaslMechanism::ScramSha512 => {
                if self.username.is_empty() {
                    return Err(ConfigError::MissingField {
                        mechanism,
                        field: "username",
                    });
                }
                if self.password.is_empty() {
                    return Err(ConfigError::MissingField {
                        mechanism,
                        field: "password",
                    });
                }
            }
            SaslMechanism::OAuthBearer => {
                if self.token.as_deref().map_or(true, str::is_empty) {
                    return Err(ConfigError::MissingField {
                        mechanism,
                        field: "token",
                    });
                }
            }
            SaslMechanism::Gssapi => {}
        }
        Ok(())
    }
}

impl Default for SaslClientConfig {
    fn default() -> Self {
        Self {
            mechanism: SaslMechanism::default(),
            username: String::new(),
            password: String::new(),
            token: None,
            handshake_request_enable: default_handshake_request_enable(),
            client_id: default_client_id(),
        }
    }
}

/// Expand environment variables in a string.
///
/// Replaces `${VAR_NAME}` with the value of the environment variable `VAR_NAME`.
/// If the variable is not set, replaces with an empty string.
fn expand_env_vars(s: &str) -> String {
    let re = Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("valid regex");
    re.replace_all(s, |caps: &regex::Captures| {
        std::env::var(&caps[1]).unwrap_or_default()
    })
    .to_string()
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output logs in JSON format (for production).
    #[serde(default)]
    pub json: bool,
}

// Default value functions

fn default_connection_timeout_ms() -> u64 {
    10_000
}

fn default_authentication_timeout_ms() -> u64 {
    30_000
}

fn default_max_frame_size() -> usize {
    DEFAULT_MAX_FRAME_SIZE
}

fn default_handshake_request_enable() -> bool {
    true
}

fn default_client_id() -> String {
    "kafka-sasl-client".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl BrokerConfig {
    /// Broker at `address` with default timeouts and frame limit.
    #[must_use]
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            connection_timeout_ms: default_connection_timeout_ms(),
            authentication_timeout_ms: default_authentication_timeout_ms(),
            max_frame_size: default_max_frame_size(),
        }
    }

    /// Connection timeout as a `Duration`.
    #[must_use]
    pub fn connection_timeout(&self) -> Duration {
        Duration::from_millis(self.connection_timeout_ms)
    }

    /// Authentication timeout as a `Duration`.
    #[must_use]
    pub fn authentication_timeout(&self) -> Duration {
        Duration::from_millis(self.authentication_timeout_ms)
    }

    /// Validate the broker configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the address is not `host:port` or the frame limit
    /// cannot hold a response header.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.address.parse::<SocketAddr>().is_err() {
            let valid = self
                .address
                .rsplit_once(':')
                .is_some_and(|(host, port)| !host.is_empty() && port.parse::<u16>().is_ok());
            if !valid {
                return Err(ConfigError::InvalidAddress(self.address.clone()));
            }
        }
        if self.max_frame_size <= SIZE_PREFIX_LEN {
            return Err(ConfigError::InvalidFrameSize(self.max_frame_size));
        }
        Ok(())
    }
}

// Configuration loading and validation

impl ClientConfig {
    /// Load configuration from a YAML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed, or if
    /// validation fails.
    pub fn from_file<P: AsRef<Path>>(path: P) -> ConfigResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::IoError {
            path: path.display().to_string(),
            source: e,
        })?;

        let config: Self = serde_yaml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a YAML string.
    ///
    /// # Errors
    ///
    /// Returns an error if parsing or validation fails.
    pub fn from_str(content: &str) -> ConfigResult<Self> {
        let config: Self = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if any validation check fails.
    pub fn validate(&self) -> ConfigResult<()> {
        self.broker.validate()?;
        self.sasl.validate()
    }
}
