//! Domain error types for the SASL client authenticator.
//!
//! Uses `thiserror` for ergonomic error definitions with proper context.

use thiserror::Error;

/// Errors related to configuration parsing and validation.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("failed to read config file '{path}': {source}")]
    IoError {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Failed to parse YAML configuration.
    #[error("failed to parse config: {0}")]
    ParseError(#[from] serde_yaml::Error),

    /// Invalid address format.
    #[error("invalid address format: {0} (expected 'host:port')")]
    InvalidAddress(String),

    /// A setting required by the selected mechanism is missing.
    #[error("mechanism {mechanism} requires '{field}' to be set")]
    MissingField {
        mechanism: &'static str,
        field: &'static str,
    },

    /// Frame size limit is unusable.
    #[error("max_frame_size must be larger than the 4-byte size prefix, got {0}")]
    InvalidFrameSize(usize),
}

/// Errors raised while driving a SASL authentication exchange.
///
/// Every variant is surfaced synchronously from the authenticator's step
/// function. Only [`SaslError::MechanismRetriable`] and [`SaslError::Io`]
/// warrant reattempting the whole connection.
#[derive(Error, Debug)]
pub enum SaslError {
    /// The mechanism client could not be constructed.
    #[error("failed to configure SASL client: {0}")]
    Configuration(String),

    /// Protocol violation: malformed frame, out-of-sequence response, null token.
    #[error("illegal SASL state: {0}")]
    IllegalSaslState(String),

    /// The broker does not enable the requested mechanism.
    #[error("Client SASL mechanism '{mechanism}' not enabled in the server, enabled mechanisms are {enabled:?}")]
    UnsupportedMechanism {
        mechanism: String,
        enabled: Vec<String>,
    },

    /// The broker rejected the exchange with an error code.
    #[error("SASL authentication failed (error code {code}): {message}")]
    Authentication { code: i16, message: String },

    /// Transient mechanism failure; the connection attempt may be retried.
    #[error("{0}")]
    MechanismRetriable(String),

    /// Mechanism failure that retrying will not fix.
    #[error("{0}")]
    MechanismFatal(String),

    /// Transport read or write failed.
    #[error("connection error: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to encode a Kafka protocol message.
    #[error("protocol encode error: {message}")]
    ProtocolEncode { message: String },

    /// Failed to decode a Kafka protocol message.
    #[error("protocol decode error: {message}")]
    ProtocolDecode { message: String },

    /// The authenticator was driven again after it had failed.
    #[error("SASL handshake has already failed")]
    AlreadyFailed,

    /// The broker could not be reached.
    #[error("broker {address} unavailable: {message}")]
    BrokerUnavailable { address: String, message: String },

    /// An exchange did not finish in time.
    #[error("{operation} timed out after {timeout_ms}ms")]
    Timeout {
        operation: &'static str,
        timeout_ms: u64,
    },

    /// Invalid client configuration.
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl SaslError {
    /// Whether the caller may retry by opening a fresh connection.
    #[must_use]
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            Self::MechanismRetriable(_)
                | Self::Io(_)
                | Self::BrokerUnavailable { .. }
                | Self::Timeout { .. }
        )
    }
}

/// Result type alias for authentication operations.
pub type Result<T> = std::result::Result<T, SaslError>;

/// Result type alias for configuration operations.
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;
