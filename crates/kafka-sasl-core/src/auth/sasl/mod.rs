//! SASL client mechanisms.
//!
//! The authenticator only sequences exchange rounds; evaluating a challenge is
//! delegated to a [`SaslClient`]. Supported mechanisms:
//! - PLAIN - Simple username/password (should only be used over TLS)
//! - SCRAM-SHA-256 - Challenge-response authentication
//! - SCRAM-SHA-512 - Challenge-response authentication
//! - OAUTHBEARER - OAuth 2.0 bearer token (static token)
//!
//! GSSAPI needs an external Kerberos implementation; callers plug it in by
//! implementing [`SaslClient`] themselves.

pub mod oauthbearer;
pub mod plain;
pub mod scram;

pub use oauthbearer::OAuthBearerClient;
pub use plain::PlainClient;
pub use scram::{ScramClient, ScramHash, ScramSha256, ScramSha512};

use std::fmt;

use thiserror::Error;

use crate::config::{SaslClientConfig, SaslMechanism};
use crate::error::{Result, SaslError};

/// Advice attached to [`MechanismErrorKind::ServerNotFound`] failures.
pub const SERVER_NOT_FOUND_HINT: &str = "This may be caused by the client being unable to resolve the Kafka Broker's hostname correctly. Users must configure FQDN of kafka brokers when authenticating using SASL and the broker hostname must match the hostname in `principal/hostname@realm`";

/// What went wrong inside a mechanism.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MechanismErrorKind {
    /// The server's challenge could not be parsed or violated the mechanism.
    InvalidChallenge,
    /// The server failed to prove its identity.
    ServerVerification,
    /// The server principal could not be located (Kerberos-style).
    ServerNotFound,
    /// Local and server clocks disagree (Kerberos-style).
    ClockSkew,
    /// The client or its ticket is not valid yet (Kerberos-style, transient).
    NotYetValid,
    /// The server detected a replayed request (Kerberos-style, transient).
    Replay,
    /// The mechanism was driven out of order.
    IllegalState,
    /// Anything else.
    Other,
}

/// Structured failure returned by [`SaslClient::evaluate_challenge`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct MechanismError {
    /// Classification input.
    pub kind: MechanismErrorKind,
    /// Human-readable description.
    pub message: String,
    /// Optional configuration advice for the operator.
    pub hint: Option<String>,
}

impl MechanismError {
    /// Create an error without a hint.
    pub fn new(kind: MechanismErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            hint: None,
        }
    }

    /// Attach operator advice.
    #[must_use]
    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }
}

/// Whether a mechanism failure is worth a fresh connection attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Transient environment problem; retry the whole connection.
    Retriable,
    /// Retrying will not help.
    Fatal,
}

/// Maps mechanism failures onto [`ErrorClass`].
pub trait ErrorClassifier: Send + Sync + fmt::Debug {
    /// Classify one failure.
    fn classify(&self, error: &MechanismError) -> ErrorClass;
}

/// Treats not-yet-valid credentials and replay detection as transient,
/// everything else fatal.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultErrorClassifier;

impl ErrorClassifier for DefaultErrorClassifier {
    fn classify(&self, error: &MechanismError) -> ErrorClass {
        match error.kind {
            MechanismErrorKind::NotYetValid | MechanismErrorKind::Replay => ErrorClass::Retriable,
            _ => ErrorClass::Fatal,
        }
    }
}

/// Client side of a SASL mechanism.
pub trait SaslClient: Send + fmt::Debug {
    /// The mechanism name announced in the handshake (e.g. "PLAIN").
    fn mechanism_name(&self) -> &str;

    /// Whether the client speaks first, before seeing any challenge.
    fn has_initial_response(&self) -> bool;

    /// Evaluate a server challenge.
    ///
    /// Returns the response to send, or `None` when there is nothing more to
    /// send.
    fn evaluate_challenge(
        &mut self,
        challenge: &[u8],
    ) -> std::result::Result<Option<Vec<u8>>, MechanismError>;

    /// Whether the exchange is finished from the client's point of view.
    fn is_complete(&self) -> bool;

    /// Identity the client authenticates as, when the mechanism knows it.
    fn authorization_id(&self) -> Option<&str> {
        None
    }

    /// Release any credential material held by the client.
    fn dispose(&mut self) {}
}

/// Create a mechanism client from configuration.
///
/// # Errors
///
/// Returns [`SaslError::Configuration`] if the mechanism cannot be built from
/// the given settings.
pub fn create_sasl_client(config: &SaslClientConfig) -> Result<Box<dyn SaslClient>> {
    let username = config.username();
    let password = config.password();

    let require = |value: &str, field: &str| -> Result<()> {
        if value.is_empty() {
            return Err(SaslError::Configuration(format!(
                "Failed to create SaslClient with mechanism {}: '{field}' is not set",
                config.mechanism.mechanism_name()
            )));
        }
        Ok(())
    };

    match config.mechanism {
        SaslMechanism::Plain => {
            require(&username, "username")?;
            Ok(Box::new(PlainClient::new(username, password)))
        }
        SaslMechanism::ScramSha256 => {
            require(&username, "username")?;
            Ok(Box::new(ScramClient::<ScramSha256>::new(username, password)))
        }
        SaslMechanism::ScramSha512 => {
            require(&username, "username")?;
            Ok(Box::new(ScramClient::<ScramSha512>::new(username, password)))
        }
        SaslMechanism::OAuthBearer => {
            let token = config.token().unwrap_or_default();
            require(&token, "token")?;
            Ok(Box::new(OAuthBearerClient::new(token)))
        }
        SaslMechanism::Gssapi => Err(SaslError::Configuration(
            "Failed to create SaslClient with mechanism GSSAPI: no built-in Kerberos support, supply a SaslClient implementation"
                .to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(mechanism: SaslMechanism) -> SaslClientConfig {
        SaslClientConfig {
            mechanism,
            username: "alice".to_string(),
            password: "secret".to_string(),
            token: None,
            ..SaslClientConfig::default()
        }
    }

    #[test]
    fn test_create_plain_client() {
        let client = create_sasl_client(&config(SaslMechanism::Plain)).unwrap();
        assert_eq!(client.mechanism_name(), "PLAIN");
        assert_eq!(client.authorization_id(), Some("alice"));
    }

    #[test]
    fn test_create_scram_clients() {
        let client = create_sasl_client(&config(SaslMechanism::ScramSha256)).unwrap();
        assert_eq!(client.mechanism_name(), "SCRAM-SHA-256");
        let client = create_sasl_client(&config(SaslMechanism::ScramSha512)).unwrap();
        assert_eq!(client.mechanism_name(), "SCRAM-SHA-512");
    }

    #[test]
    fn test_oauthbearer_requires_token() {
        let err = create_sasl_client(&config(SaslMechanism::OAuthBearer)).unwrap_err();
        assert!(matches!(err, SaslError::Configuration(_)));

        let mut cfg = config(SaslMechanism::OAuthBearer);
        cfg.token = Some("eyJhbGciOiJub25lIn0.e30.".to_string());
        let client = create_sasl_client(&cfg).unwrap();
        assert_eq!(client.mechanism_name(), "OAUTHBEARER");
    }

    #[test]
    fn test_missing_username_is_configuration_error() {
        let mut cfg = config(SaslMechanism::Plain);
        cfg.username = String::new();
        let err = create_sasl_client(&cfg).unwrap_err();
        assert!(err.to_string().contains("username"));
    }

    #[test]
    fn test_gssapi_is_not_built_in() {
        let err = create_sasl_client(&config(SaslMechanism::Gssapi)).unwrap_err();
        assert!(matches!(err, SaslError::Configuration(_)));
        assert!(err.to_string().contains("GSSAPI"));
    }

    #[test]
    fn test_default_classifier() {
        let classifier = DefaultErrorClassifier;
        let transient =
            MechanismError::new(MechanismErrorKind::NotYetValid, "client not yet valid");
        let skew = MechanismError::new(MechanismErrorKind::ClockSkew, "clock skew too great");
        let replay = MechanismError::new(MechanismErrorKind::Replay, "request is a replay");
        let not_found = MechanismError::new(MechanismErrorKind::ServerNotFound, "server not found")
            .with_hint(SERVER_NOT_FOUND_HINT);

        assert_eq!(classifier.classify(&transient), ErrorClass::Retriable);
        assert_eq!(classifier.classify(&replay), ErrorClass::Retriable);
        assert_eq!(classifier.classify(&skew), ErrorClass::Fatal);
        assert_eq!(classifier.classify(&not_found), ErrorClass::Fatal);
        assert_eq!(not_found.hint.as_deref(), Some(SERVER_NOT_FOUND_HINT));
    }
}
