//! Client identity and SASL mechanisms.
//!
//! - [`principal`] - The identity a connection authenticates as, and the
//!   local [`Subject`] it may be derived from
//! - [`sasl`] - Pluggable client mechanisms (PLAIN, SCRAM-SHA-256,
//!   SCRAM-SHA-512, OAUTHBEARER) behind the [`SaslClient`] trait
//!
//! # Example Configuration
//!
//! ```yaml
//! sasl:
//!   mechanism: SCRAM-SHA-256
//!   username: "client1"
//!   password: "${KAFKA_PASSWORD}"
//! ```

pub mod principal;
pub mod sasl;

pub use principal::{AuthMethod, Principal, Subject};

pub use sasl::{
    create_sasl_client, DefaultErrorClassifier, ErrorClass, ErrorClassifier, MechanismError,
    MechanismErrorKind, OAuthBearerClient, PlainClient, SaslClient, ScramClient, ScramHash,
    ScramSha256, ScramSha512,
};
