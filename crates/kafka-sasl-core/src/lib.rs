//! Kafka SASL Client Core Library
//!
//! This library implements the client side of Kafka's SASL authentication
//! exchange as a resumable, non-blocking state machine. The caller owns the
//! socket and steps the authenticator whenever it is readable or writable;
//! the authenticator discovers broker capabilities, announces the mechanism,
//! exchanges tokens, and computes when the session must be re-authenticated.
//!
//! # Architecture
//!
//! The library is organized into several modules:
//!
//! - [`config`] - Configuration loading and validation
//! - [`error`] - Domain-specific error types
//! - [`network`] - Frame codec, resumable frame I/O, and the transport trait
//! - [`auth`] - Principals and pluggable SASL client mechanisms
//! - [`authenticator`] - The handshake state machine
//! - [`session`] - Injected clock and re-authentication jitter
//! - [`broker`] - Async TCP connection that drives the authenticator
//!
//! # Example
//!
//! ```rust,ignore
//! use kafka_sasl_core::broker::BrokerConnection;
//! use kafka_sasl_core::config::ClientConfig;
//!
//! let config = ClientConfig::from_file("config.yaml")?;
//! let mut conn = BrokerConnection::connect(&config.broker, &config.sasl).await?;
//! conn.authenticate().await?;
//! println!("authenticated as {}", conn.principal());
//! ```

#![forbid(unsafe_code)]

pub mod auth;
pub mod authenticator;
pub mod broker;
pub mod config;
pub mod error;
pub mod network;
pub mod session;

/// Test utilities for driving the authenticator without a real broker.
///
/// This module is only available when compiling tests or when the `testing` feature is enabled.
#[cfg(any(test, feature = "testing"))]
pub mod testing;

// Re-export commonly used types
pub use auth::{Principal, SaslClient, Subject};
pub use authenticator::{ReauthenticationContext, SaslClientAuthenticator, SaslState};
pub use broker::BrokerConnection;
pub use config::{BrokerConfig, ClientConfig, SaslClientConfig, SaslMechanism};
pub use error::{ConfigError, Result, SaslError};
pub use network::TransportLayer;
