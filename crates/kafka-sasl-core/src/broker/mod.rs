//! Broker connection management.
//!
//! This module provides:
//! - TCP connection to a single Kafka broker with connect and
//!   authentication timeouts
//! - A readiness-driven loop that steps the authenticator
//! - Session re-authentication on the same connection

pub mod connection;

pub use connection::{config_factory, AuthenticatorFactory, BrokerConnection};
