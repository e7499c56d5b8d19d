//! Test utilities for driving the authenticator without a real broker.
//!
//! - [`MockTransport`] - In-memory transport with partial writes and injected failures
//! - [`ScriptedSaslClient`] - Mechanism that replays scripted responses
//! - [`ScriptedBroker`] - Broker side of the SASL exchange, frame by frame
//! - [`MockBroker`] - TCP listener serving a [`ScriptedBroker`] per connection
//!
//! # Example
//!
//! ```rust,ignore
//! use kafka_sasl_core::testing::{MockTransport, ScriptedBroker};
//!
//! let mut transport = MockTransport::new();
//! let mut broker = ScriptedBroker::new().with_session_lifetime_ms(10_000);
//!
//! authenticator.authenticate(&mut transport)?;
//! broker.serve(&mut transport);
//! authenticator.authenticate(&mut transport)?;
//! ```

pub mod mock_broker;
pub mod mock_transport;
pub mod scripted_client;

pub use mock_broker::{api_keys, responses, BrokerCall, MockBroker, ScriptedBroker};
pub use mock_transport::MockTransport;
pub use scripted_client::{ChallengeLog, ScriptedSaslClient};
