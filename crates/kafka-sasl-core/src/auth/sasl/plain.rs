//! SASL/PLAIN client implementation.
//!
//! SASL/PLAIN transmits credentials as cleartext (should only be used over TLS).
//! The authentication message format is: `authzid\0username\0password`, with
//! an empty authzid.

use std::fmt;

use tracing::debug;

use super::{MechanismError, MechanismErrorKind, SaslClient};

/// SASL/PLAIN client.
pub struct PlainClient {
    username: String,
    password: String,
    completed: bool,
}

impl PlainClient {
    /// Create a new PLAIN client.
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
            completed: false,
        }
    }

    /// Build the single PLAIN message.
    fn message(&self) -> Vec<u8> {
        let mut message = Vec::with_capacity(self.username.len() + self.password.len() + 2);
        message.push(0);
        message.extend_from_slice(self.username.as_bytes());
        message.push(0);
        message.extend_from_slice(self.password.as_bytes());
        message
    }
}

impl fmt::Debug for PlainClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PlainClient")
            .field("username", &self.username)
            .field("password", &"***")
            .field("completed", &self.completed)
            .finish()
    }
}

impl SaslClient for PlainClient {
    fn mechanism_name(&self) -> &str {
        "PLAIN"
    }

    fn has_initial_response(&self) -> bool {
        true
    }

    fn evaluate_challenge(&mut self, _challenge: &[u8]) -> Result<Option<Vec<u8>>, MechanismError> {
        if self.completed {
            return Err(MechanismError::new(
                MechanismErrorKind::IllegalState,
                "PLAIN authentication already completed",
            ));
        }
        self.completed = true;
        debug!(username = %self.username, "built PLAIN message");
        Ok(Some(self.message()))
    }

    fn is_complete(&self) -> bool {
        self.completed
    }

    fn authorization_id(&self) -> Option<&str> {
        Some(&self.username)
    }

    fn dispose(&mut self) {
        self.password.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_message_format() {
        let mut client = PlainClient::new("testuser", "testpass");
        assert!(client.has_initial_response());
        assert!(!client.is_complete());

        let message = client.evaluate_challenge(&[]).unwrap().unwrap();
        assert_eq!(message, b"\0testuser\0testpass");
        assert!(client.is_complete());
    }

    #[test]
    fn test_plain_single_round() {
        let mut client = PlainClient::new("testuser", "testpass");
        client.evaluate_challenge(&[]).unwrap();

        let err = client.evaluate_challenge(&[]).unwrap_err();
        assert_eq!(err.kind, MechanismErrorKind::IllegalState);
    }

    #[test]
    fn test_plain_debug_hides_password() {
        let client = PlainClient::new("testuser", "testpass");
        let debug = format!("{client:?}");
        assert!(debug.contains("testuser"));
        assert!(!debug.contains("testpass"));
    }

    #[test]
    fn test_plain_authorization_id() {
        let client = PlainClient::new("alice", "secret");
        assert_eq!(client.authorization_id(), Some("alice"));
    }
}
