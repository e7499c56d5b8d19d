//! One round of the token exchange.

use std::sync::Arc;

use tracing::debug;

use crate::auth::sasl::{ErrorClass, ErrorClassifier, MechanismError, SaslClient};
use crate::error::{Result, SaslError};

/// Drives a [`SaslClient`] one challenge at a time.
#[derive(Debug)]
pub struct TokenExchange {
    client: Box<dyn SaslClient>,
    classifier: Arc<dyn ErrorClassifier>,
}

impl TokenExchange {
    /// Wrap a mechanism client.
    pub fn new(client: Box<dyn SaslClient>, classifier: Arc<dyn ErrorClassifier>) -> Self {
        Self { client, classifier }
    }

    /// The wrapped mechanism.
    #[must_use]
    pub fn client(&self) -> &dyn SaslClient {
        self.client.as_ref()
    }

    /// Mechanism name announced in the handshake.
    #[must_use]
    pub fn mechanism_name(&self) -> &str {
        self.client.mechanism_name()
    }

    /// Whether the mechanism has finished.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.client.is_complete()
    }

    /// Produce the next token to send, if any.
    ///
    /// Returns `None` when the mechanism is already complete. For the opening
    /// round of a mechanism without an initial response, the (empty)
    /// challenge itself is the token.
    ///
    /// # Errors
    ///
    /// Returns [`SaslError::IllegalSaslState`] for a missing challenge and a
    /// classified mechanism error if evaluation fails.
    pub fn create_token(
        &mut self,
        challenge: Option<&[u8]>,
        is_initial: bool,
    ) -> Result<Option<Vec<u8>>> {
        if self.client.is_complete() {
            return Ok(None);
        }

        let challenge = challenge.ok_or_else(|| {
            SaslError::IllegalSaslState(
                "Error authenticating with the Kafka Broker: received a null saslToken".to_string(),
            )
        })?;

        if is_initial && !self.client.has_initial_response() {
            return Ok(Some(challenge.to_vec()));
        }

        self.client
            .evaluate_challenge(challenge)
            .map_err(|e| self.classify(&e))
    }

    /// Release the mechanism's credentials.
    pub fn dispose(&mut self) {
        self.client.dispose();
    }

    fn classify(&self, error: &MechanismError) -> SaslError {
        let mut message = format!(
            "An error: ({error}) occurred when evaluating SASL token received from the Kafka Broker."
        );
        if let Some(hint) = &error.hint {
            message.push(' ');
            message.push_str(hint);
        }
        message.push_str(" Kafka Client will go to AUTHENTICATION_FAILED state.");

        let class = self.classifier.classify(error);
        debug!(kind = ?error.kind, ?class, "SASL mechanism failed");
        match class {
            ErrorClass::Retriable => SaslError::MechanismRetriable(message),
            ErrorClass::Fatal => SaslError::MechanismFatal(message),
        }
    }
}
