//! Mechanism double that replays scripted responses.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::auth::sasl::{MechanismError, MechanismErrorKind, SaslClient};

/// Shared record of the challenges a [`ScriptedSaslClient`] was given.
pub type ChallengeLog = Arc<Mutex<Vec<Vec<u8>>>>;

/// A [`SaslClient`] that answers each challenge with the next scripted step.
///
/// The client reports complete once its last step has been played.
#[derive(Debug)]
pub struct ScriptedSaslClient {
    mechanism: String,
    initial_response: bool,
    steps: VecDeque<Result<Option<Vec<u8>>, MechanismError>>,
    authorization_id: Option<String>,
    complete: bool,
    challenges: ChallengeLog,
    disposed: Arc<AtomicBool>,
}

impl ScriptedSaslClient {
    /// Answer successive challenges with `responses`, in order.
    #[must_use]
    pub fn new(has_initial_response: bool, responses: Vec<Vec<u8>>) -> Self {
        Self {
            mechanism: "PLAIN".to_string(),
            initial_response: has_initial_response,
            steps: responses.into_iter().map(|r| Ok(Some(r))).collect(),
            authorization_id: None,
            complete: false,
            challenges: ChallengeLog::default(),
            disposed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Fail the first evaluation with `error`.
    #[must_use]
    pub fn failing(error: MechanismError) -> Self {
        let mut client = Self::new(true, Vec::new());
        client.steps.push_back(Err(error));
        client
    }

    /// Announce a different mechanism name.
    #[must_use]
    pub fn with_mechanism(mut self, mechanism: impl Into<String>) -> Self {
        self.mechanism = mechanism.into();
        self
    }

    /// Report an authorization id.
    #[must_use]
    pub fn with_authorization_id(mut self, authorization_id: impl Into<String>) -> Self {
        self.authorization_id = Some(authorization_id.into());
        self
    }

    /// Add a final step that verifies silently and sends nothing.
    #[must_use]
    pub fn then_silent(mut self) -> Self {
        self.steps.push_back(Ok(None));
        self
    }

    /// Handle on the challenges received so far.
    #[must_use]
    pub fn challenges(&self) -> ChallengeLog {
        Arc::clone(&self.challenges)
    }

    /// Handle that turns true once the client is disposed.
    #[must_use]
    pub fn disposed(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.disposed)
    }
}

impl SaslClient for ScriptedSaslClient {
    fn mechanism_name(&self) -> &str {
        &self.mechanism
    }

    fn has_initial_response(&self) -> bool {
        self.initial_response
    }

    fn evaluate_challenge(&mut self, challenge: &[u8]) -> Result<Option<Vec<u8>>, MechanismError> {
        if let Ok(mut log) = self.challenges.lock() {
            log.push(challenge.to_vec());
        }
        let step = self.steps.pop_front().ok_or_else(|| {
            MechanismError::new(MechanismErrorKind::IllegalState, "no scripted step left")
        })?;
        if step.is_ok() && self.steps.is_empty() {
            self.complete = true;
        }
        step
    }

    fn is_complete(&self) -> bool {
        self.complete
    }

    fn authorization_id(&self) -> Option<&str> {
        self.authorization_id.as_deref()
    }

    fn dispose(&mut self) {
        self.disposed.store(true, Ordering::SeqCst);
    }
}
