//! SASL/OAUTHBEARER client implementation.
//!
//! OAUTHBEARER uses OAuth 2.0 bearer tokens for authentication (KIP-255).
//! The client sends the token in its initial response; the server answers with
//! empty bytes on success or a JSON error document on failure.
//!
//! ## Wire Protocol
//!
//! ```text
//! n,[a=<authzid>],\x01auth=Bearer <token>\x01[extensions]\x01
//! ```
//!
//! After an error document the client must answer with a single `\x01` so the
//! server can close the exchange with a SaslAuthenticate error.

use std::fmt;

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use tracing::{debug, warn};

use super::{MechanismError, MechanismErrorKind, SaslClient};

/// SOH (Start of Header) delimiter used in OAUTHBEARER messages.
const SOH: char = '\x01';

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OAuthState {
    SendClientFirstMessage,
    ReceiveServerFirstMessage,
    ReceiveServerMessageAfterFailure,
    Complete,
    Failed,
}

/// SASL/OAUTHBEARER client with a static token.
pub struct OAuthBearerClient {
    token: String,
    principal: Option<String>,
    extensions: Vec<(String, String)>,
    state: OAuthState,
}

impl OAuthBearerClient {
    /// Create a client presenting `token`.
    ///
    /// The principal is taken from the token's `sub` claim when the token is a
    /// JWT.
    pub fn new(token: impl Into<String>) -> Self {
        let token = token.into();
        let principal = extract_jwt_subject_unverified(&token);
        Self {
            token,
            principal,
            extensions: Vec::new(),
            state: OAuthState::SendClientFirstMessage,
        }
    }

    /// Add a SASL extension (`key=value`) to the client-first message.
    #[must_use]
    pub fn with_extension(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.extensions.push((key.into(), value.into()));
        self
    }

    fn client_first_message(&self) -> Vec<u8> {
        let mut message = format!("n,,{SOH}auth=Bearer {}{SOH}", self.token);
        for (key, value) in &self.extensions {
            message.push_str(&format!("{key}={value}{SOH}"));
        }
        message.push(SOH);
        message.into_bytes()
    }
}

impl fmt::Debug for OAuthBearerClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OAuthBearerClient")
            .field("principal", &self.principal)
            .field("token", &"***")
            .field("state", &self.state)
            .finish()
    }
}

impl SaslClient for OAuthBearerClient {
    fn mechanism_name(&self) -> &str {
        "OAUTHBEARER"
    }

    fn has_initial_response(&self) -> bool {
        true
    }

    fn evaluate_challenge(&mut self, challenge: &[u8]) -> Result<Option<Vec<u8>>, MechanismError> {
        match self.state {
            OAuthState::SendClientFirstMessage => {
                if !challenge.is_empty() {
                    self.state = OAuthState::Failed;
                    return Err(MechanismError::new(
                        MechanismErrorKind::InvalidChallenge,
                        "Expected empty challenge",
                    ));
                }
                self.state = OAuthState::ReceiveServerFirstMessage;
                Ok(Some(self.client_first_message()))
            }
            OAuthState::ReceiveServerFirstMessage => {
                if challenge.is_empty() {
                    debug!("OAUTHBEARER token accepted");
                    self.state = OAuthState::Complete;
                    return Ok(None);
                }
                warn!(
                    error = %String::from_utf8_lossy(challenge),
                    "Sasl authentication using OAUTHBEARER failed"
                );
                self.state = OAuthState::ReceiveServerMessageAfterFailure;
                Ok(Some(vec![SOH as u8]))
            }
            OAuthState::ReceiveServerMessageAfterFailure => {
                self.state = OAuthState::Failed;
                Err(MechanismError::new(
                    MechanismErrorKind::InvalidChallenge,
                    "Received unexpected message from server after failure",
                ))
            }
            OAuthState::Complete | OAuthState::Failed => Err(MechanismError::new(
                MechanismErrorKind::IllegalState,
                format!("Unexpected challenge in Sasl client state {:?}", self.state),
            )),
        }
    }

    fn is_complete(&self) -> bool {
        self.state == OAuthState::Complete
    }

    fn authorization_id(&self) -> Option<&str> {
        self.principal.as_deref()
    }

    fn dispose(&mut self) {
        self.token.clear();
    }
}

/// Extract `sub` claim from JWT without signature verification.
///
/// JWT format: `header.payload.signature` (base64url encoded)
fn extract_jwt_subject_unverified(token: &str) -> Option<String> {
    let parts: Vec<&str> = token.split('.').collect();
    if parts.len() != 3 {
        return None;
    }

    let payload = URL_SAFE_NO_PAD.decode(parts[1].trim_end_matches('=')).ok()?;
    let payload_str = std::str::from_utf8(&payload).ok()?;
    extract_json_string_field(payload_str, "sub")
}

/// Extract a string field from JSON (simple parser, no dependencies).
fn extract_json_string_field(json: &str, field: &str) -> Option<String> {
    let pattern = format!("\"{field}\"");
    let start = json.find(&pattern)?;
    let rest = json[start + pattern.len()..].trim_start();
    let rest = rest.strip_prefix(':')?.trim_start();
    let rest = rest.strip_prefix('"')?;
    let end = rest.find('"')?;
    Some(rest[..end].to_string())
}
