//! SASL/SCRAM client implementation.
//!
//! SCRAM (Salted Challenge Response Authentication Mechanism) provides secure
//! password-based authentication without transmitting the password in cleartext.
//!
//! Supports:
//! - SCRAM-SHA-256 (RFC 7677)
//! - SCRAM-SHA-512 (RFC 7677 variant)
//!
//! The exchange takes two rounds:
//! 1. client-first-message → server-first-message
//! 2. client-final-message → server-final-message

use std::fmt;
use std::marker::PhantomData;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use hmac::{Hmac, Mac};
use pbkdf2::pbkdf2_hmac;
use rand::Rng;
use sha2::{Digest, Sha256, Sha512};
use tracing::debug;

use super::{MechanismError, MechanismErrorKind, SaslClient};

/// Minimum number of PBKDF2 iterations (per RFC 7677)
pub const MIN_ITERATIONS: u32 = 4096;

/// Maximum number of PBKDF2 iterations a server may demand.
pub const MAX_ITERATIONS: u32 = 16384;

/// Nonce length in bytes
pub const NONCE_LENGTH: usize = 24;

/// Hash algorithm trait for SCRAM variants.
pub trait ScramHash: Send + Sync + fmt::Debug {
    /// The hash algorithm name.
    fn name() -> &'static str;
    /// Output length in bytes.
    fn output_len() -> usize;
    /// Compute HMAC.
    fn hmac(key: &[u8], data: &[u8]) -> Vec<u8>;
    /// Compute hash.
    fn hash(data: &[u8]) -> Vec<u8>;
    /// Derive key using PBKDF2.
    fn pbkdf2(password: &[u8], salt: &[u8], iterations: u32) -> Vec<u8>;
}

/// SHA-256 implementation for SCRAM.
#[derive(Debug)]
pub struct ScramSha256;

impl ScramHash for ScramSha256 {
    fn name() -> &'static str {
        "SCRAM-SHA-256"
    }

    fn output_len() -> usize {
        32
    }

    fn hmac(key: &[u8], data: &[u8]) -> Vec<u8> {
        let mut mac = Hmac::<Sha256>::new_from_slice(key).expect("HMAC can take key of any size");
        mac.update(data);
        mac.finalize().into_bytes().to_vec()
    }

    fn hash(data: &[u8]) -> Vec<u8> {
        Sha256::digest(data).to_vec()
    }

    fn pbkdf2(password: &[u8], salt: &[u8], iterations: u32) -> Vec<u8> {
        let mut output = vec![0u8; 32];
        pbkdf2_hmac::<Sha256>(password, salt, iterations, &mut output);
        output
    }
}

/// SHA-512 implementation for SCRAM.
#[derive(Debug)]
pub struct ScramSha512;

impl ScramHash for ScramSha512 {
    fn name() -> &'static str {
        "SCRAM-SHA-512"
    }

    fn output_len() -> usize {
        64
    }

    fn hmac(key: &[u8], data: &[u8]) -> Vec<u8> {
        let mut mac = Hmac::<Sha512>::new_from_slice(key).expect("HMAC can take key of any size");
        mac.update(data);
        mac.finalize().into_bytes().to_vec()
    }

    fn hash(data: &[u8]) -> Vec<u8> {
        Sha512::digest(data).to_vec()
    }

    fn pbkdf2(password: &[u8], salt: &[u8], iterations: u32) -> Vec<u8> {
        let mut output = vec![0u8; 64];
        pbkdf2_hmac::<Sha512>(password, salt, iterations, &mut output);
        output
    }
}

/// Where the client is in the exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScramState {
    SendClientFirstMessage,
    ReceiveServerFirstMessage,
    ReceiveServerFinalMessage,
    Complete,
    Failed,
}

/// Keys derived while building the client-final-message.
struct ExchangeKeys {
    server_key: Vec<u8>,
    auth_message: String,
}

/// SCRAM client for one hash variant.
pub struct ScramClient<H: ScramHash> {
    username: String,
    password: String,
    client_nonce: String,
    client_first_message_bare: String,
    keys: Option<ExchangeKeys>,
    state: ScramState,
    _marker: PhantomData<H>,
}

impl<H: ScramHash> fmt::Debug for ScramClient<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScramClient")
            .field("mechanism", &H::name())
            .field("username", &self.username)
            .field("password", &"***")
            .field("state", &self.state)
            .finish()
    }
}

impl<H: ScramHash> ScramClient<H> {
    /// Create a client with a random nonce.
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        let random_bytes: [u8; NONCE_LENGTH] = rand::thread_rng().gen();
        Self::with_nonce(username, password, BASE64.encode(random_bytes))
    }

    /// Create a client with a fixed nonce.
    pub fn with_nonce(
        username: impl Into<String>,
        password: impl Into<String>,
        client_nonce: impl Into<String>,
    ) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
            client_nonce: client_nonce.into(),
            client_first_message_bare: String::new(),
            keys: None,
            state: ScramState::SendClientFirstMessage,
            _marker: PhantomData,
        }
    }

    fn fail(&mut self, kind: MechanismErrorKind, message: impl Into<String>) -> MechanismError {
        self.state = ScramState::Failed;
        MechanismError::new(kind, message)
    }

    fn client_first_message(&mut self) -> Vec<u8> {
        // "n,," is the GS2 header: no channel binding, no authzid
        self.client_first_message_bare =
            format!("n={},r={}", escape_username(&self.username), self.client_nonce);
        debug!(mechanism = H::name(), "sending client-first-message");
        format!("n,,{}", self.client_first_message_bare).into_bytes()
    }

    fn client_final_message(&mut self, challenge: &[u8]) -> Result<Vec<u8>, MechanismError> {
        let server_first_message = std::str::from_utf8(challenge).map_err(|_| {
            self.fail(
                MechanismErrorKind::InvalidChallenge,
                "Invalid UTF-8 in server-first-message",
            )
        })?;

        let (combined_nonce, salt, iterations) = parse_server_first_message(server_first_message)
            .map_err(|e| {
            self.fail(
                MechanismErrorKind::InvalidChallenge,
                format!("Failed to parse server-first-message: {e}"),
            )
        })?;

        if !combined_nonce.starts_with(&self.client_nonce) {
            return Err(self.fail(
                MechanismErrorKind::InvalidChallenge,
                "Server nonce does not start with client nonce",
            ));
        }
        if !(MIN_ITERATIONS..=MAX_ITERATIONS).contains(&iterations) {
            return Err(self.fail(
                MechanismErrorKind::InvalidChallenge,
                format!(
                    "Requested iterations {iterations} is outside the supported range [{MIN_ITERATIONS}, {MAX_ITERATIONS}]"
                ),
            ));
        }

        let salted_password = H::pbkdf2(self.password.as_bytes(), &salt, iterations);
        let client_key = H::hmac(&salted_password, b"Client Key");
        let stored_key = H::hash(&client_key);
        let server_key = H::hmac(&salted_password, b"Server Key");

        // c=biws is base64("n,,")
        let client_final_without_proof = format!("c=biws,r={combined_nonce}");
        let auth_message = format!(
            "{},{},{}",
            self.client_first_message_bare, server_first_message, client_final_without_proof
        );

        let client_signature = H::hmac(&stored_key, auth_message.as_bytes());
        let client_proof: Vec<u8> = client_key
            .iter()
            .zip(client_signature.iter())
            .map(|(a, b)| a ^ b)
            .collect();

        self.keys = Some(ExchangeKeys {
            server_key,
            auth_message,
        });

        debug!(mechanism = H::name(), iterations, "sending client-final-message");
        Ok(format!(
            "{},p={}",
            client_final_without_proof,
            BASE64.encode(&client_proof)
        )
        .into_bytes())
    }

    fn verify_server_final_message(&mut self, challenge: &[u8]) -> Result<(), MechanismError> {
        let server_final_message = std::str::from_utf8(challenge).map_err(|_| {
            self.fail(
                MechanismErrorKind::InvalidChallenge,
                "Invalid UTF-8 in server-final-message",
            )
        })?;

        if let Some(error) = server_final_message.strip_prefix("e=") {
            return Err(self.fail(
                MechanismErrorKind::ServerVerification,
                format!("Sasl authentication using {} failed with error: {error}", H::name()),
            ));
        }

        let Some(keys) = self.keys.as_ref() else {
            return Err(self.fail(
                MechanismErrorKind::IllegalState,
                "server-final-message received before client-final-message was sent",
            ));
        };

        let expected_server_signature = H::hmac(&keys.server_key, keys.auth_message.as_bytes());
        let expected_verifier = format!("v={}", BASE64.encode(&expected_server_signature));

        if server_final_message != expected_verifier {
            return Err(self.fail(
                MechanismErrorKind::ServerVerification,
                "Invalid server signature in server final message",
            ));
        }

        debug!(mechanism = H::name(), "SCRAM server signature verified");
        self.state = ScramState::Complete;
        Ok(())
    }
}

impl<H: ScramHash> SaslClient for ScramClient<H> {
    fn mechanism_name(&self) -> &str {
        H::name()
    }

    fn has_initial_response(&self) -> bool {
        true
    }

    fn evaluate_challenge(&mut self, challenge: &[u8]) -> Result<Option<Vec<u8>>, MechanismError> {
        match self.state {
            ScramState::SendClientFirstMessage => {
                if !challenge.is_empty() {
                    return Err(self.fail(
                        MechanismErrorKind::InvalidChallenge,
                        "Expected empty challenge",
                    ));
                }
                self.state = ScramState::ReceiveServerFirstMessage;
                Ok(Some(self.client_first_message()))
            }
            ScramState::ReceiveServerFirstMessage => {
                let message = self.client_final_message(challenge)?;
                self.state = ScramState::ReceiveServerFinalMessage;
                Ok(Some(message))
            }
            ScramState::ReceiveServerFinalMessage => {
                self.verify_server_final_message(challenge)?;
                Ok(None)
            }
            ScramState::Complete | ScramState::Failed => Err(MechanismError::new(
                MechanismErrorKind::IllegalState,
                format!("Unexpected challenge in Sasl client state {:?}", self.state),
            )),
        }
    }

    fn is_complete(&self) -> bool {
        self.state == ScramState::Complete
    }

    fn authorization_id(&self) -> Option<&str> {
        Some(&self.username)
    }

    fn dispose(&mut self) {
        self.password.clear();
        self.keys = None;
    }
}

/// Escape a username for the `n=` attribute (RFC 5802 saslname).
fn escape_username(username: &str) -> String {
    username.replace('=', "=3D").replace(',', "=2C")
}

/// Parse server-first-message to extract combined nonce, salt, and iterations.
fn parse_server_first_message(message: &str) -> Result<(String, Vec<u8>, u32), String> {
    let mut combined_nonce = None;
    let mut salt = None;
    let mut iterations = None;

    for part in message.split(',') {
        if let Some(value) = part.strip_prefix("r=") {
            combined_nonce = Some(value.to_string());
        } else if let Some(value) = part.strip_prefix("s=") {
            salt = Some(
                BASE64
                    .decode(value)
                    .map_err(|e| format!("Invalid base64 salt: {e}"))?,
            );
        } else if let Some(value) = part.strip_prefix("i=") {
            iterations = Some(
                value
                    .parse::<u32>()
                    .map_err(|e| format!("Invalid iteration count: {e}"))?,
            );
        }
    }

    Ok((
        combined_nonce.ok_or("Missing nonce (r=)")?,
        salt.ok_or("Missing salt (s=)")?,
        iterations.ok_or("Missing iterations (i=)")?,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SALT: &[u8] = b"0123456789abcdef";

    /// Plays the server side of one exchange.
    fn server_first(client_nonce: &str, iterations: u32) -> String {
        format!(
            "r={client_nonce}servernonce,s={},i={iterations}",
            BASE64.encode(SALT)
        )
    }

    fn server_final<H: ScramHash>(password: &str, auth_message: &str) -> String {
        let salted = H::pbkdf2(password.as_bytes(), SALT, MIN_ITERATIONS);
        let server_key = H::hmac(&salted, b"Server Key");
        format!("v={}", BASE64.encode(H::hmac(&server_key, auth_message.as_bytes())))
    }

    fn run_exchange<H: ScramHash>(server_password: &str) -> Result<(), MechanismError> {
        let mut client = ScramClient::<H>::with_nonce("alice", "secret", "fyko+d2lbbFgONRv9qkxdawL");
        assert!(client.has_initial_response());

        let first = client.evaluate_challenge(&[])?.unwrap();
        let first = String::from_utf8(first).unwrap();
        assert_eq!(first, "n,,n=alice,r=fyko+d2lbbFgONRv9qkxdawL");

        let server_first = server_first("fyko+d2lbbFgONRv9qkxdawL", MIN_ITERATIONS);
        let final_msg = client.evaluate_challenge(server_first.as_bytes())?.unwrap();
        let final_msg = String::from_utf8(final_msg).unwrap();
        assert!(final_msg.starts_with("c=biws,r=fyko+d2lbbFgONRv9qkxdawLservernonce,p="));
        assert!(!client.is_complete());

        let without_proof = &final_msg[..final_msg.rfind(",p=").unwrap()];
        let auth_message = format!("n=alice,r=fyko+d2lbbFgONRv9qkxdawL,{server_first},{without_proof}");
        let verifier = server_final::<H>(server_password, &auth_message);

        let response = client.evaluate_challenge(verifier.as_bytes())?;
        assert!(response.is_none());
        assert!(client.is_complete());
        Ok(())
    }

    #[test]
    fn test_full_exchange_sha256() {
        run_exchange::<ScramSha256>("secret").unwrap();
    }

    #[test]
    fn test_full_exchange_sha512() {
        run_exchange::<ScramSha512>("secret").unwrap();
    }

    #[test]
    fn test_wrong_server_signature() {
        let err = run_exchange::<ScramSha256>("not-the-password").unwrap_err();
        assert_eq!(err.kind, MechanismErrorKind::ServerVerification);
    }

    #[test]
    fn test_nonce_mismatch() {
        let mut client = ScramClient::<ScramSha256>::with_nonce("alice", "secret", "abc");
        client.evaluate_challenge(&[]).unwrap();

        let err = client
            .evaluate_challenge(server_first("xyz", MIN_ITERATIONS).as_bytes())
            .unwrap_err();
        assert_eq!(err.kind, MechanismErrorKind::InvalidChallenge);
        assert!(err.message.contains("nonce"));
        assert!(!client.is_complete());
    }

    #[test]
    fn test_iterations_below_minimum() {
        let mut client = ScramClient::<ScramSha256>::with_nonce("alice", "secret", "abc");
        client.evaluate_challenge(&[]).unwrap();

        let err = client
            .evaluate_challenge(server_first("abc", 1024).as_bytes())
            .unwrap_err();
        assert!(err.message.contains("iterations"));
    }

    #[test]
    fn test_server_error_attribute() {
        let mut client = ScramClient::<ScramSha256>::with_nonce("alice", "secret", "abc");
        client.evaluate_challenge(&[]).unwrap();
        client
            .evaluate_challenge(server_first("abc", MIN_ITERATIONS).as_bytes())
            .unwrap();

        let err = client.evaluate_challenge(b"e=invalid-proof").unwrap_err();
        assert_eq!(err.kind, MechanismErrorKind::ServerVerification);
        assert!(err.message.contains("invalid-proof"));
    }

    #[test]
    fn test_non_empty_initial_challenge_rejected() {
        let mut client = ScramClient::<ScramSha256>::new("alice", "secret");
        assert!(client.evaluate_challenge(b"unexpected").is_err());
    }

    #[test]
    fn test_username_is_escaped() {
        let mut client = ScramClient::<ScramSha256>::with_nonce("a=b,c", "secret", "n0");
        let first = client.evaluate_challenge(&[]).unwrap().unwrap();
        assert_eq!(first, b"n,,n=a=3Db=2Cc,r=n0");
    }

    #[test]
    fn test_parse_server_first_message_valid() {
        let message = "r=clientnonce123servernonce456,s=c2FsdDEyMzQ1Njc4OTAxMjM0NTY=,i=4096";
        let (nonce, salt, iterations) = parse_server_first_message(message).unwrap();
        assert_eq!(nonce, "clientnonce123servernonce456");
        assert_eq!(salt, b"salt1234567890123456");
        assert_eq!(iterations, 4096);
    }

    #[test]
    fn test_parse_server_first_message_missing_fields() {
        assert!(parse_server_first_message("s=c2FsdA==,i=4096")
            .unwrap_err()
            .contains("nonce"));
        assert!(parse_server_first_message("r=nonce,i=4096")
            .unwrap_err()
            .contains("salt"));
        assert!(parse_server_first_message("r=nonce,s=c2FsdA==")
            .unwrap_err()
            .contains("iterations"));
    }

    #[test]
    fn test_parse_server_first_message_invalid_values() {
        assert!(parse_server_first_message("r=nonce,s=!!!invalid-base64!!!,i=4096").is_err());
        assert!(parse_server_first_message("r=nonce,s=c2FsdA==,i=notanumber").is_err());
    }

    #[test]
    fn test_dispose_clears_password() {
        let mut client = ScramClient::<ScramSha512>::new("alice", "secret");
        client.dispose();
        assert!(client.password.is_empty());
        assert!(format!("{client:?}").contains("***"));
    }

    #[test]
    fn test_hash_output_lengths() {
        assert_eq!(ScramSha256::hash(b"x").len(), ScramSha256::output_len());
        assert_eq!(ScramSha512::hash(b"x").len(), ScramSha512::output_len());
    }
}
