//! Scripted SASL broker for integration testing.
//!
//! [`ScriptedBroker`] answers the broker side of the exchange frame by frame:
//! ApiVersions, SaslHandshake, SaslAuthenticate and raw legacy tokens. It can
//! be driven synchronously over a [`MockTransport`] or served over TCP by
//! [`MockBroker`], which runs one script per accepted connection.

use std::collections::VecDeque;
use std::sync::Arc;

use bytes::{BufMut, Bytes, BytesMut};
use kafka_protocol::messages::api_versions_response::ApiVersion;
use kafka_protocol::messages::{
    ApiVersionsResponse, RequestHeader, ResponseHeader, SaslAuthenticateRequest,
    SaslAuthenticateResponse, SaslHandshakeRequest, SaslHandshakeResponse,
};
use kafka_protocol::protocol::{Decodable, Encodable, HeaderVersion, StrBytes};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, RwLock};

use super::MockTransport;
use crate::authenticator::handshake::{NONE, UNSUPPORTED_SASL_MECHANISM};

/// API keys the scripted broker understands.
pub mod api_keys {
    pub const SASL_HANDSHAKE: i16 = 17;
    pub const API_VERSIONS: i16 = 18;
    pub const SASL_AUTHENTICATE: i16 = 36;
    /// Not a SASL API; used for frames that belong to other requests.
    pub const METADATA: i16 = 3;
}

/// A recorded broker call.
#[derive(Debug, Clone)]
pub struct BrokerCall {
    /// The API key of the request.
    pub api_key: i16,
    /// The API version of the request.
    pub api_version: i16,
    /// The correlation ID.
    pub correlation_id: i32,
    /// The raw request bytes (without length prefix).
    pub request_bytes: Bytes,
}

impl BrokerCall {
    /// Read the fixed header prefix of a request frame.
    #[must_use]
    pub fn parse(frame: Bytes) -> Option<Self> {
        if frame.len() < 8 {
            return None;
        }
        Some(Self {
            api_key: i16::from_be_bytes([frame[0], frame[1]]),
            api_version: i16::from_be_bytes([frame[2], frame[3]]),
            correlation_id: i32::from_be_bytes([frame[4], frame[5], frame[6], frame[7]]),
            request_bytes: frame,
        })
    }

    /// Decode the full request body.
    #[must_use]
    pub fn decode<R: Decodable + HeaderVersion>(&self) -> Option<R> {
        let mut buf = self.request_bytes.clone();
        RequestHeader::decode(&mut buf, R::header_version(self.api_version)).ok()?;
        R::decode(&mut buf, self.api_version).ok()
    }
}

/// Broker side of one connection's SASL exchange.
#[derive(Debug, Clone)]
pub struct ScriptedBroker {
    mechanisms: Vec<String>,
    handshake_max_version: i16,
    authenticate_max_version: Option<i16>,
    api_versions_error: i16,
    authenticate_error: Option<(i16, Option<String>)>,
    session_lifetime_ms: i64,
    challenges: VecDeque<Vec<u8>>,
    raw_tokens: bool,
    calls: Vec<BrokerCall>,
    tokens: Vec<Bytes>,
}

impl Default for ScriptedBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedBroker {
    /// A modern broker: PLAIN enabled, handshake v1, SaslAuthenticate v2.
    #[must_use]
    pub fn new() -> Self {
        Self {
            mechanisms: vec!["PLAIN".to_string()],
            handshake_max_version: 1,
            authenticate_max_version: Some(2),
            api_versions_error: NONE,
            authenticate_error: None,
            session_lifetime_ms: 0,
            challenges: VecDeque::new(),
            raw_tokens: false,
            calls: Vec::new(),
            tokens: Vec::new(),
        }
    }

    /// A broker that only knows handshake v0 and exchanges raw tokens.
    #[must_use]
    pub fn legacy() -> Self {
        Self {
            handshake_max_version: 0,
            authenticate_max_version: None,
            ..Self::new()
        }
    }

    /// Replace the enabled mechanisms.
    #[must_use]
    pub fn with_mechanisms(mut self, mechanisms: &[&str]) -> Self {
        self.mechanisms = mechanisms.iter().map(|m| (*m).to_string()).collect();
        self
    }

    /// Cap the advertised SaslAuthenticate version.
    #[must_use]
    pub fn with_authenticate_max_version(mut self, version: i16) -> Self {
        self.authenticate_max_version = Some(version);
        self
    }

    /// Answer ApiVersions with this error code.
    #[must_use]
    pub fn with_api_versions_error(mut self, error_code: i16) -> Self {
        self.api_versions_error = error_code;
        self
    }

    /// Reject every SaslAuthenticate request.
    #[must_use]
    pub fn with_authenticate_error(mut self, error_code: i16, message: Option<&str>) -> Self {
        self.authenticate_error = Some((error_code, message.map(str::to_string)));
        self
    }

    /// Grant this session lifetime on every successful SaslAuthenticate.
    #[must_use]
    pub fn with_session_lifetime_ms(mut self, lifetime_ms: i64) -> Self {
        self.session_lifetime_ms = lifetime_ms;
        self
    }

    /// Queue a challenge for the next token received.
    #[must_use]
    pub fn with_challenge(mut self, challenge: &[u8]) -> Self {
        self.challenges.push_back(challenge.to_vec());
        self
    }

    /// Treat every frame as a raw token, for clients with the handshake
    /// disabled.
    #[must_use]
    pub fn with_raw_tokens(mut self) -> Self {
        self.raw_tokens = true;
        self
    }

    /// Kafka requests received so far.
    #[must_use]
    pub fn calls(&self) -> &[BrokerCall] {
        &self.calls
    }

    /// Requests received for `api_key`.
    #[must_use]
    pub fn calls_for_api(&self, api_key: i16) -> Vec<BrokerCall> {
        self.calls
            .iter()
            .filter(|c| c.api_key == api_key)
            .cloned()
            .collect()
    }

    /// SASL tokens received, enveloped or raw, in order.
    #[must_use]
    pub fn tokens(&self) -> &[Bytes] {
        &self.tokens
    }

    /// Version ranges advertised in ApiVersions.
    #[must_use]
    pub fn advertised_versions(&self) -> Vec<(i16, i16, i16)> {
        let mut ranges = vec![
            (api_keys::API_VERSIONS, 0, 3),
            (api_keys::SASL_HANDSHAKE, 0, self.handshake_max_version),
        ];
        if let Some(max) = self.authenticate_max_version {
            ranges.push((api_keys::SASL_AUTHENTICATE, 0, max));
        }
        ranges
    }

    /// Process one inbound frame and return the response frame, if any.
    pub fn handle(&mut self, frame: Bytes) -> Option<Bytes> {
        if self.raw_tokens {
            self.tokens.push(frame);
            return self.challenges.pop_front().map(Bytes::from);
        }

        let call = BrokerCall::parse(frame)?;
        self.calls.push(call.clone());
        match call.api_key {
            api_keys::API_VERSIONS => Some(responses::api_versions_response(
                call.correlation_id,
                self.api_versions_error,
                &self.advertised_versions(),
            )),
            api_keys::SASL_HANDSHAKE => {
                let request = call.decode::<SaslHandshakeRequest>()?;
                let mechanism = request.mechanism.to_string();
                let enabled: Vec<&str> = self.mechanisms.iter().map(String::as_str).collect();
                let error_code = if enabled.contains(&mechanism.as_str()) {
                    if self.authenticate_max_version.is_none() {
                        self.raw_tokens = true;
                    }
                    NONE
                } else {
                    UNSUPPORTED_SASL_MECHANISM
                };
                Some(responses::handshake_response(
                    call.correlation_id,
                    call.api_version,
                    error_code,
                    &enabled,
                ))
            }
            api_keys::SASL_AUTHENTICATE => {
                let request = call.decode::<SaslAuthenticateRequest>()?;
                self.tokens.push(request.auth_bytes);
                let response = match &self.authenticate_error {
                    Some((code, message)) => responses::authenticate_response(
                        call.correlation_id,
                        call.api_version,
                        *code,
                        message.as_deref(),
                        &[],
                        0,
                    ),
                    None => {
                        let challenge = self.challenges.pop_front().unwrap_or_default();
                        responses::authenticate_response(
                            call.correlation_id,
                            call.api_version,
                            NONE,
                            None,
                            &challenge,
                            self.session_lifetime_ms,
                        )
                    }
                };
                Some(response)
            }
            _ => None,
        }
    }

    /// Answer every complete frame the client has written.
    ///
    /// Returns the number of response frames queued.
    pub fn serve(&mut self, transport: &mut MockTransport) -> usize {
        let mut answered = 0;
        for frame in transport.take_frames() {
            if let Some(response) = self.handle(frame) {
                transport.push_frame(&response);
                answered += 1;
            }
        }
        answered
    }
}

/// TCP broker running a [`ScriptedBroker`] per connection.
pub struct MockBroker {
    address: String,
    script: ScriptedBroker,
    shutdown_tx: Option<broadcast::Sender<()>>,
    call_log: Arc<RwLock<Vec<BrokerCall>>>,
    token_log: Arc<RwLock<Vec<Bytes>>>,
}

impl MockBroker {
    /// Create a broker that will bind to `address` and follow `script`.
    pub fn new(address: impl Into<String>, script: ScriptedBroker) -> Self {
        Self {
            address: address.into(),
            script,
            shutdown_tx: None,
            call_log: Arc::new(RwLock::new(Vec::new())),
            token_log: Arc::new(RwLock::new(Vec::new())),
        }
    }

    /// Start the mock broker.
    ///
    /// Returns the actual address the broker is listening on.
    ///
    /// # Errors
    ///
    /// Returns an error if binding to the address fails.
    pub async fn start(&mut self) -> std::io::Result<String> {
        let listener = TcpListener::bind(&self.address).await?;
        let actual_address = listener.local_addr()?.to_string();
        self.address = actual_address.clone();

        let (shutdown_tx, _) = broadcast::channel::<()>(1);
        self.shutdown_tx = Some(shutdown_tx.clone());

        let script = self.script.clone();
        let call_log = self.call_log.clone();
        let token_log = self.token_log.clone();
        let mut shutdown_rx = shutdown_tx.subscribe();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        break;
                    }
                    result = listener.accept() => {
                        match result {
                            Ok((stream, _addr)) => {
                                let script = script.clone();
                                let call_log = call_log.clone();
                                let token_log = token_log.clone();
                                let shutdown_rx = shutdown_tx.subscribe();

                                tokio::spawn(async move {
                                    Self::handle_connection(stream, script, call_log, token_log, shutdown_rx).await;
                                });
                            }
                            Err(_) => break,
                        }
                    }
                }
            }
        });

        Ok(actual_address)
    }

    /// Stop the mock broker.
    pub async fn stop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }

    /// Get all recorded calls.
    pub async fn get_calls(&self) -> Vec<BrokerCall> {
        self.call_log.read().await.clone()
    }

    /// Get calls filtered by API key.
    pub async fn get_calls_for_api(&self, api_key: i16) -> Vec<BrokerCall> {
        self.call_log
            .read()
            .await
            .iter()
            .filter(|c| c.api_key == api_key)
            .cloned()
            .collect()
    }

    /// Get every SASL token received, across connections.
    pub async fn get_tokens(&self) -> Vec<Bytes> {
        self.token_log.read().await.clone()
    }

    /// Get the broker address.
    #[must_use]
    pub fn address(&self) -> &str {
        &self.address
    }

    async fn handle_connection(
        mut stream: TcpStream,
        mut script: ScriptedBroker,
        call_log: Arc<RwLock<Vec<BrokerCall>>>,
        token_log: Arc<RwLock<Vec<Bytes>>>,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) {
        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => break,
                result = Self::read_frame(&mut stream) => {
                    let frame = match result {
                        Ok(Some(frame)) => frame,
                        Ok(None) | Err(_) => break,
                    };

                    let (calls_before, tokens_before) = (script.calls().len(), script.tokens().len());
                    let response = script.handle(Bytes::from(frame));
                    call_log.write().await.extend_from_slice(&script.calls()[calls_before..]);
                    token_log.write().await.extend_from_slice(&script.tokens()[tokens_before..]);

                    if let Some(response) = response {
                        if Self::write_frame(&mut stream, &response).await.is_err() {
                            break;
                        }
                    }
                }
            }
        }
    }

    /// Read a Kafka frame (4-byte length prefix + body).
    async fn read_frame(stream: &mut TcpStream) -> std::io::Result<Option<Vec<u8>>> {
        let mut len_buf = [0u8; 4];
        match stream.read_exact(&mut len_buf).await {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e),
        }

        let len = u32::from_be_bytes(len_buf) as usize;
        let mut buf = vec![0u8; len];
        stream.read_exact(&mut buf).await?;
        Ok(Some(buf))
    }

    /// Write a Kafka frame (4-byte length prefix + body).
    async fn write_frame(stream: &mut TcpStream, data: &[u8]) -> std::io::Result<()> {
        let mut buf = BytesMut::with_capacity(4 + data.len());
        buf.put_u32(data.len() as u32);
        buf.extend_from_slice(data);
        stream.write_all(&buf).await?;
        stream.flush().await
    }
}

/// Response frame builders (without the size prefix).
///
/// # Panics
///
/// The builders panic if a response cannot be encoded at the requested
/// version, which only happens for versions Kafka never defined.
pub mod responses {
    use super::*;

    /// Encode a response header and body.
    pub fn encode_response<R: Encodable + HeaderVersion>(
        correlation_id: i32,
        api_version: i16,
        response: &R,
    ) -> Bytes {
        let mut header = ResponseHeader::default();
        header.correlation_id = correlation_id;

        let mut buf = BytesMut::new();
        header
            .encode(&mut buf, R::header_version(api_version))
            .expect("response header encodes");
        response
            .encode(&mut buf, api_version)
            .expect("response body encodes");
        buf.freeze()
    }

    /// ApiVersions v0 response advertising `(api_key, min, max)` ranges.
    pub fn api_versions_response(
        correlation_id: i32,
        error_code: i16,
        ranges: &[(i16, i16, i16)],
    ) -> Bytes {
        let mut response = ApiVersionsResponse::default();
        response.error_code = error_code;
        for &(api_key, min_version, max_version) in ranges {
            let mut version = ApiVersion::default();
            version.api_key = api_key;
            version.min_version = min_version;
            version.max_version = max_version;
            response.api_keys.push(version);
        }
        encode_response(correlation_id, 0, &response)
    }

    /// SaslHandshake response listing the enabled mechanisms.
    pub fn handshake_response(
        correlation_id: i32,
        api_version: i16,
        error_code: i16,
        mechanisms: &[&str],
    ) -> Bytes {
        let mut response = SaslHandshakeResponse::default();
        response.error_code = error_code;
        response.mechanisms = mechanisms
            .iter()
            .map(|m| StrBytes::from_string((*m).to_string()))
            .collect();
        encode_response(correlation_id, api_version, &response)
    }

    /// SaslAuthenticate response.
    ///
    /// The lifetime is only written at versions that carry it.
    pub fn authenticate_response(
        correlation_id: i32,
        api_version: i16,
        error_code: i16,
        error_message: Option<&str>,
        auth_bytes: &[u8],
        session_lifetime_ms: i64,
    ) -> Bytes {
        let mut response = SaslAuthenticateResponse::default();
        response.error_code = error_code;
        response.error_message = error_message.map(|m| StrBytes::from_string(m.to_string()));
        response.auth_bytes = Bytes::copy_from_slice(auth_bytes);
        if api_version >= 1 {
            response.session_lifetime_ms = session_lifetime_ms;
        }
        encode_response(correlation_id, api_version, &response)
    }

    /// A frame for some other in-flight request.
    pub fn unrelated_response(correlation_id: i32) -> Bytes {
        let mut buf = BytesMut::with_capacity(12);
        buf.put_i32(correlation_id);
        buf.put_slice(b"metadata");
        buf.freeze()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authenticator::RequestContext;
    use kafka_protocol::messages::ApiVersionsRequest;

    fn request<R: Encodable + HeaderVersion>(api_key: i16, version: i16, correlation_id: i32, body: &R) -> Bytes {
        RequestContext {
            api_key,
            api_version: version,
            correlation_id,
        }
        .encode("test-client", body)
        .unwrap()
    }

    fn handshake(mechanism: &'static str) -> SaslHandshakeRequest {
        let mut request = SaslHandshakeRequest::default();
        request.mechanism = StrBytes::from_static_str(mechanism);
        request
    }

    #[test]
    fn test_api_versions_advertises_sasl_ranges() {
        let mut broker = ScriptedBroker::new();
        let frame = request(api_keys::API_VERSIONS, 0, 0, &ApiVersionsRequest::default());
        let response = broker.handle(frame).unwrap();

        let context = RequestContext {
            api_key: api_keys::API_VERSIONS,
            api_version: 0,
            correlation_id: 0,
        };
        let parsed: ApiVersionsResponse = context.parse_response(response).unwrap();
        assert!(parsed
            .api_keys
            .iter()
            .any(|v| v.api_key == api_keys::SASL_AUTHENTICATE && v.max_version == 2));
    }

    #[test]
    fn test_handshake_rejects_unknown_mechanism() {
        let mut broker = ScriptedBroker::new().with_mechanisms(&["PLAIN", "SCRAM-SHA-256"]);
        let frame = request(api_keys::SASL_HANDSHAKE, 1, 4, &handshake("GSSAPI"));
        let response = broker.handle(frame).unwrap();

        let context = RequestContext {
            api_key: api_keys::SASL_HANDSHAKE,
            api_version: 1,
            correlation_id: 4,
        };
        let parsed: SaslHandshakeResponse = context.parse_response(response).unwrap();
        assert_eq!(parsed.error_code, UNSUPPORTED_SASL_MECHANISM);
        assert_eq!(parsed.mechanisms.len(), 2);
    }

    #[test]
    fn test_legacy_switches_to_raw_tokens_after_handshake() {
        let mut broker = ScriptedBroker::legacy().with_challenge(b"server-final");
        let frame = request(api_keys::SASL_HANDSHAKE, 0, 0, &handshake("PLAIN"));
        assert!(broker.handle(frame).is_some());

        let response = broker.handle(Bytes::from_static(b"\0alice\0secret"));
        assert_eq!(response, Some(Bytes::from_static(b"server-final")));
        assert_eq!(broker.tokens(), &[Bytes::from_static(b"\0alice\0secret")]);
    }

    #[test]
    fn test_authenticate_grants_lifetime() {
        let mut broker = ScriptedBroker::new().with_session_lifetime_ms(10_000);
        let mut body = SaslAuthenticateRequest::default();
        body.auth_bytes = Bytes::from_static(b"token");
        let frame = request(api_keys::SASL_AUTHENTICATE, 2, 9, &body);
        let response = broker.handle(frame).unwrap();

        let context = RequestContext {
            api_key: api_keys::SASL_AUTHENTICATE,
            api_version: 2,
            correlation_id: 9,
        };
        let parsed: SaslAuthenticateResponse = context.parse_response(response).unwrap();
        assert_eq!(parsed.error_code, NONE);
        assert_eq!(parsed.session_lifetime_ms, 10_000);
        assert_eq!(broker.calls_for_api(api_keys::SASL_AUTHENTICATE).len(), 1);
    }

    #[tokio::test]
    async fn test_mock_broker_start_stop() {
        let mut broker = MockBroker::new("127.0.0.1:0", ScriptedBroker::new());
        let addr = broker.start().await.unwrap();
        assert!(!addr.is_empty());
        assert_eq!(broker.address(), addr);

        let result = TcpStream::connect(&addr).await;
        assert!(result.is_ok());

        broker.stop().await;
    }

    #[tokio::test]
    async fn test_mock_broker_records_calls() {
        let mut broker = MockBroker::new("127.0.0.1:0", ScriptedBroker::new());
        let addr = broker.start().await.unwrap();

        let mut stream = TcpStream::connect(&addr).await.unwrap();
        let request = request(api_keys::API_VERSIONS, 0, 42, &ApiVersionsRequest::default());
        MockBroker::write_frame(&mut stream, &request).await.unwrap();

        let response = MockBroker::read_frame(&mut stream).await.unwrap().unwrap();
        assert_eq!(i32::from_be_bytes([response[0], response[1], response[2], response[3]]), 42);

        tokio::time::sleep(std::time::Duration::from_millis(10)).await;

        let calls = broker.get_calls_for_api(api_keys::API_VERSIONS).await;
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].correlation_id, 42);

        broker.stop().await;
    }
}
