//! Client-side SASL authenticator.
//!
//! [`SaslClientAuthenticator`] is a resumable, non-blocking state machine. The
//! owner calls [`SaslClientAuthenticator::authenticate`] whenever the socket
//! is readable or writable; each call does as much work as the transport
//! allows right now and returns. Nothing here ever awaits.
//!
//! ```text
//! SendApiVersionsRequest -> ReceiveApiVersionsResponse -> SendHandshakeRequest
//!   -> ReceiveHandshakeOrOtherResponse -> Initial -> Intermediate
//!   -> [ClientComplete] -> Complete
//! ```
//!
//! Any state may move to `Failed`. With the handshake disabled the machine
//! starts at `Initial`; on re-authentication with cached capabilities it
//! skips straight to `SendHandshakeRequest`.

pub mod exchange;
pub mod handshake;
pub mod request;
pub mod versions;

pub use exchange::TokenExchange;
pub use request::RequestContext;
pub use versions::{ApiVersionRange, CachedCapabilities, NegotiatedVersions};

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use kafka_protocol::messages::{
    ApiKey, ApiVersionsRequest, ApiVersionsResponse, SaslAuthenticateRequest,
    SaslAuthenticateResponse, SaslHandshakeResponse,
};
use tracing::{debug, warn};

use crate::auth::sasl::{create_sasl_client, DefaultErrorClassifier, ErrorClassifier, SaslClient};
use crate::auth::{AuthMethod, Principal, Subject};
use crate::config::SaslClientConfig;
use crate::error::{Result, SaslError};
use crate::network::codec::{FrameCodec, DEFAULT_MAX_FRAME_SIZE};
use crate::network::frame::{NetworkReceive, NetworkSend};
use crate::network::transport::TransportLayer;
use crate::session::{reauthentication_deadline, JitterSource, RandomJitter, SystemClock, Time};

/// Mechanism whose principal always comes from the [`Subject`].
pub const GSSAPI_MECHANISM: &str = "GSSAPI";

/// States of the exchange, in forward order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SaslState {
    /// Send ApiVersions, unless capabilities are already cached.
    SendApiVersionsRequest,
    /// Await ApiVersions and negotiate versions.
    ReceiveApiVersionsResponse,
    /// Announce the mechanism. Re-authentication starts here.
    SendHandshakeRequest,
    /// Await the broker's verdict on the mechanism.
    ReceiveHandshakeOrOtherResponse,
    /// Send the opening token.
    Initial,
    /// Exchange challenges and responses until the mechanism completes.
    Intermediate,
    /// Mechanism complete, broker confirmation outstanding.
    ClientComplete,
    /// Authenticated.
    Complete,
    /// Terminal failure.
    Failed,
}

impl fmt::Display for SaslState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::SendApiVersionsRequest => "SEND_APIVERSIONS_REQUEST",
            Self::ReceiveApiVersionsResponse => "RECEIVE_APIVERSIONS_RESPONSE",
            Self::SendHandshakeRequest => "SEND_HANDSHAKE_REQUEST",
            Self::ReceiveHandshakeOrOtherResponse => "RECEIVE_HANDSHAKE_OR_OTHER_RESPONSE",
            Self::Initial => "INITIAL",
            Self::Intermediate => "INTERMEDIATE",
            Self::ClientComplete => "CLIENT_COMPLETE",
            Self::Complete => "COMPLETE",
            Self::Failed => "FAILED",
        };
        f.write_str(name)
    }
}

/// Active state plus at most one transition waiting for a flush.
///
/// A transition requested while an outbound frame is still unflushed is
/// parked in `pending` and promoted only when the flush completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateSlots {
    active: SaslState,
    pending: Option<SaslState>,
}

impl StateSlots {
    /// Start in `initial` with nothing pending.
    #[must_use]
    pub fn new(initial: SaslState) -> Self {
        Self {
            active: initial,
            pending: None,
        }
    }

    /// The state currently dispatched on.
    #[must_use]
    pub fn active(&self) -> SaslState {
        self.active
    }

    /// The transition waiting for a flush, if any.
    #[must_use]
    pub fn pending(&self) -> Option<SaslState> {
        self.pending
    }

    /// Request a transition to `next`.
    ///
    /// Returns the newly active state when applied, `None` when parked.
    pub fn request(&mut self, next: SaslState, flushed: bool) -> Option<SaslState> {
        if flushed {
            self.pending = None;
            self.active = next;
            Some(next)
        } else {
            self.pending = Some(next);
            None
        }
    }

    /// Report the outcome of a flush attempt.
    ///
    /// Returns the promoted state when a parked transition was applied.
    pub fn on_flush(&mut self, flushed: bool) -> Option<SaslState> {
        if !flushed {
            return None;
        }
        let next = self.pending.take()?;
        self.active = next;
        Some(next)
    }

    /// Move to `Failed` immediately, dropping any parked transition.
    pub fn fail(&mut self) {
        self.pending = None;
        self.active = SaslState::Failed;
    }
}

/// What the dispatch loop does after a state handler returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    /// Dispatch again on the (new) active state.
    Continue,
    /// Suspend until the next readiness notification.
    Wait,
}

/// State handed from a finished authenticator to its successor.
#[derive(Debug, Default)]
pub struct ReauthenticationContext {
    /// Capabilities discovered by the previous authenticator.
    pub capabilities: Option<CachedCapabilities>,
    /// A frame the connection had started reading when re-authentication began.
    pub in_progress: Option<NetworkReceive>,
    /// When re-authentication started, in epoch milliseconds.
    pub start_ms: i64,
}

/// Builder for [`SaslClientAuthenticator`].
#[derive(Debug)]
pub struct AuthenticatorBuilder {
    client: Box<dyn SaslClient>,
    client_id: String,
    handshake_request_enable: bool,
    max_frame_size: usize,
    subject: Subject,
    time: Arc<dyn Time>,
    jitter: Box<dyn JitterSource>,
    classifier: Arc<dyn ErrorClassifier>,
}

impl AuthenticatorBuilder {
    /// Client id sent in request headers.
    #[must_use]
    pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = client_id.into();
        self
    }

    /// Whether to discover capabilities and announce the mechanism.
    #[must_use]
    pub fn with_handshake_request_enable(mut self, enable: bool) -> Self {
        self.handshake_request_enable = enable;
        self
    }

    /// Largest frame accepted from the broker.
    #[must_use]
    pub fn with_max_frame_size(mut self, max_frame_size: usize) -> Self {
        self.max_frame_size = max_frame_size;
        self
    }

    /// Local identity, used for GSSAPI principals.
    #[must_use]
    pub fn with_subject(mut self, subject: Subject) -> Self {
        self.subject = subject;
        self
    }

    /// Clock for completion bookkeeping.
    #[must_use]
    pub fn with_time(mut self, time: Arc<dyn Time>) -> Self {
        self.time = time;
        self
    }

    /// Jitter source for the re-authentication deadline.
    #[must_use]
    pub fn with_jitter(mut self, jitter: Box<dyn JitterSource>) -> Self {
        self.jitter = jitter;
        self
    }

    /// Classifier for mechanism failures.
    #[must_use]
    pub fn with_error_classifier(mut self, classifier: Arc<dyn ErrorClassifier>) -> Self {
        self.classifier = classifier;
        self
    }

    /// Build the authenticator.
    ///
    /// # Errors
    ///
    /// Returns a retriable error for a GSSAPI mechanism whose subject has no
    /// principal.
    pub fn build(self) -> Result<SaslClientAuthenticator> {
        let mechanism = self.client.mechanism_name().to_string();
        let principal = client_principal(&mechanism, self.client.as_ref(), &self.subject)?;

        let initial = if self.handshake_request_enable {
            SaslState::SendApiVersionsRequest
        } else {
            SaslState::Initial
        };

        debug!(%mechanism, %principal, state = %initial, "created SASL client authenticator");

        Ok(SaslClientAuthenticator {
            client_id: self.client_id,
            mechanism,
            principal,
            exchange: TokenExchange::new(self.client, self.classifier),
            codec: FrameCodec::with_max_frame_size(self.max_frame_size),
            time: self.time,
            jitter: self.jitter,
            slots: StateSlots::new(initial),
            request: None,
            // The first request goes out with id -1.
            correlation_id: -1,
            net_in: None,
            net_out: None,
            capabilities: None,
            versions: NegotiatedVersions::legacy(),
            session_lifetime_ms: None,
            authentication_end_ms: None,
            reauthentication_deadline_ms: None,
            reauthenticating: false,
            reauthentication_begin_ms: None,
            pending_unrelated: VecDeque::new(),
        })
    }
}

/// Principal the client authenticates as.
///
/// GSSAPI always uses the subject; other mechanisms prefer their own
/// authorization id, then the subject, then anonymous.
fn client_principal(mechanism: &str, client: &dyn SaslClient, subject: &Subject) -> Result<Principal> {
    if mechanism == GSSAPI_MECHANISM {
        return Ok(Principal::new(subject.first_principal()?, AuthMethod::Sasl));
    }
    let name = client
        .authorization_id()
        .or_else(|| subject.principals().first().map(String::as_str));
    Ok(name.map_or_else(Principal::anonymous, |name| {
        Principal::new(name, AuthMethod::Sasl)
    }))
}

/// Resumable client side of a SASL exchange over a shared connection.
#[derive(Debug)]
pub struct SaslClientAuthenticator {
    client_id: String,
    mechanism: String,
    principal: Principal,
    exchange: TokenExchange,
    codec: FrameCodec,
    time: Arc<dyn Time>,
    jitter: Box<dyn JitterSource>,
    slots: StateSlots,
    request: Option<RequestContext>,
    correlation_id: i32,
    net_in: Option<NetworkReceive>,
    net_out: Option<NetworkSend>,
    capabilities: Option<CachedCapabilities>,
    versions: NegotiatedVersions,
    session_lifetime_ms: Option<i64>,
    authentication_end_ms: Option<i64>,
    reauthentication_deadline_ms: Option<i64>,
    reauthenticating: bool,
    reauthentication_begin_ms: Option<i64>,
    pending_unrelated: VecDeque<Bytes>,
}

impl SaslClientAuthenticator {
    /// Start building an authenticator around `client`.
    #[must_use]
    pub fn builder(client: Box<dyn SaslClient>) -> AuthenticatorBuilder {
        AuthenticatorBuilder {
            client,
            client_id: SaslClientConfig::default().client_id,
            handshake_request_enable: true,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            subject: Subject::new(),
            time: Arc::new(SystemClock),
            jitter: Box::new(RandomJitter::new()),
            classifier: Arc::new(DefaultErrorClassifier),
        }
    }

    /// Create an authenticator for `client` using the settings in `config`.
    ///
    /// # Errors
    ///
    /// See [`AuthenticatorBuilder::build`].
    pub fn new(client: Box<dyn SaslClient>, config: &SaslClientConfig) -> Result<Self> {
        Self::builder(client)
            .with_client_id(config.client_id.clone())
            .with_handshake_request_enable(config.handshake_request_enable)
            .build()
    }

    /// Create the mechanism named in `config` and an authenticator for it.
    ///
    /// # Errors
    ///
    /// Returns [`SaslError::Configuration`] if the mechanism cannot be built.
    pub fn from_config(config: &SaslClientConfig) -> Result<Self> {
        Self::new(create_sasl_client(config)?, config)
    }

    /// Advance the exchange as far as the transport allows.
    ///
    /// Call whenever the transport is readable or writable. Returns `Ok(())`
    /// both when progress stalls on I/O and when the exchange completes; check
    /// [`complete`](Self::complete) to tell them apart.
    ///
    /// # Errors
    ///
    /// Every failure moves the authenticator to [`SaslState::Failed`] first.
    /// Calling again after that returns [`SaslError::AlreadyFailed`].
    pub fn authenticate<T>(&mut self, transport: &mut T) -> Result<()>
    where
        T: TransportLayer + ?Sized,
    {
        if self.slots.active() == SaslState::Failed {
            return Err(SaslError::AlreadyFailed);
        }
        if self.net_out.is_some() && !self.flush_net_out(transport)? {
            return Ok(());
        }

        loop {
            let flow = match self.slots.active() {
                SaslState::SendApiVersionsRequest => self.send_api_versions_request(transport)?,
                SaslState::ReceiveApiVersionsResponse => {
                    self.receive_api_versions_response(transport)?
                }
                SaslState::SendHandshakeRequest => self.send_handshake_request(transport)?,
                SaslState::ReceiveHandshakeOrOtherResponse => {
                    self.receive_handshake_response(transport)?
                }
                SaslState::Initial => self.send_initial_token(transport)?,
                SaslState::Intermediate => self.exchange_tokens(transport)?,
                SaslState::ClientComplete => self.await_server_confirmation(transport)?,
                SaslState::Complete => Flow::Wait,
                SaslState::Failed => return Err(SaslError::AlreadyFailed),
            };
            if flow == Flow::Wait {
                return Ok(());
            }
        }
    }

    /// Re-authenticate an already authenticated connection.
    ///
    /// Adopts the previous authenticator's capabilities and any partially read
    /// frame, then starts the exchange. Frames that arrive for unrelated
    /// in-flight requests are kept for
    /// [`responses_received_during_reauthentication`](Self::responses_received_during_reauthentication).
    ///
    /// # Errors
    ///
    /// See [`authenticate`](Self::authenticate).
    pub fn reauthenticate<T>(
        &mut self,
        transport: &mut T,
        context: ReauthenticationContext,
    ) -> Result<()>
    where
        T: TransportLayer + ?Sized,
    {
        self.capabilities = context.capabilities;
        self.net_in = context.in_progress;
        self.reauthenticating = true;
        self.reauthentication_begin_ms = Some(context.start_ms);
        debug!(
            mechanism = %self.mechanism,
            cached_capabilities = self.capabilities.is_some(),
            "starting re-authentication"
        );
        self.authenticate(transport)
    }

    /// Whether authentication succeeded.
    #[must_use]
    pub fn complete(&self) -> bool {
        self.slots.active() == SaslState::Complete
    }

    /// The active state.
    #[must_use]
    pub fn state(&self) -> SaslState {
        self.slots.active()
    }

    /// The state waiting for the current frame to flush, if any.
    #[must_use]
    pub fn pending_state(&self) -> Option<SaslState> {
        self.slots.pending()
    }

    /// The principal this client authenticates as.
    #[must_use]
    pub fn principal(&self) -> &Principal {
        &self.principal
    }

    /// The mechanism announced to the broker.
    #[must_use]
    pub fn mechanism(&self) -> &str {
        &self.mechanism
    }

    /// Frames received during re-authentication that belong to other requests.
    ///
    /// Returned in arrival order; the queue is empty afterwards.
    pub fn responses_received_during_reauthentication(&mut self) -> VecDeque<Bytes> {
        std::mem::take(&mut self.pending_unrelated)
    }

    /// How long re-authentication took, once it has completed.
    #[must_use]
    pub fn reauthentication_elapsed_ms(&self) -> Option<i64> {
        if !self.reauthenticating {
            return None;
        }
        Some(self.authentication_end_ms? - self.reauthentication_begin_ms?)
    }

    /// When the client should re-authenticate, if the broker granted a
    /// session lifetime.
    #[must_use]
    pub fn client_session_reauthentication_time_ms(&self) -> Option<i64> {
        self.reauthentication_deadline_ms
    }

    /// Session lifetime granted by the broker, if positive.
    #[must_use]
    pub fn session_lifetime_ms(&self) -> Option<i64> {
        self.session_lifetime_ms
    }

    /// When authentication completed, in epoch milliseconds.
    #[must_use]
    pub fn authentication_end_ms(&self) -> Option<i64> {
        self.authentication_end_ms
    }

    /// Capabilities discovered (or inherited) by this authenticator.
    #[must_use]
    pub fn cached_capabilities(&self) -> Option<&CachedCapabilities> {
        self.capabilities.as_ref()
    }

    /// Versions in use for the handshake and envelope.
    #[must_use]
    pub fn negotiated_versions(&self) -> NegotiatedVersions {
        self.versions
    }

    /// Release the mechanism's credentials.
    pub fn close(&mut self) {
        self.exchange.dispose();
    }

    // State handlers

    fn send_api_versions_request<T>(&mut self, transport: &mut T) -> Result<Flow>
    where
        T: TransportLayer + ?Sized,
    {
        if self.capabilities.is_some() {
            self.set_state(SaslState::ReceiveApiVersionsResponse, transport);
            return Ok(Flow::Continue);
        }

        let context = self.next_request(ApiKey::ApiVersions, versions::API_VERSIONS_REQUEST_VERSION);
        let payload = self.encode(&context, &ApiVersionsRequest::default())?;
        self.send(payload, transport)?;
        self.set_state(SaslState::ReceiveApiVersionsResponse, transport);
        Ok(Flow::Wait)
    }

    fn receive_api_versions_response<T>(&mut self, transport: &mut T) -> Result<Flow>
    where
        T: TransportLayer + ?Sized,
    {
        if self.capabilities.is_none() {
            let Some(response) = self.receive_kafka_response::<ApiVersionsResponse, T>(transport)?
            else {
                return Ok(Flow::Wait);
            };
            if response.error_code != handshake::NONE {
                warn!(
                    error = %handshake::error_name(response.error_code),
                    "ApiVersions request returned an error, continuing with advertised versions"
                );
            }
            self.capabilities = Some(CachedCapabilities::from_response(&response));
        }

        self.versions = self
            .capabilities
            .as_ref()
            .map_or_else(NegotiatedVersions::legacy, CachedCapabilities::negotiate);
        debug!(
            handshake_version = self.versions.handshake_version,
            authenticate_version = ?self.versions.authenticate_version,
            "negotiated SASL versions"
        );
        self.set_state(SaslState::SendHandshakeRequest, transport);
        Ok(Flow::Continue)
    }

    fn send_handshake_request<T>(&mut self, transport: &mut T) -> Result<Flow>
    where
        T: TransportLayer + ?Sized,
    {
        let context = self.next_request(ApiKey::SaslHandshake, self.versions.handshake_version);
        let request = handshake::handshake_request(&self.mechanism);
        let payload = self.encode(&context, &request)?;
        self.send(payload, transport)?;
        self.set_state(SaslState::ReceiveHandshakeOrOtherResponse, transport);
        Ok(Flow::Wait)
    }

    fn receive_handshake_response<T>(&mut self, transport: &mut T) -> Result<Flow>
    where
        T: TransportLayer + ?Sized,
    {
        let Some(response) = self.receive_kafka_response::<SaslHandshakeResponse, T>(transport)?
        else {
            return Ok(Flow::Wait);
        };
        if let Err(e) = handshake::check_handshake_response(&self.mechanism, &response) {
            return Err(self.fail(e));
        }
        self.set_state(SaslState::Initial, transport);
        Ok(Flow::Continue)
    }

    fn send_initial_token<T>(&mut self, transport: &mut T) -> Result<Flow>
    where
        T: TransportLayer + ?Sized,
    {
        self.send_token(Some(&[][..]), true, transport)?;
        self.set_state(SaslState::Intermediate, transport);
        Ok(Flow::Wait)
    }

    fn exchange_tokens<T>(&mut self, transport: &mut T) -> Result<Flow>
    where
        T: TransportLayer + ?Sized,
    {
        let server_token = self.receive_token(transport)?;
        let no_responses_pending = match server_token {
            Some(token) => !self.send_token(Some(&token[..]), false, transport)?,
            None => false,
        };

        // Without the envelope a legacy broker may say nothing after the last
        // token; with it, every SaslAuthenticate request gets a response.
        if self.exchange.is_complete() {
            if self.versions.authenticate_version.is_none() || no_responses_pending {
                self.set_state(SaslState::Complete, transport);
            } else {
                self.set_state(SaslState::ClientComplete, transport);
            }
        }
        Ok(Flow::Wait)
    }

    fn await_server_confirmation<T>(&mut self, transport: &mut T) -> Result<Flow>
    where
        T: TransportLayer + ?Sized,
    {
        if self.receive_token(transport)?.is_some() {
            self.set_state(SaslState::Complete, transport);
        }
        Ok(Flow::Wait)
    }

    // Transitions

    fn set_state<T>(&mut self, next: SaslState, transport: &mut T)
    where
        T: TransportLayer + ?Sized,
    {
        let flushed = self.net_out.as_ref().map_or(true, NetworkSend::completed);
        match self.slots.request(next, flushed) {
            Some(applied) => self.on_state_applied(applied, transport),
            None => debug!(pending = %next, "deferred SASL client state until send completes"),
        }
    }

    fn on_state_applied<T>(&mut self, state: SaslState, transport: &mut T)
    where
        T: TransportLayer + ?Sized,
    {
        debug!(%state, "Set SASL client state");
        if state == SaslState::Complete {
            self.complete_authentication();
            transport.add_write_interest();
        }
    }

    fn fail(&mut self, error: SaslError) -> SaslError {
        debug!(from = %self.slots.active(), %error, "SASL client authentication failed");
        self.slots.fail();
        error
    }

    fn complete_authentication(&mut self) {
        let end = self.time.milliseconds();
        self.authentication_end_ms = Some(end);
        self.reauthentication_deadline_ms = match self.session_lifetime_ms {
            Some(lifetime) => {
                reauthentication_deadline(end, Some(lifetime), self.jitter.next_fraction())
            }
            None => None,
        };

        let session_expiration_ms = self.session_lifetime_ms.map(|lifetime| end + lifetime);
        debug!(
            authentication_end_ms = end,
            session_expiration_ms = ?session_expiration_ms,
            reauthentication_ms = ?self.reauthentication_deadline_ms,
            "{} with {} and {}",
            if self.reauthenticating { "Re-authenticated" } else { "Authenticated" },
            if session_expiration_ms.is_some() { "session expiration" } else { "no session expiration" },
            if self.reauthentication_deadline_ms.is_some() {
                "session re-authentication scheduled"
            } else {
                "no session re-authentication"
            }
        );
    }

    // Requests

    fn next_request(&mut self, api_key: ApiKey, api_version: i16) -> RequestContext {
        let context = RequestContext {
            api_key: api_key as i16,
            api_version,
            correlation_id: self.correlation_id,
        };
        self.correlation_id = self.correlation_id.wrapping_add(1);
        self.request = Some(context);
        context
    }

    fn encode<R>(&mut self, context: &RequestContext, request: &R) -> Result<Bytes>
    where
        R: kafka_protocol::protocol::Encodable + kafka_protocol::protocol::HeaderVersion,
    {
        match context.encode(&self.client_id, request) {
            Ok(payload) => Ok(payload),
            Err(e) => Err(self.fail(e)),
        }
    }

    fn send_token<T>(
        &mut self,
        challenge: Option<&[u8]>,
        is_initial: bool,
        transport: &mut T,
    ) -> Result<bool>
    where
        T: TransportLayer + ?Sized,
    {
        let token = match self.exchange.create_token(challenge, is_initial) {
            Ok(Some(token)) => token,
            Ok(None) => return Ok(false),
            Err(e) => return Err(self.fail(e)),
        };

        let payload = match self.versions.authenticate_version {
            Some(version) => {
                let context = self.next_request(ApiKey::SaslAuthenticate, version);
                let mut request = SaslAuthenticateRequest::default();
                request.auth_bytes = Bytes::from(token);
                self.encode(&context, &request)?
            }
            None => Bytes::from(token),
        };
        self.send(payload, transport)?;
        Ok(true)
    }

    // Frame I/O

    fn send<T>(&mut self, payload: Bytes, transport: &mut T) -> Result<()>
    where
        T: TransportLayer + ?Sized,
    {
        let send = match NetworkSend::with_codec(self.codec, payload) {
            Ok(send) => send,
            Err(e) => return Err(self.fail(e.into())),
        };
        self.net_out = Some(send);
        self.flush_net_out(transport)?;
        Ok(())
    }

    /// Write what the transport accepts; returns whether the frame is out.
    fn flush_net_out<T>(&mut self, transport: &mut T) -> Result<bool>
    where
        T: TransportLayer + ?Sized,
    {
        let Some(send) = self.net_out.as_mut() else {
            return Ok(true);
        };
        if !send.completed() {
            if let Err(e) = send.write_to(transport) {
                return Err(self.fail(e.into()));
            }
        }

        let flushed = send.completed();
        if flushed {
            self.net_out = None;
            transport.remove_write_interest();
            if let Some(promoted) = self.slots.on_flush(true) {
                self.on_state_applied(promoted, transport);
            }
        } else {
            transport.add_write_interest();
        }
        Ok(flushed)
    }

    fn receive_frame<T>(&mut self, transport: &mut T) -> Result<Option<Bytes>>
    where
        T: TransportLayer + ?Sized,
    {
        let max_frame_size = self.codec.max_frame_size();
        let receive = self
            .net_in
            .get_or_insert_with(|| NetworkReceive::with_max_frame_size(max_frame_size));
        match receive.read_from(transport) {
            Ok(Some(frame)) => {
                self.net_in = None;
                Ok(Some(frame))
            }
            Ok(None) => Ok(None),
            Err(e) => Err(self.fail(e.into())),
        }
    }

    fn receive_kafka_response<R, T>(&mut self, transport: &mut T) -> Result<Option<R>>
    where
        R: kafka_protocol::protocol::Decodable + kafka_protocol::protocol::HeaderVersion,
        T: TransportLayer + ?Sized,
    {
        loop {
            let Some(frame) = self.receive_frame(transport)? else {
                return Ok(None);
            };

            let parsed = match self.request.as_ref() {
                Some(context) => context.parse_response::<R>(frame.clone()),
                None => Err(SaslError::ProtocolDecode {
                    message: "no request outstanding".to_string(),
                }),
            };

            match parsed {
                Ok(response) => {
                    self.request = None;
                    return Ok(Some(response));
                }
                Err(e) if self.reauthenticating => {
                    debug!(
                        error = %e,
                        frame_len = frame.len(),
                        "queued response unrelated to re-authentication"
                    );
                    self.pending_unrelated.push_back(frame);
                }
                Err(e) => {
                    debug!(error = %e, "unexpected response frame outside re-authentication");
                    return Err(self.fail(SaslError::IllegalSaslState(
                        "Invalid SASL mechanism response, server may be expecting a different protocol"
                            .to_string(),
                    )));
                }
            }
        }
    }

    fn receive_token<T>(&mut self, transport: &mut T) -> Result<Option<Bytes>>
    where
        T: TransportLayer + ?Sized,
    {
        if self.versions.authenticate_version.is_none() {
            return self.receive_frame(transport);
        }

        let Some(response) = self.receive_kafka_response::<SaslAuthenticateResponse, T>(transport)?
        else {
            return Ok(None);
        };

        if response.error_code != handshake::NONE {
            let message = response
                .error_message
                .map(|m| m.to_string())
                .unwrap_or_else(|| handshake::error_name(response.error_code));
            return Err(self.fail(SaslError::Authentication {
                code: response.error_code,
                message,
            }));
        }
        if response.session_lifetime_ms > 0 {
            self.session_lifetime_ms = Some(response.session_lifetime_ms);
        }
        Ok(Some(response.auth_bytes))
    }
}
