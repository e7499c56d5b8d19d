//! Authenticated connection to a single Kafka broker.
//!
//! Owns the TCP stream and drives a [`SaslClientAuthenticator`] from tokio
//! readiness events: every time the socket becomes readable (or writable,
//! while a frame is waiting to be flushed) the authenticator is stepped once.
//!
//! A failed or timed-out attempt leaves the stream mid-exchange, so the
//! connection refuses further use and must be dropped.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, info, instrument, warn};

use crate::auth::sasl::create_sasl_client;
use crate::auth::Principal;
use crate::authenticator::{ReauthenticationContext, SaslClientAuthenticator};
use crate::config::{BrokerConfig, SaslClientConfig};
use crate::error::{Result, SaslError};
use crate::network::transport::TcpTransport;
use crate::session::{SystemClock, Time};

/// Builds a fresh authenticator for each (re-)authentication.
pub type AuthenticatorFactory = Box<dyn Fn() -> Result<SaslClientAuthenticator> + Send + Sync>;

/// A broker connection that has been, or is being, SASL authenticated.
pub struct BrokerConnection {
    address: String,
    transport: TcpTransport,
    authenticator: SaslClientAuthenticator,
    factory: AuthenticatorFactory,
    authentication_timeout: Duration,
    time: Arc<dyn Time>,
    unrelated: VecDeque<Bytes>,
    failed: bool,
}

impl std::fmt::Debug for BrokerConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BrokerConnection")
            .field("address", &self.address)
            .field("state", &self.authenticator.state())
            .field("unrelated", &self.unrelated.len())
            .field("failed", &self.failed)
            .finish_non_exhaustive()
    }
}

/// Factory that creates the mechanism named in `sasl` for every attempt.
#[must_use]
pub fn config_factory(sasl: &SaslClientConfig, max_frame_size: usize) -> AuthenticatorFactory {
    let sasl = sasl.clone();
    Box::new(move || {
        SaslClientAuthenticator::builder(create_sasl_client(&sasl)?)
            .with_client_id(sasl.client_id.clone())
            .with_handshake_request_enable(sasl.handshake_request_enable)
            .with_max_frame_size(max_frame_size)
            .build()
    })
}

impl BrokerConnection {
    /// Open a TCP connection using the mechanism named in `sasl`.
    ///
    /// The connection is not authenticated yet; call
    /// [`authenticate`](Self::authenticate).
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid, the mechanism cannot
    /// be built, or the broker cannot be reached in time.
    pub async fn connect(broker: &BrokerConfig, sasl: &SaslClientConfig) -> Result<Self> {
        sasl.validate()?;
        Self::connect_with(broker, config_factory(sasl, broker.max_frame_size)).await
    }

    /// Open a TCP connection whose authenticators come from `factory`.
    ///
    /// # Errors
    ///
    /// Returns an error if the broker configuration is invalid, the broker
    /// cannot be reached in time, or the factory fails.
    #[instrument(skip_all, fields(address = %broker.address))]
    pub async fn connect_with(broker: &BrokerConfig, factory: AuthenticatorFactory) -> Result<Self> {
        broker.validate()?;

        let stream = match timeout(broker.connection_timeout(), TcpStream::connect(&broker.address)).await
        {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                warn!(error = %e, "failed to connect to broker");
                return Err(SaslError::BrokerUnavailable {
                    address: broker.address.clone(),
                    message: e.to_string(),
                });
            }
            Err(_) => {
                warn!("connection timeout");
                return Err(SaslError::BrokerUnavailable {
                    address: broker.address.clone(),
                    message: "connection timeout".to_string(),
                });
            }
        };
        stream.set_nodelay(true)?;
        debug!("TCP connection established");

        Self::from_stream(
            stream,
            broker.address.clone(),
            factory,
            broker.authentication_timeout(),
        )
    }

    /// Wrap an already connected stream.
    ///
    /// # Errors
    ///
    /// Returns an error if the factory cannot build an authenticator.
    pub fn from_stream(
        stream: TcpStream,
        address: impl Into<String>,
        factory: AuthenticatorFactory,
        authentication_timeout: Duration,
    ) -> Result<Self> {
        let authenticator = factory()?;
        Ok(Self {
            address: address.into(),
            transport: TcpTransport::new(stream),
            authenticator,
            factory,
            authentication_timeout,
            time: Arc::new(SystemClock),
            unrelated: VecDeque::new(),
            failed: false,
        })
    }

    /// Use `time` to stamp re-authentication start times.
    #[must_use]
    pub fn with_time(mut self, time: Arc<dyn Time>) -> Self {
        self.time = time;
        self
    }

    /// Run the initial authentication to completion.
    ///
    /// # Errors
    ///
    /// Returns the authenticator's error, or [`SaslError::Timeout`] if the
    /// exchange does not finish within the authentication timeout. Either
    /// way the connection is failed and every later call returns
    /// [`SaslError::AlreadyFailed`].
    #[instrument(skip(self), fields(address = %self.address, mechanism = %self.authenticator.mechanism()))]
    pub async fn authenticate(&mut self) -> Result<()> {
        self.ensure_usable()?;
        let limit = self.authentication_timeout;
        let result =
            with_deadline(limit, drive(&mut self.transport, &mut self.authenticator, None)).await;
        if let Err(e) = result {
            self.authenticator.close();
            return Err(self.fail(e));
        }

        info!(
            principal = %self.authenticator.principal(),
            reauthentication_ms = ?self.authenticator.client_session_reauthentication_time_ms(),
            "SASL authentication completed"
        );
        Ok(())
    }

    /// Re-authenticate the already authenticated connection.
    ///
    /// A fresh authenticator inherits the broker capabilities, so discovery is
    /// skipped. Responses to other requests that arrive meanwhile are kept
    /// for [`take_unrelated_responses`](Self::take_unrelated_responses).
    ///
    /// # Errors
    ///
    /// Returns the authenticator's error, or [`SaslError::Timeout`]. Both
    /// authenticators are closed and the connection is failed, as for
    /// [`authenticate`](Self::authenticate).
    #[instrument(skip(self), fields(address = %self.address, mechanism = %self.authenticator.mechanism()))]
    pub async fn reauthenticate(&mut self) -> Result<()> {
        self.ensure_usable()?;
        let context = ReauthenticationContext {
            capabilities: self.authenticator.cached_capabilities().cloned(),
            in_progress: None,
            start_ms: self.time.milliseconds(),
        };
        let mut next = match (self.factory)() {
            Ok(next) => next,
            Err(e) => {
                self.authenticator.close();
                return Err(self.fail(e));
            }
        };

        let limit = self.authentication_timeout;
        let result = with_deadline(limit, drive(&mut self.transport, &mut next, Some(context))).await;
        self.unrelated
            .extend(next.responses_received_during_reauthentication());
        if let Err(e) = result {
            next.close();
            self.authenticator.close();
            return Err(self.fail(e));
        }

        info!(
            elapsed_ms = ?next.reauthentication_elapsed_ms(),
            reauthentication_ms = ?next.client_session_reauthentication_time_ms(),
            "SASL re-authentication completed"
        );
        let mut previous = std::mem::replace(&mut self.authenticator, next);
        previous.close();
        Ok(())
    }

    /// Whether the session should be re-authenticated at `now_ms`.
    #[must_use]
    pub fn needs_reauthentication(&self, now_ms: i64) -> bool {
        !self.failed
            && self
                .authenticator
                .client_session_reauthentication_time_ms()
                .is_some_and(|deadline| now_ms >= deadline)
    }

    /// Whether an attempt failed and the connection must be dropped.
    #[must_use]
    pub fn is_failed(&self) -> bool {
        self.failed
    }

    /// Responses to other requests received while re-authenticating, in
    /// arrival order. The queue is empty afterwards.
    pub fn take_unrelated_responses(&mut self) -> VecDeque<Bytes> {
        std::mem::take(&mut self.unrelated)
    }

    /// The current authenticator.
    #[must_use]
    pub fn authenticator(&self) -> &SaslClientAuthenticator {
        &self.authenticator
    }

    /// The principal the connection is authenticated as.
    #[must_use]
    pub fn principal(&self) -> &Principal {
        self.authenticator.principal()
    }

    /// Get the broker address.
    #[must_use]
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Release credentials and hand back the stream for application traffic.
    ///
    /// # Errors
    ///
    /// Returns [`SaslError::AlreadyFailed`] if an attempt failed, and
    /// [`SaslError::IllegalSaslState`] if authentication has not completed.
    pub fn into_stream(mut self) -> Result<TcpStream> {
        self.ensure_usable()?;
        if !self.authenticator.complete() {
            return Err(SaslError::IllegalSaslState(format!(
                "connection to {} is not authenticated ({})",
                self.address,
                self.authenticator.state()
            )));
        }
        self.authenticator.close();
        Ok(self.transport.into_inner())
    }

    fn ensure_usable(&self) -> Result<()> {
        if self.failed {
            return Err(SaslError::AlreadyFailed);
        }
        Ok(())
    }

    fn fail(&mut self, error: SaslError) -> SaslError {
        warn!(error = %error, "SASL authentication failed, connection must be closed");
        self.failed = true;
        error
    }
}

async fn with_deadline<F>(limit: Duration, exchange: F) -> Result<()>
where
    F: std::future::Future<Output = Result<()>>,
{
    match timeout(limit, exchange).await {
        Ok(result) => result,
        Err(_) => Err(SaslError::Timeout {
            operation: "SASL authentication",
            timeout_ms: limit.as_millis() as u64,
        }),
    }
}

/// Step `authenticator` on every readiness event until it completes.
async fn drive(
    transport: &mut TcpTransport,
    authenticator: &mut SaslClientAuthenticator,
    reauthentication: Option<ReauthenticationContext>,
) -> Result<()> {
    match reauthentication {
        Some(context) => authenticator.reauthenticate(transport, context)?,
        None => authenticator.authenticate(transport)?,
    }
    while !authenticator.complete() {
        transport.ready().await?;
        authenticator.authenticate(transport)?;
    }
    Ok(())
}
