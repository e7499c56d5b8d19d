//! Integration tests for re-authentication on a connection that already
//! carries other traffic.

use std::collections::VecDeque;

use bytes::Bytes;
use kafka_sasl_core::auth::sasl::PlainClient;
use kafka_sasl_core::network::NetworkReceive;
use kafka_sasl_core::session::{FixedJitter, MockTime};
use kafka_sasl_core::testing::{api_keys, responses, MockTransport, ScriptedBroker};
use kafka_sasl_core::{ReauthenticationContext, SaslClientAuthenticator, SaslState};

fn authenticator(time: std::sync::Arc<MockTime>) -> SaslClientAuthenticator {
    SaslClientAuthenticator::builder(Box::new(PlainClient::new("alice", "secret")))
        .with_time(time)
        .with_jitter(Box::new(FixedJitter(0.0)))
        .build()
        .unwrap()
}

/// Run a first authentication to completion and return the authenticator.
fn authenticated(transport: &mut MockTransport, broker: &mut ScriptedBroker) -> SaslClientAuthenticator {
    let mut auth = authenticator(MockTime::new(1_000));
    loop {
        auth.authenticate(transport).unwrap();
        if auth.complete() {
            return auth;
        }
        assert!(broker.serve(transport) > 0, "broker stalled in {}", auth.state());
    }
}

fn context(previous: &SaslClientAuthenticator, start_ms: i64) -> ReauthenticationContext {
    ReauthenticationContext {
        capabilities: previous.cached_capabilities().cloned(),
        in_progress: None,
        start_ms,
    }
}

#[test]
fn test_reauthentication_skips_discovery() {
    let mut transport = MockTransport::new();
    let mut broker = ScriptedBroker::new().with_session_lifetime_ms(10_000);
    let first = authenticated(&mut transport, &mut broker);

    let time = MockTime::new(5_000);
    let mut next = authenticator(time.clone());
    next.reauthenticate(&mut transport, context(&first, 5_000)).unwrap();
    assert_eq!(next.state(), SaslState::ReceiveHandshakeOrOtherResponse);

    time.sleep(250);
    while !next.complete() {
        assert!(broker.serve(&mut transport) > 0);
        next.authenticate(&mut transport).unwrap();
    }

    assert_eq!(broker.calls_for_api(api_keys::API_VERSIONS).len(), 1);
    let handshakes = broker.calls_for_api(api_keys::SASL_HANDSHAKE);
    assert_eq!(handshakes.len(), 2);
    assert_eq!(handshakes[1].correlation_id, -1);
    let authenticates = broker.calls_for_api(api_keys::SASL_AUTHENTICATE);
    assert_eq!(authenticates.len(), 2);
    assert_eq!(authenticates[1].correlation_id, 0);
    assert_eq!(next.cached_capabilities(), first.cached_capabilities());
    assert_eq!(next.reauthentication_elapsed_ms(), Some(250));
    assert_eq!(next.client_session_reauthentication_time_ms(), Some(5_250 + 8_500));
}

#[test]
fn test_unrelated_frames_are_queued_in_order_and_drained_once() {
    let mut transport = MockTransport::new();
    let mut broker = ScriptedBroker::new();
    let first = authenticated(&mut transport, &mut broker);

    let mut next = authenticator(MockTime::new(2_000));
    next.reauthenticate(&mut transport, context(&first, 2_000)).unwrap();

    // Responses to requests sent before re-authentication began arrive
    // ahead of the handshake response.
    let unrelated = [responses::unrelated_response(41), responses::unrelated_response(42)];
    for frame in &unrelated {
        transport.push_frame(frame);
    }
    broker.serve(&mut transport);

    next.authenticate(&mut transport).unwrap();
    assert_eq!(next.state(), SaslState::Intermediate);

    transport.push_frame(&responses::unrelated_response(43));
    broker.serve(&mut transport);
    next.authenticate(&mut transport).unwrap();
    assert!(next.complete());

    let drained = next.responses_received_during_reauthentication();
    let expected: VecDeque<Bytes> = unrelated
        .iter()
        .cloned()
        .chain(std::iter::once(responses::unrelated_response(43)))
        .collect();
    assert_eq!(drained, expected);
    assert!(next.responses_received_during_reauthentication().is_empty());
}

#[test]
fn test_partial_frame_is_carried_into_reauthentication() {
    let mut transport = MockTransport::new();
    let mut broker = ScriptedBroker::new();
    let first = authenticated(&mut transport, &mut broker);

    // The connection had read half of an application response.
    let pending = responses::unrelated_response(7);
    let mut framed = (pending.len() as u32).to_be_bytes().to_vec();
    framed.extend_from_slice(&pending);
    let (head, tail) = framed.split_at(6);

    transport.push_inbound(head);
    let mut in_progress = NetworkReceive::new();
    assert_eq!(in_progress.read_from(&mut transport).unwrap(), None);
    assert_eq!(in_progress.bytes_read(), 6);

    let mut next = authenticator(MockTime::new(3_000));
    let ctx = ReauthenticationContext {
        in_progress: Some(in_progress),
        ..context(&first, 3_000)
    };
    next.reauthenticate(&mut transport, ctx).unwrap();

    transport.push_inbound(tail);
    while !next.complete() {
        broker.serve(&mut transport);
        next.authenticate(&mut transport).unwrap();
    }

    let drained = next.responses_received_during_reauthentication();
    assert_eq!(drained, VecDeque::from(vec![pending]));
}

#[test]
fn test_reauthentication_without_cached_capabilities_rediscovers() {
    let mut transport = MockTransport::new();
    let mut broker = ScriptedBroker::new();
    let _first = authenticated(&mut transport, &mut broker);

    let mut next = authenticator(MockTime::new(4_000));
    next.reauthenticate(
        &mut transport,
        ReauthenticationContext {
            start_ms: 4_000,
            ..ReauthenticationContext::default()
        },
    )
    .unwrap();
    assert_eq!(next.state(), SaslState::ReceiveApiVersionsResponse);

    while !next.complete() {
        assert!(broker.serve(&mut transport) > 0);
        next.authenticate(&mut transport).unwrap();
    }
    assert_eq!(broker.calls_for_api(api_keys::API_VERSIONS).len(), 2);
}
