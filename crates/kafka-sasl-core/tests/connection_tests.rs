//! End-to-end tests that drive a [`BrokerConnection`] against a scripted
//! broker listening on a local TCP port.

use kafka_sasl_core::config::ClientConfig;
use kafka_sasl_core::testing::{api_keys, MockBroker, ScriptedBroker};
use kafka_sasl_core::{BrokerConnection, SaslError, SaslState};

fn config_for(address: &str, sasl: &str) -> ClientConfig {
    let yaml = format!(
        r#"
broker:
  address: "{address}"
  authentication_timeout_ms: 5000
sasl:
{sasl}
"#
    );
    ClientConfig::from_str(&yaml).unwrap()
}

async fn start(script: ScriptedBroker) -> (MockBroker, String) {
    let mut broker = MockBroker::new("127.0.0.1:0", script);
    let addr = broker.start().await.unwrap();
    (broker, addr)
}

#[tokio::test]
async fn test_plain_from_yaml_config() {
    let (mut broker, addr) = start(ScriptedBroker::new().with_session_lifetime_ms(30_000)).await;
    let config = config_for(
        &addr,
        "  mechanism: PLAIN\n  username: bob\n  password: hunter2\n  client_id: sasl-check",
    );

    let mut conn = BrokerConnection::connect(&config.broker, &config.sasl)
        .await
        .unwrap();
    conn.authenticate().await.unwrap();

    assert_eq!(conn.principal().name, "bob");
    assert_eq!(conn.authenticator().session_lifetime_ms(), Some(30_000));
    let deadline = conn
        .authenticator()
        .client_session_reauthentication_time_ms()
        .unwrap();
    let end = conn.authenticator().authentication_end_ms().unwrap();
    assert!(deadline - end >= 25_500);
    assert!(deadline - end < 28_500);

    let handshakes = broker.get_calls_for_api(api_keys::SASL_HANDSHAKE).await;
    assert_eq!(handshakes.len(), 1);
    assert_eq!(handshakes[0].api_version, 1);

    broker.stop().await;
}

#[tokio::test]
async fn test_broker_without_authenticate_envelope() {
    let (mut broker, addr) = start(ScriptedBroker::legacy()).await;
    let config = config_for(&addr, "  username: carol\n  password: pw");

    let mut conn = BrokerConnection::connect(&config.broker, &config.sasl)
        .await
        .unwrap();
    conn.authenticate().await.unwrap();

    let auth = conn.authenticator();
    assert_eq!(auth.state(), SaslState::Complete);
    assert_eq!(auth.negotiated_versions().handshake_version, 0);
    assert_eq!(auth.negotiated_versions().authenticate_version, None);
    assert_eq!(auth.session_lifetime_ms(), None);
    assert!(!conn.needs_reauthentication(i64::MAX));

    broker.stop().await;
}

#[tokio::test]
async fn test_broker_rejects_credentials() {
    let (mut broker, addr) = start(
        ScriptedBroker::new().with_authenticate_error(58, Some("Authentication failed: Invalid username or password")),
    )
    .await;
    let config = config_for(&addr, "  username: mallory\n  password: wrong");

    let mut conn = BrokerConnection::connect(&config.broker, &config.sasl)
        .await
        .unwrap();
    let err = conn.authenticate().await.unwrap_err();

    match err {
        SaslError::Authentication { code, message } => {
            assert_eq!(code, 58);
            assert!(message.contains("Invalid username or password"));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(conn.authenticator().state(), SaslState::Failed);
    assert!(matches!(
        conn.authenticate().await.unwrap_err(),
        SaslError::AlreadyFailed
    ));

    broker.stop().await;
}

#[tokio::test]
async fn test_repeated_reauthentication() {
    let (mut broker, addr) = start(ScriptedBroker::new().with_session_lifetime_ms(1_000)).await;
    let config = config_for(&addr, "  username: dave\n  password: pw");

    let mut conn = BrokerConnection::connect(&config.broker, &config.sasl)
        .await
        .unwrap();
    conn.authenticate().await.unwrap();
    for _ in 0..3 {
        conn.reauthenticate().await.unwrap();
        assert!(conn.authenticator().complete());
        assert_eq!(conn.authenticator().session_lifetime_ms(), Some(1_000));
    }

    assert_eq!(broker.get_calls_for_api(api_keys::API_VERSIONS).await.len(), 1);
    assert_eq!(broker.get_calls_for_api(api_keys::SASL_HANDSHAKE).await.len(), 4);
    assert_eq!(broker.get_tokens().await.len(), 4);

    broker.stop().await;
}
