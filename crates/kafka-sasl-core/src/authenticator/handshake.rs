//! Mechanism announcement and broker error codes.

use kafka_protocol::messages::{SaslHandshakeRequest, SaslHandshakeResponse};
use kafka_protocol::protocol::StrBytes;

use crate::error::{Result, SaslError};

/// No error.
pub const NONE: i16 = 0;
/// The broker does not recognise the requested API version.
pub const UNSUPPORTED_VERSION: i16 = 35;
/// The broker does not enable the requested mechanism.
pub const UNSUPPORTED_SASL_MECHANISM: i16 = 33;
/// The request is not valid given the current SASL state.
pub const ILLEGAL_SASL_STATE: i16 = 34;
/// The broker rejected the credentials.
pub const SASL_AUTHENTICATION_FAILED: i16 = 58;

/// Kafka's name for an error code, for messages the broker left empty.
#[must_use]
pub fn error_name(code: i16) -> String {
    match code {
        NONE => "NONE".to_string(),
        UNSUPPORTED_SASL_MECHANISM => "UNSUPPORTED_SASL_MECHANISM".to_string(),
        ILLEGAL_SASL_STATE => "ILLEGAL_SASL_STATE".to_string(),
        UNSUPPORTED_VERSION => "UNSUPPORTED_VERSION".to_string(),
        SASL_AUTHENTICATION_FAILED => "SASL_AUTHENTICATION_FAILED".to_string(),
        other => format!("UNKNOWN_SERVER_ERROR({other})"),
    }
}

/// Build the request announcing `mechanism`.
#[must_use]
pub fn handshake_request(mechanism: &str) -> SaslHandshakeRequest {
    let mut request = SaslHandshakeRequest::default();
    request.mechanism = StrBytes::from_string(mechanism.to_string());
    request
}

/// The broker's enabled mechanisms, in advertised order.
#[must_use]
pub fn enabled_mechanisms(response: &SaslHandshakeResponse) -> Vec<String> {
    response.mechanisms.iter().map(|m| m.to_string()).collect()
}

/// Check the broker accepted `mechanism`.
///
/// # Errors
///
/// Returns [`SaslError::UnsupportedMechanism`] for error code 33 and
/// [`SaslError::IllegalSaslState`] for any other non-zero code. Both name the
/// client mechanism and the broker's enabled set.
pub fn check_handshake_response(mechanism: &str, response: &SaslHandshakeResponse) -> Result<()> {
    let enabled = enabled_mechanisms(response);
    match response.error_code {
        NONE => Ok(()),
        UNSUPPORTED_SASL_MECHANISM => Err(SaslError::UnsupportedMechanism {
            mechanism: mechanism.to_string(),
            enabled,
        }),
        ILLEGAL_SASL_STATE => Err(SaslError::IllegalSaslState(format!(
            "Unexpected handshake request with client mechanism {mechanism}, enabled mechanisms are {enabled:?}"
        ))),
        code => Err(SaslError::IllegalSaslState(format!(
            "Unknown error code {}, client mechanism is {mechanism}, enabled mechanisms are {enabled:?}",
            error_name(code)
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(error_code: i16, mechanisms: &[&'static str]) -> SaslHandshakeResponse {
        let mut response = SaslHandshakeResponse::default();
        response.error_code = error_code;
        for mechanism in mechanisms {
            response.mechanisms.push(StrBytes::from_static_str(mechanism));
        }
        response
    }

    #[test]
    fn test_handshake_request_names_mechanism() {
        let request = handshake_request("SCRAM-SHA-256");
        assert_eq!(request.mechanism.to_string(), "SCRAM-SHA-256");
    }

    #[test]
    fn test_accepted_mechanism() {
        assert!(check_handshake_response("PLAIN", &response(NONE, &["PLAIN"])).is_ok());
    }

    #[test]
    fn test_unsupported_mechanism() {
        let err = check_handshake_response("SCRAM-SHA-512", &response(33, &["PLAIN", "GSSAPI"]))
            .unwrap_err();
        match err {
            SaslError::UnsupportedMechanism { mechanism, enabled } => {
                assert_eq!(mechanism, "SCRAM-SHA-512");
                assert_eq!(enabled, vec!["PLAIN".to_string(), "GSSAPI".to_string()]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_illegal_state() {
        let err = check_handshake_response("PLAIN", &response(34, &["PLAIN"])).unwrap_err();
        assert!(matches!(err, SaslError::IllegalSaslState(_)));
        assert!(err.to_string().contains("Unexpected handshake request with client mechanism PLAIN"));
    }

    #[test]
    fn test_unknown_error_code() {
        let err = check_handshake_response("PLAIN", &response(99, &[])).unwrap_err();
        assert!(err.to_string().contains("Unknown error code"));
        assert!(err.to_string().contains("99"));
    }

    #[test]
    fn test_error_names() {
        assert_eq!(error_name(58), "SASL_AUTHENTICATION_FAILED");
        assert_eq!(error_name(-1), "UNKNOWN_SERVER_ERROR(-1)");
    }
}
