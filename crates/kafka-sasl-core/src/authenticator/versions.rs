//! Capability discovery and version negotiation.
//!
//! Discovery always uses ApiVersions v0: brokers that cannot parse the request
//! treat it as an opaque GSSAPI token instead of rejecting it.

use kafka_protocol::messages::{ApiKey, ApiVersionsResponse};

/// ApiVersions request version used for discovery.
pub const API_VERSIONS_REQUEST_VERSION: i16 = 0;

/// Highest SaslHandshake version this client speaks.
pub const SASL_HANDSHAKE_MAX_VERSION: i16 = 1;

/// Highest SaslAuthenticate version this client speaks.
pub const SASL_AUTHENTICATE_MAX_VERSION: i16 = 2;

/// Supported version range of one API, as advertised by the broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ApiVersionRange {
    /// Raw Kafka API key.
    pub api_key: i16,
    /// Lowest supported version.
    pub min_version: i16,
    /// Highest supported version.
    pub max_version: i16,
}

/// The broker's capability table from the most recent ApiVersions response.
///
/// Carried into re-authentication so discovery is not repeated.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CachedCapabilities {
    ranges: Vec<ApiVersionRange>,
}

/// Versions chosen for the rest of the exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NegotiatedVersions {
    /// SaslHandshake version to send.
    pub handshake_version: i16,
    /// SaslAuthenticate version, or `None` when the broker cannot envelope
    /// tokens and they travel as raw frames.
    pub authenticate_version: Option<i16>,
}

impl NegotiatedVersions {
    /// Versions for a broker that was never asked: handshake v0, raw tokens.
    #[must_use]
    pub fn legacy() -> Self {
        Self {
            handshake_version: 0,
            authenticate_version: None,
        }
    }
}

impl CachedCapabilities {
    /// Build a table from explicit ranges.
    #[must_use]
    pub fn new(ranges: Vec<ApiVersionRange>) -> Self {
        Self { ranges }
    }

    /// Capture the table advertised in an ApiVersions response.
    #[must_use]
    pub fn from_response(response: &ApiVersionsResponse) -> Self {
        let ranges = response
            .api_keys
            .iter()
            .map(|api| ApiVersionRange {
                api_key: api.api_key,
                min_version: api.min_version,
                max_version: api.max_version,
            })
            .collect();
        Self { ranges }
    }

    /// Range advertised for `api_key`, if any.
    #[must_use]
    pub fn get(&self, api_key: ApiKey) -> Option<&ApiVersionRange> {
        let key = api_key as i16;
        self.ranges.iter().find(|range| range.api_key == key)
    }

    /// All advertised ranges.
    #[must_use]
    pub fn ranges(&self) -> &[ApiVersionRange] {
        &self.ranges
    }

    /// Pick the highest mutually supported handshake and envelope versions.
    ///
    /// A missing SaslHandshake entry yields version 0; a missing
    /// SaslAuthenticate entry disables the envelope.
    #[must_use]
    pub fn negotiate(&self) -> NegotiatedVersions {
        let handshake_version = self
            .get(ApiKey::SaslHandshake)
            .map_or(0, |range| range.max_version.min(SASL_HANDSHAKE_MAX_VERSION));
        let authenticate_version = self
            .get(ApiKey::SaslAuthenticate)
            .map(|range| range.max_version.min(SASL_AUTHENTICATE_MAX_VERSION));

        NegotiatedVersions {
            handshake_version,
            authenticate_version,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kafka_protocol::messages::api_versions_response::ApiVersion;

    fn range(api_key: ApiKey, max_version: i16) -> ApiVersionRange {
        ApiVersionRange {
            api_key: api_key as i16,
            min_version: 0,
            max_version,
        }
    }

    #[test]
    fn test_negotiate_caps_at_client_max() {
        let caps = CachedCapabilities::new(vec![
            range(ApiKey::SaslHandshake, 5),
            range(ApiKey::SaslAuthenticate, 9),
        ]);
        let versions = caps.negotiate();
        assert_eq!(versions.handshake_version, SASL_HANDSHAKE_MAX_VERSION);
        assert_eq!(versions.authenticate_version, Some(SASL_AUTHENTICATE_MAX_VERSION));
    }

    #[test]
    fn test_negotiate_uses_lower_server_max() {
        let caps = CachedCapabilities::new(vec![
            range(ApiKey::SaslHandshake, 0),
            range(ApiKey::SaslAuthenticate, 1),
        ]);
        let versions = caps.negotiate();
        assert_eq!(versions.handshake_version, 0);
        assert_eq!(versions.authenticate_version, Some(1));
    }

    #[test]
    fn test_missing_authenticate_disables_envelope() {
        let caps = CachedCapabilities::new(vec![range(ApiKey::SaslHandshake, 1)]);
        assert_eq!(caps.negotiate().authenticate_version, None);
    }

    #[test]
    fn test_empty_table_is_legacy() {
        assert_eq!(CachedCapabilities::default().negotiate(), NegotiatedVersions::legacy());
    }

    #[test]
    fn test_from_response() {
        let mut response = ApiVersionsResponse::default();
        let mut api = ApiVersion::default();
        api.api_key = ApiKey::SaslAuthenticate as i16;
        api.min_version = 0;
        api.max_version = 2;
        response.api_keys.push(api);

        let caps = CachedCapabilities::from_response(&response);
        assert_eq!(caps.ranges().len(), 1);
        assert_eq!(caps.get(ApiKey::SaslAuthenticate).unwrap().max_version, 2);
        assert!(caps.get(ApiKey::SaslHandshake).is_none());
    }
}
