//! Request headers and response correlation.

use bytes::{Bytes, BytesMut};
use kafka_protocol::messages::{RequestHeader, ResponseHeader};
use kafka_protocol::protocol::{Decodable, Encodable, HeaderVersion, StrBytes};

use crate::error::{Result, SaslError};

/// The one request the authenticator has outstanding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestContext {
    /// Raw Kafka API key.
    pub api_key: i16,
    /// Version the request was encoded at.
    pub api_version: i16,
    /// Correlation id the response must echo.
    pub correlation_id: i32,
}

impl RequestContext {
    /// Build the wire header for this request.
    #[must_use]
    pub fn header(&self, client_id: &str) -> RequestHeader {
        let mut header = RequestHeader::default();
        header.request_api_key = self.api_key;
        header.request_api_version = self.api_version;
        header.correlation_id = self.correlation_id;
        header.client_id = Some(StrBytes::from_string(client_id.to_string()));
        header
    }

    /// Encode header and body into one payload (without the size prefix).
    ///
    /// # Errors
    ///
    /// Returns [`SaslError::ProtocolEncode`] if either part cannot be encoded
    /// at this context's version.
    pub fn encode<R>(&self, client_id: &str, request: &R) -> Result<Bytes>
    where
        R: Encodable + HeaderVersion,
    {
        let header_version = R::header_version(self.api_version);
        let mut buf = BytesMut::new();
        self.header(client_id)
            .encode(&mut buf, header_version)
            .map_err(|e| SaslError::ProtocolEncode {
                message: format!("failed to encode request header for api key {}: {e}", self.api_key),
            })?;
        request
            .encode(&mut buf, self.api_version)
            .map_err(|e| SaslError::ProtocolEncode {
                message: format!("failed to encode request for api key {}: {e}", self.api_key),
            })?;
        Ok(buf.freeze())
    }

    /// Parse a response frame against this context.
    ///
    /// Decodes the response header at the version implied by the request,
    /// checks the correlation id, then decodes the body. Trailing bytes after
    /// the body are ignored.
    ///
    /// # Errors
    ///
    /// Returns [`SaslError::ProtocolDecode`] if the frame does not belong to
    /// this request or cannot be decoded.
    pub fn parse_response<R>(&self, mut frame: Bytes) -> Result<R>
    where
        R: Decodable + HeaderVersion,
    {
        let header = ResponseHeader::decode(&mut frame, R::header_version(self.api_version))
            .map_err(|e| SaslError::ProtocolDecode {
                message: format!("failed to decode response header: {e}"),
            })?;

        if header.correlation_id != self.correlation_id {
            return Err(SaslError::ProtocolDecode {
                message: format!(
                    "correlation id mismatch: expected {}, received {}",
                    self.correlation_id, header.correlation_id
                ),
            });
        }

        R::decode(&mut frame, self.api_version).map_err(|e| SaslError::ProtocolDecode {
            message: format!("failed to decode response for api key {}: {e}", self.api_key),
        })
    }
}
