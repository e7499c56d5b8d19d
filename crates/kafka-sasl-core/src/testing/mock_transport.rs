//! In-memory transport for driving the authenticator step by step.

use std::io;

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::network::codec::SIZE_PREFIX_LEN;
use crate::network::transport::TransportLayer;

/// A [`TransportLayer`] backed by byte buffers.
///
/// Inbound bytes are queued by the test; outbound bytes are recorded. Writes
/// can be throttled to force partial sends, and either direction can be made
/// to fail.
#[derive(Debug, Default)]
pub struct MockTransport {
    inbound: BytesMut,
    written: Vec<u8>,
    consumed: usize,
    write_limit: Option<usize>,
    write_interest: bool,
    write_calls: usize,
    read_error: Option<io::ErrorKind>,
    write_error: Option<io::ErrorKind>,
    closed: bool,
}

impl MockTransport {
    /// Create an empty transport.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue raw bytes for the reader.
    pub fn push_inbound(&mut self, bytes: &[u8]) {
        self.inbound.extend_from_slice(bytes);
    }

    /// Queue one size-prefixed frame for the reader.
    pub fn push_frame(&mut self, payload: &[u8]) {
        self.inbound.reserve(SIZE_PREFIX_LEN + payload.len());
        self.inbound.put_u32(payload.len() as u32);
        self.inbound.extend_from_slice(payload);
    }

    /// Bytes queued but not yet read.
    #[must_use]
    pub fn inbound_len(&self) -> usize {
        self.inbound.len()
    }

    /// Accept at most `limit` bytes per write; `None` removes the limit.
    pub fn set_write_limit(&mut self, limit: Option<usize>) {
        self.write_limit = limit;
    }

    /// Every byte written so far.
    #[must_use]
    pub fn written(&self) -> &[u8] {
        &self.written
    }

    /// Complete frames written since the last call, without size prefixes.
    pub fn take_frames(&mut self) -> Vec<Bytes> {
        let mut frames = Vec::new();
        loop {
            let pending = &self.written[self.consumed..];
            if pending.len() < SIZE_PREFIX_LEN {
                break;
            }
            let mut prefix = &pending[..SIZE_PREFIX_LEN];
            let len = prefix.get_u32() as usize;
            if pending.len() < SIZE_PREFIX_LEN + len {
                break;
            }
            frames.push(Bytes::copy_from_slice(
                &pending[SIZE_PREFIX_LEN..SIZE_PREFIX_LEN + len],
            ));
            self.consumed += SIZE_PREFIX_LEN + len;
        }
        frames
    }

    /// Whether write interest is currently registered.
    #[must_use]
    pub fn wants_write(&self) -> bool {
        self.write_interest
    }

    /// Number of write attempts that reached the transport.
    #[must_use]
    pub fn write_calls(&self) -> usize {
        self.write_calls
    }

    /// Make every subsequent read fail with `kind`.
    pub fn fail_reads(&mut self, kind: io::ErrorKind) {
        self.read_error = Some(kind);
    }

    /// Make every subsequent write fail with `kind`.
    pub fn fail_writes(&mut self, kind: io::ErrorKind) {
        self.write_error = Some(kind);
    }

    /// Simulate the peer closing once queued bytes are drained.
    pub fn close(&mut self) {
        self.closed = true;
    }
}

impl TransportLayer for MockTransport {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if let Some(kind) = self.read_error {
            return Err(io::Error::new(kind, "injected read failure"));
        }
        if self.inbound.is_empty() {
            if self.closed {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "connection closed by peer",
                ));
            }
            return Ok(0);
        }
        let n = buf.len().min(self.inbound.len());
        buf[..n].copy_from_slice(&self.inbound[..n]);
        self.inbound.advance(n);
        Ok(n)
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if let Some(kind) = self.write_error {
            return Err(io::Error::new(kind, "injected write failure"));
        }
        self.write_calls += 1;
        let n = buf.len().min(self.write_limit.unwrap_or(usize::MAX));
        self.written.extend_from_slice(&buf[..n]);
        Ok(n)
    }

    fn add_write_interest(&mut self) {
        self.write_interest = true;
    }

    fn remove_write_interest(&mut self) {
        self.write_interest = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reads_drain_inbound() {
        let mut transport = MockTransport::new();
        transport.push_inbound(b"abc");

        let mut buf = [0u8; 2];
        assert_eq!(transport.read(&mut buf).unwrap(), 2);
        assert_eq!(&buf, b"ab");
        assert_eq!(transport.inbound_len(), 1);
    }

    #[test]
    fn test_empty_read_would_block_until_closed() {
        let mut transport = MockTransport::new();
        let mut buf = [0u8; 4];
        assert_eq!(transport.read(&mut buf).unwrap(), 0);

        transport.close();
        let err = transport.read(&mut buf).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn test_take_frames_skips_partial_tail() {
        let mut transport = MockTransport::new();
        transport.write(&[0, 0, 0, 2, b'h', b'i', 0, 0]).unwrap();

        let frames = transport.take_frames();
        assert_eq!(frames, vec![Bytes::from_static(b"hi")]);

        transport.write(&[0, 1, b'!']).unwrap();
        assert_eq!(transport.take_frames(), vec![Bytes::from_static(b"!")]);
        assert!(transport.take_frames().is_empty());
    }

    #[test]
    fn test_injected_failures() {
        let mut transport = MockTransport::new();
        transport.fail_writes(io::ErrorKind::BrokenPipe);
        assert_eq!(
            transport.write(b"x").unwrap_err().kind(),
            io::ErrorKind::BrokenPipe
        );
        assert_eq!(transport.write_calls(), 0);

        transport.fail_reads(io::ErrorKind::ConnectionReset);
        let mut buf = [0u8; 1];
        assert_eq!(
            transport.read(&mut buf).unwrap_err().kind(),
            io::ErrorKind::ConnectionReset
        );
    }
}
