//! Resumable size-delimited frame I/O.
//!
//! A [`NetworkReceive`] accumulates exactly one frame across as many
//! non-blocking reads as it takes, and a [`NetworkSend`] drains one encoded
//! frame across as many non-blocking writes as it takes. Neither ever touches
//! bytes belonging to a neighbouring frame, which is what lets an
//! authenticator share a socket with application traffic.

use std::io;

use bytes::{Buf, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use super::codec::FrameCodec;
use super::transport::TransportLayer;

/// An inbound frame being read from a transport.
#[derive(Debug, Default)]
pub struct NetworkReceive {
    buffer: BytesMut,
    codec: FrameCodec,
}

impl NetworkReceive {
    /// Create an empty receive with the default frame size limit.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty receive with a custom frame size limit.
    #[must_use]
    pub fn with_max_frame_size(max_frame_size: usize) -> Self {
        Self {
            buffer: BytesMut::new(),
            codec: FrameCodec::with_max_frame_size(max_frame_size),
        }
    }

    /// Read as much of the frame as is available.
    ///
    /// Returns the payload once the frame is complete and `None` while bytes
    /// are still outstanding.
    ///
    /// # Errors
    ///
    /// Returns an error if the transport fails or the size prefix is invalid.
    pub fn read_from<T>(&mut self, transport: &mut T) -> io::Result<Option<Bytes>>
    where
        T: TransportLayer + ?Sized,
    {
        loop {
            let needed = self.codec.remaining(&self.buffer)?;
            if needed == 0 {
                return self.codec.decode(&mut self.buffer);
            }

            let start = self.buffer.len();
            self.buffer.resize(start + needed, 0);
            let read = transport.read(&mut self.buffer[start..]);
            let n = match read {
                Ok(n) => n,
                Err(e) => {
                    self.buffer.truncate(start);
                    return Err(e);
                }
            };
            self.buffer.truncate(start + n);

            if n == 0 {
                return Ok(None);
            }
        }
    }

    /// Bytes received so far, including the size prefix.
    #[must_use]
    pub fn bytes_read(&self) -> usize {
        self.buffer.len()
    }

    /// Whether nothing has been read yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }
}

/// An outbound frame being written to a transport.
#[derive(Debug, Clone)]
pub struct NetworkSend {
    buffer: Bytes,
    size: usize,
}

impl NetworkSend {
    /// Frame `payload` with its size prefix.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload exceeds the default frame size limit.
    pub fn new(payload: Bytes) -> io::Result<Self> {
        Self::with_codec(FrameCodec::new(), payload)
    }

    /// Frame `payload` using the given codec.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload exceeds the codec's frame size limit.
    pub fn with_codec(mut codec: FrameCodec, payload: Bytes) -> io::Result<Self> {
        let mut dst = BytesMut::new();
        codec.encode(payload, &mut dst)?;
        let size = dst.len();
        Ok(Self {
            buffer: dst.freeze(),
            size,
        })
    }

    /// Attempt one write of the unsent remainder.
    ///
    /// Returns the number of bytes the transport accepted.
    ///
    /// # Errors
    ///
    /// Returns an error if the transport fails.
    pub fn write_to<T>(&mut self, transport: &mut T) -> io::Result<usize>
    where
        T: TransportLayer + ?Sized,
    {
        if self.buffer.is_empty() {
            return Ok(0);
        }
        let written = transport.write(&self.buffer)?;
        self.buffer.advance(written.min(self.buffer.len()));
        Ok(written)
    }

    /// Whether every byte has been handed to the transport.
    #[must_use]
    pub fn completed(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Total framed size, including the size prefix.
    #[must_use]
    pub fn size(&self) -> usize {
        self.size
    }

    /// Bytes not yet written.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.buffer.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockTransport;

    fn framed(payload: &[u8]) -> Vec<u8> {
        let mut out = (payload.len() as u32).to_be_bytes().to_vec();
        out.extend_from_slice(payload);
        out
    }

    #[test]
    fn test_receive_whole_frame() {
        let mut transport = MockTransport::new();
        transport.push_inbound(&framed(b"payload"));

        let mut receive = NetworkReceive::new();
        let frame = receive.read_from(&mut transport).unwrap().unwrap();
        assert_eq!(&frame[..], b"payload");
    }

    #[test]
    fn test_receive_resumes_across_reads() {
        let mut transport = MockTransport::new();
        let bytes = framed(b"abcdef");
        let mut receive = NetworkReceive::new();

        transport.push_inbound(&bytes[..2]);
        assert!(receive.read_from(&mut transport).unwrap().is_none());
        assert_eq!(receive.bytes_read(), 2);

        transport.push_inbound(&bytes[2..7]);
        assert!(receive.read_from(&mut transport).unwrap().is_none());
        assert_eq!(receive.bytes_read(), 7);

        transport.push_inbound(&bytes[7..]);
        let frame = receive.read_from(&mut transport).unwrap().unwrap();
        assert_eq!(&frame[..], b"abcdef");
    }

    #[test]
    fn test_receive_does_not_consume_next_frame() {
        let mut transport = MockTransport::new();
        transport.push_inbound(&framed(b"one"));
        transport.push_inbound(&framed(b"two"));

        let mut receive = NetworkReceive::new();
        assert_eq!(&receive.read_from(&mut transport).unwrap().unwrap()[..], b"one");
        assert_eq!(transport.inbound_len(), framed(b"two").len());

        let mut receive = NetworkReceive::new();
        assert_eq!(&receive.read_from(&mut transport).unwrap().unwrap()[..], b"two");
    }

    #[test]
    fn test_receive_rejects_oversized_frame() {
        let mut transport = MockTransport::new();
        transport.push_inbound(&framed(&[0u8; 64]));

        let mut receive = NetworkReceive::with_max_frame_size(16);
        assert!(receive.read_from(&mut transport).is_err());
    }

    #[test]
    fn test_send_partial_writes() {
        let mut transport = MockTransport::new();
        transport.set_write_limit(Some(4));

        let mut send = NetworkSend::new(Bytes::from_static(b"12345678")).unwrap();
        assert_eq!(send.size(), 12);

        assert_eq!(send.write_to(&mut transport).unwrap(), 4);
        assert!(!send.completed());
        assert_eq!(send.write_to(&mut transport).unwrap(), 4);
        assert!(!send.completed());
        assert_eq!(send.write_to(&mut transport).unwrap(), 4);
        assert!(send.completed());

        assert_eq!(transport.written(), &framed(b"12345678")[..]);
    }

    #[test]
    fn test_send_blocked_transport_makes_no_progress() {
        let mut transport = MockTransport::new();
        transport.set_write_limit(Some(0));

        let mut send = NetworkSend::new(Bytes::from_static(b"xyz")).unwrap();
        assert_eq!(send.write_to(&mut transport).unwrap(), 0);
        assert_eq!(send.remaining(), 7);
    }
}
