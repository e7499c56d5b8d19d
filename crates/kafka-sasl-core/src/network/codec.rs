//! Kafka protocol frame codec.
//!
//! Implements tokio's `Decoder` and `Encoder` traits for size-delimited frames.
//! Kafka uses a simple framing format: 4-byte big-endian length prefix followed by
//! the message bytes. The codec never looks inside the payload, so it serves
//! enveloped requests and raw mechanism tokens alike.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::io;
use tokio_util::codec::{Decoder, Encoder};

/// Size of the length prefix in bytes.
pub const SIZE_PREFIX_LEN: usize = 4;

/// Maximum frame size (100 MB by default).
pub const DEFAULT_MAX_FRAME_SIZE: usize = 100 * 1024 * 1024;

/// Codec for size-delimited Kafka frames.
///
/// Frames are laid out as:
/// - 4 bytes: payload length (big-endian, excludes these 4 bytes)
/// - N bytes: payload
#[derive(Debug, Clone, Copy)]
pub struct FrameCodec {
    max_frame_size: usize,
}

impl FrameCodec {
    /// Create a new codec with default max frame size.
    #[must_use]
    pub fn new() -> Self {
        Self {
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }

    /// Create a new codec with custom max frame size.
    #[must_use]
    pub fn with_max_frame_size(max_frame_size: usize) -> Self {
        Self { max_frame_size }
    }

    /// Get the configured max frame size.
    #[must_use]
    pub fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }

    /// Number of bytes still missing before `src` holds one complete frame.
    ///
    /// Used by resumable readers so they never consume bytes belonging to
    /// the following frame.
    ///
    /// # Errors
    ///
    /// Returns an error if the announced size is negative or too large.
    pub fn remaining(&self, src: &[u8]) -> io::Result<usize> {
        if src.len() < SIZE_PREFIX_LEN {
            return Ok(SIZE_PREFIX_LEN - src.len());
        }
        let length = self.frame_length(src)?;
        Ok((SIZE_PREFIX_LEN + length).saturating_sub(src.len()))
    }

    fn frame_length(&self, src: &[u8]) -> io::Result<usize> {
        let length = i32::from_be_bytes([src[0], src[1], src[2], src[3]]);
        if length < 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("invalid frame size {length}"),
            ));
        }
        let length = length as usize;
        if length > self.max_frame_size {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "frame size {length} exceeds maximum {}",
                    self.max_frame_size
                ),
            ));
        }
        Ok(length)
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for FrameCodec {
    type Item = Bytes;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        // Need at least 4 bytes for the length prefix
        if src.len() < SIZE_PREFIX_LEN {
            return Ok(None);
        }

        let length = self.frame_length(src)?;

        if src.len() < SIZE_PREFIX_LEN + length {
            src.reserve(SIZE_PREFIX_LEN + length - src.len());
            return Ok(None);
        }

        src.advance(SIZE_PREFIX_LEN);
        Ok(Some(src.split_to(length).freeze()))
    }
}

impl Encoder<Bytes> for FrameCodec {
    type Error = io::Error;

    fn encode(&mut self, item: Bytes, dst: &mut BytesMut) -> Result<(), Self::Error> {
        if item.len() > self.max_frame_size {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!(
                    "frame size {} exceeds maximum {}",
                    item.len(),
                    self.max_frame_size
                ),
            ));
        }

        dst.reserve(SIZE_PREFIX_LEN + item.len());
        dst.put_u32(item.len() as u32);
        dst.extend_from_slice(&item);

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_frame(payload: &[u8]) -> BytesMut {
        let mut buf = BytesMut::new();
        buf.put_u32(payload.len() as u32);
        buf.extend_from_slice(payload);
        buf
    }

    #[test]
    fn test_decode_valid_frame() {
        let mut codec = FrameCodec::new();
        let mut buf = make_frame(&[0, 18, 0, 0, 0, 0, 0, 7]);

        let frame = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(&frame[..], &[0, 18, 0, 0, 0, 0, 0, 7]);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_decode_incomplete_length() {
        let mut codec = FrameCodec::new();
        let mut buf = BytesMut::from(&[0u8, 0, 0][..]);

        assert!(codec.decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn test_decode_incomplete_body() {
        let mut codec = FrameCodec::new();
        let mut buf = BytesMut::new();
        buf.put_u32(100);
        buf.put_u32(0);

        assert!(codec.decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn test_decode_empty_payload() {
        let mut codec = FrameCodec::new();
        let mut buf = make_frame(&[]);

        let frame = codec.decode(&mut buf).unwrap().unwrap();
        assert!(frame.is_empty());
    }

    #[test]
    fn test_decode_frame_too_large() {
        let mut codec = FrameCodec::with_max_frame_size(100);
        let mut buf = BytesMut::new();
        buf.put_u32(200);

        assert!(codec.decode(&mut buf).is_err());
    }

    #[test]
    fn test_decode_negative_size() {
        let mut codec = FrameCodec::new();
        let mut buf = BytesMut::new();
        buf.put_i32(-1);

        let err = codec.decode(&mut buf).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn test_remaining_tracks_progress() {
        let codec = FrameCodec::new();
        let frame = make_frame(&[1, 2, 3]);

        assert_eq!(codec.remaining(&[]).unwrap(), 4);
        assert_eq!(codec.remaining(&frame[..2]).unwrap(), 2);
        assert_eq!(codec.remaining(&frame[..4]).unwrap(), 3);
        assert_eq!(codec.remaining(&frame[..6]).unwrap(), 1);
        assert_eq!(codec.remaining(&frame[..]).unwrap(), 0);
    }

    #[test]
    fn test_encode_frame() {
        let mut codec = FrameCodec::new();
        let mut dst = BytesMut::new();

        codec
            .encode(Bytes::from_static(&[1, 2, 3, 4]), &mut dst)
            .unwrap();

        assert_eq!(dst.len(), 8);
        assert_eq!(u32::from_be_bytes([dst[0], dst[1], dst[2], dst[3]]), 4);
        assert_eq!(&dst[4..], &[1, 2, 3, 4]);
    }

    #[test]
    fn test_multiple_frames() {
        let mut codec = FrameCodec::new();
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&make_frame(b"first"));
        buf.extend_from_slice(&make_frame(b"second"));

        assert_eq!(&codec.decode(&mut buf).unwrap().unwrap()[..], b"first");
        assert_eq!(&codec.decode(&mut buf).unwrap().unwrap()[..], b"second");
        assert!(codec.decode(&mut buf).unwrap().is_none());
    }
}
