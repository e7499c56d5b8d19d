//! Non-blocking transport abstraction consumed by the authenticator.
//!
//! The authenticator never blocks: it reads and writes whatever the socket
//! accepts right now and asks to be called again on the next readiness
//! notification. Write interest is how it signals that an unflushed frame is
//! pending.

use std::io;

use tokio::io::{Interest, Ready};
use tokio::net::TcpStream;

/// Raw, non-blocking byte transport.
///
/// Implementations must report "would block" as `Ok(0)` and a peer that
/// closed the connection as an `UnexpectedEof` error, so that a zero-length
/// result is never ambiguous.
pub trait TransportLayer {
    /// Read up to `buf.len()` bytes that are available right now.
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Write as many bytes of `buf` as the socket accepts right now.
    fn write(&mut self, buf: &[u8]) -> io::Result<usize>;

    /// Ask to be woken when the socket becomes writable.
    fn add_write_interest(&mut self);

    /// Stop asking for write readiness.
    fn remove_write_interest(&mut self);
}

/// [`TransportLayer`] over a tokio `TcpStream`.
///
/// Uses `try_read`/`try_write` so each call is synchronous; the owner awaits
/// [`TcpTransport::ready`] between calls.
#[derive(Debug)]
pub struct TcpTransport {
    stream: TcpStream,
    write_interest: bool,
}

impl TcpTransport {
    /// Wrap a connected stream.
    #[must_use]
    pub fn new(stream: TcpStream) -> Self {
        Self {
            stream,
            write_interest: false,
        }
    }

    /// Readiness the owner should wait for: always readable, plus writable
    /// while a frame is waiting to be flushed.
    #[must_use]
    pub fn interest(&self) -> Interest {
        if self.write_interest {
            Interest::READABLE | Interest::WRITABLE
        } else {
            Interest::READABLE
        }
    }

    /// Whether write readiness has been requested.
    #[must_use]
    pub fn wants_write(&self) -> bool {
        self.write_interest
    }

    /// Wait until the socket is ready for the current interest set.
    ///
    /// # Errors
    ///
    /// Returns an error if polling the socket fails.
    pub async fn ready(&self) -> io::Result<Ready> {
        self.stream.ready(self.interest()).await
    }

    /// Borrow the underlying stream.
    #[must_use]
    pub fn get_ref(&self) -> &TcpStream {
        &self.stream
    }

    /// Take back the underlying stream.
    #[must_use]
    pub fn into_inner(self) -> TcpStream {
        self.stream
    }
}

impl TransportLayer for TcpTransport {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        match self.stream.try_read(buf) {
            Ok(0) => Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "connection closed by peer",
            )),
            Ok(n) => Ok(n),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(0),
            Err(e) => Err(e),
        }
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self.stream.try_write(buf) {
            Ok(n) => Ok(n),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(0),
            Err(e) => Err(e),
        }
    }

    fn add_write_interest(&mut self) {
        self.write_interest = true;
    }

    fn remove_write_interest(&mut self) {
        self.write_interest = false;
    }
}
