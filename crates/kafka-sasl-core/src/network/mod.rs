//! Framing and transport for the authenticator.
//!
//! This module provides:
//! - Size-delimited Kafka frame codec
//! - Resumable frame send/receive buffers that survive partial I/O
//! - The non-blocking transport abstraction and its TCP implementation

pub mod codec;
pub mod frame;
pub mod transport;

pub use codec::{FrameCodec, DEFAULT_MAX_FRAME_SIZE, SIZE_PREFIX_LEN};
pub use frame::{NetworkReceive, NetworkSend};
pub use transport::{TcpTransport, TransportLayer};
