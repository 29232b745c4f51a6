//! Wire model and codec for the KaZa binary protocol.
//!
//! The wire is a stream of self-delimiting frames: a 32-bit big-endian
//! total length, a one-byte kind tag, then a kind-specific payload.
//! Scalars travel as self-describing tagged values; strings are
//! length-prefixed UTF-8. Everything multi-byte is big-endian.
//!
//! This crate is pure data: no I/O, no async, no logging. The server and
//! any client build their transports on top of [`FrameDecoder`] for the
//! receive side and [`Frame::encode`] for the send side.

mod codec;
mod errors;
mod frame;
mod value;
mod wire;

pub use codec::FrameDecoder;
pub use errors::{ProtocolError, Result};
pub use frame::{Frame, FrameKind, ObjectEntry, SocketState, MAX_FRAME_LEN};
pub use value::Value;

/// Protocol major version. A mismatch here is fatal during negotiation.
pub const PROTOCOL_MAJOR: u8 = 1;

/// Protocol minor version. Minor mismatches are accepted; the server is
/// backward compatible within a major.
pub const PROTOCOL_MINOR: u8 = 0;
