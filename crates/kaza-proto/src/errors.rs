//! Protocol error types.

/// Convenience alias for protocol results.
pub type Result<T> = std::result::Result<T, ProtocolError>;

/// Errors raised while encoding or decoding wire frames.
///
/// Every variant is fatal for the connection that produced it: a protocol
/// violation is logged and closes the connection, and there is no way to
/// resynchronise a corrupt length-framed stream.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    /// Declared frame length exceeds [`crate::MAX_FRAME_LEN`].
    #[error("frame length {size} exceeds maximum {max}")]
    FrameTooLarge {
        /// Declared length in bytes.
        size: usize,
        /// Maximum permitted length.
        max: usize,
    },

    /// A field extends past the end of the frame payload.
    #[error("frame truncated: needed {needed} bytes, {remaining} remain")]
    Truncated {
        /// Bytes the field required.
        needed: usize,
        /// Bytes actually available.
        remaining: usize,
    },

    /// The frame kind tag is not one this protocol version defines.
    #[error("unknown frame kind tag {0:#04x}")]
    UnknownKind(u8),

    /// The value type tag is not one this protocol version defines.
    #[error("unknown value tag {0:#04x}")]
    UnknownValueTag(u8),

    /// The socket state byte of a SOCK_STATE frame is unrecognised.
    #[error("unknown socket state {0:#04x}")]
    UnknownSocketState(u8),

    /// A length-prefixed string is not valid UTF-8.
    #[error("invalid UTF-8 in wire string")]
    InvalidUtf8,

    /// Payload bytes remain after the last field of a frame.
    #[error("{remaining} trailing bytes after {kind} payload")]
    TrailingBytes {
        /// Frame kind being decoded.
        kind: &'static str,
        /// Unconsumed byte count.
        remaining: usize,
    },

    /// A compressed block failed to inflate, or its declared uncompressed
    /// length did not match the inflated data.
    #[error("compressed block error: {0}")]
    Compression(String),
}
