//! Incremental stream decoder.
//!
//! Buffers raw bytes from the transport and yields a [`Frame`] only once
//! its full declared length has arrived. Length violations surface before
//! the body is buffered, so a hostile peer cannot make the server allocate
//! more than [`MAX_FRAME_LEN`] per frame.

use bytes::{Buf, BytesMut};

use crate::{
    Frame, MAX_FRAME_LEN,
    errors::{ProtocolError, Result},
};

/// Reassembles frames from an arbitrary-chunked byte stream.
///
/// Feed reads with [`FrameDecoder::extend`], then drain with
/// [`FrameDecoder::next_frame`] until it returns `Ok(None)`.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buf: BytesMut,
}

impl FrameDecoder {
    /// New decoder with an empty buffer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append transport bytes to the reassembly buffer.
    pub fn extend(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Next complete frame, `Ok(None)` if more bytes are needed.
    ///
    /// # Errors
    ///
    /// Any [`ProtocolError`] is fatal: the stream cannot be resynchronised
    /// and the caller must close the connection.
    pub fn next_frame(&mut self) -> Result<Option<Frame>> {
        if self.buf.len() < 4 {
            return Ok(None);
        }

        let mut prefix = &self.buf[..4];
        let len = prefix.get_u32() as usize;
        if len > MAX_FRAME_LEN {
            return Err(ProtocolError::FrameTooLarge {
                size: len,
                max: MAX_FRAME_LEN,
            });
        }

        if self.buf.len() < 4 + len {
            return Ok(None);
        }

        self.buf.advance(4);
        let body = self.buf.split_to(len);
        Frame::decode_body(&body).map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reassembles_across_arbitrary_chunks() {
        let frame = Frame::Command("OBJ:temp:0".to_string());
        let bytes = frame.to_bytes().unwrap();

        let mut decoder = FrameDecoder::new();
        for chunk in bytes.chunks(3) {
            decoder.extend(chunk);
        }
        assert_eq!(decoder.next_frame().unwrap(), Some(frame));
        assert_eq!(decoder.next_frame().unwrap(), None);
    }

    #[test]
    fn yields_multiple_frames_from_one_read() {
        let a = Frame::Command("PING".to_string());
        let b = Frame::Command("DMZ".to_string());
        let mut bytes = a.to_bytes().unwrap();
        bytes.extend_from_slice(&b.to_bytes().unwrap());

        let mut decoder = FrameDecoder::new();
        decoder.extend(&bytes);
        assert_eq!(decoder.next_frame().unwrap(), Some(a));
        assert_eq!(decoder.next_frame().unwrap(), Some(b));
        assert_eq!(decoder.next_frame().unwrap(), None);
    }

    #[test]
    fn incomplete_frame_waits() {
        let bytes = Frame::Command("PING".to_string()).to_bytes().unwrap();
        let mut decoder = FrameDecoder::new();
        decoder.extend(&bytes[..bytes.len() - 1]);
        assert_eq!(decoder.next_frame().unwrap(), None);
        decoder.extend(&bytes[bytes.len() - 1..]);
        assert!(decoder.next_frame().unwrap().is_some());
    }

    #[test]
    fn oversized_declared_length_fails_before_body_arrives() {
        let mut decoder = FrameDecoder::new();
        decoder.extend(&((MAX_FRAME_LEN as u32) + 1).to_be_bytes());
        assert!(matches!(
            decoder.next_frame(),
            Err(ProtocolError::FrameTooLarge { .. })
        ));
    }
}
