//! Primitive field readers and writers.
//!
//! Readers consume from a shrinking `&[u8]` cursor and fail with
//! [`ProtocolError::Truncated`] instead of panicking, so frame decoders can
//! be written as straight-line `?` chains over untrusted input.

use crate::errors::{ProtocolError, Result};

pub(crate) fn take_u8(cursor: &mut &[u8]) -> Result<u8> {
    let (&byte, rest) = cursor.split_first().ok_or(ProtocolError::Truncated {
        needed: 1,
        remaining: 0,
    })?;
    *cursor = rest;
    Ok(byte)
}

pub(crate) fn take_u16(cursor: &mut &[u8]) -> Result<u16> {
    Ok(u16::from_be_bytes(take_array::<2>(cursor)?))
}

pub(crate) fn take_u32(cursor: &mut &[u8]) -> Result<u32> {
    Ok(u32::from_be_bytes(take_array::<4>(cursor)?))
}

pub(crate) fn take_i64(cursor: &mut &[u8]) -> Result<i64> {
    Ok(i64::from_be_bytes(take_array::<8>(cursor)?))
}

pub(crate) fn take_f64(cursor: &mut &[u8]) -> Result<f64> {
    Ok(f64::from_be_bytes(take_array::<8>(cursor)?))
}

pub(crate) fn take_bytes<'a>(cursor: &mut &'a [u8], len: usize) -> Result<&'a [u8]> {
    if cursor.len() < len {
        return Err(ProtocolError::Truncated {
            needed: len,
            remaining: cursor.len(),
        });
    }
    let (head, rest) = cursor.split_at(len);
    *cursor = rest;
    Ok(head)
}

/// Length-prefixed UTF-8 string: u32 BE byte count, then the bytes.
pub(crate) fn take_string(cursor: &mut &[u8]) -> Result<String> {
    let len = take_u32(cursor)? as usize;
    let bytes = take_bytes(cursor, len)?;
    String::from_utf8(bytes.to_vec()).map_err(|_| ProtocolError::InvalidUtf8)
}

pub(crate) fn put_string(dst: &mut Vec<u8>, s: &str) {
    dst.extend_from_slice(&(s.len() as u32).to_be_bytes());
    dst.extend_from_slice(s.as_bytes());
}

/// Verify the cursor is fully consumed at the end of a frame payload.
pub(crate) fn expect_empty(cursor: &[u8], kind: &'static str) -> Result<()> {
    if cursor.is_empty() {
        Ok(())
    } else {
        Err(ProtocolError::TrailingBytes {
            kind,
            remaining: cursor.len(),
        })
    }
}

fn take_array<const N: usize>(cursor: &mut &[u8]) -> Result<[u8; N]> {
    let bytes = take_bytes(cursor, N)?;
    let mut arr = [0u8; N];
    arr.copy_from_slice(bytes);
    Ok(arr)
}
