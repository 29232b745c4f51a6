//! Dynamic scalar values.
//!
//! Objects carry a value of dynamic scalar type; the same tagged encoding
//! appears inside OBJECT frames, OBJECT_LIST snapshots and DB_RESULT rows,
//! and is reused verbatim by the server's settings store so persisted
//! values round-trip without a second serialisation format.
//!
//! Absent/invalid is a distinct variant, not a null: an object that has
//! never been written, or that was force-invalidated by the control port's
//! `refresh`, reports [`Value::Invalid`] and subscribers must tolerate it.

use std::fmt;

use crate::{
    errors::{ProtocolError, Result},
    wire,
};

const TAG_INVALID: u8 = 0;
const TAG_INT: u8 = 1;
const TAG_DOUBLE: u8 = 2;
const TAG_BOOL: u8 = 3;
const TAG_STRING: u8 = 4;
const TAG_TIMESTAMP: u8 = 5;

/// A self-describing scalar carried in binary frames.
///
/// Wire encoding: a 1-byte type tag followed by the variant encoding:
/// signed 64-bit big-endian for `Int`, IEEE-754 big-endian for `Double`,
/// one byte for `Bool`, a length-prefixed UTF-8 string for `Str`, 64-bit
/// big-endian milliseconds since the Unix epoch for `Timestamp`, and zero
/// bytes for `Invalid`.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Absent or invalidated value.
    Invalid,
    /// Signed 64-bit integer.
    Int(i64),
    /// IEEE-754 double.
    Double(f64),
    /// Boolean.
    Bool(bool),
    /// UTF-8 string.
    Str(String),
    /// Milliseconds since the Unix epoch.
    Timestamp(i64),
}

impl Value {
    /// Whether the value carries data. Subscribe-time initial OBJECT frames
    /// are suppressed for invalid values.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        !matches!(self, Self::Invalid)
    }

    /// Append the tagged encoding to `dst`.
    pub fn encode(&self, dst: &mut Vec<u8>) {
        match self {
            Self::Invalid => dst.push(TAG_INVALID),
            Self::Int(v) => {
                dst.push(TAG_INT);
                dst.extend_from_slice(&v.to_be_bytes());
            }
            Self::Double(v) => {
                dst.push(TAG_DOUBLE);
                dst.extend_from_slice(&v.to_be_bytes());
            }
            Self::Bool(v) => {
                dst.push(TAG_BOOL);
                dst.push(u8::from(*v));
            }
            Self::Str(v) => {
                dst.push(TAG_STRING);
                wire::put_string(dst, v);
            }
            Self::Timestamp(v) => {
                dst.push(TAG_TIMESTAMP);
                dst.extend_from_slice(&v.to_be_bytes());
            }
        }
    }

    /// Tagged encoding as an owned buffer.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        self.encode(&mut buf);
        buf
    }

    /// Decode one tagged value from the cursor.
    ///
    /// # Errors
    ///
    /// [`ProtocolError::UnknownValueTag`] for tags this version does not
    /// define, [`ProtocolError::Truncated`] when the variant encoding is
    /// cut short.
    pub fn decode(cursor: &mut &[u8]) -> Result<Self> {
        let tag = wire::take_u8(cursor)?;
        match tag {
            TAG_INVALID => Ok(Self::Invalid),
            TAG_INT => Ok(Self::Int(wire::take_i64(cursor)?)),
            TAG_DOUBLE => Ok(Self::Double(wire::take_f64(cursor)?)),
            TAG_BOOL => Ok(Self::Bool(wire::take_u8(cursor)? != 0)),
            TAG_STRING => Ok(Self::Str(wire::take_string(cursor)?)),
            TAG_TIMESTAMP => Ok(Self::Timestamp(wire::take_i64(cursor)?)),
            other => Err(ProtocolError::UnknownValueTag(other)),
        }
    }

    /// Decode a value that must occupy the whole buffer (settings store).
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let mut cursor = bytes;
        let value = Self::decode(&mut cursor)?;
        wire::expect_empty(cursor, "value")?;
        Ok(value)
    }
}

impl fmt::Display for Value {
    /// Human rendering used by the control port's `obj?` listing.
    /// Invalid values render as an empty string.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Invalid => Ok(()),
            Self::Int(v) => write!(f, "{v}"),
            Self::Double(v) => write!(f, "{v}"),
            Self::Bool(v) => write!(f, "{v}"),
            Self::Str(v) => write!(f, "{v}"),
            Self::Timestamp(v) => write!(f, "{v}"),
        }
    }
}
