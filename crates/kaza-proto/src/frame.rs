//! Frame model: every message the protocol can carry.
//!
//! Layout on the wire:
//! `[length: u32 BE] + [kind: u8] + [payload: kind-specific]`
//!
//! The length covers everything after itself (kind byte included), so a
//! reader can skip frames it does not understand, although in practice an
//! unknown kind is a protocol violation and closes the connection.
//!
//! # Invariants
//!
//! - Length Consistency: the encoded length always equals the byte count
//!   of kind byte plus payload. [`Frame::encode`] computes it; decoding
//!   verifies every field lands inside the declared payload and that no
//!   trailing bytes remain.
//!
//! - Size Limit: no frame may exceed [`MAX_FRAME_LEN`]. Enforced on both
//!   encode and decode to bound peer-controlled allocations.

use std::io::{Read, Write};

use flate2::{Compression, read::ZlibDecoder, write::ZlibEncoder};

use crate::{
    Value,
    errors::{ProtocolError, Result},
    wire,
};

/// Hard cap on the declared frame length (16 MiB).
///
/// A peer claiming more than this is treated as malicious or corrupt; the
/// decoder errors out before buffering the body.
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// Frame kind tags as they appear on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FrameKind {
    /// Client hello: protocol version plus peer identity.
    Version = 1,
    /// Server accepts the version.
    VersionOk = 2,
    /// Server rejects the version; connection closes after a grace delay.
    VersionBad = 3,
    /// Colon-separated textual command.
    Command = 4,
    /// Single object value update.
    Object = 5,
    /// Compressed snapshot of the whole registry.
    ObjectList = 6,
    /// File transfer (application bundle).
    File = 7,
    /// Ad-hoc SQL query.
    DbQuery = 8,
    /// SQL result set.
    DbResult = 9,
    /// Open a proxied outbound TCP socket.
    SockConnect = 10,
    /// Bytes for / from a proxied socket.
    SockData = 11,
    /// Proxied socket state change.
    SockState = 12,
}

impl FrameKind {
    /// Parse a wire tag. `None` for tags this version does not define.
    #[must_use]
    pub fn from_u8(tag: u8) -> Option<Self> {
        match tag {
            1 => Some(Self::Version),
            2 => Some(Self::VersionOk),
            3 => Some(Self::VersionBad),
            4 => Some(Self::Command),
            5 => Some(Self::Object),
            6 => Some(Self::ObjectList),
            7 => Some(Self::File),
            8 => Some(Self::DbQuery),
            9 => Some(Self::DbResult),
            10 => Some(Self::SockConnect),
            11 => Some(Self::SockData),
            12 => Some(Self::SockState),
            _ => None,
        }
    }
}

/// State of a proxied outbound socket, reported via SOCK_STATE.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SocketState {
    /// Outbound connect succeeded.
    Connected = 1,
    /// Socket closed (EOF or deliberate shutdown).
    Disconnected = 2,
    /// Connect or transfer failed.
    Error = 3,
}

impl SocketState {
    fn from_u8(byte: u8) -> Result<Self> {
        match byte {
            1 => Ok(Self::Connected),
            2 => Ok(Self::Disconnected),
            3 => Ok(Self::Error),
            other => Err(ProtocolError::UnknownSocketState(other)),
        }
    }
}

/// One (name, value, unit) triple of an OBJECT_LIST snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectEntry {
    /// Registry name of the object.
    pub name: String,
    /// Current value at snapshot time.
    pub value: Value,
    /// Unit string, possibly empty.
    pub unit: String,
}

/// A decoded protocol frame.
///
/// Variants map one-to-one onto [`FrameKind`] tags; payload fields follow
/// the wire order so the codecs below read as the format specification.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// VERSION: `{major, minor}` + username + device name + channel.
    Version {
        /// Protocol major; mismatch is fatal.
        major: u8,
        /// Protocol minor; mismatch is tolerated.
        minor: u8,
        /// Authenticated username (certificate CN by convention).
        user: String,
        /// Human-readable device name.
        device: String,
        /// Client channel discriminator.
        channel: u32,
    },
    /// VERSION_OK with an optional reason string.
    VersionOk {
        /// Optional informational text.
        reason: Option<String>,
    },
    /// VERSION_BAD with an optional reason string.
    VersionBad {
        /// Optional rejection explanation.
        reason: Option<String>,
    },
    /// COMMAND: one UTF-8 string of colon-separated fields.
    Command(String),
    /// OBJECT: session-local id, tagged value, confirm flag.
    Object {
        /// Session-local 16-bit subscription index.
        id: u16,
        /// New value.
        value: Value,
        /// Server echo of a confirmed client write.
        confirm: bool,
    },
    /// OBJECT_LIST: full-registry snapshot, zlib-compressed on the wire.
    ObjectList(Vec<ObjectEntry>),
    /// FILE: filename + contents.
    File {
        /// Logical file name.
        name: String,
        /// Raw contents.
        data: Vec<u8>,
    },
    /// DB_QUERY: correlation id + SQL text.
    DbQuery {
        /// Client-chosen correlation id.
        id: u32,
        /// SQL to execute verbatim.
        sql: String,
    },
    /// DB_RESULT: correlation id + column names + rows of tagged values.
    DbResult {
        /// Correlation id of the originating DB_QUERY.
        id: u32,
        /// Column names, in result order.
        columns: Vec<String>,
        /// Row-major tagged values; every row has `columns.len()` cells.
        rows: Vec<Vec<Value>>,
    },
    /// SOCK_CONNECT: open an outbound TCP socket under a session-local id.
    SockConnect {
        /// Session-local socket id.
        id: u16,
        /// Target host (name or address literal).
        host: String,
        /// Target TCP port.
        port: u16,
    },
    /// SOCK_DATA: bytes for or from a proxied socket.
    SockData {
        /// Session-local socket id.
        id: u16,
        /// Raw bytes.
        data: Vec<u8>,
    },
    /// SOCK_STATE: proxied socket lifecycle report.
    SockState {
        /// Session-local socket id.
        id: u16,
        /// New state.
        state: SocketState,
    },
}

impl Frame {
    /// Wire kind tag of this frame.
    #[must_use]
    pub fn kind(&self) -> FrameKind {
        match self {
            Self::Version { .. } => FrameKind::Version,
            Self::VersionOk { .. } => FrameKind::VersionOk,
            Self::VersionBad { .. } => FrameKind::VersionBad,
            Self::Command(_) => FrameKind::Command,
            Self::Object { .. } => FrameKind::Object,
            Self::ObjectList(_) => FrameKind::ObjectList,
            Self::File { .. } => FrameKind::File,
            Self::DbQuery { .. } => FrameKind::DbQuery,
            Self::DbResult { .. } => FrameKind::DbResult,
            Self::SockConnect { .. } => FrameKind::SockConnect,
            Self::SockData { .. } => FrameKind::SockData,
            Self::SockState { .. } => FrameKind::SockState,
        }
    }

    /// Append the full wire encoding (length prefix included) to `dst`.
    ///
    /// # Errors
    ///
    /// [`ProtocolError::FrameTooLarge`] when kind byte plus payload exceed
    /// [`MAX_FRAME_LEN`].
    pub fn encode(&self, dst: &mut Vec<u8>) -> Result<()> {
        let mut body = Vec::new();
        body.push(self.kind() as u8);
        self.encode_payload(&mut body)?;

        if body.len() > MAX_FRAME_LEN {
            return Err(ProtocolError::FrameTooLarge {
                size: body.len(),
                max: MAX_FRAME_LEN,
            });
        }

        dst.extend_from_slice(&(body.len() as u32).to_be_bytes());
        dst.extend_from_slice(&body);
        Ok(())
    }

    /// Full wire encoding as an owned buffer.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        self.encode(&mut buf)?;
        Ok(buf)
    }

    /// Decode a complete frame from a buffer that starts at the length
    /// prefix and contains exactly one frame.
    ///
    /// The streaming path lives in [`crate::FrameDecoder`]; this entry
    /// point serves tests and in-memory round trips.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let mut cursor = bytes;
        let len = wire::take_u32(&mut cursor)? as usize;
        if len > MAX_FRAME_LEN {
            return Err(ProtocolError::FrameTooLarge {
                size: len,
                max: MAX_FRAME_LEN,
            });
        }
        let body = wire::take_bytes(&mut cursor, len)?;
        wire::expect_empty(cursor, "frame")?;
        Self::decode_body(body)
    }

    /// Decode the post-length portion of a frame: kind tag + payload.
    pub(crate) fn decode_body(body: &[u8]) -> Result<Self> {
        let mut cursor = body;
        let tag = wire::take_u8(&mut cursor)?;
        let kind = FrameKind::from_u8(tag).ok_or(ProtocolError::UnknownKind(tag))?;
        let frame = Self::decode_payload(kind, &mut cursor)?;
        wire::expect_empty(cursor, kind_name(kind))?;
        Ok(frame)
    }

    fn encode_payload(&self, dst: &mut Vec<u8>) -> Result<()> {
        match self {
            Self::Version {
                major,
                minor,
                user,
                device,
                channel,
            } => {
                dst.push(*major);
                dst.push(*minor);
                wire::put_string(dst, user);
                wire::put_string(dst, device);
                dst.extend_from_slice(&channel.to_be_bytes());
            }
            Self::VersionOk { reason } | Self::VersionBad { reason } => {
                if let Some(reason) = reason {
                    wire::put_string(dst, reason);
                }
            }
            Self::Command(text) => wire::put_string(dst, text),
            Self::Object { id, value, confirm } => {
                dst.extend_from_slice(&id.to_be_bytes());
                value.encode(dst);
                dst.push(u8::from(*confirm));
            }
            Self::ObjectList(entries) => encode_object_list(entries, dst)?,
            Self::File { name, data } => {
                wire::put_string(dst, name);
                dst.extend_from_slice(&(data.len() as u32).to_be_bytes());
                dst.extend_from_slice(data);
            }
            Self::DbQuery { id, sql } => {
                dst.extend_from_slice(&id.to_be_bytes());
                wire::put_string(dst, sql);
            }
            Self::DbResult { id, columns, rows } => {
                dst.extend_from_slice(&id.to_be_bytes());
                dst.extend_from_slice(&(columns.len() as u32).to_be_bytes());
                for column in columns {
                    wire::put_string(dst, column);
                }
                dst.extend_from_slice(&(rows.len() as u32).to_be_bytes());
                for row in rows {
                    for cell in row {
                        cell.encode(dst);
                    }
                }
            }
            Self::SockConnect { id, host, port } => {
                dst.extend_from_slice(&id.to_be_bytes());
                wire::put_string(dst, host);
                dst.extend_from_slice(&port.to_be_bytes());
            }
            Self::SockData { id, data } => {
                dst.extend_from_slice(&id.to_be_bytes());
                dst.extend_from_slice(data);
            }
            Self::SockState { id, state } => {
                dst.extend_from_slice(&id.to_be_bytes());
                dst.push(*state as u8);
            }
        }
        Ok(())
    }

    fn decode_payload(kind: FrameKind, cursor: &mut &[u8]) -> Result<Self> {
        match kind {
            FrameKind::Version => Ok(Self::Version {
                major: wire::take_u8(cursor)?,
                minor: wire::take_u8(cursor)?,
                user: wire::take_string(cursor)?,
                device: wire::take_string(cursor)?,
                channel: wire::take_u32(cursor)?,
            }),
            FrameKind::VersionOk => Ok(Self::VersionOk {
                reason: take_optional_string(cursor)?,
            }),
            FrameKind::VersionBad => Ok(Self::VersionBad {
                reason: take_optional_string(cursor)?,
            }),
            FrameKind::Command => Ok(Self::Command(wire::take_string(cursor)?)),
            FrameKind::Object => Ok(Self::Object {
                id: wire::take_u16(cursor)?,
                value: Value::decode(cursor)?,
                confirm: wire::take_u8(cursor)? != 0,
            }),
            FrameKind::ObjectList => decode_object_list(cursor),
            FrameKind::File => {
                let name = wire::take_string(cursor)?;
                let size = wire::take_u32(cursor)? as usize;
                let data = wire::take_bytes(cursor, size)?.to_vec();
                Ok(Self::File { name, data })
            }
            FrameKind::DbQuery => Ok(Self::DbQuery {
                id: wire::take_u32(cursor)?,
                sql: wire::take_string(cursor)?,
            }),
            FrameKind::DbResult => {
                let id = wire::take_u32(cursor)?;
                let column_count = wire::take_u32(cursor)? as usize;
                let mut columns = Vec::with_capacity(column_count.min(1024));
                for _ in 0..column_count {
                    columns.push(wire::take_string(cursor)?);
                }
                let row_count = wire::take_u32(cursor)? as usize;
                let mut rows = Vec::with_capacity(row_count.min(1024));
                for _ in 0..row_count {
                    let mut row = Vec::with_capacity(column_count.min(1024));
                    for _ in 0..column_count {
                        row.push(Value::decode(cursor)?);
                    }
                    rows.push(row);
                }
                Ok(Self::DbResult { id, columns, rows })
            }
            FrameKind::SockConnect => Ok(Self::SockConnect {
                id: wire::take_u16(cursor)?,
                host: wire::take_string(cursor)?,
                port: wire::take_u16(cursor)?,
            }),
            FrameKind::SockData => {
                let id = wire::take_u16(cursor)?;
                let data = cursor.to_vec();
                *cursor = &[];
                Ok(Self::SockData { id, data })
            }
            FrameKind::SockState => Ok(Self::SockState {
                id: wire::take_u16(cursor)?,
                state: SocketState::from_u8(wire::take_u8(cursor)?)?,
            }),
        }
    }
}

/// VERSION_OK / VERSION_BAD carry a reason iff payload bytes remain.
fn take_optional_string(cursor: &mut &[u8]) -> Result<Option<String>> {
    if cursor.is_empty() {
        Ok(None)
    } else {
        Ok(Some(wire::take_string(cursor)?))
    }
}

/// OBJECT_LIST body: `u32` uncompressed length, then a zlib stream
/// inflating to `u32` count + (name, value, unit) triples.
fn encode_object_list(entries: &[ObjectEntry], dst: &mut Vec<u8>) -> Result<()> {
    let mut inner = Vec::new();
    inner.extend_from_slice(&(entries.len() as u32).to_be_bytes());
    for entry in entries {
        wire::put_string(&mut inner, &entry.name);
        entry.value.encode(&mut inner);
        wire::put_string(&mut inner, &entry.unit);
    }

    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(&inner)
        .map_err(|e| ProtocolError::Compression(e.to_string()))?;
    let compressed = encoder
        .finish()
        .map_err(|e| ProtocolError::Compression(e.to_string()))?;

    dst.extend_from_slice(&(inner.len() as u32).to_be_bytes());
    dst.extend_from_slice(&compressed);
    Ok(())
}

fn decode_object_list(cursor: &mut &[u8]) -> Result<Frame> {
    let uncompressed_len = wire::take_u32(cursor)? as usize;
    if uncompressed_len > MAX_FRAME_LEN {
        return Err(ProtocolError::FrameTooLarge {
            size: uncompressed_len,
            max: MAX_FRAME_LEN,
        });
    }

    let mut inner = Vec::with_capacity(uncompressed_len);
    let mut decoder = ZlibDecoder::new(*cursor).take(uncompressed_len as u64 + 1);
    decoder
        .read_to_end(&mut inner)
        .map_err(|e| ProtocolError::Compression(e.to_string()))?;
    *cursor = &[];

    if inner.len() != uncompressed_len {
        return Err(ProtocolError::Compression(format!(
            "declared {uncompressed_len} uncompressed bytes, inflated {}",
            inner.len()
        )));
    }

    let mut inner_cursor = inner.as_slice();
    let count = wire::take_u32(&mut inner_cursor)? as usize;
    let mut entries = Vec::with_capacity(count.min(4096));
    for _ in 0..count {
        entries.push(ObjectEntry {
            name: wire::take_string(&mut inner_cursor)?,
            value: Value::decode(&mut inner_cursor)?,
            unit: wire::take_string(&mut inner_cursor)?,
        });
    }
    wire::expect_empty(inner_cursor, "OBJECT_LIST")?;
    Ok(Frame::ObjectList(entries))
}

fn kind_name(kind: FrameKind) -> &'static str {
    match kind {
        FrameKind::Version => "VERSION",
        FrameKind::VersionOk => "VERSION_OK",
        FrameKind::VersionBad => "VERSION_BAD",
        FrameKind::Command => "COMMAND",
        FrameKind::Object => "OBJECT",
        FrameKind::ObjectList => "OBJECT_LIST",
        FrameKind::File => "FILE",
        FrameKind::DbQuery => "DB_QUERY",
        FrameKind::DbResult => "DB_RESULT",
        FrameKind::SockConnect => "SOCK_CONNECT",
        FrameKind::SockData => "SOCK_DATA",
        FrameKind::SockState => "SOCK_STATE",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(frame: &Frame) -> Frame {
        Frame::decode(&frame.to_bytes().unwrap()).unwrap()
    }

    #[test]
    fn version_round_trip() {
        let frame = Frame::Version {
            major: 1,
            minor: 0,
            user: "alice".to_string(),
            device: "phone".to_string(),
            channel: 7,
        };
        assert_eq!(round_trip(&frame), frame);
    }

    #[test]
    fn version_ok_reason_optional() {
        assert_eq!(
            round_trip(&Frame::VersionOk { reason: None }),
            Frame::VersionOk { reason: None }
        );
        let with_reason = Frame::VersionBad {
            reason: Some("major mismatch".to_string()),
        };
        assert_eq!(round_trip(&with_reason), with_reason);
    }

    #[test]
    fn object_list_survives_compression() {
        let frame = Frame::ObjectList(vec![
            ObjectEntry {
                name: "temp".to_string(),
                value: Value::Double(22.5),
                unit: "°C".to_string(),
            },
            ObjectEntry {
                name: "door".to_string(),
                value: Value::Bool(false),
                unit: String::new(),
            },
            ObjectEntry {
                name: "label".to_string(),
                value: Value::Invalid,
                unit: String::new(),
            },
        ]);
        assert_eq!(round_trip(&frame), frame);
    }

    #[test]
    fn length_prefix_matches_body() {
        let frame = Frame::Command("PING".to_string());
        let bytes = frame.to_bytes().unwrap();
        let declared = u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize;
        assert_eq!(declared, bytes.len() - 4);
    }

    #[test]
    fn unknown_kind_rejected() {
        // length 1, tag 0xEE
        let bytes = [0, 0, 0, 1, 0xEE];
        assert_eq!(Frame::decode(&bytes), Err(ProtocolError::UnknownKind(0xEE)));
    }

    #[test]
    fn oversized_length_rejected() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&((MAX_FRAME_LEN as u32) + 1).to_be_bytes());
        bytes.push(4);
        assert!(matches!(
            Frame::decode(&bytes),
            Err(ProtocolError::FrameTooLarge { .. })
        ));
    }

    #[test]
    fn trailing_bytes_rejected() {
        let mut bytes = Frame::Command("PING".to_string()).to_bytes().unwrap();
        // Grow the declared length and append a stray byte inside the frame.
        let len = u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) + 1;
        bytes[0..4].copy_from_slice(&len.to_be_bytes());
        bytes.push(0xAA);
        assert!(matches!(
            Frame::decode(&bytes),
            Err(ProtocolError::TrailingBytes { .. })
        ));
    }

    #[test]
    fn db_result_round_trip() {
        let frame = Frame::DbResult {
            id: 9,
            columns: vec!["id".to_string(), "name".to_string()],
            rows: vec![
                vec![Value::Int(1), Value::Str("kitchen".to_string())],
                vec![Value::Int(2), Value::Invalid],
            ],
        };
        assert_eq!(round_trip(&frame), frame);
    }

    #[test]
    fn sock_data_consumes_rest_of_payload() {
        let frame = Frame::SockData {
            id: 5,
            data: b"GET / HTTP/1.0\r\n\r\n".to_vec(),
        };
        assert_eq!(round_trip(&frame), frame);
    }

    #[test]
    fn sock_state_unknown_byte_rejected() {
        let frame = Frame::SockState {
            id: 5,
            state: SocketState::Connected,
        };
        let mut bytes = frame.to_bytes().unwrap();
        let last = bytes.len() - 1;
        bytes[last] = 0x09;
        assert_eq!(
            Frame::decode(&bytes),
            Err(ProtocolError::UnknownSocketState(0x09))
        );
    }
}
