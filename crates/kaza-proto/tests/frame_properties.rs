//! Property tests for the wire codec.
//!
//! Two invariants carried by every frame: `decode(encode(f))` yields the
//! same frame (bit-for-bit for tagged values, verified by re-encoding),
//! and the 32-bit length prefix always equals the byte count of everything
//! that follows it.

use kaza_proto::{Frame, FrameDecoder, ObjectEntry, SocketState, Value};
use proptest::prelude::*;

fn arb_value() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Invalid),
        any::<i64>().prop_map(Value::Int),
        any::<u64>().prop_map(|bits| Value::Double(f64::from_bits(bits))),
        any::<bool>().prop_map(Value::Bool),
        ".{0,64}".prop_map(Value::Str),
        any::<i64>().prop_map(Value::Timestamp),
    ]
}

fn arb_entry() -> impl Strategy<Value = ObjectEntry> {
    ("[a-z]{1,16}", arb_value(), ".{0,8}").prop_map(|(name, value, unit)| ObjectEntry {
        name,
        value,
        unit,
    })
}

fn arb_frame() -> impl Strategy<Value = Frame> {
    prop_oneof![
        (any::<u8>(), any::<u8>(), ".{0,16}", ".{0,16}", any::<u32>()).prop_map(
            |(major, minor, user, device, channel)| Frame::Version {
                major,
                minor,
                user,
                device,
                channel,
            }
        ),
        proptest::option::of(".{1,32}").prop_map(|reason| Frame::VersionOk { reason }),
        proptest::option::of(".{1,32}").prop_map(|reason| Frame::VersionBad { reason }),
        ".{0,64}".prop_map(Frame::Command),
        (any::<u16>(), arb_value(), any::<bool>()).prop_map(|(id, value, confirm)| {
            Frame::Object { id, value, confirm }
        }),
        proptest::collection::vec(arb_entry(), 0..16).prop_map(Frame::ObjectList),
        (".{0,16}", proptest::collection::vec(any::<u8>(), 0..256))
            .prop_map(|(name, data)| Frame::File { name, data }),
        (any::<u32>(), ".{0,64}").prop_map(|(id, sql)| Frame::DbQuery { id, sql }),
        arb_db_result(),
        (any::<u16>(), "[a-z.]{1,24}", any::<u16>())
            .prop_map(|(id, host, port)| Frame::SockConnect { id, host, port }),
        (any::<u16>(), proptest::collection::vec(any::<u8>(), 0..256))
            .prop_map(|(id, data)| Frame::SockData { id, data }),
        (
            any::<u16>(),
            prop_oneof![
                Just(SocketState::Connected),
                Just(SocketState::Disconnected),
                Just(SocketState::Error)
            ]
        )
            .prop_map(|(id, state)| Frame::SockState { id, state }),
    ]
}

fn arb_db_result() -> impl Strategy<Value = Frame> {
    (any::<u32>(), 0usize..4, 0usize..4).prop_flat_map(|(id, cols, row_count)| {
        (
            proptest::collection::vec("[a-z_]{1,12}", cols..=cols),
            proptest::collection::vec(
                proptest::collection::vec(arb_value(), cols..=cols),
                row_count..=row_count,
            ),
        )
            .prop_map(move |(columns, rows)| Frame::DbResult { id, columns, rows })
    })
}

proptest! {
    /// decode(encode(f)) == f, bit-for-bit over the re-encoding.
    #[test]
    fn frame_round_trip(frame in arb_frame()) {
        let wire = frame.to_bytes().unwrap();
        let parsed = Frame::decode(&wire).unwrap();
        prop_assert_eq!(&parsed, &frame);

        // Tagged values must survive bit-for-bit (NaN payloads included),
        // which PartialEq on f64 cannot witness. Compare encodings too.
        let rewire = parsed.to_bytes().unwrap();
        // OBJECT_LIST compression is not required to be byte-stable, but
        // its decoded form is; skip the byte comparison for that kind.
        if !matches!(frame, Frame::ObjectList(_)) {
            prop_assert_eq!(rewire, wire);
        }
    }

    /// The length prefix equals the byte count of everything after it.
    #[test]
    fn length_prefix_self_consistent(frame in arb_frame()) {
        let wire = frame.to_bytes().unwrap();
        let declared = u32::from_be_bytes([wire[0], wire[1], wire[2], wire[3]]) as usize;
        prop_assert_eq!(declared, wire.len() - 4);
    }

    /// The streaming decoder agrees with whole-buffer decoding no matter
    /// how the bytes are chunked.
    #[test]
    fn decoder_chunking_irrelevant(frame in arb_frame(), chunk in 1usize..16) {
        let wire = frame.to_bytes().unwrap();
        let mut decoder = FrameDecoder::new();
        let mut produced = None;
        for piece in wire.chunks(chunk) {
            decoder.extend(piece);
            if let Some(f) = decoder.next_frame().unwrap() {
                produced = Some(f);
            }
        }
        prop_assert_eq!(produced, Some(frame));
    }

    /// Garbage after a valid length prefix never panics; it either decodes
    /// or reports a protocol error.
    #[test]
    fn arbitrary_body_never_panics(body in proptest::collection::vec(any::<u8>(), 0..512)) {
        let mut wire = (body.len() as u32).to_be_bytes().to_vec();
        wire.extend_from_slice(&body);
        let _ = Frame::decode(&wire);
    }
}
