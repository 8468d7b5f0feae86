//! Property-based tests using proptest
//!
//! These tests check framing and codec invariants over randomly generated
//! input: chunking, garbage, and arbitrary payloads.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use bytes::BytesMut;
use proptest::prelude::*;
use supla_server_core::config::PROTO_VERSION;
use supla_server_core::core::codec::FrameCodec;
use supla_server_core::core::frame::{Frame, HEADER_SIZE};
use supla_server_core::error::ProtocolError;
use supla_server_core::protocol::call_type::CallType;
use supla_server_core::protocol::channel_value::{self, ChannelValue};
use supla_server_core::protocol::device_config::{self, DeviceConfigField};
use supla_server_core::protocol::Dispatcher;
use tokio_util::codec::Decoder;

fn arb_frame() -> impl Strategy<Value = Frame> {
    (
        any::<u8>(),
        any::<u32>(),
        any::<u32>(),
        prop::collection::vec(any::<u8>(), 0..1024),
    )
        .prop_map(|(version, rr_id, call_type, payload)| Frame::new(version, rr_id, call_type, payload))
}

/// Fields with a fixed size and no float members, so equality is exact.
fn arb_config_field() -> impl Strategy<Value = DeviceConfigField> {
    prop_oneof![
        any::<u8>().prop_map(DeviceConfigField::StatusLed),
        any::<u8>().prop_map(DeviceConfigField::ButtonVolume),
        any::<bool>().prop_map(DeviceConfigField::AutomaticTimeSync),
        any::<u16>().prop_map(DeviceConfigField::HomeScreenOffDelay),
        any::<u8>().prop_map(DeviceConfigField::HomeScreenOffDelayType),
        any::<u8>().prop_map(DeviceConfigField::PowerStatusLed),
        any::<u8>().prop_map(DeviceConfigField::FirmwareUpdatePolicy),
    ]
}

fn decode_all(codec: &mut FrameCodec, buf: &mut BytesMut, out: &mut Vec<Frame>) {
    while let Some(frame) = codec.decode(buf).expect("valid stream") {
        out.push(frame);
    }
}

// Property: splitting a frame stream at arbitrary points yields the same frames
proptest! {
    #[test]
    fn prop_chunking_does_not_change_frames(
        frames in prop::collection::vec(arb_frame(), 1..8),
        chunk in 1usize..64,
    ) {
        let stream: Vec<u8> = frames.iter().flat_map(Frame::to_bytes).collect();
        let mut codec = FrameCodec::new(1024);
        let mut buf = BytesMut::new();
        let mut decoded = Vec::new();
        for piece in stream.chunks(chunk) {
            buf.extend_from_slice(piece);
            decode_all(&mut codec, &mut buf, &mut decoded);
        }
        prop_assert_eq!(decoded, frames);
        prop_assert!(buf.is_empty());
    }
}

// Property: the declared size field always matches the payload
proptest! {
    #[test]
    fn prop_size_field_matches_payload(frame in arb_frame()) {
        let bytes = frame.to_bytes();
        let declared = u32::from_le_bytes([bytes[14], bytes[15], bytes[16], bytes[17]]) as usize;
        prop_assert_eq!(declared, frame.payload.len());
        prop_assert_eq!(bytes.len(), frame.encoded_len());
        prop_assert_eq!(&bytes[HEADER_SIZE..HEADER_SIZE + declared], &frame.payload[..]);
    }
}

// Property: the decoder never panics and never buffers past the limit
proptest! {
    #[test]
    fn prop_decoder_survives_garbage(data in prop::collection::vec(any::<u8>(), 0..4096)) {
        let mut codec = FrameCodec::new(256);
        let mut buf = BytesMut::from(&data[..]);
        loop {
            match codec.decode(&mut buf) {
                Ok(Some(frame)) => prop_assert!(frame.payload.len() <= 256),
                Ok(None) => break,
                Err(ProtocolError::FrameTooLarge { limit, .. }) => {
                    prop_assert_eq!(limit, 256);
                    break;
                }
                Err(ProtocolError::MalformedFrame(_)) => break,
                Err(other) => prop_assert!(false, "unexpected error: {other}"),
            }
        }
    }
}

// Property: garbage in front of a valid frame is skipped
proptest! {
    #[test]
    fn prop_leading_noise_is_skipped(
        noise in prop::collection::vec(any::<u8>().prop_filter("no S", |b| *b != b'S'), 0..128),
        frame in arb_frame(),
    ) {
        let mut codec = FrameCodec::new(1024);
        let mut buf = BytesMut::from(&noise[..]);
        buf.extend_from_slice(&frame.to_bytes());
        let decoded = codec.decode(&mut buf).unwrap();
        prop_assert_eq!(decoded, Some(frame));
    }
}

// Property: message decoding never panics, whatever the payload
proptest! {
    #[test]
    fn prop_message_decoding_never_panics(
        index in 0usize..CallType::ALL.len(),
        payload in prop::collection::vec(any::<u8>(), 0..600),
    ) {
        let call_type = CallType::ALL[index];
        let _ = Dispatcher::new().decode(call_type.id(), &payload);
    }
}

// Property: device config fields come back in bit order with every byte consumed
proptest! {
    #[test]
    fn prop_device_config_fields_survive(fields in prop::collection::vec(arb_config_field(), 0..7)) {
        let mut unique: Vec<DeviceConfigField> = Vec::new();
        for field in fields {
            if !unique.iter().any(|f| f.bit() == field.bit()) {
                unique.push(field);
            }
        }
        let (mask, blob) = device_config::encode(&unique).unwrap();
        prop_assert_eq!(mask.count_ones() as usize, unique.len());

        let decoded = device_config::decode(mask, &blob).unwrap();
        unique.sort_by_key(DeviceConfigField::bit);
        prop_assert_eq!(decoded.fields, unique);
        prop_assert_eq!(decoded.consumed, blob.len());
    }
}

// Property: an unknown mask bit keeps everything decoded before it
proptest! {
    #[test]
    fn prop_unknown_config_bit_keeps_partial(led in any::<u8>(), bit in 11u8..64) {
        let (mask, blob) = device_config::encode(&[DeviceConfigField::StatusLed(led)]).unwrap();
        match device_config::decode(mask | (1u64 << bit), &blob) {
            Err(ProtocolError::UnsupportedConfigField { bit: reported, partial }) => {
                prop_assert_eq!(reported, bit);
                prop_assert_eq!(partial.fields.clone(), vec![DeviceConfigField::StatusLed(led)]);
            }
            other => prop_assert!(false, "unexpected: {other:?}"),
        }
    }
}

// Property: dimmer brightness is clamped to 0..=100 on the wire
proptest! {
    #[test]
    fn prop_percent_is_clamped(p in any::<u8>()) {
        let raw = channel_value::encode(4000, None, &ChannelValue::Percent(p)).unwrap();
        prop_assert_eq!(raw[0], p.min(100));
        prop_assert_eq!(
            channel_value::decode(4000, None, &raw).unwrap(),
            ChannelValue::Percent(p.min(100))
        );
    }
}

// Property: relay values decode from the first byte only
proptest! {
    #[test]
    fn prop_relay_reads_first_byte(raw in any::<[u8; 8]>()) {
        let value = channel_value::decode(2900, None, &raw).unwrap();
        prop_assert_eq!(value, ChannelValue::OnOff(raw[0] != 0));
    }
}

#[test]
fn test_frame_version_is_preserved() {
    let frame = Frame::new(PROTO_VERSION, 1, 10, vec![]);
    assert_eq!(Frame::from_bytes(&frame.to_bytes()).unwrap().version, PROTO_VERSION);
}
