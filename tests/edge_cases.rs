#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
//! Edge-case tests: frame boundaries, malformed input, and session behaviour
//! when the wire misbehaves.

mod common;

use std::sync::Arc;

use bytes::BytesMut;
use common::*;
use futures::SinkExt;
use supla_server_core::config::{FRAME_TAG, PROTO_VERSION};
use supla_server_core::core::codec::FrameCodec;
use supla_server_core::core::frame::{Frame, HEADER_SIZE, TRAILER_SIZE};
use supla_server_core::error::ProtocolError;
use supla_server_core::host::{DeviceStatus, OfflineReason};
use supla_server_core::protocol::call_type::CallType;
use supla_server_core::protocol::channel_value::ChannelValue;
use supla_server_core::protocol::message::*;
use supla_server_core::protocol::{Dispatcher, Message};
use supla_server_core::session::{EngineContext, SessionState};
use tokio::io::AsyncWriteExt;
use tokio_util::codec::{Decoder, Encoder};

// ============================================================================
// FRAME CODEC EDGE CASES
// ============================================================================

#[test]
fn test_frame_empty_payload() {
    let frame = Frame::new(PROTO_VERSION, 0, CallType::DcsGetVersion.id(), vec![]);
    let bytes = frame.to_bytes();
    assert_eq!(bytes.len(), HEADER_SIZE + TRAILER_SIZE);
    let decoded = Frame::from_bytes(&bytes).expect("Should decode empty payload");
    assert_eq!(decoded, frame);
}

#[test]
fn test_frame_payload_at_limit() {
    let mut codec = FrameCodec::new(1024);
    let mut buf = BytesMut::new();
    let frame = Frame::new(PROTO_VERSION, 9, 40, vec![0xAB; 1024]);
    codec.encode(frame.clone(), &mut buf).unwrap();
    let decoded = codec.decode(&mut buf).unwrap().expect("complete frame");
    assert_eq!(decoded, frame);
    assert!(buf.is_empty());
}

#[test]
fn test_frame_payload_over_limit_rejected_on_encode() {
    let mut codec = FrameCodec::new(1024);
    let mut buf = BytesMut::new();
    let result = codec.encode(Frame::new(PROTO_VERSION, 9, 40, vec![0; 1025]), &mut buf);
    assert!(matches!(
        result,
        Err(ProtocolError::FrameTooLarge {
            declared: 1025,
            limit: 1024
        })
    ));
}

#[test]
fn test_truncated_header_is_malformed() {
    let bytes = Frame::new(PROTO_VERSION, 1, 40, vec![1, 2]).to_bytes();
    assert!(matches!(
        Frame::from_bytes(&bytes[..HEADER_SIZE - 1]),
        Err(ProtocolError::MalformedFrame("truncated header"))
    ));
}

#[test]
fn test_missing_start_sentinel() {
    let mut bytes = Frame::new(PROTO_VERSION, 1, 40, vec![1, 2]).to_bytes();
    bytes[0] = b'X';
    assert!(matches!(
        Frame::from_bytes(&bytes),
        Err(ProtocolError::MalformedFrame("missing start sentinel"))
    ));
}

#[test]
fn test_corrupt_trailer_is_malformed() {
    let mut bytes = Frame::new(PROTO_VERSION, 1, 40, vec![1, 2, 3]).to_bytes();
    let last = bytes.len() - 1;
    bytes[last] = b'B';
    assert!(matches!(
        Frame::from_bytes(&bytes),
        Err(ProtocolError::MalformedFrame(_))
    ));

    let mut codec = FrameCodec::default();
    let mut buf = BytesMut::from(&bytes[..]);
    assert!(codec.decode(&mut buf).is_err());
}

#[test]
fn test_declared_length_longer_than_buffer() {
    let mut bytes = Frame::new(PROTO_VERSION, 1, 40, vec![1, 2, 3]).to_bytes();
    bytes[14..18].copy_from_slice(&10u32.to_le_bytes());
    assert!(matches!(
        Frame::from_bytes(&bytes),
        Err(ProtocolError::MalformedFrame(_))
    ));

    // the streaming decoder just waits for more input
    let mut codec = FrameCodec::default();
    let mut buf = BytesMut::from(&bytes[..]);
    assert!(codec.decode(&mut buf).unwrap().is_none());
}

#[test]
fn test_two_frames_in_one_read() {
    let mut codec = FrameCodec::default();
    let mut buf = BytesMut::new();
    buf.extend_from_slice(&Frame::new(PROTO_VERSION, 1, 40, vec![1]).to_bytes());
    buf.extend_from_slice(&Frame::new(PROTO_VERSION, 2, 50, vec![2, 2]).to_bytes());

    let first = codec.decode(&mut buf).unwrap().unwrap();
    let second = codec.decode(&mut buf).unwrap().unwrap();
    assert_eq!((first.rr_id, first.call_type), (1, 40));
    assert_eq!((second.rr_id, second.payload.len()), (2, 2));
    assert!(codec.decode(&mut buf).unwrap().is_none());
}

#[test]
fn test_sentinel_split_across_reads() {
    let mut codec = FrameCodec::default();
    let bytes = Frame::new(PROTO_VERSION, 3, 40, vec![7; 4]).to_bytes();
    let mut buf = BytesMut::new();
    buf.extend_from_slice(b"noise-noise");
    buf.extend_from_slice(&FRAME_TAG[..3]);
    assert!(codec.decode(&mut buf).unwrap().is_none());
    buf.extend_from_slice(&bytes[3..]);
    let frame = codec.decode(&mut buf).unwrap().expect("frame after split sentinel");
    assert_eq!(frame.rr_id, 3);
}

#[test]
fn test_sentinel_inside_payload() {
    let mut payload = FRAME_TAG.to_vec();
    payload.extend_from_slice(&FRAME_TAG);
    let frame = Frame::new(PROTO_VERSION, 4, 40, payload.clone());
    let mut codec = FrameCodec::default();
    let mut buf = BytesMut::from(&frame.to_bytes()[..]);
    assert_eq!(codec.decode(&mut buf).unwrap().unwrap().payload, payload);
}

#[test]
fn test_old_version_still_frames() {
    let bytes = Frame::new(1, 1, 40, vec![]).to_bytes();
    assert_eq!(Frame::from_bytes(&bytes).unwrap().version, 1);
}

// ============================================================================
// MESSAGE CODEC EDGE CASES
// ============================================================================

#[test]
fn test_unknown_call_type() {
    let d = Dispatcher::new();
    assert!(d.lookup(9999).is_none());
    assert!(matches!(
        d.decode(9999, &[]),
        Err(ProtocolError::UnknownCallType(9999))
    ));
}

#[test]
fn test_short_payload_names_the_structure() {
    let err = Dispatcher::new()
        .decode(CallType::DsDeviceChannelValueChanged.id(), &[0, 1, 2])
        .unwrap_err();
    assert!(err.to_string().contains("ChannelValueChanged"), "{err}");
}

#[test]
fn test_caption_at_field_width_fails() {
    let msg = Message::SetChannelCaption(ChannelCaption {
        channel_number: 0,
        caption: "c".repeat(CAPTION_MAXSIZE),
    });
    assert!(Dispatcher::new().encode_frame(&msg, 1).is_err());

    let fits = Message::SetChannelCaption(ChannelCaption {
        channel_number: 0,
        caption: "c".repeat(CAPTION_MAXSIZE - 1),
    });
    let frame = Dispatcher::new().encode_frame(&fits, 1).unwrap();
    assert_eq!(Dispatcher::new().decode_frame(&frame).unwrap(), fits);
}

#[test]
fn test_result_code_preserves_unknown_values() {
    assert_eq!(ResultCode::from_i32(3), ResultCode::True);
    assert_eq!(ResultCode::from_i32(777), ResultCode::Other(777));
    assert_eq!(ResultCode::Other(777).to_i32(), 777);
}

#[test]
fn test_unknown_channel_type_is_reported() {
    use supla_server_core::protocol::channel_value;
    assert!(matches!(
        channel_value::decode(123_456, None, &[0; CHANNEL_VALUE_SIZE]),
        Err(ProtocolError::UnknownChannelType(123_456))
    ));
}

// ============================================================================
// SESSION EDGE CASES
// ============================================================================

#[tokio::test]
async fn test_corrupt_trailer_closes_session() {
    let ctx = Arc::new(EngineContext::new(location_config()));
    let mut h = connect(ctx.clone());
    register(&mut h).await;

    let mut bytes = frame(&Message::GetVersion, 5).to_bytes();
    let last = bytes.len() - 1;
    bytes[last] = 0;
    h.device.get_mut().write_all(&bytes).await.unwrap();

    h.listener
        .wait_for("offline", |e| {
            e.iter().any(|e| matches!(e, Event::Status(s) if !s.is_online()))
        })
        .await;
    assert!(matches!(
        h.listener.statuses().last(),
        Some(DeviceStatus::Offline { reason: OfflineReason::CommunicationError, .. })
    ));
    assert!(h.task.await.unwrap().is_err());
    assert!(ctx.metrics.snapshot().protocol_errors >= 1);
}

#[tokio::test]
async fn test_oversized_declared_payload_closes_session() {
    let ctx = Arc::new(EngineContext::new(location_config()));
    let mut h = connect(ctx);

    let mut header = FRAME_TAG.to_vec();
    header.push(PROTO_VERSION);
    header.extend_from_slice(&1u32.to_le_bytes());
    header.extend_from_slice(&CallType::DcsGetVersion.id().to_le_bytes());
    header.extend_from_slice(&1_000_000u32.to_le_bytes());
    h.device.get_mut().write_all(&header).await.unwrap();

    let result = h.task.await.unwrap();
    assert!(matches!(result, Err(ProtocolError::FrameTooLarge { .. })));
    assert!(h.session.is_disposed());
}

#[tokio::test]
async fn test_garbage_before_frame_is_skipped() {
    let ctx = Arc::new(EngineContext::new(location_config()));
    let mut h = connect(ctx);

    let mut bytes = b"\x00\xffjunk".to_vec();
    bytes.extend_from_slice(&frame(&Message::GetVersion, 12).to_bytes());
    h.device.get_mut().write_all(&bytes).await.unwrap();

    let (rr_id, reply) = next_message(&mut h.device).await;
    assert_eq!(rr_id, 12);
    assert!(matches!(reply, Message::GetVersionResult(_)));
}

#[tokio::test]
async fn test_reply_uses_device_version() {
    let ctx = Arc::new(EngineContext::new(location_config()));
    let mut h = connect(ctx);

    let mut request = frame(&Message::GetVersion, 2);
    request.version = 12;
    h.device.send(request).await.unwrap();
    let reply = next_frame(&mut h.device).await.unwrap();
    assert_eq!(reply.version, 12);
}

#[tokio::test]
async fn test_malformed_message_after_registration_is_dropped() {
    let ctx = Arc::new(EngineContext::new(location_config()));
    let mut h = connect(ctx);
    register(&mut h).await;

    h.device
        .send(Frame::new(PROTO_VERSION, 3, CallType::DsDeviceChannelValueChanged.id(), vec![0]))
        .await
        .unwrap();
    send(&mut h.device, &Message::GetVersion, 4).await;
    let (rr_id, _) = next_message(&mut h.device).await;
    assert_eq!(rr_id, 4);
    assert_eq!(h.session.state(), SessionState::Registered);
}

fn raw_caption_frame(rr_id: u32, text: &[u8]) -> Frame {
    let mut payload = 0i32.to_le_bytes().to_vec();
    payload.extend_from_slice(&(text.len() as u32).to_le_bytes());
    payload.extend_from_slice(text);
    Frame::new(PROTO_VERSION, rr_id, CallType::DcsSetChannelCaption.id(), payload)
}

#[tokio::test]
async fn test_caption_that_grows_when_decoded_is_acknowledged() {
    let ctx = Arc::new(EngineContext::new(location_config()));
    let mut h = connect(ctx);
    register(&mut h).await;

    // Latin-1 bytes are invalid UTF-8; each one decodes to a 3-byte char
    let mut latin1 = vec![0xE9u8; 200];
    latin1.push(0);
    h.device.send(raw_caption_frame(6, &latin1)).await.unwrap();
    let (rr_id, ack) = next_message(&mut h.device).await;
    assert_eq!(rr_id, 6);
    match ack {
        Message::SetChannelCaptionResult(r) => {
            assert_eq!(r.channel_number, 0);
            assert!(r.caption.len() < CAPTION_MAXSIZE);
            assert!(r.caption.chars().all(|c| c == '\u{FFFD}'));
        }
        other => panic!("unexpected reply: {other:?}"),
    }

    // Full field width with no terminator
    h.device
        .send(raw_caption_frame(7, &[b'c'; CAPTION_MAXSIZE]))
        .await
        .unwrap();
    let (rr_id, ack) = next_message(&mut h.device).await;
    assert_eq!(rr_id, 7);
    assert!(matches!(ack, Message::SetChannelCaptionResult(r) if r.caption == "c".repeat(CAPTION_MAXSIZE - 1)));

    assert_eq!(h.session.state(), SessionState::Registered);
    assert!(h.listener.statuses().iter().all(DeviceStatus::is_online));
    assert!(h
        .listener
        .events()
        .contains(&Event::Caption(0, "c".repeat(CAPTION_MAXSIZE))));
}

#[tokio::test]
async fn test_duplicate_registration_is_ignored() {
    let ctx = Arc::new(EngineContext::new(location_config()));
    let mut h = connect(ctx);
    register(&mut h).await;

    send(&mut h.device, &Message::RegisterDevice(relay_device(1, "none")), 2).await;
    send(&mut h.device, &Message::GetVersion, 3).await;
    let (rr_id, reply) = next_message(&mut h.device).await;
    assert_eq!(rr_id, 3, "no second registration result expected");
    assert!(matches!(reply, Message::GetVersionResult(_)));
    let registrations = h
        .listener
        .events()
        .iter()
        .filter(|e| matches!(e, Event::Registered(_)))
        .count();
    assert_eq!(registrations, 1);
}

#[tokio::test]
async fn test_group_command_marks_last_frame() {
    let ctx = Arc::new(EngineContext::new(location_config()));
    let mut h = connect(ctx);
    register(&mut h).await;

    h.session
        .set_group_value(
            77,
            &[(0, ChannelValue::OnOff(true)), (0, ChannelValue::OnOff(false))],
        )
        .await
        .unwrap();
    let (first_rr, first) = next_message(&mut h.device).await;
    let (second_rr, second) = next_message(&mut h.device).await;
    assert_ne!(first_rr, second_rr);
    match (first, second) {
        (Message::ChannelGroupNewValue(a), Message::ChannelGroupNewValue(b)) => {
            assert_eq!((a.group_id, a.eol, a.value[0]), (77, false, 1));
            assert_eq!((b.group_id, b.eol, b.value[0]), (77, true, 0));
        }
        other => panic!("unexpected: {other:?}"),
    }

    let unknown_channel = h.session.set_value(9, &ChannelValue::OnOff(true)).await;
    assert!(matches!(unknown_channel, Err(ProtocolError::EncodeError(_))));
}

#[tokio::test]
async fn test_channel_config_write_ends_with_finished_marker() {
    let ctx = Arc::new(EngineContext::new(location_config()));
    let mut h = connect(ctx);
    register(&mut h).await;

    h.session
        .write_channel_config(ChannelConfig {
            channel_number: 0,
            func: 0,
            config_type: 0,
            config: vec![1, 2, 3],
        })
        .await
        .unwrap();
    let (_, request) = next_message(&mut h.device).await;
    let (_, finished) = next_message(&mut h.device).await;
    assert!(matches!(request, Message::SetChannelConfigRequest(c) if c.config == vec![1, 2, 3]));
    assert_eq!(
        finished,
        Message::ChannelConfigFinished(ChannelConfigFinished { channel_number: 0 })
    );
}
