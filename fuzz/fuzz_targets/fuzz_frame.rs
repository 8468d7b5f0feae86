#![no_main]

use bytes::BytesMut;
use libfuzzer_sys::fuzz_target;
use supla_server_core::core::codec::FrameCodec;
use supla_server_core::core::frame::Frame;
use tokio_util::codec::Decoder;

fuzz_target!(|data: &[u8]| {
    let _ = Frame::from_bytes(data);

    // Streaming decode must terminate and never panic on arbitrary input
    let mut codec = FrameCodec::default();
    let mut buf = BytesMut::from(data);
    while let Ok(Some(_)) = codec.decode(&mut buf) {}
});
