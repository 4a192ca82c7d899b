#![no_main]

use bytes::BytesMut;
use libfuzzer_sys::fuzz_target;
use rcon_protocol::RconCodec;
use tokio_util::codec::Decoder;

fuzz_target!(|data: &[u8]| {
    // Stream decoding over arbitrary bytes, fed in two halves
    let mut codec = RconCodec::default();
    let mid = data.len() / 2;
    let mut buf = BytesMut::from(&data[..mid]);

    while let Ok(Some(frame)) = codec.decode(&mut buf) {
        let _ = frame.body();
    }
    buf.extend_from_slice(&data[mid..]);
    while let Ok(Some(frame)) = codec.decode(&mut buf) {
        let _ = frame.body_string();
    }
});
