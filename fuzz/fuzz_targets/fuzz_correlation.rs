#![no_main]

use bytes::Bytes;
use libfuzzer_sys::fuzz_target;
use rcon_protocol::protocol::handshake::{auth_outcome, command_outcome};
use rcon_protocol::ReceivedPacket;

fuzz_target!(|data: &[u8]| {
    if data.len() < 8 {
        return;
    }
    let size = i32::from_le_bytes([data[0], data[1], data[2], data[3]]);
    let sent = i32::from_le_bytes([data[4], data[5], data[6], data[7]]);
    let frame = ReceivedPacket::new(size, Bytes::copy_from_slice(&data[8..]));

    let _ = auth_outcome(&frame, sent);
    let _ = command_outcome(&frame, sent);
});
