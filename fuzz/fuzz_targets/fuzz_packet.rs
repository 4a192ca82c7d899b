#![no_main]

use libfuzzer_sys::fuzz_target;
use rcon_protocol::Packet;

fuzz_target!(|data: &[u8]| {
    // Whole-packet parsing must reject, never panic
    if let Ok(packet) = Packet::from_bytes(data) {
        let wire = packet.to_bytes().expect("parsed packets re-encode");
        assert_eq!(wire.len(), data.len());
        assert_eq!(&wire[..wire.len() - 2], &data[..data.len() - 2]);
    }
});
