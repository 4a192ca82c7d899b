use bytes::BytesMut;
use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion, Throughput};
use rcon_protocol::core::codec::RconCodec;
use rcon_protocol::core::packet::{self, Packet, MAX_BODY_SIZE, SERVERDATA_RESPONSE_VALUE};
use rcon_protocol::protocol::handshake::command_outcome;
use tokio_util::codec::{Decoder, Encoder};

#[allow(clippy::unwrap_used)]
fn bench_packet_encode_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("packet_encode_decode");
    let body_sizes = [0usize, 16, 256, 1024, MAX_BODY_SIZE];

    for &size in &body_sizes {
        let body = vec![b'a'; size];
        group.throughput(Throughput::Bytes(size as u64 + 14));

        group.bench_function(format!("encode_{size}b"), |b| {
            b.iter_batched(
                || Packet::new(7, SERVERDATA_RESPONSE_VALUE, body.clone()),
                |p| {
                    let mut buf = BytesMut::with_capacity(size + 14);
                    let mut codec = RconCodec::default();
                    codec.encode(p, &mut buf).unwrap();
                    buf
                },
                BatchSize::SmallInput,
            )
        });

        let wire = packet::encode(&body, 7, SERVERDATA_RESPONSE_VALUE).unwrap();
        group.bench_function(format!("decode_{size}b"), |b| {
            b.iter_batched(
                || BytesMut::from(&wire[..]),
                |mut buf| {
                    let mut codec = RconCodec::default();
                    let frame = codec.decode(&mut buf).unwrap().unwrap();
                    black_box(command_outcome(&frame, 7))
                },
                BatchSize::SmallInput,
            )
        });
    }

    group.finish();
}

#[allow(clippy::unwrap_used)]
fn bench_interleaved_stream(c: &mut Criterion) {
    // A response buried behind keep-alives and stale replies
    let mut stream = BytesMut::new();
    let mut codec = RconCodec::default();
    for id in 0..32 {
        codec
            .encode(Packet::new(id, SERVERDATA_RESPONSE_VALUE, Vec::new()), &mut stream)
            .unwrap();
    }
    codec
        .encode(Packet::new(99, SERVERDATA_RESPONSE_VALUE, "status"), &mut stream)
        .unwrap();

    c.bench_function("find_response_in_33_frames", |b| {
        b.iter_batched(
            || stream.clone(),
            |mut buf| {
                let mut codec = RconCodec::default();
                while let Some(frame) = codec.decode(&mut buf).unwrap() {
                    if frame.id() == Some(99) {
                        return black_box(frame);
                    }
                }
                unreachable!()
            },
            BatchSize::SmallInput,
        )
    });
}

criterion_group!(benches, bench_packet_encode_decode, bench_interleaved_stream);
criterion_main!(benches);
