use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use rdt::codec::{self, Kind, Packet};

fn encode_decode_round_trip(c: &mut Criterion) {
    let mut group = c.benchmark_group("codec round trip");
    for payload_len in [0usize, 64, 512, 1400] {
        let packet = Packet::new(Kind::Data, 12345, 0, 0, vec![0xAB; payload_len]);
        group.bench_with_input(
            BenchmarkId::from_parameter(payload_len),
            &packet,
            |b, packet| {
                b.iter(|| {
                    let frame = codec::encode(packet);
                    codec::decode(&frame).unwrap()
                });
            },
        );
    }
    group.finish();
}

criterion_group!(benches, encode_decode_round_trip);
criterion_main!(benches);
