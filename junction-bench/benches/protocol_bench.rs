//! Wire protocol encoding/decoding benchmarks.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use junction_protocol::{Decoder, Encoder, Message};

fn test_request(payload_size: usize) -> Message {
    Message::rpc_request(
        "bench-3e4f6c1a-9f1e-4b56-90d4-6a1c2b3d4e5f",
        "Process",
        serde_json::json!({
            "data": "x".repeat(payload_size),
            "flags": {"trace": false},
        }),
    )
}

fn bench_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("message_encode");

    for size in [100, 1000, 10000] {
        let msg = test_request(size);
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &msg, |b, msg| {
            b.iter(|| black_box(Encoder::encode(msg).unwrap()));
        });
    }

    group.finish();
}

fn bench_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("message_decode");

    for size in [100, 1000, 10000] {
        let encoded = Encoder::encode(&test_request(size)).unwrap();
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &encoded, |b, encoded| {
            b.iter(|| {
                let mut decoder = Decoder::new();
                decoder.extend(encoded);
                black_box(decoder.decode_message().unwrap())
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_encode, bench_decode);
criterion_main!(benches);
