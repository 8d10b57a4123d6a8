//! Sync engine and frame codec benchmarks.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use treesync_bench::{deep_path, key, nested_node};
use treesync_core::{Event, ListenMode, Node, Path, QueryFilter, SinkError};
use treesync_engine::{EngineConfig, MockTransport, SyncEngine};
use treesync_protocol::{FrameDecode, FrameEncode, InboundMessage};

/// Benchmark issuing writes under an active listener, then acking them.
fn bench_write_ack(c: &mut Criterion) {
    let mut group = c.benchmark_group("write_ack");

    for count in [10u64, 100] {
        group.throughput(Throughput::Elements(count));
        group.bench_with_input(BenchmarkId::from_parameter(count), &count, |b, &count| {
            b.iter(|| {
                let engine = SyncEngine::new(EngineConfig::default(), MockTransport::new());
                engine.on_connected().unwrap();
                let root = deep_path(1);
                engine
                    .subscribe(
                        root.clone(),
                        QueryFilter::default(),
                        ListenMode::All,
                        |_: &Event| -> Result<(), SinkError> { Ok(()) },
                    )
                    .unwrap();
                engine
                    .on_listen_complete(root.clone(), QueryFilter::default())
                    .unwrap();
                for i in 0..count {
                    let path = root.child(&key(i as usize));
                    engine.set(path, Node::from(i as f64)).unwrap();
                }
                for id in 1..=count {
                    engine.on_ack(id).unwrap();
                }
                black_box(engine.current_value(&root));
            });
        });
    }

    group.finish();
}

/// Benchmark frame encoding and decoding of a server push.
fn bench_frames(c: &mut Criterion) {
    let mut group = c.benchmark_group("frames");
    let message = InboundMessage::ServerUpdate {
        path: Path::parse("/rooms/lobby").unwrap(),
        node: nested_node(3, 6),
    };
    let frame = message.encode_frame().unwrap();
    group.throughput(Throughput::Bytes(frame.len() as u64));

    group.bench_function("encode", |b| {
        b.iter(|| black_box(black_box(&message).encode_frame().unwrap()));
    });
    group.bench_function("decode", |b| {
        b.iter(|| black_box(InboundMessage::decode_frame(black_box(&frame)).unwrap()));
    });

    group.finish();
}

criterion_group!(benches, bench_write_ack, bench_frames);
criterion_main!(benches);
