//! Benchmarks for the wire codec, log reconstruction, and fan-out.

use std::hint::black_box;
use std::sync::Arc;

use criterion::{criterion_group, criterion_main, Criterion};
use tokio::runtime::Runtime;
use uuid::Uuid;

use scrawl_collab::{
    active_operations, ActiveSet, BroadcastGroup, OpKind, Operation, OperationLog, Point,
    StrokePayload, ToolKind, WireMessage,
};

fn stroke(points: usize) -> StrokePayload {
    StrokePayload::new(
        (0..points)
            .map(|i| Point::new(i as f32, (i * 2) as f32))
            .collect(),
        [0.2, 0.4, 0.6, 1.0],
        2.5,
        ToolKind::Pen,
    )
}

/// A log with the shape of a real session: mostly strokes, with periodic
/// undo and redo from two authors.
fn build_log(strokes: usize) -> Vec<Operation> {
    let mut log = OperationLog::new("bench".to_string());
    let alice = Uuid::new_v4();
    let bob = Uuid::new_v4();

    let mut undoable: Vec<(Uuid, Uuid)> = Vec::new();
    for i in 0..strokes {
        let author = if i % 2 == 0 { alice } else { bob };
        let op = log.append(author, OpKind::Stroke(stroke(16)));
        undoable.push((author, op.id));

        if i % 5 == 4 {
            let (author, target) = undoable[i / 2];
            log.append(author, OpKind::Undo { target });
        }
        if i % 10 == 9 {
            let (author, target) = undoable[i / 3];
            log.append(author, OpKind::Redo { target });
        }
    }
    log.operations().to_vec()
}

fn bench_wire_codec(c: &mut Criterion) {
    let payload = stroke(64);
    let author = Uuid::new_v4();

    c.bench_function("wire_encode_stroke_64pt", |b| {
        b.iter(|| {
            let msg = WireMessage::commit_stroke("lobby", author, black_box(&payload)).unwrap();
            black_box(msg.encode().unwrap())
        })
    });

    let encoded = WireMessage::commit_stroke("lobby", author, &payload)
        .unwrap()
        .encode()
        .unwrap();
    c.bench_function("wire_decode_stroke_64pt", |b| {
        b.iter(|| {
            let msg = WireMessage::decode(black_box(&encoded)).unwrap();
            black_box(msg.stroke_payload().unwrap())
        })
    });
}

fn bench_reconstruction(c: &mut Criterion) {
    let log = build_log(1000);

    c.bench_function("full_recompute_1k_ops", |b| {
        b.iter(|| black_box(active_operations(black_box(&log))))
    });

    // The hot-path read: the set is already maintained, only collect runs
    let mut set = ActiveSet::new();
    for op in &log {
        set.apply(op);
    }
    c.bench_function("incremental_collect_1k_ops", |b| {
        b.iter(|| black_box(set.collect()))
    });
}

fn bench_fanout(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let frame = Arc::new(
        WireMessage::commit_stroke("lobby", Uuid::new_v4(), &stroke(64))
            .unwrap()
            .encode()
            .unwrap(),
    );

    c.bench_function("fanout_100_receivers", |b| {
        b.iter(|| {
            rt.block_on(async {
                let group = BroadcastGroup::new(256);
                let mut receivers: Vec<_> = (0..100).map(|_| group.subscribe()).collect();
                group.send(frame.clone());
                for rx in &mut receivers {
                    black_box(rx.recv().await.unwrap());
                }
            })
        })
    });
}

criterion_group!(
    benches,
    bench_wire_codec,
    bench_reconstruction,
    bench_fanout
);
criterion_main!(benches);
