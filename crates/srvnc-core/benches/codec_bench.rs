//! Criterion benchmarks for the control and chunk codecs.
//!
//! Input events sit on the latency-critical path from the viewer's keyboard
//! to the host, and every chunk of every frame goes through the chunk codec.
//!
//! Run with:
//! ```bash
//! cargo bench --package srvnc-core --bench codec_bench
//! ```

use bytes::Bytes;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use srvnc_core::protocol::codec::{decode_message, encode_message};
use srvnc_core::protocol::datagram::{decode_chunk, encode_chunk};
use srvnc_core::protocol::messages::{ControlMessage, LossReportMessage};
use srvnc_core::{Chunk, ControlEvent, EventKind, ModifierFlags, MouseButton};

// ── Message fixtures ──────────────────────────────────────────────────────────

fn event(kind: EventKind) -> ControlMessage {
    ControlMessage::Event(ControlEvent {
        event_id: 1_000,
        timestamp_us: 1_700_000_000_000_000,
        kind,
    })
}

fn control_fixtures() -> Vec<(&'static str, ControlMessage)> {
    vec![
        ("Ping", ControlMessage::Ping(42)),
        (
            "KeyDown",
            event(EventKind::KeyDown {
                key_code: 0x04,
                modifiers: ModifierFlags(ModifierFlags::SHIFT),
            }),
        ),
        ("MouseMove", event(EventKind::MouseMove { x: 960, y: 540 })),
        (
            "MouseButton",
            event(EventKind::MouseButton {
                button: MouseButton::Left,
                pressed: true,
            }),
        ),
        ("Custom(64)", event(EventKind::Custom(vec![0xAB; 64]))),
        (
            "LossReport",
            ControlMessage::LossReport(LossReportMessage {
                last_delivered: Some(9_000),
                delivered: 8_950,
                abandoned: 50,
                stale_chunks: 120,
                checksum_failures: 0,
            }),
        ),
    ]
}

fn chunk_of(len: usize, checksum: Option<u32>) -> Chunk {
    Chunk {
        frame_id: 12_345,
        chunk_index: 3,
        chunk_count: 40,
        payload: Bytes::from(vec![0x5A; len]),
        checksum,
    }
}

// ── Benchmark groups ──────────────────────────────────────────────────────────

fn bench_control_roundtrip(c: &mut Criterion) {
    let mut group = c.benchmark_group("control_roundtrip");
    for (name, msg) in control_fixtures() {
        group.bench_with_input(BenchmarkId::new("msg", name), &msg, |b, msg| {
            b.iter(|| {
                let bytes = encode_message(black_box(msg), black_box(1), black_box(0))
                    .expect("encode must succeed");
                decode_message(black_box(&bytes)).expect("decode must succeed")
            })
        });
    }
    group.finish();
}

fn bench_chunk_codec(c: &mut Criterion) {
    let mut group = c.benchmark_group("chunk_codec");
    for len in [512usize, 1200, 8192] {
        let chunk = chunk_of(len, Some(0xCAFE_F00D));
        group.bench_with_input(BenchmarkId::new("encode", len), &chunk, |b, chunk| {
            b.iter(|| encode_chunk(black_box(chunk)))
        });

        let wire = encode_chunk(&chunk);
        group.bench_with_input(BenchmarkId::new("decode", len), &wire, |b, wire| {
            b.iter(|| decode_chunk(black_box(wire.clone())).expect("decode must succeed"))
        });
    }
    group.finish();
}

criterion_group!(benches, bench_control_roundtrip, bench_chunk_codec);
criterion_main!(benches);
