//! Criterion benchmarks for chunking and reassembly of full frames.
//!
//! Run with:
//! ```bash
//! cargo bench --package srvnc-core --bench reassembly_bench
//! ```

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use srvnc_core::{ChecksumMode, Chunker, ChunkOutcome, Frame, ReassemblyConfig, ReassemblyEngine};

const FRAME_SIZES: [usize; 3] = [16 * 1024, 128 * 1024, 1024 * 1024];

fn frame_of(len: usize) -> Frame {
    Frame::new(1, 0, (0..len).map(|i| (i % 251) as u8).collect::<Vec<u8>>())
}

fn bench_chunking(c: &mut Criterion) {
    let mut group = c.benchmark_group("chunk_frame");
    for mode in [ChecksumMode::Disabled, ChecksumMode::Blake3] {
        let chunker = Chunker::new(1200, mode).expect("valid chunker");
        for len in FRAME_SIZES {
            let frame = frame_of(len);
            let id = format!("{mode:?}/{len}");
            group.bench_with_input(BenchmarkId::new("bytes", id), &frame, |b, frame| {
                b.iter(|| chunker.chunk(black_box(frame)).expect("chunkable"))
            });
        }
    }
    group.finish();
}

fn bench_reassembly(c: &mut Criterion) {
    let chunker = Chunker::new(1200, ChecksumMode::Blake3).expect("valid chunker");
    let mut group = c.benchmark_group("reassemble_frame");
    for len in FRAME_SIZES {
        let chunks = chunker.chunk(&frame_of(len)).expect("chunkable");
        let mut reversed = chunks.clone();
        reversed.reverse();

        for (order, input) in [("in_order", &chunks), ("reversed", &reversed)] {
            group.bench_with_input(
                BenchmarkId::new(order, len),
                input,
                |b, input| {
                    b.iter(|| {
                        let mut engine = ReassemblyEngine::new(ReassemblyConfig::default());
                        let mut completed = None;
                        for chunk in input.iter().cloned() {
                            if let ChunkOutcome::Complete(frame) = engine.on_chunk(chunk) {
                                completed = Some(frame);
                            }
                        }
                        black_box(completed.expect("frame must complete"))
                    })
                },
            );
        }
    }
    group.finish();
}

criterion_group!(benches, bench_chunking, bench_reassembly);
criterion_main!(benches);
