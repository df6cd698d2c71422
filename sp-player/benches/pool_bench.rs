//! Buffer Pool Performance Benchmark
//!
//! Measures the operations that run on the render thread: slot release and
//! copying queued buffers out through the playhead.
//!
//! **Goal:** A release or a 512-frame render stays well under a microsecond

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use sp_player::audio::{AudioFormat, SlotId};
use sp_player::playback::BufferPool;
use sp_player::sink::Playhead;
use std::sync::Arc;

const FRAMES_PER_BUFFER: usize = 4096;

fn filled_pool(size: usize) -> Arc<BufferPool> {
    let pool = Arc::new(BufferPool::new(size, AudioFormat::cd_quality(), FRAMES_PER_BUFFER));
    for _ in 0..size {
        if let Some(slot) = pool.acquire_free() {
            if let Some(mut buffer) = pool.buffer(slot) {
                buffer.storage_mut().fill(0.25);
                buffer.set_valid_frames(FRAMES_PER_BUFFER);
            }
            pool.release(slot);
        }
    }
    pool
}

fn bench_pool_cycle(c: &mut Criterion) {
    let mut group = c.benchmark_group("buffer_pool");

    group.bench_function("acquire_queue_release", |b| {
        let pool = filled_pool(4);

        b.iter(|| {
            if let Some(slot) = pool.acquire_free() {
                pool.mark_queued(slot);
                black_box(pool.release_queued(black_box(slot)));
            }
        });
    });

    group.bench_function("reclaim_queued_4", |b| {
        let pool = filled_pool(4);

        b.iter(|| {
            while let Some(slot) = pool.acquire_free() {
                pool.mark_queued(slot);
            }
            black_box(pool.reclaim_queued());
        });
    });

    group.finish();
}

fn bench_playhead_render(c: &mut Criterion) {
    let mut group = c.benchmark_group("playhead");

    group.bench_function("render_512_frames", |b| {
        let pool = filled_pool(4);
        let mut playhead = Playhead::new(Arc::clone(&pool));
        let mut out = vec![0.0f32; 512 * 2];
        let mut next_index = 0;

        b.iter(|| {
            // Cycle through the slots without state changes
            let outcome = playhead.render(
                black_box(&mut out),
                || {
                    next_index = (next_index + 1) % 4;
                    Some(SlotId(next_index))
                },
                |slot, frames| {
                    black_box((slot, frames));
                },
            );
            black_box(outcome);
        });
    });

    group.finish();
}

criterion_group!(benches, bench_pool_cycle, bench_playhead_render);
criterion_main!(benches);
