//! Performance benchmarks for offline-queue

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use offline_queue::{
    deep_merge, resolve, store, ActionKind, MemoryStorage, MergeStrategy, QueueAction,
    QueueConfig, QueueManager,
};
use serde_json::json;

fn filled_queue(size: usize) -> QueueManager<MemoryStorage> {
    let queue = QueueManager::new(MemoryStorage::new(), QueueConfig::default());
    for i in 0..size {
        let action = match i % 3 {
            0 => QueueAction::add_favorite(format!("verse-{}", i)),
            1 => QueueAction::add_reflection(format!("r{}", i), format!("Reflection {}", i)),
            _ => QueueAction::delete_reflection(format!("r{}", i)),
        };
        queue.enqueue(action);
    }
    queue
}

fn bench_queue_operations(c: &mut Criterion) {
    let mut group = c.benchmark_group("queue_operations");

    group.bench_function("enqueue_new", |b| {
        let queue = QueueManager::new(MemoryStorage::new(), QueueConfig::default());
        let mut id = 0u64;

        b.iter(|| {
            id += 1;
            if id % 100 == 0 {
                queue.clear();
            }
            queue.enqueue(black_box(QueueAction::add_reflection(
                format!("r{}", id),
                "text",
            )))
        })
    });

    group.bench_function("enqueue_coalesce", |b| {
        let queue = filled_queue(50);
        let mut edit = 0u64;

        b.iter(|| {
            edit += 1;
            queue.enqueue(black_box(QueueAction::update_reflection(
                "draft",
                format!("edit {}", edit),
            )))
        })
    });

    group.bench_function("favorite_toggle", |b| {
        let queue = filled_queue(50);

        b.iter(|| {
            queue.enqueue(black_box(QueueAction::add_favorite("John-3-16")));
            queue.enqueue(black_box(QueueAction::remove_favorite("John-3-16")))
        })
    });

    group.finish();
}

fn bench_queries(c: &mut Criterion) {
    let mut group = c.benchmark_group("queries");

    for size in [10, 100, 1000].iter() {
        let queue = filled_queue(*size);

        group.bench_with_input(BenchmarkId::new("pending_count", size), size, |b, _| {
            b.iter(|| queue.pending_count())
        });

        group.bench_with_input(BenchmarkId::new("contains", size), size, |b, _| {
            b.iter(|| queue.contains(black_box(ActionKind::AddFavorite), black_box("verse-0")))
        });
    }

    group.finish();
}

fn bench_persistence(c: &mut Criterion) {
    let mut group = c.benchmark_group("persistence");

    for size in [10, 100, 1000].iter() {
        let items = filled_queue(*size).items();
        let bytes = store::encode(&items).unwrap();

        group.bench_with_input(BenchmarkId::new("encode", size), size, |b, _| {
            b.iter(|| store::encode(black_box(&items)))
        });

        group.bench_with_input(BenchmarkId::new("decode", size), size, |b, _| {
            b.iter(|| store::decode(black_box(&bytes)))
        });
    }

    group.finish();
}

fn bench_resolution(c: &mut Criterion) {
    let mut group = c.benchmark_group("resolution");

    let local = json!({
        "id": "r1",
        "content": "edited offline",
        "updated_at": "2024-05-01T10:00:00Z",
        "meta": {"tags": ["hope", "faith"], "mood": {"score": 4}}
    });
    let remote = json!({
        "id": "r1",
        "content": "edited on web",
        "updated_at": "2024-05-01T09:00:00Z",
        "likes": 12,
        "meta": {"tags": ["love"], "mood": {"score": 2, "label": "calm"}, "pinned": true}
    });

    group.bench_function("deep_merge", |b| {
        b.iter(|| deep_merge(black_box(&remote), black_box(&local)))
    });

    group.bench_function("newest_wins", |b| {
        b.iter(|| resolve(black_box(&local), black_box(&remote), MergeStrategy::NewestWins))
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_queue_operations,
    bench_queries,
    bench_persistence,
    bench_resolution,
);
criterion_main!(benches);
