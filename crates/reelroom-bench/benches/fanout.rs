//! Fan-out benchmarks for Reelroom.
//!
//! These benchmarks measure how fast one queued event reaches every member
//! of a room, and the cost of room lookup in a populated registry.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use reelroom_core::{Connection, Outbound, RoomRegistry};
use reelroom_protocol::{ChatMessage, ServerEvent};
use std::sync::Arc;
use std::time::Instant;
use tokio::runtime::Runtime;

fn chat_event() -> Arc<ServerEvent> {
    Arc::new(ServerEvent::message(ChatMessage {
        username: "bench".to_string(),
        text: "x".repeat(64),
        room_id: "video:1".to_string(),
        total_count: 1,
        send_time: "2024-05-01T10:00:00.000Z".to_string(),
    }))
}

/// Join `size` members to one room and return their outbound halves.
fn populate(registry: &RoomRegistry, room_id: &str, size: usize) -> Vec<Outbound> {
    (0..size)
        .map(|i| {
            let (conn, outbound) = Connection::new(room_id, format!("user-{i}"), 1024);
            registry.join(conn);
            outbound
        })
        .collect()
}

/// Benchmark one event travelling through a room's queue and dispatcher to
/// every member.
fn bench_fanout(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();

    let mut group = c.benchmark_group("fanout");
    let event = chat_event();

    for size in [10, 100, 1000].iter() {
        group.throughput(Throughput::Elements(*size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, &size| {
            b.iter_custom(|iters| {
                rt.block_on(async {
                    let registry = RoomRegistry::new();
                    let room = registry.get_or_create("video:1");
                    let mut outbounds = populate(&registry, "video:1", size);

                    let start = Instant::now();
                    for _ in 0..iters {
                        room.enqueue(Arc::clone(black_box(&event))).unwrap();
                        // drain so no member is dropped as a slow consumer
                        for outbound in &mut outbounds {
                            let _ = outbound.recv().await;
                        }
                    }
                    start.elapsed()
                })
            });
        });
    }

    group.finish();
}

/// Benchmark registry lookups.
fn bench_registry(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let _guard = rt.enter();

    let mut group = c.benchmark_group("registry");

    let registry = RoomRegistry::new();
    for i in 0..1000 {
        registry.get_or_create(&format!("video:{i}"));
    }

    group.bench_function("get_or_create_existing", |b| {
        let mut i = 0;
        b.iter(|| {
            let room_id = format!("video:{}", i % 1000);
            i += 1;
            registry.get_or_create(black_box(&room_id))
        });
    });

    group.bench_function("join_leave", |b| {
        b.iter(|| {
            let (conn, _outbound) = Connection::new("video:1", "bench", 16);
            let id = conn.id();
            registry.join(conn);
            registry.leave(black_box("video:1"), id)
        });
    });

    group.finish();
}

criterion_group!(benches, bench_fanout, bench_registry);
criterion_main!(benches);
