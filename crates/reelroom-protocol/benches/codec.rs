//! Codec benchmarks for reelroom-protocol.

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use reelroom_protocol::{codec, ChatMessage, ServerEvent};

fn chat_message(text_len: usize, total_count: u64) -> ChatMessage {
    ChatMessage {
        username: "bench".to_string(),
        text: "x".repeat(text_len),
        room_id: "video:42".to_string(),
        total_count,
        send_time: "2024-05-01T10:00:00.000Z".to_string(),
    }
}

fn bench_encode(c: &mut Criterion) {
    let event = ServerEvent::message(chat_message(64, 1_000));

    let mut group = c.benchmark_group("encode");
    group.throughput(Throughput::Bytes(64));
    group.bench_function("message_64B", |b| b.iter(|| codec::encode(black_box(&event))));
    group.finish();
}

fn bench_decode(c: &mut Criterion) {
    let text = format!(
        r#"{{"event_type":"message","message":{{"username":"bench","text":"{}"}}}}"#,
        "x".repeat(64)
    );

    let mut group = c.benchmark_group("decode");
    group.throughput(Throughput::Bytes(text.len() as u64));
    group.bench_function("message_64B", |b| b.iter(|| codec::decode(black_box(&text))));
    group.finish();
}

fn bench_history_snapshot(c: &mut Criterion) {
    let history: Vec<ChatMessage> = (0..100).map(|_| chat_message(32, 100)).collect();
    let event = ServerEvent::first_message(history);

    c.bench_function("encode_history_100", |b| {
        b.iter(|| codec::encode(black_box(&event)))
    });
}

criterion_group!(benches, bench_encode, bench_decode, bench_history_snapshot);
criterion_main!(benches);
