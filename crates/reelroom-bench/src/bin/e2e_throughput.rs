//! End-to-end throughput benchmark for Reelroom.
//!
//! Connects N clients to one room of a running server, has every client
//! post chat messages as fast as it can, and counts the broadcasts received.
//!
//! ```bash
//! reelroom &
//! e2e_throughput 16 ws://127.0.0.1:8080/ws
//! ```

use futures_util::{SinkExt, StreamExt};
use reelroom_protocol::{codec, ClientEvent, ServerEvent};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Barrier;
use tokio_tungstenite::{connect_async, tungstenite::Message};

const DEFAULT_SERVER_URL: &str = "ws://127.0.0.1:8080/ws";
const ROOM_ID: &str = "bench:e2e";
const WARMUP_SECS: u64 = 2;
const BENCH_SECS: u64 = 10;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[tokio::main]
async fn main() {
    let args: Vec<String> = std::env::args().collect();
    let num_clients = args.get(1).and_then(|s| s.parse().ok()).unwrap_or(16);
    let server_url = args
        .get(2)
        .cloned()
        .unwrap_or_else(|| DEFAULT_SERVER_URL.to_string());

    println!("Reelroom end-to-end throughput");
    println!("  server:  {server_url}");
    println!("  room:    {ROOM_ID}");
    println!("  clients: {num_clients}");
    println!("  warmup {WARMUP_SECS}s, measurement {BENCH_SECS}s");
    println!();

    run_room_benchmark(&server_url, num_clients).await;
}

async fn run_room_benchmark(server_url: &str, num_clients: usize) {
    let received = Arc::new(AtomicU64::new(0));
    let barrier = Arc::new(Barrier::new(num_clients + 1));

    let handles: Vec<_> = (0..num_clients)
        .map(|client_id| {
            let url = format!("{server_url}?room_id={ROOM_ID}&user_id=bench-{client_id}");
            let received = Arc::clone(&received);
            let barrier = Arc::clone(&barrier);
            tokio::spawn(async move {
                if let Err(e) = run_client(client_id, &url, received, barrier).await {
                    eprintln!("client {client_id} error: {e}");
                }
            })
        })
        .collect();

    // Wait for all clients to join
    barrier.wait().await;
    println!("all {num_clients} clients joined");

    tokio::time::sleep(Duration::from_secs(WARMUP_SECS)).await;

    received.store(0, Ordering::SeqCst);
    let start = Instant::now();
    tokio::time::sleep(Duration::from_secs(BENCH_SECS)).await;

    let elapsed = start.elapsed();
    let total = received.load(Ordering::SeqCst);
    let per_sec = total as f64 / elapsed.as_secs_f64();

    println!();
    println!("  duration:        {:>10.2}s", elapsed.as_secs_f64());
    println!("  broadcasts recv: {total:>10}");
    println!("  throughput:      {per_sec:>10.0} msg/s");
    println!("  per client:      {:>10.0} msg/s", per_sec / num_clients as f64);

    for handle in handles {
        handle.abort();
    }
}

async fn run_client(
    client_id: usize,
    url: &str,
    received: Arc<AtomicU64>,
    barrier: Arc<Barrier>,
) -> Result<(), BoxError> {
    let (ws, _) = connect_async(url).await?;
    let (mut sender, mut receiver) = ws.split();

    // the like snapshot marks the join as complete
    while let Some(frame) = receiver.next().await {
        if let Message::Text(text) = frame? {
            if matches!(codec::decode_server(&text)?, ServerEvent::FirstLike(_)) {
                break;
            }
        }
    }

    barrier.wait().await;

    let recv_task = tokio::spawn(async move {
        while let Some(Ok(frame)) = receiver.next().await {
            if let Message::Text(text) = frame {
                if let Ok(ServerEvent::Message { .. }) = codec::decode_server(&text) {
                    received.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
    });

    let chat = codec::encode_client(&ClientEvent::message(
        format!("bench-{client_id}"),
        "x".repeat(64),
    ))?;

    loop {
        if sender.send(Message::Text(chat.clone())).await.is_err() {
            break;
        }
        tokio::task::yield_now().await;
    }

    recv_task.abort();
    Ok(())
}
