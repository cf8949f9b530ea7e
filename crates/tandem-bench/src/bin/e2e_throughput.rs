//! End-to-end throughput benchmark for Tandem.
//!
//! Connects N clients to one document room on a running server, has each
//! of them stream cursor updates, and counts the cursor events received.
//!
//! Tokens are signed with `TANDEM_JWT_SECRET`, or the server's development
//! secret when unset.

use futures_util::{SinkExt, StreamExt};
use jsonwebtoken::{encode, EncodingKey, Header};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tandem_protocol::{codec, Event, Position};
use tokio::sync::Barrier;
use tokio_tungstenite::{connect_async, tungstenite::Message};

const SERVER_URL: &str = "ws://127.0.0.1:8080/ws/collaboration";
const DOCUMENT_ID: &str = "benchmark";
const DEV_SECRET: &str = "dev-secret-change-in-production";
const WARMUP_SECS: u64 = 2;
const BENCH_SECS: u64 = 10;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Serialize)]
struct Claims {
    user_id: String,
    email: String,
    exp: u64,
}

#[tokio::main]
async fn main() {
    let args: Vec<String> = std::env::args().collect();
    let num_clients = args.get(1).and_then(|s| s.parse().ok()).unwrap_or(16);

    println!("╔══════════════════════════════════════════════════════════════╗");
    println!("║         Tandem End-to-End Cursor Throughput Benchmark        ║");
    println!("╠══════════════════════════════════════════════════════════════╣");
    println!("║  Make sure the server is running: cargo run --release        ║");
    println!("╚══════════════════════════════════════════════════════════════╝");
    println!();

    run_cursor_benchmark(num_clients).await;
}

async fn run_cursor_benchmark(num_clients: usize) {
    println!("📊 Cursor Benchmark: {} clients in one room", num_clients);
    println!("   Warmup: {}s, Measurement: {}s", WARMUP_SECS, BENCH_SECS);
    println!();

    let secret = std::env::var("TANDEM_JWT_SECRET").unwrap_or_else(|_| DEV_SECRET.to_string());
    let received = Arc::new(AtomicU64::new(0));
    let sent = Arc::new(AtomicU64::new(0));
    let barrier = Arc::new(Barrier::new(num_clients + 1));

    let mut handles = Vec::new();

    // Spawn client tasks
    for client_id in 0..num_clients {
        let received = Arc::clone(&received);
        let sent = Arc::clone(&sent);
        let barrier = Arc::clone(&barrier);
        let secret = secret.clone();

        let handle = tokio::spawn(async move {
            if let Err(e) = run_client(client_id, &secret, received, sent, barrier).await {
                eprintln!("Client {} error: {}", client_id, e);
            }
        });
        handles.push(handle);
    }

    // Wait for all clients to connect
    barrier.wait().await;
    println!("✓ All {} clients connected", num_clients);

    // Warmup phase
    println!("⏳ Warming up for {}s...", WARMUP_SECS);
    tokio::time::sleep(Duration::from_secs(WARMUP_SECS)).await;

    // Reset counters and start measurement
    received.store(0, Ordering::SeqCst);
    sent.store(0, Ordering::SeqCst);
    let start = Instant::now();

    println!("📈 Measuring for {}s...", BENCH_SECS);
    tokio::time::sleep(Duration::from_secs(BENCH_SECS)).await;

    let elapsed = start.elapsed();
    let total_received = received.load(Ordering::SeqCst);
    let total_sent = sent.load(Ordering::SeqCst);

    let received_per_sec = total_received as f64 / elapsed.as_secs_f64();
    let sent_per_sec = total_sent as f64 / elapsed.as_secs_f64();
    // Each cursor should reach every other member.
    let expected = total_sent * num_clients.saturating_sub(1) as u64;
    let delivery = if expected == 0 {
        0.0
    } else {
        total_received as f64 / expected as f64 * 100.0
    };

    println!();
    println!("╔══════════════════════════════════════════════════════════════╗");
    println!("║                         RESULTS                              ║");
    println!("╠══════════════════════════════════════════════════════════════╣");
    println!(
        "║  Clients:              {:>10}                           ║",
        num_clients
    );
    println!(
        "║  Duration:             {:>10.2}s                          ║",
        elapsed.as_secs_f64()
    );
    println!(
        "║  Cursors Sent:         {:>10.0} msg/s                    ║",
        sent_per_sec
    );
    println!(
        "║  Cursors Received:     {:>10.0} msg/s                    ║",
        received_per_sec
    );
    println!(
        "║  Delivered:            {:>10.1}%                          ║",
        delivery
    );
    println!("╚══════════════════════════════════════════════════════════════╝");

    // Signal clients to stop
    for handle in handles {
        handle.abort();
    }
}

fn mint_token(client_id: usize, secret: &str) -> Result<String, BoxError> {
    let now = SystemTime::now().duration_since(UNIX_EPOCH)?.as_secs();
    let claims = Claims {
        user_id: format!("bench-{}", client_id),
        email: format!("bench-{}@example.com", client_id),
        exp: now + 3600,
    };
    Ok(encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )?)
}

async fn run_client(
    client_id: usize,
    secret: &str,
    received: Arc<AtomicU64>,
    sent: Arc<AtomicU64>,
    barrier: Arc<Barrier>,
) -> Result<(), BoxError> {
    let url = format!(
        "{}/{}?token={}",
        SERVER_URL,
        DOCUMENT_ID,
        mint_token(client_id, secret)?
    );
    let (ws, _) = connect_async(url).await?;
    let (mut sender, mut receiver) = ws.split();

    // Wait for the presence snapshot
    if let Some(Ok(_presence)) = receiver.next().await {
        // Admitted to the room
    }

    // Wait for all clients to be ready
    barrier.wait().await;

    // Pre-encode the cursor frame
    let position = Position::from_json(format!(r#"{{"x":{},"y":0}}"#, client_id))?;
    let cursor = codec::encode(&Event::client_cursor(position))?;
    let cursor_msg = Message::Text(String::from_utf8(cursor.to_vec())?);

    // Spawn separate receiver task for full-duplex operation
    let recv_task = tokio::spawn(async move {
        while let Some(result) = receiver.next().await {
            if let Ok(Message::Text(text)) = result {
                if let Ok(Event::Cursor { .. }) = codec::decode(text.as_bytes()) {
                    received.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
    });

    // Send loop
    loop {
        if sender.send(cursor_msg.clone()).await.is_err() {
            break;
        }
        sent.fetch_add(1, Ordering::Relaxed);
        // Small yield to not starve the receiver task
        tokio::task::yield_now().await;
    }

    recv_task.abort();
    Ok(())
}
