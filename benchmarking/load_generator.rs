use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio_stream::StreamExt;
use url::Url;
use ws_endpoint::options::{ClientOptions, CompressionMode};
use ws_endpoint::{connect, Event, Message};

#[tokio::main]
async fn main() {
    let url = Url::parse("ws://127.0.0.1:9002").unwrap();
    let connection_count = 100; // Number of WebSocket clients
    let message_count = 1000; // Messages per client
    let message_size = 16384; // Size of each message in bytes

    let (tx, mut rx) = mpsc::unbounded_channel();

    for _ in 0..connection_count {
        let tx = tx.clone();
        let url = url.clone();
        tokio::spawn(async move {
            let (endpoint, mut events) = connect(url, ClientOptions::default());
            loop {
                match events.next().await {
                    Some(Event::Open(_)) => break,
                    Some(Event::Close { reason, .. }) => {
                        eprintln!("connection failed before opening: {reason}");
                        return;
                    }
                    Some(_) => continue,
                    None => return,
                }
            }

            let payload = vec![b'a'; message_size];
            let start = Instant::now();

            for _ in 0..message_count {
                endpoint
                    .send(Message::Binary(payload.clone()), CompressionMode::Never)
                    .await;
                let _ = events.next().await;
            }

            let duration = start.elapsed();
            let _ = tx.send(duration);
        });
    }

    drop(tx); // Close the channel

    let mut total_duration = Duration::new(0, 0);
    while let Some(duration) = rx.recv().await {
        total_duration += duration;
    }

    let avg_latency = total_duration / (connection_count as u32 * message_count as u32);
    println!("Average Latency: {:?}", avg_latency);
}
