use std::time::{Duration, Instant};

use statsd_client::{SenderKind, StatsdBuilder};

fn main() {
    tracing_subscriber::fmt::init();

    let client = StatsdBuilder::new("127.0.0.1")
        .with_port(9125)
        .with_sender(SenderKind::Batch)
        .with_maximum_payload_length(1432)
        .build()
        .expect("failed to build statsd client");

    // Record freely, and flush every few seconds.
    let mut last_flush = Instant::now();
    let mut iterations: i64 = 0;
    loop {
        iterations += 1;
        client.increment("batch.iterations");
        client.histogram("batch.iteration_parity", iterations % 2);

        if last_flush.elapsed() > Duration::from_secs(5) {
            client.gauge("batch.total", iterations);
            client.flush();
            tracing::info!(telemetry = ?client.telemetry(), "Flushed batch.");
            last_flush = Instant::now();
        }

        std::thread::sleep(Duration::from_millis(10));
    }
}
