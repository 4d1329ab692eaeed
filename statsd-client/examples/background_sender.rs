use std::time::Duration;

use rand::Rng as _;
use statsd_client::{Metric, SenderKind, StatsdBuilder};

fn main() {
    tracing_subscriber::fmt::init();

    let client = StatsdBuilder::new("localhost")
        .with_port(9125)
        .with_prefix("demo")
        .with_sender(SenderKind::Background { max_delay: Duration::from_millis(500), workers: 2 })
        .build()
        .expect("failed to build statsd client");

    let mut rng = rand::rng();

    // Loop over and over, pretending to do some work.
    loop {
        client.increment("server.loops");
        client.send(Metric::counting("server.loops.sampled", 1).with_sample_rate(0.25).with_tag("system:foo"));

        let lucky = rng.random_bool(0.75);
        client.gauge_delta("lucky_iterations", if lucky { 1.0 } else { -1.0 });

        client.time("server.loop.work", || {
            std::thread::sleep(Duration::from_millis(rng.random_range(5..50)));
        });

        client.set("server.workers", format!("worker-{}", rng.random_range(0..4)));
    }
}
