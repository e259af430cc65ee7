//! Example demonstrating connection telemetry under pool pressure.
//!
//! Fires more concurrent calls than the pool allows per host and prints how
//! each call obtained its connection, then the pool gauges.
//!
//! Run with: `cargo run --example pool_telemetry`

use callwire::{Client, InMemorySink, Request};
use http::Method;
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter("callwire=info")
        .init();

    let sink = Arc::new(InMemorySink::new());
    let client = Client::builder()
        .name("jsonplaceholder")
        .base_url("https://jsonplaceholder.typicode.com")
        .max_connections_per_host(2)
        .connection_telemetry(true)
        .metrics_sink(sink.clone())
        .build()?;

    let mut handles = Vec::new();
    for id in 1..=8 {
        let client = client.clone();
        handles.push(tokio::spawn(async move {
            let request = Request::builder(Method::GET, "/posts/{}").param(id).build()?;
            client.send(&request).await
        }));
    }

    println!("=== Connection Records ===");
    for handle in handles {
        match handle.await? {
            Ok(response) => {
                if let Some(conn) = response.connection {
                    println!(
                        "reused={:<5} idle={:<5} starved={:<5} delayed={:<5} wait={:?}",
                        conn.reused, conn.was_idle, conn.starved, conn.delayed, conn.wait
                    );
                }
            }
            Err(e) => println!("Call failed: {}", e),
        }
    }
    println!();

    println!("=== Pool Gauges ===");
    let gauges = client.report_pool_gauges();
    println!("In flight: {}", gauges.in_flight);
    println!("In flight (max since last scrape): {}", gauges.in_flight_max);
    println!("Idle connections (estimate): {}", gauges.pool_avail_estimate);
    println!();

    println!("=== Recorded Metrics ===");
    for event in sink.events() {
        println!("{} {:?}", event.name, event.value);
    }

    Ok(())
}
