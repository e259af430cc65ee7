//! # Callwire - A resilient service-to-service HTTP client
//!
//! Callwire wraps a pooled HTTP/1.1 transport with bounded retries, explicit
//! backoff when a server signals overload, error severity classification and
//! per-request connection telemetry.
//!
//! ## Quick Start
//!
//! ```no_run
//! use callwire::{Client, Request, RetryStrategy};
//! use http::Method;
//! use serde::{Deserialize, Serialize};
//! use std::time::Duration;
//!
//! #[derive(Serialize)]
//! struct PlaceOrder<'a> {
//!     sku: &'a str,
//!     quantity: u32,
//! }
//!
//! #[derive(Deserialize)]
//! struct Order {
//!     order_id: String,
//!     state: String,
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), callwire::Error> {
//!     let orders = Client::builder()
//!         .name("orders")
//!         .base_url("https://orders.internal")
//!         .auth_token("s3cr3t")
//!         .timeout(Duration::from_secs(5))
//!         .retry_strategy(RetryStrategy::Linear {
//!             delay: Duration::from_millis(200),
//!             max_retries: 2,
//!         })
//!         .build()?;
//!
//!     // The route template is the telemetry label; params fill its `{}`s.
//!     let lookup = Request::builder(Method::GET, "/orders/{}")
//!         .param("A-1009")
//!         .build()?;
//!     let order = orders.call::<Order>(&lookup).await?;
//!     println!("{} is {} ({:?}, {} attempts)", order.order_id, order.state, order.latency, order.attempts);
//!
//!     let placed = Request::builder(Method::POST, "/orders")
//!         .json(&PlaceOrder { sku: "kb-104", quantity: 2 })
//!         .build()?;
//!     let order = orders.call::<Order>(&placed).await?;
//!     println!("placed {}", order.order_id);
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Features
//!
//! - **Request builder** - Route templates, JSON or raw bodies, cookies, query parameters and per-request deadlines
//! - **Bounded retries** - Exponential or linear backoff within the call's deadline
//! - **Explicit backoff** - A `429` puts the client into a cool-down during which calls fail fast
//! - **Severity classification** - Every error is `Expected`, `Transient` or `Fatal`
//! - **Connection telemetry** - Each attempt reports whether its connection was reused, idle, starved or delayed
//! - **Pool gauges** - In-flight requests, their maximum, and an estimate of available idle connections
//! - **Trace propagation** - A W3C `traceparent` header is sent with every attempt
//!
//! ## Error Handling
//!
//! ```no_run
//! use callwire::{Client, Error, Request, Severity};
//! use http::Method;
//!
//! # async fn example() -> Result<(), Error> {
//! # let client = Client::builder().base_url("https://api.example.com").build()?;
//! let request = Request::builder(Method::GET, "/endpoint").build()?;
//! match client.call::<serde_json::Value>(&request).await {
//!     Ok(response) => println!("Success: {:?}", response.data),
//!     Err(Error::NoContent { .. }) => println!("Nothing there"),
//!     Err(Error::ExplicitBackoff { remaining, .. }) => {
//!         println!("Server asked us to back off for another {:?}", remaining);
//!     }
//!     Err(Error::DeserializationFailed { raw_response, serde_error, status, .. }) => {
//!         eprintln!("Failed to decode (status {}): {}", status, serde_error);
//!         eprintln!("  Raw response: {}", raw_response);
//!     }
//!     Err(e) if e.severity() == Severity::Expected => println!("Expected: {}", e),
//!     Err(e) => eprintln!("Call failed: {}", e),
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Connection Telemetry
//!
//! ```no_run
//! use callwire::{Client, InMemorySink};
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), callwire::Error> {
//! let sink = Arc::new(InMemorySink::new());
//! let client = Client::builder()
//!     .base_url("https://api.example.com")
//!     .max_connections_per_host(2)
//!     .connection_telemetry(true)
//!     .metrics_sink(sink.clone())
//!     .build()?;
//!
//! let response = client.get::<serde_json::Value>("/health").await?;
//! if let Some(conn) = &response.connection {
//!     println!("reused={} starved={} delayed={}", conn.reused, conn.starved, conn.delayed);
//! }
//!
//! let gauges = client.report_pool_gauges();
//! println!("in flight: {}, max: {}", gauges.in_flight, gauges.in_flight_max);
//! # Ok(())
//! # }
//! ```

mod classify;
mod client;
mod config;
mod connect;
mod cooldown;
pub mod decode;
mod error;
pub mod metrics;
mod pool;
mod request;
mod response;
pub mod retry;
mod telemetry;
mod trace_context;
mod transport;

pub use classify::{ExpectedStatuses, Severity};
pub use client::{Client, ClientBuilder, DEFAULT_ATTEMPT_TIMEOUT};
pub use config::ClientConfig;
pub use cooldown::{DEFAULT_COOLDOWN_WINDOW, MAX_COOLDOWN_WINDOW};
pub use decode::{BytesDecoder, DecodeError, Decoder, IgnoreBody, JsonDecoder, TextDecoder};
pub use error::{Error, HttpError, Result};
pub use metrics::{InMemorySink, MetricsSink, NoopSink, Tag};
pub use pool::PoolSnapshot;
pub use request::{Request, RequestBuilder};
pub use response::Response;
pub use retry::{RetryPredicate, RetryStrategy};
pub use telemetry::{ConnectionRecord, DELAY_THRESHOLD};
pub use trace_context::{TraceContext, TRACEPARENT};
