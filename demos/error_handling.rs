//! Example demonstrating error handling and severity.
//!
//! This example shows how to:
//! - Match on the distinct error kinds
//! - Read the severity assigned to a failed call
//! - Access raw response data on errors
//! - Deal with decoding failures and `204 No Content`
//!
//! Run with: `cargo run --example error_handling`

use callwire::{Client, Error, HttpError, Request, Severity};
use http::{HeaderMap, Method, StatusCode};
use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Deserialize)]
#[allow(dead_code)]
struct Post {
    id: u32,
    title: String,
}

fn describe(error: &Error) {
    println!("Error: {}", error);
    println!("  Severity: {}", error.severity());
    println!("  Counts as failure: {}", error.severity().is_failure());
    println!("  Is retryable: {}", error.is_retryable());
    println!("  Status code: {:?}", error.status());
    println!("  Attempts: {:?}", error.attempts());
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter("callwire=info")
        .init();

    let client = Client::builder()
        .name("jsonplaceholder")
        .base_url("https://jsonplaceholder.typicode.com")
        .build()?;

    println!("=== Example 1: Expected HTTP Errors ===");
    let request = Request::builder(Method::GET, "/posts/{}")
        .param(999_999)
        .build()?;
    match client.call::<Post>(&request).await {
        Ok(response) => println!("Success: {:?}", response.data),
        Err(Error::Http(err)) => {
            println!("HTTP Error!");
            println!("  Status: {}", err.status);
            println!("  Route: {}", err.route);
            println!("  Severity: {} (404 is a lookup miss)", err.severity);
            println!("  Raw response: {}", err.raw_response);
            println!("  Content-Type: {:?}", err.headers.get("content-type"));
        }
        Err(e) => println!("Other error: {}", e),
    }
    println!();

    println!("=== Example 2: Decoding Failures ===");
    #[derive(Deserialize)]
    #[allow(dead_code)]
    struct WrongSchema {
        nonexistent_field: String,
    }

    match client.get::<WrongSchema>("/posts/1").await {
        Ok(_) => println!("Unexpected success"),
        Err(Error::DeserializationFailed {
            raw_response,
            serde_error,
            status,
            ..
        }) => {
            println!("Decoding Failed!");
            println!("  Status: {}", status);
            println!("  Serde error: {}", serde_error);
            println!(
                "  Raw response (first 200 chars): {}",
                raw_response.chars().take(200).collect::<String>()
            );
        }
        Err(e) => println!("Other error: {}", e),
    }
    println!();

    println!("=== Example 3: Severity of Each Error Kind ===");
    let errors = vec![
        Error::Http(Box::new(HttpError {
            method: Method::GET,
            route: "/posts/{}".to_string(),
            status: StatusCode::INTERNAL_SERVER_ERROR,
            attempts: 3,
            retries_concluded: true,
            severity: Severity::Transient,
            raw_response: "Server error".to_string(),
            headers: HeaderMap::new(),
        })),
        Error::NoContent {
            method: Method::DELETE,
            route: "/posts/{}".to_string(),
            attempts: 1,
        },
        Error::ExplicitBackoff {
            method: Method::GET,
            route: "/posts".to_string(),
            remaining: Duration::from_secs(7),
            attempts: 0,
        },
        Error::Usage("both a JSON and a raw body were set".to_string()),
    ];

    for error in &errors {
        describe(error);
        println!();
    }

    println!("=== Example 4: Network Errors ===");
    let bad_client = Client::builder()
        .base_url("https://this-domain-does-not-exist-12345.com")
        .retry_strategy(callwire::RetryStrategy::None)
        .build()?;

    match bad_client.get::<serde_json::Value>("/").await {
        Ok(_) => println!("Unexpected success"),
        Err(Error::Network {
            connect, source, ..
        }) => {
            println!("Network Error!");
            println!("  Error: {}", source);
            println!("  While connecting: {}", connect);
        }
        Err(e) => describe(&e),
    }

    Ok(())
}
