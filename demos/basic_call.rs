//! Basic example demonstrating simple GET and POST calls.
//!
//! This example shows how to:
//! - Create a named client with a base URL
//! - Build a request from a route template
//! - Make POST requests with a JSON body
//! - Inspect latency, attempts and how the connection was obtained
//!
//! Run with: `cargo run --example basic_call`

use callwire::{Client, Error, Request};
use http::Method;
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize)]
#[allow(dead_code)]
struct Post {
    #[serde(rename = "userId")]
    user_id: u32,
    id: u32,
    title: String,
    body: String,
}

#[derive(Debug, Serialize)]
struct NewPost {
    title: String,
    body: String,
    #[serde(rename = "userId")]
    user_id: u32,
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    tracing_subscriber::fmt()
        .with_env_filter("callwire=debug,basic_call=info")
        .init();

    let client = Client::builder()
        .name("jsonplaceholder")
        .base_url("https://jsonplaceholder.typicode.com")
        .accept_type("application/json")
        .build()?;

    println!("=== GET Request Example ===");
    let request = Request::builder(Method::GET, "/posts/{}").param(1).build()?;
    let response = client.call::<Post>(&request).await?;

    println!("Post ID: {}", response.data.id);
    println!("Title: {}", response.data.title);
    println!("Call latency: {:?}", response.latency);
    println!("Status code: {}", response.status);
    if let Some(conn) = &response.connection {
        println!(
            "Connection to {}: reused={}, dns={:?}, dial={:?}, tls={:?}",
            conn.host, conn.reused, conn.dns, conn.dial, conn.tls
        );
    }
    println!();

    println!("=== POST Request Example ===");
    let new_post = NewPost {
        title: "My New Post".to_string(),
        body: "This is the content of my new post!".to_string(),
        user_id: 1,
    };

    let response = client.post::<_, Post>("/posts", &new_post).await?;

    println!("Created post ID: {}", response.data.id);
    println!("Call latency: {:?}", response.latency);
    if let Some(conn) = &response.connection {
        println!(
            "Connection reused: {} (idle for {:?})",
            conn.reused, conn.idle_for
        );
    }
    println!();

    println!("=== Accessing Response Metadata ===");
    println!("Raw response length: {} bytes", response.raw_body.len());
    println!("Content-Type: {:?}", response.header("content-type"));
    println!("Was retried: {}", response.was_retried());

    Ok(())
}
