//! Response wrapper that keeps the decoded payload next to the raw exchange.
//!
//! The [`Response`] type carries the decoded data along with the details of
//! the final attempt: status, headers, raw body, total latency, attempt count
//! and how its connection was obtained.

use crate::telemetry::ConnectionRecord;
use bytes::Bytes;
use http::{HeaderMap, StatusCode};
use std::borrow::Cow;
use std::time::Duration;

/// A successful call.
///
/// # Type Parameters
///
/// * `T` - The type of the decoded payload
///
/// # Examples
///
/// ```no_run
/// use callwire::{Client, Request};
/// use http::Method;
/// use serde::Deserialize;
///
/// #[derive(Deserialize)]
/// struct User {
///     id: u64,
///     name: String,
/// }
///
/// # async fn example() -> Result<(), callwire::Error> {
/// let client = Client::builder()
///     .base_url("https://api.example.com")
///     .build()?;
///
/// let request = Request::builder(Method::GET, "/users/{}").param(123).build()?;
/// let response = client.call::<User>(&request).await?;
///
/// println!("User: {}", response.data.name);
/// println!("Call took {:?} over {} attempt(s)", response.latency, response.attempts);
///
/// if let Some(conn) = &response.connection {
///     println!("reused: {}, waited {:?}", conn.reused, conn.wait);
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct Response<T> {
    /// The decoded payload.
    pub data: T,

    /// The raw response body.
    pub raw_body: Bytes,

    /// The HTTP status code of the response.
    pub status: StatusCode,

    /// The response headers.
    pub headers: HeaderMap,

    /// The total latency of the call, including all retry attempts and
    /// backoff sleeps.
    pub latency: Duration,

    /// The number of attempts made to complete this call.
    pub attempts: usize,

    /// How the final attempt's connection was obtained.
    pub connection: Option<ConnectionRecord>,
}

impl<T> Response<T> {
    /// Maps the payload to a different type, keeping the metadata.
    ///
    /// # Examples
    ///
    /// ```
    /// # use callwire::Response;
    /// # use bytes::Bytes;
    /// # use http::{HeaderMap, StatusCode};
    /// # use std::time::Duration;
    /// let response = Response {
    ///     data: 42,
    ///     raw_body: Bytes::from_static(b"42"),
    ///     status: StatusCode::OK,
    ///     headers: HeaderMap::new(),
    ///     latency: Duration::from_millis(100),
    ///     attempts: 1,
    ///     connection: None,
    /// };
    ///
    /// let string_response = response.map(|n| n.to_string());
    /// assert_eq!(string_response.data, "42");
    /// ```
    pub fn map<U, F>(self, f: F) -> Response<U>
    where
        F: FnOnce(T) -> U,
    {
        Response {
            data: f(self.data),
            raw_body: self.raw_body,
            status: self.status,
            headers: self.headers,
            latency: self.latency,
            attempts: self.attempts,
            connection: self.connection,
        }
    }

    /// Returns `true` if the call needed more than one attempt.
    pub fn was_retried(&self) -> bool {
        self.attempts > 1
    }

    /// Returns a header value by name, if present and valid UTF-8.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)?.to_str().ok()
    }

    /// The raw body as text, with invalid UTF-8 replaced.
    pub fn body_text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.raw_body)
    }
}

impl<T> AsRef<T> for Response<T> {
    fn as_ref(&self) -> &T {
        &self.data
    }
}

impl<T> std::ops::Deref for Response<T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        &self.data
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderValue;

    fn response(attempts: usize) -> Response<Vec<u32>> {
        let mut headers = HeaderMap::new();
        headers.insert("content-type", HeaderValue::from_static("application/json"));
        Response {
            data: vec![1, 2, 3],
            raw_body: Bytes::from_static(b"[1,2,3]"),
            status: StatusCode::OK,
            headers,
            latency: Duration::from_millis(12),
            attempts,
            connection: None,
        }
    }

    #[test]
    fn test_helpers() {
        let single = response(1);
        assert!(!single.was_retried());
        assert_eq!(single.header("content-type"), Some("application/json"));
        assert_eq!(single.header("x-missing"), None);
        assert_eq!(single.body_text(), "[1,2,3]");
        assert_eq!(single.len(), 3);

        let retried = response(3).map(|v| v.iter().sum::<u32>());
        assert!(retried.was_retried());
        assert_eq!(*retried.as_ref(), 6);
    }
}
