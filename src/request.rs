//! Request descriptors.
//!
//! A [`Request`] describes one logical call: method, route template, the
//! resolved URL, body, headers and per-call policy. It is built once with a
//! [`RequestBuilder`] and is immutable afterwards, so the same value can be
//! passed to many concurrent calls.

use crate::trace_context::TraceContext;
use crate::{Error, Result};
use bytes::Bytes;
use http::header::{CONTENT_TYPE, COOKIE};
use http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt::Display;
use std::time::{Duration, Instant};

const JSON_CONTENT_TYPE: &str = "application/json; charset=utf-8";

/// An immutable description of one logical call.
#[derive(Debug, Clone)]
pub struct Request {
    method: Method,
    route: String,
    url: String,
    query: Vec<(String, String)>,
    headers: HeaderMap,
    body: Option<Bytes>,
    timeout: Option<Duration>,
    deadline: Option<Instant>,
    retry_enabled: bool,
    propagate: bool,
    trace_parent: Option<TraceContext>,
    decode_statuses: BTreeSet<u16>,
}

impl Request {
    /// Starts building a request for `route_template`.
    ///
    /// Positional `{}` placeholders in the template are replaced, in order,
    /// by the values given to [`RequestBuilder::param`]. The template itself
    /// is kept as the low-cardinality route label.
    pub fn builder(method: Method, route_template: impl Into<String>) -> RequestBuilder {
        RequestBuilder::new(method, route_template)
    }

    /// The HTTP method.
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// The route template, used as a telemetry label.
    pub fn route(&self) -> &str {
        &self.route
    }

    /// The route with its parameters substituted.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Query parameters, in insertion order.
    pub fn query(&self) -> &[(String, String)] {
        &self.query
    }

    /// Headers set on this request.
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// The encoded body, if any.
    pub fn body(&self) -> Option<&Bytes> {
        self.body.as_ref()
    }

    /// Per-attempt timeout override.
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Caller-supplied deadline for the whole call.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Whether failed attempts may be retried.
    pub fn retry_enabled(&self) -> bool {
        self.retry_enabled
    }

    /// Whether a `traceparent` header is sent with each attempt.
    pub fn propagate(&self) -> bool {
        self.propagate
    }

    /// The parent trace context adopted by the call, if one was given.
    pub fn trace_parent(&self) -> Option<TraceContext> {
        self.trace_parent
    }

    /// Returns `true` if a response with `status` carries a payload to decode.
    ///
    /// Every 2xx except `204` does; other statuses only when registered with
    /// [`RequestBuilder::decode_status`].
    pub fn decodes(&self, status: StatusCode) -> bool {
        (status.is_success() && status != StatusCode::NO_CONTENT)
            || self.decode_statuses.contains(&status.as_u16())
    }
}

/// Builder for [`Request`].
///
/// Setters can be called in any order. Validation happens in
/// [`build`](Self::build): a request that cannot be sent correctly is
/// rejected before any network call.
///
/// # Examples
///
/// ```
/// use callwire::Request;
/// use http::Method;
/// use std::time::Duration;
///
/// # fn example() -> Result<(), callwire::Error> {
/// let request = Request::builder(Method::PUT, "/accounts/{}/limits/{}")
///     .param("acct-7")
///     .param("daily")
///     .json(&serde_json::json!({ "amount": 500 }))
///     .query("dry_run", "true")
///     .timeout(Duration::from_secs(2))
///     .build()?;
///
/// assert_eq!(request.route(), "/accounts/{}/limits/{}");
/// assert_eq!(request.url(), "/accounts/acct-7/limits/daily");
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct RequestBuilder {
    method: Method,
    route: String,
    params: Vec<String>,
    json: Option<std::result::Result<Bytes, String>>,
    raw: Option<Bytes>,
    headers: Vec<(String, String)>,
    query: Vec<(String, String)>,
    cookies: Vec<(String, String)>,
    timeout: Option<Duration>,
    deadline: Option<Instant>,
    retry_enabled: bool,
    propagate: bool,
    trace_parent: Option<String>,
    decode_statuses: BTreeSet<u16>,
}

impl RequestBuilder {
    fn new(method: Method, route: impl Into<String>) -> Self {
        Self {
            method,
            route: route.into(),
            params: Vec::new(),
            json: None,
            raw: None,
            headers: Vec::new(),
            query: Vec::new(),
            cookies: Vec::new(),
            timeout: None,
            deadline: None,
            retry_enabled: true,
            propagate: true,
            trace_parent: None,
            decode_statuses: BTreeSet::new(),
        }
    }

    /// Appends a positional route parameter.
    pub fn param(mut self, value: impl Display) -> Self {
        self.params.push(value.to_string());
        self
    }

    /// Sets a JSON body, sent with `Content-Type: application/json; charset=utf-8`.
    pub fn json<T: Serialize + ?Sized>(mut self, body: &T) -> Self {
        self.json = Some(
            serde_json::to_vec(body)
                .map(Bytes::from)
                .map_err(|e| e.to_string()),
        );
        self
    }

    /// Sets a raw body, sent byte-for-byte with no content type implied.
    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.raw = Some(body.into());
        self
    }

    /// Adds a header. Repeated names are sent as repeated headers.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Adds a query parameter.
    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    /// Adds a cookie. All cookies are sent in a single `Cookie` header.
    pub fn cookie(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.cookies.push((name.into(), value.into()));
        self
    }

    /// Overrides the per-attempt timeout (5 seconds by default).
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Sets a deadline for the whole call, retries included.
    ///
    /// It composes with the client's overall timeout; the earlier one wins.
    pub fn deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Makes exactly one attempt, whatever the outcome.
    pub fn no_retry(mut self) -> Self {
        self.retry_enabled = false;
        self
    }

    /// Stops the `traceparent` header from being sent.
    pub fn no_propagation(mut self) -> Self {
        self.propagate = false;
        self
    }

    /// Continues the trace described by a `traceparent` header value.
    pub fn trace_parent(mut self, traceparent: impl Into<String>) -> Self {
        self.trace_parent = Some(traceparent.into());
        self
    }

    /// Decodes the body of responses with `status` instead of treating them
    /// as errors.
    pub fn decode_status(mut self, status: StatusCode) -> Self {
        self.decode_statuses.insert(status.as_u16());
        self
    }

    /// Validates the descriptor and builds the [`Request`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::Usage`] if both a JSON and a raw body were set, if the
    /// number of parameters does not match the template's placeholders, if a
    /// header is malformed, or if the trace parent cannot be parsed.
    /// Returns [`Error::SerializationFailed`] if the JSON body could not be
    /// serialized.
    pub fn build(self) -> Result<Request> {
        let is_json = self.json.is_some();
        let body = match (self.json, self.raw) {
            (Some(_), Some(_)) => {
                return Err(Error::Usage(
                    "both a JSON body and a raw body were set".to_string(),
                ))
            }
            (Some(json), None) => Some(json.map_err(Error::SerializationFailed)?),
            (None, raw) => raw,
        };

        let url = expand_route(&self.route, &self.params)?;

        let mut headers = HeaderMap::new();
        for (name, value) in &self.headers {
            let name = HeaderName::try_from(name.as_str())
                .map_err(|e| Error::Usage(format!("Invalid header name {:?}: {}", name, e)))?;
            let value = HeaderValue::try_from(value.as_str())
                .map_err(|e| Error::Usage(format!("Invalid value for header {}: {}", name, e)))?;
            headers.append(name, value);
        }
        if !self.cookies.is_empty() {
            let cookie = self
                .cookies
                .iter()
                .map(|(name, value)| format!("{name}={value}"))
                .collect::<Vec<_>>()
                .join("; ");
            let value = HeaderValue::try_from(cookie)
                .map_err(|e| Error::Usage(format!("Invalid cookie: {}", e)))?;
            headers.insert(COOKIE, value);
        }
        if is_json && !headers.contains_key(CONTENT_TYPE) {
            headers.insert(CONTENT_TYPE, HeaderValue::from_static(JSON_CONTENT_TYPE));
        }

        let trace_parent = self
            .trace_parent
            .map(|value| {
                TraceContext::parse(&value)
                    .ok_or_else(|| Error::Usage(format!("Invalid traceparent: {:?}", value)))
            })
            .transpose()?;

        Ok(Request {
            method: self.method,
            route: self.route,
            url,
            query: self.query,
            headers,
            body,
            timeout: self.timeout,
            deadline: self.deadline,
            retry_enabled: self.retry_enabled,
            propagate: self.propagate,
            trace_parent,
            decode_statuses: self.decode_statuses,
        })
    }
}

fn expand_route(template: &str, params: &[String]) -> Result<String> {
    let placeholders = template.matches("{}").count();
    if placeholders != params.len() {
        return Err(Error::Usage(format!(
            "route {:?} has {} placeholder(s) but {} parameter(s) were given",
            template,
            placeholders,
            params.len()
        )));
    }

    let mut url = String::with_capacity(template.len());
    let mut rest = template;
    for param in params {
        // Counted above, so every parameter has a placeholder.
        if let Some((head, tail)) = rest.split_once("{}") {
            url.push_str(head);
            url.push_str(param);
            rest = tail;
        }
    }
    url.push_str(rest);
    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_route_expansion() {
        let request = Request::builder(Method::GET, "/users/{}/orders/{}")
            .param(42)
            .param("ord-9")
            .build()
            .unwrap();
        assert_eq!(request.route(), "/users/{}/orders/{}");
        assert_eq!(request.url(), "/users/42/orders/ord-9");
        assert!(request.retry_enabled());
        assert!(request.propagate());
    }

    #[test]
    fn test_placeholder_mismatch_is_usage_error() {
        let err = Request::builder(Method::GET, "/users/{}")
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::Usage(_)));

        let err = Request::builder(Method::GET, "/users")
            .param(1)
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::Usage(_)));
    }

    #[test]
    fn test_conflicting_bodies() {
        let err = Request::builder(Method::POST, "/upload")
            .json(&serde_json::json!({"a": 1}))
            .body(&b"raw"[..])
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::Usage(_)));

        // Order does not matter.
        let err = Request::builder(Method::POST, "/upload")
            .body(&b"raw"[..])
            .json(&serde_json::json!({"a": 1}))
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::Usage(_)));
    }

    #[test]
    fn test_json_body_sets_content_type() {
        let request = Request::builder(Method::POST, "/things")
            .json(&serde_json::json!({"name": "widget"}))
            .build()
            .unwrap();
        assert_eq!(
            request.headers().get(CONTENT_TYPE).unwrap(),
            "application/json; charset=utf-8"
        );
        assert_eq!(request.body().unwrap().as_ref(), br#"{"name":"widget"}"#);
    }

    #[test]
    fn test_raw_body_has_no_content_type() {
        let request = Request::builder(Method::PUT, "/blob")
            .body(vec![0u8, 1, 2])
            .build()
            .unwrap();
        assert!(request.headers().get(CONTENT_TYPE).is_none());
        assert_eq!(request.body().unwrap().as_ref(), &[0u8, 1, 2]);
    }

    #[test]
    fn test_headers_cookies_and_flags() {
        let request = Request::builder(Method::GET, "/me")
            .header("x-tenant", "a")
            .header("x-tenant", "b")
            .cookie("session", "abc")
            .cookie("theme", "dark")
            .no_retry()
            .no_propagation()
            .decode_status(StatusCode::NOT_FOUND)
            .build()
            .unwrap();
        assert_eq!(request.headers().get_all("x-tenant").iter().count(), 2);
        assert_eq!(request.headers().get(COOKIE).unwrap(), "session=abc; theme=dark");
        assert!(!request.retry_enabled());
        assert!(!request.propagate());
        assert!(request.decodes(StatusCode::NOT_FOUND));
        assert!(request.decodes(StatusCode::CREATED));
        assert!(!request.decodes(StatusCode::NO_CONTENT));
        assert!(!request.decodes(StatusCode::BAD_REQUEST));
    }

    #[test]
    fn test_invalid_header_and_traceparent() {
        let err = Request::builder(Method::GET, "/")
            .header("bad header", "x")
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::Usage(_)));

        let err = Request::builder(Method::GET, "/")
            .trace_parent("not-a-traceparent")
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::Usage(_)));
    }
}
