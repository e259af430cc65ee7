//! HTTP client with bounded retries, explicit backoff and connection telemetry.
//!
//! The [`Client`] type is the main entry point for making calls.
//! Use [`ClientBuilder`] (or [`Client::new`] with a [`ClientConfig`]) to
//! configure and create clients.

use crate::classify::{self, http_severity, status_class, ExpectedStatuses, StatusClass};
use crate::config::ClientConfig;
use crate::connect::{authority_of, ConnTag};
use crate::cooldown::Cooldown;
use crate::decode::{Decoder, IgnoreBody, JsonDecoder};
use crate::error::HttpError;
use crate::metrics::{MetricsSink, NoopSink, Tag};
use crate::pool::{PoolGauges, PoolSnapshot};
use crate::request::Request;
use crate::retry::{RetryOnRetryable, RetryPredicate, RetryStrategy};
use crate::telemetry::ConnectionRecord;
use crate::trace_context::{TraceContext, TRACEPARENT};
use crate::transport::{default_tls_config, HostLimiter, HyperClient, TransportSettings};
use crate::{Error, Response, Result};
use bytes::Bytes;
use http::header::{ACCEPT, AUTHORIZATION, CONNECTION};
use http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode, Uri};
use http_body_util::{BodyExt, Full};
use serde::{de::DeserializeOwned, Serialize};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, Instant};
use tracing::field::Empty;
use tracing::{Instrument, Span};
use url::Url;

/// Per-attempt timeout used when a request does not set one.
pub const DEFAULT_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(5);

/// An HTTP client for service-to-service calls.
///
/// The client is meant to be created once and shared: it owns the connection
/// pool, the cool-down state and the pool gauges, all of which are scoped to
/// this instance. Cloning is cheap and clones share everything.
///
/// # Examples
///
/// ```no_run
/// use callwire::{Client, Request};
/// use http::Method;
/// use serde::{Deserialize, Serialize};
/// use std::time::Duration;
///
/// #[derive(Serialize)]
/// struct CreateUser {
///     name: String,
/// }
///
/// #[derive(Deserialize)]
/// struct User {
///     id: u64,
///     name: String,
/// }
///
/// # async fn example() -> Result<(), callwire::Error> {
/// let client = Client::builder()
///     .name("users")
///     .base_url("https://users.internal")
///     .auth_token("s3cr3t")
///     .timeout(Duration::from_secs(10))
///     .build()?;
///
/// let request = Request::builder(Method::GET, "/users/{}").param(123).build()?;
/// let user = client.call::<User>(&request).await?;
/// println!("User: {}", user.data.name);
///
/// let created: callwire::Response<User> = client
///     .post("/users", &CreateUser { name: "Alice".to_string() })
///     .await?;
/// println!("Created user with ID: {}", created.data.id);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    name: String,
    base_url: Option<Url>,
    default_headers: HeaderMap,
    timeout: Option<Duration>,
    retry_strategy: RetryStrategy,
    retry_predicate: Box<dyn RetryPredicate>,
    expected: ExpectedStatuses,
    cooldown: Cooldown,
    limiter: HostLimiter,
    gauges: Arc<PoolGauges>,
    metrics: Arc<dyn MetricsSink>,
    connection_telemetry: bool,
    settings: TransportSettings,
    transport: RwLock<HyperClient>,
}

impl ClientInner {
    fn transport(&self) -> HyperClient {
        self.transport
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

/// Where a request goes.
struct Target {
    uri: Uri,
    host: String,
    pool_key: String,
}

/// One physical attempt within a call.
struct AttemptPlan<'a> {
    request: &'a Request,
    target: &'a Target,
    tags: &'a [Tag],
    number: usize,
    trace: TraceContext,
    deadline: Option<Instant>,
    call_deadline: Option<Instant>,
    budget: Duration,
}

impl Client {
    /// Creates a client from plain configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConfigurationError`] or [`Error::InvalidUrl`] if the
    /// configuration is invalid.
    pub fn new(config: ClientConfig) -> Result<Self> {
        ClientBuilder::from_config(config).build()
    }

    /// Creates a new `ClientBuilder` for configuring a client.
    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    /// The client's name, used to label telemetry.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Makes a call and decodes the payload as JSON.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use callwire::{Client, Request};
    /// use http::Method;
    /// use serde::Deserialize;
    ///
    /// #[derive(Deserialize)]
    /// struct SearchResults { results: Vec<String> }
    ///
    /// # async fn example() -> Result<(), callwire::Error> {
    /// let client = Client::builder().base_url("https://api.example.com").build()?;
    ///
    /// let request = Request::builder(Method::POST, "/search")
    ///     .json(&serde_json::json!({ "query": "rust" }))
    ///     .build()?;
    ///
    /// let response = client.call::<SearchResults>(&request).await?;
    /// println!("Found {} results", response.data.results.len());
    /// # Ok(())
    /// # }
    /// ```
    pub async fn call<T>(&self, request: &Request) -> Result<Response<T>>
    where
        T: DeserializeOwned,
    {
        self.call_with(request, &JsonDecoder).await
    }

    /// Makes a call and discards the payload.
    pub async fn send(&self, request: &Request) -> Result<Response<()>> {
        self.call_with(request, &IgnoreBody).await
    }

    /// Makes a call, decoding the payload with `decoder`.
    ///
    /// Runs up to as many attempts as the retry strategy and the call
    /// deadline allow. Before each attempt the client's cool-down is checked;
    /// while it is active the call fails with [`Error::ExplicitBackoff`]
    /// without contacting the server.
    pub async fn call_with<T, D>(&self, request: &Request, decoder: &D) -> Result<Response<T>>
    where
        D: Decoder<T> + ?Sized,
    {
        let started = Instant::now();
        let target = self.target(request)?;
        let parent = request.trace_parent().unwrap_or_else(TraceContext::new_root);
        let tags = self.tags(request, &target.host);

        let span = tracing::info_span!(
            "http.call",
            client = %self.inner.name,
            method = %request.method(),
            route = request.route(),
            trace_id = %parent.trace_id(),
            attempts = Empty,
            status = Empty,
            severity = Empty,
            error = Empty,
        );
        let result = self
            .run(request, decoder, &target, &tags, started, parent)
            .instrument(span.clone())
            .await;

        let (attempts, status) = match &result {
            Ok(response) => (response.attempts, Some(response.status)),
            Err(err) => (err.attempts().unwrap_or(0), err.status()),
        };
        span.record("attempts", attempts);

        let mut call_tags = tags;
        if let Some(status) = status {
            span.record("status", status.as_u16());
            call_tags.push(Tag::new("status", status.as_u16().to_string()));
        }
        if let Err(err) = &result {
            let severity = err.severity();
            span.record("severity", severity.as_str());
            span.record("error", tracing::field::display(err));
            call_tags.push(Tag::new("severity", severity.as_str()));
            if severity.is_failure() {
                tracing::warn!(parent: &span, error = %err, attempts, "Call failed");
            } else {
                tracing::debug!(parent: &span, error = %err, attempts, "Call ended with an expected condition");
            }
        }

        let metrics = self.inner.metrics.as_ref();
        metrics.timing("http_client.call.duration", started.elapsed(), &call_tags, 1.0);
        metrics.count("http_client.call.attempts", attempts as i64, &call_tags, 1.0);

        result
    }

    async fn run<T, D>(
        &self,
        request: &Request,
        decoder: &D,
        target: &Target,
        tags: &[Tag],
        started: Instant,
        parent: TraceContext,
    ) -> Result<Response<T>>
    where
        D: Decoder<T> + ?Sized,
    {
        let inner = &self.inner;
        let deadline = call_deadline(started, inner.timeout, request.deadline());
        let mut attempt = 0;

        loop {
            let now = Instant::now();
            if let Some(remaining) = inner.cooldown.remaining(now) {
                tracing::warn!(
                    remaining_ms = remaining.as_millis() as u64,
                    attempts = attempt,
                    "Explicit backoff in effect; not contacting the server"
                );
                return Err(Error::ExplicitBackoff {
                    method: request.method().clone(),
                    route: request.route().to_string(),
                    remaining,
                    attempts: attempt,
                });
            }
            if deadline.is_some_and(|d| now >= d) {
                return Err(Error::DeadlineExceeded {
                    method: request.method().clone(),
                    route: request.route().to_string(),
                    attempts: attempt,
                });
            }

            attempt += 1;
            let budget = request.timeout().unwrap_or(DEFAULT_ATTEMPT_TIMEOUT);
            let plan = AttemptPlan {
                request,
                target,
                tags,
                number: attempt,
                trace: parent.child(),
                deadline: earliest(now.checked_add(budget), deadline),
                call_deadline: deadline,
                budget,
            };

            let error = match self.attempt(&plan, decoder).await {
                Ok(mut response) => {
                    response.latency = started.elapsed();
                    return Ok(response);
                }
                Err(error) => error,
            };

            let retry = request.retry_enabled()
                && error.is_retryable()
                && inner.retry_predicate.should_retry(&error, attempt);
            if !retry {
                return Err(classify::conclude(error, &inner.expected));
            }
            let Some(delay) = inner.retry_strategy.delay_for_attempt(attempt) else {
                tracing::debug!(attempts = attempt, "Retries exhausted");
                return Err(classify::conclude(error, &inner.expected));
            };
            let resume_at = Instant::now().checked_add(delay);
            if deadline.is_some_and(|d| resume_at.map_or(true, |at| at >= d)) {
                tracing::debug!(
                    attempts = attempt,
                    delay_ms = delay.as_millis() as u64,
                    "Next retry would cross the call deadline"
                );
                return Err(classify::conclude(error, &inner.expected));
            }

            tracing::warn!(
                error = %error,
                attempt,
                delay_ms = delay.as_millis() as u64,
                "Retrying request after delay"
            );
            tokio::time::sleep(delay).await;
        }
    }

    async fn attempt<T, D>(&self, plan: &AttemptPlan<'_>, decoder: &D) -> Result<Response<T>>
    where
        D: Decoder<T> + ?Sized,
    {
        let span = tracing::debug_span!(
            "http.attempt",
            attempt = plan.number,
            conn.reused = Empty,
            conn.idle = Empty,
            conn.idle_ms = Empty,
            conn.starved = Empty,
            conn.delayed = Empty,
            conn.wait_ms = Empty,
            conn.dns_ms = Empty,
            conn.dial_ms = Empty,
            conn.tls_ms = Empty,
            req.send_ms = Empty,
            resp.first_byte_ms = Empty,
            status = Empty,
        );

        let exchange = self.exchange(plan, decoder, &span);
        let Some(deadline) = plan.deadline else {
            return exchange.instrument(span.clone()).await;
        };
        match tokio::time::timeout_at(deadline.into(), exchange)
            .instrument(span.clone())
            .await
        {
            Ok(result) => result,
            Err(_) if plan.call_deadline.is_some_and(|d| deadline >= d) => {
                Err(Error::DeadlineExceeded {
                    method: plan.request.method().clone(),
                    route: plan.request.route().to_string(),
                    attempts: plan.number,
                })
            }
            Err(_) => Err(Error::Timeout {
                method: plan.request.method().clone(),
                route: plan.request.route().to_string(),
                attempts: plan.number,
                after: plan.budget,
            }),
        }
    }

    async fn exchange<T, D>(
        &self,
        plan: &AttemptPlan<'_>,
        decoder: &D,
        span: &Span,
    ) -> Result<Response<T>>
    where
        D: Decoder<T> + ?Sized,
    {
        let inner = &self.inner;
        let request = plan.request;
        let http_request = self.http_request(plan)?;
        let network_error = |connect: bool, source: crate::error::BoxError| Error::Network {
            method: request.method().clone(),
            route: request.route().to_string(),
            attempts: plan.number,
            connect,
            source,
        };

        tracing::debug!(
            method = %request.method(),
            url = %plan.target.uri,
            attempt = plan.number,
            "Executing HTTP request"
        );

        let requested_at = Instant::now();
        let permit = inner.limiter.acquire(&plan.target.pool_key).await?;
        let _in_flight = inner.gauges.enter_in_flight();

        let response = inner
            .transport()
            .request(http_request)
            .await
            .map_err(|e| network_error(e.is_connect(), Box::new(e)))?;
        let (parts, body) = response.into_parts();

        let conn = parts.extensions.get::<ConnTag>().cloned();
        let lease = conn.as_ref().and_then(ConnTag::lease);
        let connection = conn.as_ref().zip(lease.as_ref()).map(|(tag, lease)| {
            ConnectionRecord::classify(tag.host(), requested_at, lease, &tag.timings())
        });
        if let Some(record) = connection.as_ref().filter(|_| inner.connection_telemetry) {
            record.record_on(span);
            record.emit(inner.metrics.as_ref(), plan.tags);
        }

        let body = body
            .collect()
            .await
            .map_err(|e| network_error(false, Box::new(e)))?
            .to_bytes();
        if let (Some(tag), Some(lease)) = (&conn, &lease) {
            if keeps_alive(&parts.headers) {
                tag.release(lease);
            }
        }
        drop(permit);

        let status = parts.status;
        let elapsed = requested_at.elapsed();
        span.record("status", status.as_u16());
        let mut attempt_tags = plan.tags.to_vec();
        attempt_tags.push(Tag::new("status", status.as_u16().to_string()));
        inner
            .metrics
            .timing("http_client.attempt.duration", elapsed, &attempt_tags, 1.0);

        tracing::info!(
            status = status.as_u16(),
            latency_ms = elapsed.as_millis() as u64,
            attempt = plan.number,
            "Received HTTP response"
        );

        if status == StatusCode::TOO_MANY_REQUESTS {
            let window = inner.cooldown.observe(&parts.headers, Instant::now());
            tracing::warn!(
                window_ms = window.as_millis() as u64,
                "Server signaled overload; cooling down"
            );
        }

        self.outcome(plan, decoder, status, parts.headers, body, connection)
    }

    /// Turns a completed exchange into the attempt's result.
    fn outcome<T, D>(
        &self,
        plan: &AttemptPlan<'_>,
        decoder: &D,
        status: StatusCode,
        headers: HeaderMap,
        body: Bytes,
        connection: Option<ConnectionRecord>,
    ) -> Result<Response<T>>
    where
        D: Decoder<T> + ?Sized,
    {
        let request = plan.request;
        let class = status_class(status);

        if class == StatusClass::NoContent {
            return Err(Error::NoContent {
                method: request.method().clone(),
                route: request.route().to_string(),
                attempts: plan.number,
            });
        }

        if request.decodes(status) {
            return match decoder.decode(status, &body) {
                Ok(data) => Ok(Response {
                    data,
                    raw_body: body,
                    status,
                    headers,
                    latency: Duration::ZERO,
                    attempts: plan.number,
                    connection,
                }),
                Err(e) => {
                    let raw_response = String::from_utf8_lossy(&body).into_owned();
                    tracing::error!(
                        error = %e,
                        raw_response = %raw_response,
                        "Failed to decode response"
                    );
                    Err(Error::DeserializationFailed {
                        method: request.method().clone(),
                        route: request.route().to_string(),
                        status,
                        attempts: plan.number,
                        raw_response,
                        serde_error: e.to_string(),
                    })
                }
            };
        }

        let raw_response = String::from_utf8_lossy(&body).into_owned();
        if class == StatusClass::Retryable {
            tracing::warn!(status = status.as_u16(), response = %raw_response, "Server error (5xx)");
        } else {
            tracing::debug!(status = status.as_u16(), response = %raw_response, "Request rejected");
        }

        Err(Error::Http(Box::new(HttpError {
            method: request.method().clone(),
            route: request.route().to_string(),
            status,
            attempts: plan.number,
            retries_concluded: false,
            severity: http_severity(status, false, &self.inner.expected),
            raw_response,
            headers,
        })))
    }

    fn http_request(&self, plan: &AttemptPlan<'_>) -> Result<http::Request<Full<Bytes>>> {
        let request = plan.request;
        let mut headers = self.inner.default_headers.clone();
        headers.extend(request.headers().clone());
        if request.propagate() {
            let value = HeaderValue::try_from(plan.trace.to_traceparent())
                .map_err(|e| Error::Usage(format!("Invalid traceparent: {}", e)))?;
            headers.insert(HeaderName::from_static(TRACEPARENT), value);
        }

        let body = request.body().cloned().unwrap_or_default();
        let mut http_request = http::Request::new(Full::new(body));
        *http_request.method_mut() = request.method().clone();
        *http_request.uri_mut() = plan.target.uri.clone();
        *http_request.headers_mut() = headers;
        Ok(http_request)
    }

    fn target(&self, request: &Request) -> Result<Target> {
        let mut url = match Url::parse(request.url()) {
            Ok(url) => url,
            Err(url::ParseError::RelativeUrlWithoutBase) => {
                let base = self.inner.base_url.as_ref().ok_or_else(|| {
                    Error::ConfigurationError(format!(
                        "No base URL configured for relative route {:?}",
                        request.url()
                    ))
                })?;
                Url::parse(&join_url(base, request.url()))?
            }
            Err(e) => return Err(e.into()),
        };

        if !request.query().is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in request.query() {
                pairs.append_pair(key, value);
            }
        }

        if !matches!(url.scheme(), "http" | "https") {
            return Err(Error::Usage(format!("Unsupported URL scheme: {}", url)));
        }
        let uri: Uri = url
            .as_str()
            .parse()
            .map_err(|e| Error::Usage(format!("Invalid URI {}: {}", url, e)))?;
        let host = authority_of(&uri);
        let pool_key = format!("{}://{}", url.scheme(), host);
        Ok(Target {
            uri,
            host,
            pool_key,
        })
    }

    fn tags(&self, request: &Request, host: &str) -> Vec<Tag> {
        vec![
            Tag::new("client", self.inner.name.as_str()),
            Tag::new("route", request.route()),
            Tag::new("method", request.method().as_str()),
            Tag::new("host", host),
        ]
    }

    /// Time left in the explicit-backoff window, if one is active.
    pub fn cooldown_remaining(&self) -> Option<Duration> {
        self.inner.cooldown.remaining(Instant::now())
    }

    /// When the server last signaled overload.
    pub fn last_throttled_at(&self) -> Option<Instant> {
        self.inner.cooldown.last_throttled_at()
    }

    /// Scrapes the pool gauges. Restarts the in-flight maximum.
    pub fn pool_gauges(&self) -> PoolSnapshot {
        self.inner.gauges.scrape()
    }

    /// Scrapes the pool gauges and pushes them to the metrics sink.
    pub fn report_pool_gauges(&self) -> PoolSnapshot {
        let tags = [Tag::new("client", self.inner.name.as_str())];
        self.inner.gauges.report(self.inner.metrics.as_ref(), &tags)
    }

    /// Drops idle pooled connections.
    ///
    /// Attempts in flight keep the connection they are using.
    pub fn close_idle_connections(&self) {
        let fresh = self.inner.settings.build();
        let stale = std::mem::replace(
            &mut *self
                .inner
                .transport
                .write()
                .unwrap_or_else(PoisonError::into_inner),
            fresh,
        );
        drop(stale);
        tracing::debug!(client = %self.inner.name, "Closed idle connections");
    }

    /// Makes a GET request to `route` and decodes the JSON payload.
    ///
    /// The route is used both as the telemetry label and as the URL.
    pub async fn get<T>(&self, route: impl Into<String>) -> Result<Response<T>>
    where
        T: DeserializeOwned,
    {
        let request = Request::builder(Method::GET, route).build()?;
        self.call(&request).await
    }

    /// Makes a POST request to `route` with a JSON body.
    pub async fn post<B, T>(&self, route: impl Into<String>, body: &B) -> Result<Response<T>>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let request = Request::builder(Method::POST, route).json(body).build()?;
        self.call(&request).await
    }

    /// Makes a PUT request to `route` with a JSON body.
    pub async fn put<B, T>(&self, route: impl Into<String>, body: &B) -> Result<Response<T>>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let request = Request::builder(Method::PUT, route).json(body).build()?;
        self.call(&request).await
    }

    /// Makes a PATCH request to `route` with a JSON body.
    pub async fn patch<B, T>(&self, route: impl Into<String>, body: &B) -> Result<Response<T>>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let request = Request::builder(Method::PATCH, route).json(body).build()?;
        self.call(&request).await
    }

    /// Makes a DELETE request to `route`.
    pub async fn delete<T>(&self, route: impl Into<String>) -> Result<Response<T>>
    where
        T: DeserializeOwned,
    {
        let request = Request::builder(Method::DELETE, route).build()?;
        self.call(&request).await
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("name", &self.inner.name)
            .field("base_url", &self.inner.base_url.as_ref().map(Url::as_str))
            .finish_non_exhaustive()
    }
}

/// Earliest of the client timeout (if any) and the caller's deadline.
fn call_deadline(
    started: Instant,
    timeout: Option<Duration>,
    requested: Option<Instant>,
) -> Option<Instant> {
    earliest(timeout.and_then(|t| started.checked_add(t)), requested)
}

/// The earlier of two optional bounds; a missing bound does not constrain.
fn earliest(a: Option<Instant>, b: Option<Instant>) -> Option<Instant> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, b) => a.or(b),
    }
}

fn join_url(base: &Url, route: &str) -> String {
    format!(
        "{}/{}",
        base.as_str().trim_end_matches('/'),
        route.trim_start_matches('/')
    )
}

fn keeps_alive(headers: &HeaderMap) -> bool {
    !headers
        .get_all(CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .any(|token| token.trim().eq_ignore_ascii_case("close"))
}

/// Builder for configuring and creating a [`Client`].
///
/// # Examples
///
/// ```no_run
/// use callwire::{ClientBuilder, RetryStrategy};
/// use std::time::Duration;
///
/// # async fn example() -> Result<(), callwire::Error> {
/// let client = ClientBuilder::new()
///     .name("inventory")
///     .base_url("https://inventory.internal/v2")
///     .timeout(Duration::from_secs(30))
///     .max_connections_per_host(4)
///     .retry_strategy(RetryStrategy::ExponentialBackoff {
///         initial_delay: Duration::from_millis(100),
///         max_delay: Duration::from_secs(10),
///         max_retries: Some(3),
///         jitter: true,
///     })
///     .default_header("User-Agent", "inventory-sync/1.0")?
///     .build()?;
/// # Ok(())
/// # }
/// ```
pub struct ClientBuilder {
    config: ClientConfig,
    default_headers: HeaderMap,
    retry_strategy: RetryStrategy,
    retry_predicate: Option<Box<dyn RetryPredicate>>,
    metrics_sink: Option<Arc<dyn MetricsSink>>,
    tls_config: Option<rustls::ClientConfig>,
    overrides: HashMap<String, Vec<SocketAddr>>,
}

impl ClientBuilder {
    /// Creates a new `ClientBuilder` with default settings.
    pub fn new() -> Self {
        Self::from_config(ClientConfig::default())
    }

    /// Creates a builder starting from `config`.
    pub fn from_config(config: ClientConfig) -> Self {
        Self {
            config,
            default_headers: HeaderMap::new(),
            retry_strategy: RetryStrategy::default(),
            retry_predicate: None,
            metrics_sink: None,
            tls_config: None,
            overrides: HashMap::new(),
        }
    }

    /// Sets the name used to label telemetry.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.config.name = name.into();
        self
    }

    /// Sets the base URL joined with relative request URLs.
    ///
    /// The URL is validated by [`build`](Self::build).
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.config.base_url = Some(url.into());
        self
    }

    /// Sends `token` with every request, as a bearer token unless
    /// [`auth_header`](Self::auth_header) names another header.
    pub fn auth_token(mut self, token: impl Into<String>) -> Self {
        self.config.auth_token = Some(token.into());
        self
    }

    /// Sends the auth token raw in header `name`.
    pub fn auth_header(mut self, name: impl Into<String>) -> Self {
        self.config.auth_header = Some(name.into());
        self
    }

    /// Sets the `Accept` header for every request.
    pub fn accept_type(mut self, accept: impl Into<String>) -> Self {
        self.config.accept_type = Some(accept.into());
        self
    }

    /// Sets the overall budget for all attempts of one call. Zero means
    /// retry until the strategy gives up.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = timeout;
        self
    }

    /// Caps concurrent requests and pooled connections per destination.
    pub fn max_connections_per_host(mut self, max: usize) -> Self {
        self.config.max_connections_per_host = max;
        self
    }

    /// Sets the TCP connect timeout.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = timeout;
        self
    }

    /// Sets how long idle pooled connections are kept.
    pub fn pool_idle_timeout(mut self, timeout: Duration) -> Self {
        self.config.pool_idle_timeout = timeout;
        self
    }

    /// Sets the cool-down applied after a `429` without `Retry-After`.
    pub fn cooldown_window(mut self, window: Duration) -> Self {
        self.config.cooldown_window = window;
        self
    }

    /// Sets which statuses count as expected once retrying has concluded.
    pub fn expected_statuses(mut self, statuses: ExpectedStatuses) -> Self {
        self.config.expected_statuses = statuses;
        self
    }

    /// Enables pushing connection records to the metrics sink and spans.
    pub fn connection_telemetry(mut self, enabled: bool) -> Self {
        self.config.connection_telemetry = enabled;
        self
    }

    /// Sets the retry strategy for failed attempts.
    pub fn retry_strategy(mut self, strategy: RetryStrategy) -> Self {
        self.retry_strategy = strategy;
        self
    }

    /// Sets a custom retry predicate.
    ///
    /// By default, every error for which `Error::is_retryable()` holds is
    /// retried.
    pub fn retry_predicate(mut self, predicate: Box<dyn RetryPredicate>) -> Self {
        self.retry_predicate = Some(predicate);
        self
    }

    /// Sets the metrics sink. Metrics are dropped by default.
    pub fn metrics_sink(mut self, sink: Arc<dyn MetricsSink>) -> Self {
        self.metrics_sink = Some(sink);
        self
    }

    /// Uses a custom rustls configuration instead of the webpki roots.
    pub fn tls_config(mut self, config: rustls::ClientConfig) -> Self {
        self.tls_config = Some(config);
        self
    }

    /// Resolves `host` to `addr` instead of asking DNS. Repeat to add more
    /// addresses for the same host.
    pub fn resolve(mut self, host: impl AsRef<str>, addr: SocketAddr) -> Self {
        self.overrides
            .entry(host.as_ref().to_ascii_lowercase())
            .or_default()
            .push(addr);
        self
    }

    /// Adds a default header that will be included in all requests.
    ///
    /// # Errors
    ///
    /// Returns an error if the header name or value is invalid.
    pub fn default_header(mut self, name: impl AsRef<str>, value: impl AsRef<str>) -> Result<Self> {
        let name = HeaderName::try_from(name.as_ref())
            .map_err(|e| Error::ConfigurationError(format!("Invalid header name: {}", e)))?;
        let value = HeaderValue::try_from(value.as_ref())
            .map_err(|e| Error::ConfigurationError(format!("Invalid header value: {}", e)))?;
        self.default_headers.insert(name, value);
        Ok(self)
    }

    /// Builds the configured `Client`.
    ///
    /// # Errors
    ///
    /// Returns an error if the base URL is invalid, if the auth or accept
    /// settings do not form valid headers, if no connections per host are
    /// allowed, or if TLS cannot be set up.
    pub fn build(self) -> Result<Client> {
        let config = self.config;

        let base_url = config.base_url.as_deref().map(Url::parse).transpose()?;
        if let Some(url) = &base_url {
            if !matches!(url.scheme(), "http" | "https") {
                return Err(Error::ConfigurationError(format!(
                    "Unsupported base URL scheme: {}",
                    url.scheme()
                )));
            }
        }
        if config.max_connections_per_host == 0 {
            return Err(Error::ConfigurationError(
                "max_connections_per_host must be at least 1".to_string(),
            ));
        }

        let mut default_headers = self.default_headers;
        if let Some(accept) = &config.accept_type {
            let value = HeaderValue::try_from(accept.as_str())
                .map_err(|e| Error::ConfigurationError(format!("Invalid accept type: {}", e)))?;
            default_headers.insert(ACCEPT, value);
        }
        if let Some(token) = &config.auth_token {
            let (name, raw) = match &config.auth_header {
                Some(header) => (
                    HeaderName::try_from(header.as_str()).map_err(|e| {
                        Error::ConfigurationError(format!("Invalid auth header name: {}", e))
                    })?,
                    token.clone(),
                ),
                None => (AUTHORIZATION, format!("Bearer {}", token)),
            };
            let mut value = HeaderValue::try_from(raw)
                .map_err(|e| Error::ConfigurationError(format!("Invalid auth token: {}", e)))?;
            value.set_sensitive(true);
            default_headers.insert(name, value);
        }

        let tls = match self.tls_config {
            Some(tls) => tls,
            None => default_tls_config()?,
        };
        let gauges = Arc::new(PoolGauges::default());
        let settings = TransportSettings {
            connect_timeout: config.connect_timeout,
            pool_idle_timeout: config.pool_idle_timeout,
            max_idle_per_host: config.max_connections_per_host,
            tls: Arc::new(tls),
            overrides: Arc::new(self.overrides),
            gauges: Arc::clone(&gauges),
        };
        let transport = settings.build();

        tracing::debug!(
            client = %config.name,
            base_url = ?config.base_url,
            max_connections_per_host = config.max_connections_per_host,
            "Built HTTP client"
        );

        Ok(Client {
            inner: Arc::new(ClientInner {
                name: config.name,
                base_url,
                default_headers,
                timeout: Some(config.timeout).filter(|t| !t.is_zero()),
                retry_strategy: self.retry_strategy,
                retry_predicate: self
                    .retry_predicate
                    .unwrap_or_else(|| Box::new(RetryOnRetryable)),
                expected: config.expected_statuses,
                cooldown: Cooldown::new(config.cooldown_window),
                limiter: HostLimiter::new(config.max_connections_per_host),
                gauges,
                metrics: self.metrics_sink.unwrap_or_else(|| Arc::new(NoopSink)),
                connection_telemetry: config.connection_telemetry,
                settings,
                transport: RwLock::new(transport),
            }),
        })
    }
}

impl Default for ClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}
