//! Instrumented connector stack.
//!
//! The pooled transport dials through [`TracedConnector`], which times the
//! whole connect and wraps the resulting stream in a [`TracedConn`]. The inner
//! layers ([`TimedDial`] and [`TimedResolver`]) report their phase timings
//! through a task-local [`PhaseRecorder`] scoped around the connect future, so
//! no extra plumbing is needed through the TLS connector in between.
//!
//! A [`TracedConn`] watches its own reads and writes to learn when it was
//! taken for a request, when that request was fully written, and when the
//! response started to arrive. Its [`ConnTag`] rides along in the response
//! extensions so the attempt that was served by it can read those timestamps.

use crate::error::BoxError;
use crate::pool::PoolGauges;
use hyper::rt::{Read, ReadBufCursor, Write};
use hyper_util::client::legacy::connect::dns::{GaiResolver, Name};
use hyper_util::client::legacy::connect::{Connected, Connection, HttpConnector};
use hyper_util::rt::TokioIo;
use std::collections::HashMap;
use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};
use std::time::{Duration, Instant};
use tokio::net::TcpStream;
use tower_service::Service;

type BoxFuture<T> = Pin<Box<dyn Future<Output = Result<T, BoxError>> + Send>>;

tokio::task_local! {
    static CONNECT_PHASES: Arc<PhaseRecorder>;
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Sub-phase timings of establishing one connection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct ConnectTimings {
    pub(crate) dns: Option<Duration>,
    pub(crate) dial: Option<Duration>,
    pub(crate) tls: Option<Duration>,
    pub(crate) total: Duration,
}

#[derive(Debug, Default)]
struct Phases {
    dns: Option<Duration>,
    tcp_connected: Option<Instant>,
}

/// Collects phase timestamps reported by the inner connector layers.
#[derive(Debug, Default)]
pub(crate) struct PhaseRecorder {
    phases: Mutex<Phases>,
}

impl PhaseRecorder {
    fn record_dns(&self, elapsed: Duration) {
        lock(&self.phases).dns = Some(elapsed);
    }

    fn record_tcp_connected(&self, at: Instant) {
        lock(&self.phases).tcp_connected = Some(at);
    }

    /// Derives the phase timings for a connect that ran from `started` to
    /// `finished`. The TLS phase is whatever followed the TCP handshake.
    pub(crate) fn timings(&self, started: Instant, finished: Instant, secure: bool) -> ConnectTimings {
        let phases = lock(&self.phases);
        let dial = phases.tcp_connected.map(|at| {
            at.saturating_duration_since(started)
                .saturating_sub(phases.dns.unwrap_or_default())
        });
        let tls = if secure {
            phases
                .tcp_connected
                .map(|at| finished.saturating_duration_since(at))
        } else {
            None
        };
        ConnectTimings {
            dns: phases.dns,
            dial,
            tls,
            total: finished.saturating_duration_since(started),
        }
    }
}

/// DNS resolver with static overrides that reports its lookup time.
///
/// Hosts present in the override table never reach the system resolver.
#[derive(Clone, Debug)]
pub(crate) struct TimedResolver {
    system: GaiResolver,
    overrides: Arc<HashMap<String, Vec<SocketAddr>>>,
}

impl TimedResolver {
    pub(crate) fn new(overrides: Arc<HashMap<String, Vec<SocketAddr>>>) -> Self {
        Self {
            system: GaiResolver::new(),
            overrides,
        }
    }
}

impl Service<Name> for TimedResolver {
    type Response = std::vec::IntoIter<SocketAddr>;
    type Error = BoxError;
    type Future = BoxFuture<Self::Response>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.system.poll_ready(cx).map_err(Into::into)
    }

    fn call(&mut self, name: Name) -> Self::Future {
        let pinned = self
            .overrides
            .get(&name.as_str().to_ascii_lowercase())
            .cloned();
        let lookup = match pinned {
            Some(_) => None,
            None => Some(self.system.call(name.clone())),
        };

        Box::pin(async move {
            let started = Instant::now();
            let addrs: Vec<SocketAddr> = match (pinned, lookup) {
                (Some(addrs), _) => addrs,
                (None, Some(lookup)) => lookup.await?.collect(),
                (None, None) => Vec::new(),
            };
            let elapsed = started.elapsed();
            let _ = CONNECT_PHASES.try_with(|phases| phases.record_dns(elapsed));

            if addrs.is_empty() {
                return Err(format!("no addresses resolved for {}", name.as_str()).into());
            }
            tracing::trace!(host = name.as_str(), addrs = addrs.len(), "resolved");
            Ok(addrs.into_iter())
        })
    }
}

/// TCP dialer that marks the instant the socket connected.
#[derive(Clone, Debug)]
pub(crate) struct TimedDial {
    http: HttpConnector<TimedResolver>,
}

impl TimedDial {
    pub(crate) fn new(resolver: TimedResolver, connect_timeout: Duration) -> Self {
        let mut http = HttpConnector::new_with_resolver(resolver);
        http.enforce_http(false);
        http.set_nodelay(true);
        http.set_connect_timeout(Some(connect_timeout));
        Self { http }
    }
}

impl Service<http::Uri> for TimedDial {
    type Response = TokioIo<TcpStream>;
    type Error = BoxError;
    type Future = BoxFuture<Self::Response>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.http.poll_ready(cx).map_err(Into::into)
    }

    fn call(&mut self, dst: http::Uri) -> Self::Future {
        let connecting = self.http.call(dst);
        Box::pin(async move {
            let stream = connecting.await?;
            let _ = CONNECT_PHASES.try_with(|phases| phases.record_tcp_connected(Instant::now()));
            Ok(stream)
        })
    }
}

/// Outermost connector layer: times the connect and wraps the stream.
#[derive(Clone)]
pub(crate) struct TracedConnector<C> {
    inner: C,
    gauges: Arc<PoolGauges>,
}

impl<C> TracedConnector<C> {
    pub(crate) fn new(inner: C, gauges: Arc<PoolGauges>) -> Self {
        Self { inner, gauges }
    }
}

impl<C> Service<http::Uri> for TracedConnector<C>
where
    C: Service<http::Uri>,
    C::Response: Send + 'static,
    C::Error: Into<BoxError>,
    C::Future: Send + 'static,
{
    type Response = TracedConn<C::Response>;
    type Error = BoxError;
    type Future = BoxFuture<Self::Response>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx).map_err(Into::into)
    }

    fn call(&mut self, dst: http::Uri) -> Self::Future {
        let secure = dst
            .scheme_str()
            .is_some_and(|scheme| scheme.eq_ignore_ascii_case("https"));
        let host = authority_of(&dst);
        let phases = Arc::new(PhaseRecorder::default());
        let gauges = Arc::clone(&self.gauges);
        let started = Instant::now();
        let connecting = CONNECT_PHASES.scope(Arc::clone(&phases), self.inner.call(dst));

        Box::pin(async move {
            let stream = connecting.await.map_err(Into::into)?;
            let timings = phases.timings(started, Instant::now(), secure);
            tracing::debug!(
                host = %host,
                dns_ms = timings.dns.map(|d| d.as_millis() as u64),
                dial_ms = timings.dial.map(|d| d.as_millis() as u64),
                tls_ms = timings.tls.map(|d| d.as_millis() as u64),
                total_ms = timings.total.as_millis() as u64,
                "Connection established"
            );
            Ok(TracedConn {
                inner: stream,
                state: Arc::new(ConnState::new(host, timings, gauges)),
            })
        })
    }
}

/// `host:port` of a URI, with the scheme's default port filled in.
pub(crate) fn authority_of(uri: &http::Uri) -> String {
    let host = uri.host().unwrap_or_default();
    let port = uri.port_u16().unwrap_or_else(|| match uri.scheme_str() {
        Some(scheme) if scheme.eq_ignore_ascii_case("https") => 443,
        _ => 80,
    });
    format!("{host}:{port}")
}

/// One use of a connection by one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Lease {
    /// When the request started writing on the connection
    pub(crate) obtained_at: Instant,
    /// Whether the connection had served an earlier request
    pub(crate) reused: bool,
    /// When the connection was last returned to the pool
    pub(crate) idle_since: Option<Instant>,
    /// Last write before the response started
    pub(crate) wrote_at: Option<Instant>,
    /// First read after the request was written
    pub(crate) first_byte_at: Option<Instant>,
}

#[derive(Debug, Default)]
struct Usage {
    uses: u64,
    in_use: bool,
    idle: bool,
    idle_since: Option<Instant>,
    lease: Option<Lease>,
}

/// Shared state of one physical connection.
#[derive(Debug)]
pub(crate) struct ConnState {
    host: String,
    timings: ConnectTimings,
    gauges: Arc<PoolGauges>,
    usage: Mutex<Usage>,
}

impl ConnState {
    pub(crate) fn new(host: String, timings: ConnectTimings, gauges: Arc<PoolGauges>) -> Self {
        Self {
            host,
            timings,
            gauges,
            usage: Mutex::new(Usage::default()),
        }
    }

    fn on_write(&self, at: Instant) {
        let mut usage = lock(&self.usage);
        // HTTP/1.1 does not pipeline, so a write after the response started
        // belongs to the next request even if nobody released this one.
        let handed_over = usage.lease.is_some_and(|l| l.first_byte_at.is_some());
        if !usage.in_use || handed_over {
            let reused = usage.uses > 0;
            if usage.idle {
                self.gauges.connection_reused();
            }
            usage.lease = Some(Lease {
                obtained_at: at,
                reused,
                idle_since: usage.idle_since.filter(|_| usage.idle),
                wrote_at: None,
                first_byte_at: None,
            });
            usage.uses += 1;
            usage.in_use = true;
            usage.idle = false;
        }
        if let Some(lease) = usage.lease.as_mut().filter(|l| l.first_byte_at.is_none()) {
            lease.wrote_at = Some(at);
        }
    }

    fn on_read(&self, at: Instant) {
        let mut usage = lock(&self.usage);
        if !usage.in_use {
            return;
        }
        if let Some(lease) = usage.lease.as_mut() {
            if lease.wrote_at.is_some() && lease.first_byte_at.is_none() {
                lease.first_byte_at = Some(at);
            }
        }
    }

    fn release(&self, obtained_at: Instant, at: Instant) {
        let mut usage = lock(&self.usage);
        let current = usage.lease.map(|l| l.obtained_at);
        if !usage.in_use || current != Some(obtained_at) {
            return;
        }
        usage.in_use = false;
        usage.idle = true;
        usage.idle_since = Some(at);
        self.gauges.connection_idle();
    }

    fn closed(&self) {
        let usage = lock(&self.usage);
        if usage.idle {
            self.gauges.idle_connection_closed();
        }
    }
}

/// Identity of the connection that served a response.
///
/// Found in the response extensions of every exchange made through a
/// [`TracedConnector`].
#[derive(Debug, Clone)]
pub(crate) struct ConnTag(Arc<ConnState>);

impl ConnTag {
    pub(crate) fn host(&self) -> &str {
        &self.0.host
    }

    pub(crate) fn timings(&self) -> ConnectTimings {
        self.0.timings
    }

    /// The current lease, if the connection is serving a request.
    pub(crate) fn lease(&self) -> Option<Lease> {
        let usage = lock(&self.0.usage);
        usage.lease.filter(|_| usage.in_use)
    }

    /// Marks the connection as returned to the pool.
    ///
    /// Call once the response body has been fully read on a keep-alive
    /// connection. Ignored if another request already took the connection
    /// over.
    pub(crate) fn release(&self, lease: &Lease) {
        self.0.release(lease.obtained_at, Instant::now());
    }
}

/// A connection stream that reports its use to a [`ConnState`].
#[derive(Debug)]
pub(crate) struct TracedConn<T> {
    inner: T,
    state: Arc<ConnState>,
}

impl<T> Drop for TracedConn<T> {
    fn drop(&mut self) {
        self.state.closed();
    }
}

impl<T> Read for TracedConn<T>
where
    T: Read + Unpin,
{
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: ReadBufCursor<'_>,
    ) -> Poll<Result<(), std::io::Error>> {
        let this = self.get_mut();
        let polled = Pin::new(&mut this.inner).poll_read(cx, buf);
        if let Poll::Ready(Ok(())) = polled {
            this.state.on_read(Instant::now());
        }
        polled
    }
}

impl<T> Write for TracedConn<T>
where
    T: Write + Unpin,
{
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<Result<usize, std::io::Error>> {
        let this = self.get_mut();
        let polled = Pin::new(&mut this.inner).poll_write(cx, buf);
        if let Poll::Ready(Ok(n)) = polled {
            if n > 0 {
                this.state.on_write(Instant::now());
            }
        }
        polled
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), std::io::Error>> {
        let inner = &mut self.get_mut().inner;
        Pin::new(inner).poll_flush(cx)
    }

    fn poll_shutdown(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Result<(), std::io::Error>> {
        let inner = &mut self.get_mut().inner;
        Pin::new(inner).poll_shutdown(cx)
    }

    fn is_write_vectored(&self) -> bool {
        self.inner.is_write_vectored()
    }

    fn poll_write_vectored(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        bufs: &[std::io::IoSlice<'_>],
    ) -> Poll<Result<usize, std::io::Error>> {
        let this = self.get_mut();
        let polled = Pin::new(&mut this.inner).poll_write_vectored(cx, bufs);
        if let Poll::Ready(Ok(n)) = polled {
            if n > 0 {
                this.state.on_write(Instant::now());
            }
        }
        polled
    }
}

impl<T> Connection for TracedConn<T>
where
    T: Connection,
{
    fn connected(&self) -> Connected {
        self.inner
            .connected()
            .extra(ConnTag(Arc::clone(&self.state)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn state(gauges: &Arc<PoolGauges>) -> Arc<ConnState> {
        Arc::new(ConnState::new(
            "svc.internal:443".to_string(),
            ConnectTimings::default(),
            Arc::clone(gauges),
        ))
    }

    #[test]
    fn test_phase_timings() {
        let recorder = PhaseRecorder::default();
        let started = Instant::now();
        recorder.record_dns(Duration::from_millis(5));
        recorder.record_tcp_connected(started + Duration::from_millis(20));
        let finished = started + Duration::from_millis(50);

        let secure = recorder.timings(started, finished, true);
        assert_eq!(secure.dns, Some(Duration::from_millis(5)));
        assert_eq!(secure.dial, Some(Duration::from_millis(15)));
        assert_eq!(secure.tls, Some(Duration::from_millis(30)));
        assert_eq!(secure.total, Duration::from_millis(50));

        let plain = recorder.timings(started, finished, false);
        assert_eq!(plain.tls, None);
    }

    #[test]
    fn test_lease_lifecycle() {
        let gauges = Arc::new(PoolGauges::default());
        let state = state(&gauges);
        let tag = ConnTag(Arc::clone(&state));
        let t0 = Instant::now();
        assert!(tag.lease().is_none());

        state.on_write(t0);
        state.on_write(t0 + Duration::from_millis(2));
        state.on_read(t0 + Duration::from_millis(9));
        state.on_read(t0 + Duration::from_millis(12));
        let first = tag.lease().unwrap();
        assert!(!first.reused);
        assert_eq!(first.obtained_at, t0);
        assert_eq!(first.wrote_at, Some(t0 + Duration::from_millis(2)));
        assert_eq!(first.first_byte_at, Some(t0 + Duration::from_millis(9)));

        let released = t0 + Duration::from_millis(20);
        state.release(first.obtained_at, released);
        assert!(tag.lease().is_none());
        assert_eq!(gauges.scrape().pool_avail_estimate, 1);

        let t1 = t0 + Duration::from_millis(100);
        state.on_write(t1);
        let second = tag.lease().unwrap();
        assert!(second.reused);
        assert_eq!(second.idle_since, Some(released));
        assert_eq!(gauges.scrape().pool_avail_estimate, 0);
    }

    #[test]
    fn test_handover_without_release() {
        let gauges = Arc::new(PoolGauges::default());
        let state = state(&gauges);
        let tag = ConnTag(Arc::clone(&state));
        let t0 = Instant::now();

        state.on_write(t0);
        state.on_read(t0 + Duration::from_millis(5));
        let first = tag.lease().unwrap();

        // The next request writes before the first one released.
        let t1 = t0 + Duration::from_millis(8);
        state.on_write(t1);
        let second = tag.lease().unwrap();
        assert!(second.reused);
        assert_eq!(second.obtained_at, t1);
        assert_eq!(second.idle_since, None);

        // The late release of the first lease leaves the second untouched.
        tag.release(&first);
        assert_eq!(tag.lease(), Some(second));
        assert_eq!(gauges.scrape().pool_avail_estimate, 0);
    }

    #[test]
    fn test_idle_close_decrements_estimate() {
        let gauges = Arc::new(PoolGauges::default());
        let busy = state(&gauges);
        let idle = state(&gauges);
        let now = Instant::now();

        busy.on_write(now);
        idle.on_write(now);
        idle.release(now, now);
        idle.release(now, now);
        assert_eq!(gauges.scrape().pool_avail_estimate, 1);

        busy.closed();
        assert_eq!(gauges.scrape().pool_avail_estimate, 1);
        idle.closed();
        assert_eq!(gauges.scrape().pool_avail_estimate, 0);
    }

    #[test]
    fn test_authority_defaults_port() {
        let https: http::Uri = "https://api.example.com/x".parse().unwrap();
        let plain: http::Uri = "http://api.example.com:8080/x".parse().unwrap();
        assert_eq!(authority_of(&https), "api.example.com:443");
        assert_eq!(authority_of(&plain), "api.example.com:8080");
    }

    #[tokio::test]
    async fn test_resolver_override_records_dns() {
        let addr: SocketAddr = "127.0.0.1:9000".parse().unwrap();
        let overrides = HashMap::from([("svc.internal".to_string(), vec![addr])]);
        let mut resolver = TimedResolver::new(Arc::new(overrides));
        let phases = Arc::new(PhaseRecorder::default());

        let lookup = resolver.call(Name::from_str("svc.internal").unwrap());
        let addrs: Vec<_> = CONNECT_PHASES
            .scope(Arc::clone(&phases), lookup)
            .await
            .unwrap()
            .collect();

        assert_eq!(addrs, vec![addr]);
        let now = Instant::now();
        assert!(phases.timings(now, now, false).dns.is_some());
    }
}
