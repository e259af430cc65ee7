//! Connection acquisition records.
//!
//! Every attempt that reached the transport gets a [`ConnectionRecord`]
//! describing how its connection was obtained. The record is attached to the
//! attempt span and, when connection telemetry is enabled, pushed to the
//! metrics sink.

use crate::connect::{ConnectTimings, Lease};
use crate::metrics::{MetricsSink, Tag};
use std::time::{Duration, Instant};
use tracing::Span;

/// Internal wait above which an acquisition counts as delayed.
pub const DELAY_THRESHOLD: Duration = Duration::from_millis(10);

/// How the connection that served an attempt was obtained.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionRecord {
    /// Remote `host:port`
    pub host: String,
    /// The connection had served an earlier request
    pub reused: bool,
    /// The connection was sitting idle in the pool when the attempt asked
    /// for one
    pub was_idle: bool,
    /// How long it had been idle
    pub idle_for: Option<Duration>,
    /// Reused without ever being idle: it was handed over from another
    /// request while this one waited, so the pool size was the limit
    pub starved: bool,
    /// Internal wait exceeded [`DELAY_THRESHOLD`]
    pub delayed: bool,
    /// Time between asking for a connection and getting one, excluding the
    /// time spent establishing a new connection
    pub wait: Duration,
    /// DNS lookup, for a new connection to a named host
    pub dns: Option<Duration>,
    /// TCP connect, for a new connection
    pub dial: Option<Duration>,
    /// TLS handshake, for a new secure connection
    pub tls: Option<Duration>,
    /// From connection obtained to request fully written
    pub request_send: Option<Duration>,
    /// From request fully written to first response byte
    pub first_byte: Option<Duration>,
}

impl ConnectionRecord {
    /// Classifies the lease an attempt got, given when it asked for a
    /// connection.
    pub(crate) fn classify(
        host: &str,
        requested_at: Instant,
        lease: &Lease,
        timings: &ConnectTimings,
    ) -> Self {
        let waited = lease.obtained_at.saturating_duration_since(requested_at);

        let (wait, was_idle, idle_for, dns, dial, tls) = if lease.reused {
            let was_idle = lease.idle_since.is_some_and(|at| at <= requested_at);
            let idle_for = lease
                .idle_since
                .filter(|_| was_idle)
                .map(|at| lease.obtained_at.saturating_duration_since(at));
            (waited, was_idle, idle_for, None, None, None)
        } else {
            (
                waited.saturating_sub(timings.total),
                false,
                None,
                timings.dns,
                timings.dial,
                timings.tls,
            )
        };

        Self {
            host: host.to_string(),
            reused: lease.reused,
            was_idle,
            idle_for,
            starved: lease.reused && !was_idle,
            delayed: wait > DELAY_THRESHOLD,
            wait,
            dns,
            dial,
            tls,
            request_send: lease
                .wrote_at
                .map(|at| at.saturating_duration_since(lease.obtained_at)),
            first_byte: lease
                .wrote_at
                .zip(lease.first_byte_at)
                .map(|(wrote, first)| first.saturating_duration_since(wrote)),
        }
    }

    /// Fills the connection fields of an attempt span.
    pub(crate) fn record_on(&self, span: &Span) {
        span.record("conn.reused", self.reused);
        span.record("conn.idle", self.was_idle);
        span.record("conn.starved", self.starved);
        span.record("conn.delayed", self.delayed);
        span.record("conn.wait_ms", millis(self.wait));
        if let Some(idle) = self.idle_for {
            span.record("conn.idle_ms", millis(idle));
        }
        if let Some(dns) = self.dns {
            span.record("conn.dns_ms", millis(dns));
        }
        if let Some(dial) = self.dial {
            span.record("conn.dial_ms", millis(dial));
        }
        if let Some(tls) = self.tls {
            span.record("conn.tls_ms", millis(tls));
        }
        if let Some(send) = self.request_send {
            span.record("req.send_ms", millis(send));
        }
        if let Some(first_byte) = self.first_byte {
            span.record("resp.first_byte_ms", millis(first_byte));
        }
    }

    /// Pushes the record to a metrics sink.
    pub(crate) fn emit(&self, sink: &dyn MetricsSink, tags: &[Tag]) {
        let mut obtained = tags.to_vec();
        obtained.extend([
            Tag::new("reused", self.reused.to_string()),
            Tag::new("idle", self.was_idle.to_string()),
            Tag::new("starved", self.starved.to_string()),
            Tag::new("delayed", self.delayed.to_string()),
        ]);
        sink.count("http_client.conn.obtained", 1, &obtained, 1.0);
        sink.timing("http_client.conn.wait", self.wait, tags, 1.0);

        let optional = [
            ("http_client.conn.idle", self.idle_for),
            ("http_client.conn.dns", self.dns),
            ("http_client.conn.dial", self.dial),
            ("http_client.conn.tls", self.tls),
            ("http_client.request.send", self.request_send),
            ("http_client.response.first_byte", self.first_byte),
        ];
        for (name, value) in optional {
            if let Some(value) = value {
                sink.timing(name, value, tags, 1.0);
            }
        }
    }
}

fn millis(d: Duration) -> f64 {
    d.as_secs_f64() * 1_000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::{InMemorySink, MetricValue};

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    fn lease(base: Instant, obtained: u64, reused: bool, idle_since: Option<Instant>) -> Lease {
        Lease {
            obtained_at: base + ms(obtained),
            reused,
            idle_since,
            wrote_at: Some(base + ms(obtained + 1)),
            first_byte_at: Some(base + ms(obtained + 31)),
        }
    }

    #[test]
    fn test_reused_idle_connection() {
        let base = Instant::now() + ms(1_000);
        let idle_since = base - ms(500);
        let record = ConnectionRecord::classify(
            "api:443",
            base,
            &lease(base, 1, true, Some(idle_since)),
            &ConnectTimings::default(),
        );

        assert!(record.reused);
        assert!(record.was_idle);
        assert!(!record.starved);
        assert!(!record.delayed);
        assert_eq!(record.idle_for, Some(ms(501)));
        assert_eq!(record.request_send, Some(ms(1)));
        assert_eq!(record.first_byte, Some(ms(30)));
        assert_eq!(record.dns, None);
    }

    #[test]
    fn test_handed_over_connection_is_starved() {
        let base = Instant::now();
        // Released 80ms after this attempt started waiting for it.
        let record = ConnectionRecord::classify(
            "api:443",
            base,
            &lease(base, 81, true, Some(base + ms(80))),
            &ConnectTimings::default(),
        );

        assert!(record.starved);
        assert!(!record.was_idle);
        assert!(record.delayed);
        assert_eq!(record.idle_for, None);
        assert_eq!(record.wait, ms(81));
    }

    #[test]
    fn test_new_connection_excludes_dial_time() {
        let base = Instant::now();
        let timings = ConnectTimings {
            dns: Some(ms(3)),
            dial: Some(ms(10)),
            tls: Some(ms(25)),
            total: ms(38),
        };
        let fast = ConnectionRecord::classify("api:443", base, &lease(base, 40, false, None), &timings);
        assert!(!fast.reused);
        assert!(!fast.starved);
        assert!(!fast.delayed);
        assert_eq!(fast.wait, ms(2));
        assert_eq!(fast.tls, Some(ms(25)));

        let queued = ConnectionRecord::classify("api:443", base, &lease(base, 90, false, None), &timings);
        assert!(queued.delayed);
        assert!(!queued.starved);
        assert_eq!(queued.wait, ms(52));
    }

    #[test]
    fn test_emit_metrics() {
        let base = Instant::now();
        let timings = ConnectTimings {
            dns: None,
            dial: Some(ms(4)),
            tls: None,
            total: ms(4),
        };
        let record = ConnectionRecord::classify("api:80", base, &lease(base, 5, false, None), &timings);
        let sink = InMemorySink::new();
        record.emit(&sink, &[Tag::new("client", "test")]);

        let obtained = sink.named("http_client.conn.obtained");
        assert_eq!(obtained.len(), 1);
        assert_eq!(obtained[0].value, MetricValue::Count(1));
        assert_eq!(obtained[0].tag("reused"), Some("false"));
        assert_eq!(obtained[0].tag("client"), Some("test"));
        assert_eq!(sink.named("http_client.conn.dial").len(), 1);
        assert!(sink.named("http_client.conn.dns").is_empty());
        assert!(sink.named("http_client.conn.idle").is_empty());
        assert_eq!(sink.named("http_client.conn.wait")[0].tag("reused"), None);
    }
}
