//! Metrics sink abstraction.
//!
//! The client pushes tagged timers, gauges and counters to a [`MetricsSink`].
//! Emitting metrics is best-effort: sinks swallow their own failures and never
//! fail a call.

use std::sync::{Mutex, PoisonError};
use std::time::Duration;

/// A `key:value` metric tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tag {
    /// Tag key
    pub key: &'static str,
    /// Tag value
    pub value: String,
}

impl Tag {
    /// Creates a tag.
    pub fn new(key: &'static str, value: impl Into<String>) -> Self {
        Self {
            key,
            value: value.into(),
        }
    }
}

impl std::fmt::Display for Tag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.key, self.value)
    }
}

/// Destination for client metrics (statsd-style).
pub trait MetricsSink: Send + Sync {
    /// Records a duration.
    fn timing(&self, name: &str, value: Duration, tags: &[Tag], sample_rate: f64);

    /// Records an instantaneous value.
    fn gauge(&self, name: &str, value: f64, tags: &[Tag], sample_rate: f64);

    /// Adds to a counter.
    fn count(&self, name: &str, value: i64, tags: &[Tag], sample_rate: f64);
}

/// A sink that drops everything. Used when no sink is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopSink;

impl MetricsSink for NoopSink {
    fn timing(&self, _name: &str, _value: Duration, _tags: &[Tag], _sample_rate: f64) {}

    fn gauge(&self, _name: &str, _value: f64, _tags: &[Tag], _sample_rate: f64) {}

    fn count(&self, _name: &str, _value: i64, _tags: &[Tag], _sample_rate: f64) {}
}

/// The kind and value of a recorded metric.
#[derive(Debug, Clone, PartialEq)]
pub enum MetricValue {
    /// A `timing` call
    Timing(Duration),
    /// A `gauge` call
    Gauge(f64),
    /// A `count` call
    Count(i64),
}

/// A metric captured by [`InMemorySink`].
#[derive(Debug, Clone, PartialEq)]
pub struct MetricEvent {
    /// Metric name
    pub name: String,
    /// Recorded value
    pub value: MetricValue,
    /// Tags attached to the metric
    pub tags: Vec<Tag>,
}

impl MetricEvent {
    /// Returns the value of tag `key`, if present.
    pub fn tag(&self, key: &str) -> Option<&str> {
        self.tags
            .iter()
            .find(|t| t.key == key)
            .map(|t| t.value.as_str())
    }
}

/// A sink that keeps every metric in memory. Handy in tests.
#[derive(Debug, Default)]
pub struct InMemorySink {
    events: Mutex<Vec<MetricEvent>>,
}

impl InMemorySink {
    /// Creates an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of every recorded metric, oldest first.
    pub fn events(&self) -> Vec<MetricEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Returns the recorded metrics with the given name.
    pub fn named(&self, name: &str) -> Vec<MetricEvent> {
        self.events()
            .into_iter()
            .filter(|e| e.name == name)
            .collect()
    }

    fn push(&self, name: &str, value: MetricValue, tags: &[Tag]) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(MetricEvent {
                name: name.to_string(),
                value,
                tags: tags.to_vec(),
            });
    }
}

impl MetricsSink for InMemorySink {
    fn timing(&self, name: &str, value: Duration, tags: &[Tag], _sample_rate: f64) {
        self.push(name, MetricValue::Timing(value), tags);
    }

    fn gauge(&self, name: &str, value: f64, tags: &[Tag], _sample_rate: f64) {
        self.push(name, MetricValue::Gauge(value), tags);
    }

    fn count(&self, name: &str, value: i64, tags: &[Tag], _sample_rate: f64) {
        self.push(name, MetricValue::Count(value), tags);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_memory_sink_records() {
        let sink = InMemorySink::new();
        let tags = [Tag::new("client", "billing"), Tag::new("route", "/a/{}")];
        sink.timing("t", Duration::from_millis(3), &tags, 1.0);
        sink.count("c", 2, &tags[..1], 1.0);
        sink.gauge("g", 7.0, &[], 1.0);

        let events = sink.events();
        assert_eq!(events.len(), 3);
        assert_eq!(events[0].value, MetricValue::Timing(Duration::from_millis(3)));
        assert_eq!(events[0].tag("route"), Some("/a/{}"));
        assert_eq!(sink.named("c")[0].value, MetricValue::Count(2));
        assert_eq!(sink.named("g")[0].tag("client"), None);
        assert_eq!(tags[0].to_string(), "client:billing");
    }
}
