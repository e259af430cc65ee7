//! Process-wide pool gauges for one client.
//!
//! Counts in-flight physical requests (with the running maximum between
//! scrapes) and keeps a signed estimate of how many pooled connections are
//! idle. The estimate is adjusted from connection IO callbacks that run
//! independently of any attempt, so it can briefly dip below zero; it is
//! clamped when reported.

use crate::metrics::{MetricsSink, Tag};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

/// Gauge values taken by a scrape.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolSnapshot {
    /// Physical requests currently in flight
    pub in_flight: u64,
    /// Highest in-flight count since the previous scrape
    pub in_flight_max: u64,
    /// Estimated idle pooled connections, never below zero
    pub pool_avail_estimate: u64,
}

#[derive(Debug, Default)]
pub(crate) struct PoolGauges {
    in_flight: AtomicI64,
    in_flight_max: AtomicI64,
    avail_estimate: AtomicI64,
}

/// Decrements the in-flight count when dropped.
#[derive(Debug)]
pub(crate) struct InFlightGuard {
    gauges: Arc<PoolGauges>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.gauges.in_flight.fetch_sub(1, Ordering::Relaxed);
    }
}

impl PoolGauges {
    pub(crate) fn enter_in_flight(self: &Arc<Self>) -> InFlightGuard {
        let now = self.in_flight.fetch_add(1, Ordering::Relaxed) + 1;
        self.in_flight_max.fetch_max(now, Ordering::Relaxed);
        InFlightGuard {
            gauges: Arc::clone(self),
        }
    }

    /// A pooled connection was taken out of the pool.
    pub(crate) fn connection_reused(&self) {
        self.avail_estimate.fetch_sub(1, Ordering::Relaxed);
    }

    /// A connection was returned to the pool.
    pub(crate) fn connection_idle(&self) {
        self.avail_estimate.fetch_add(1, Ordering::Relaxed);
    }

    /// An idle connection was closed while sitting in the pool.
    pub(crate) fn idle_connection_closed(&self) {
        self.avail_estimate.fetch_sub(1, Ordering::Relaxed);
    }

    /// Reads the gauges and restarts the running maximum.
    pub(crate) fn scrape(&self) -> PoolSnapshot {
        let in_flight = self.in_flight.load(Ordering::Relaxed).max(0);
        let in_flight_max = self
            .in_flight_max
            .swap(in_flight, Ordering::Relaxed)
            .max(in_flight);
        let avail = self.avail_estimate.load(Ordering::Relaxed).max(0);
        PoolSnapshot {
            in_flight: in_flight as u64,
            in_flight_max: in_flight_max as u64,
            pool_avail_estimate: avail as u64,
        }
    }

    pub(crate) fn report(&self, sink: &dyn MetricsSink, tags: &[Tag]) -> PoolSnapshot {
        let snapshot = self.scrape();
        sink.gauge(
            "http_client.pool.in_flight",
            snapshot.in_flight as f64,
            tags,
            1.0,
        );
        sink.gauge(
            "http_client.pool.in_flight_max",
            snapshot.in_flight_max as f64,
            tags,
            1.0,
        );
        sink.gauge(
            "http_client.pool.avail_estimate",
            snapshot.pool_avail_estimate as f64,
            tags,
            1.0,
        );
        snapshot
    }
}
