//! Pooled HTTP/1.1 transport and per-destination limits.

use crate::connect::{TimedDial, TimedResolver, TracedConnector};
use crate::pool::PoolGauges;
use crate::{Error, Result};
use bytes::Bytes;
use http_body_util::Full;
use hyper_rustls::{HttpsConnector, HttpsConnectorBuilder};
use hyper_util::client::legacy::Client;
use hyper_util::rt::{TokioExecutor, TokioTimer};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

pub(crate) type HyperClient = Client<TracedConnector<HttpsConnector<TimedDial>>, Full<Bytes>>;

/// Everything needed to (re)build the pooled transport.
#[derive(Clone)]
pub(crate) struct TransportSettings {
    pub(crate) connect_timeout: Duration,
    pub(crate) pool_idle_timeout: Duration,
    pub(crate) max_idle_per_host: usize,
    pub(crate) tls: Arc<rustls::ClientConfig>,
    pub(crate) overrides: Arc<HashMap<String, Vec<SocketAddr>>>,
    pub(crate) gauges: Arc<PoolGauges>,
}

impl TransportSettings {
    pub(crate) fn build(&self) -> HyperClient {
        let dial = TimedDial::new(
            TimedResolver::new(Arc::clone(&self.overrides)),
            self.connect_timeout,
        );
        let https = HttpsConnectorBuilder::new()
            .with_tls_config((*self.tls).clone())
            .https_or_http()
            .enable_http1()
            .wrap_connector(dial);
        Client::builder(TokioExecutor::new())
            .pool_idle_timeout(self.pool_idle_timeout)
            .pool_max_idle_per_host(self.max_idle_per_host)
            .pool_timer(TokioTimer::new())
            .build(TracedConnector::new(https, Arc::clone(&self.gauges)))
    }
}

/// rustls configuration trusting the webpki roots, using the ring provider.
pub(crate) fn default_tls_config() -> Result<rustls::ClientConfig> {
    let roots = rustls::RootCertStore::from_iter(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    let config =
        rustls::ClientConfig::builder_with_provider(Arc::new(rustls::crypto::ring::default_provider()))
            .with_safe_default_protocol_versions()
            .map_err(|e| Error::ConfigurationError(format!("TLS setup failed: {}", e)))?
            .with_root_certificates(roots)
            .with_no_client_auth();
    Ok(config)
}

/// Caps concurrent requests per destination.
///
/// Waiting for a permit is the internal delay the connection telemetry
/// separates from network latency.
#[derive(Debug)]
pub(crate) struct HostLimiter {
    limit: usize,
    hosts: Mutex<HashMap<String, Arc<Semaphore>>>,
}

impl HostLimiter {
    pub(crate) fn new(limit: usize) -> Self {
        Self {
            limit,
            hosts: Mutex::new(HashMap::new()),
        }
    }

    /// Waits for a permit to `key`. Only destinations with permits out or
    /// callers waiting are remembered.
    pub(crate) async fn acquire(&self, key: &str) -> Result<OwnedSemaphorePermit> {
        let semaphore = {
            let mut hosts = self.hosts.lock().unwrap_or_else(PoisonError::into_inner);
            let key = key.to_ascii_lowercase();
            if !hosts.contains_key(&key) {
                // Permits and waiters hold a clone, so a lone reference is idle.
                hosts.retain(|_, semaphore| Arc::strong_count(semaphore) > 1);
            }
            Arc::clone(
                hosts
                    .entry(key)
                    .or_insert_with(|| Arc::new(Semaphore::new(self.limit))),
            )
        };
        semaphore
            .acquire_owned()
            .await
            .map_err(|_| Error::ConfigurationError("connection limiter closed".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_host_limiter_caps_per_host() {
        let limiter = HostLimiter::new(2);
        let a = limiter.acquire("http://api:80").await.unwrap();
        let _b = limiter.acquire("http://API:80").await.unwrap();

        // A third permit for the same host has to wait.
        let third = tokio::time::timeout(Duration::from_millis(20), limiter.acquire("http://api:80")).await;
        assert!(third.is_err());

        // Other hosts are unaffected.
        let _other = limiter.acquire("http://other:80").await.unwrap();

        drop(a);
        let third = tokio::time::timeout(Duration::from_millis(20), limiter.acquire("http://api:80")).await;
        assert!(third.is_ok());
    }

    #[tokio::test]
    async fn test_host_limiter_forgets_idle_hosts() {
        let limiter = HostLimiter::new(1);
        let held = limiter.acquire("http://held:80").await.unwrap();
        for port in 0..100 {
            let permit = limiter.acquire(&format!("http://api:{port}")).await.unwrap();
            drop(permit);
        }
        let _last = limiter.acquire("http://last:80").await.unwrap();

        let hosts = limiter.hosts.lock().unwrap();
        assert_eq!(hosts.len(), 2);
        assert!(hosts.contains_key("http://held:80"));
        drop(hosts);
        drop(held);
    }

    #[test]
    fn test_default_tls_config_builds() {
        assert!(default_tls_config().is_ok());
    }
}
