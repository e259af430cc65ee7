//! Client configuration.

use crate::classify::ExpectedStatuses;
use crate::cooldown::DEFAULT_COOLDOWN_WINDOW;
use std::time::Duration;

/// Plain client settings.
///
/// Collaborators that are not plain data (retry strategy, metrics sink, TLS
/// configuration, resolver overrides) are set on the
/// [`ClientBuilder`](crate::ClientBuilder) instead.
///
/// # Examples
///
/// ```no_run
/// use callwire::{Client, ClientConfig};
/// use std::time::Duration;
///
/// # fn example() -> Result<(), callwire::Error> {
/// let client = Client::new(ClientConfig {
///     name: "billing".to_string(),
///     base_url: Some("https://billing.internal".to_string()),
///     auth_token: Some("s3cr3t".to_string()),
///     timeout: Duration::from_secs(10),
///     max_connections_per_host: 4,
///     ..ClientConfig::default()
/// })?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Name used to label spans and metrics.
    pub name: String,

    /// Prefix joined with each request's resolved URL. Requests whose URL is
    /// already absolute are sent as-is.
    pub base_url: Option<String>,

    /// Token sent with every request.
    pub auth_token: Option<String>,

    /// Header carrying the raw token. When unset the token is sent as
    /// `Authorization: Bearer <token>`.
    pub auth_header: Option<String>,

    /// Value of the `Accept` header.
    pub accept_type: Option<String>,

    /// Overall budget for all attempts of one call. Zero means no limit.
    pub timeout: Duration,

    /// Concurrent requests (and pooled connections) per destination.
    pub max_connections_per_host: usize,

    /// Limit on establishing a TCP connection.
    pub connect_timeout: Duration,

    /// How long an idle pooled connection is kept.
    pub pool_idle_timeout: Duration,

    /// Cool-down after a `429` that has no `Retry-After` header.
    pub cooldown_window: Duration,

    /// Statuses counted as expected once retrying has concluded.
    pub expected_statuses: ExpectedStatuses,

    /// Push connection records to the metrics sink and the attempt span.
    pub connection_telemetry: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            name: "http-client".to_string(),
            base_url: None,
            auth_token: None,
            auth_header: None,
            accept_type: None,
            timeout: Duration::from_secs(30),
            max_connections_per_host: 10,
            connect_timeout: Duration::from_secs(5),
            pool_idle_timeout: Duration::from_secs(90),
            cooldown_window: DEFAULT_COOLDOWN_WINDOW,
            expected_statuses: ExpectedStatuses::default(),
            connection_telemetry: false,
        }
    }
}
