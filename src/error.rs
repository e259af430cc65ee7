//! Error types for HTTP calls.
//!
//! Every terminal outcome of [`Client::call`](crate::Client::call) is one of the
//! [`Error`] variants below. HTTP status failures carry a structured
//! [`HttpError`] so callers can match on status code or attempt count without
//! parsing strings, and every error reports a [`Severity`] that was decided once,
//! when the outcome was classified.

use crate::classify::Severity;
use http::{HeaderMap, Method, StatusCode};
use std::time::Duration;

pub(crate) type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// The main error type for HTTP calls.
///
/// # Examples
///
/// ```no_run
/// use callwire::{Client, Error, Request};
/// use http::Method;
///
/// # async fn example() -> Result<(), Error> {
/// let client = Client::builder().base_url("https://api.example.com").build()?;
/// let request = Request::builder(Method::GET, "/users/{}").param(42).build()?;
///
/// match client.call::<serde_json::Value>(&request).await {
///     Ok(response) => println!("user: {}", response.data),
///     Err(Error::Http(err)) if err.status.as_u16() == 404 => println!("no such user"),
///     Err(Error::NoContent { .. }) => println!("empty"),
///     Err(e) => eprintln!("failed after {:?} attempts: {}", e.attempts(), e),
/// }
/// # Ok(())
/// # }
/// ```
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// The request descriptor was assembled incorrectly (for example both a JSON
    /// and a raw body were set). No network call was made.
    #[error("Invalid request: {0}")]
    Usage(String),

    /// Invalid client configuration (bad header values, TLS setup failures).
    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    /// An invalid URL was provided or produced by joining base URL and route.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// The request body could not be serialized to JSON.
    #[error("Failed to serialize request: {0}")]
    SerializationFailed(String),

    /// The server answered with a status that is not a success.
    #[error("{0}")]
    Http(Box<HttpError>),

    /// The server answered `204 No Content`.
    ///
    /// This is a distinguished terminal condition, not an operational failure.
    #[error("{method} {route}: no content")]
    NoContent {
        /// The HTTP method of the call
        method: Method,
        /// The route template of the call
        route: String,
        /// Attempts made, including the one that got the 204
        attempts: usize,
    },

    /// The client is cooling down after the server signaled `429 Too Many
    /// Requests`. The server was not contacted.
    #[error("{method} {route}: explicit backoff in effect for another {remaining:?}")]
    ExplicitBackoff {
        /// The HTTP method of the call
        method: Method,
        /// The route template of the call
        route: String,
        /// Time left in the cool-down window
        remaining: Duration,
        /// Attempts that reached the server before the refusal
        attempts: usize,
    },

    /// Connecting, writing the request, or reading the response failed.
    #[error("{method} {route}: network error on attempt {attempts}: {source}")]
    Network {
        /// The HTTP method of the call
        method: Method,
        /// The route template of the call
        route: String,
        /// Attempts made so far
        attempts: usize,
        /// Whether the failure happened while establishing the connection
        connect: bool,
        /// The underlying transport error
        #[source]
        source: BoxError,
    },

    /// A single attempt exceeded its own deadline.
    #[error("{method} {route}: attempt {attempts} timed out after {after:?}")]
    Timeout {
        /// The HTTP method of the call
        method: Method,
        /// The route template of the call
        route: String,
        /// Attempts made so far
        attempts: usize,
        /// The per-attempt budget that elapsed
        after: Duration,
    },

    /// The overall call deadline (client timeout or caller deadline) expired.
    #[error("{method} {route}: call deadline exceeded after {attempts} attempts")]
    DeadlineExceeded {
        /// The HTTP method of the call
        method: Method,
        /// The route template of the call
        route: String,
        /// Attempts started before the deadline hit
        attempts: usize,
    },

    /// The response body could not be decoded.
    ///
    /// Decoding failures are never retried, whatever status produced the body.
    #[error("{method} {route}: failed to decode response (status {status}): {serde_error}")]
    DeserializationFailed {
        /// The HTTP method of the call
        method: Method,
        /// The route template of the call
        route: String,
        /// The HTTP status code
        status: StatusCode,
        /// Attempts made, including the one whose body failed to decode
        attempts: usize,
        /// The raw response body that failed to decode
        raw_response: String,
        /// The decoder's error message
        serde_error: String,
    },
}

/// A non-success HTTP status, with the context needed to act on it.
#[derive(Debug, Clone)]
pub struct HttpError {
    /// The HTTP method of the call
    pub method: Method,
    /// The route template (low-cardinality label) of the call
    pub route: String,
    /// The status returned by the last attempt
    pub status: StatusCode,
    /// Number of attempts made
    pub attempts: usize,
    /// `false` while the retry engine may still try again, `true` once the
    /// call has ended with this error
    pub retries_concluded: bool,
    /// Severity assigned by the classifier
    pub severity: Severity,
    /// The raw response body
    pub raw_response: String,
    /// The response headers
    pub headers: HeaderMap,
}

impl std::fmt::Display for HttpError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} {}: HTTP error {} after {} attempt(s)",
            self.method, self.route, self.status, self.attempts
        )?;
        if !self.raw_response.is_empty() {
            write!(f, ": {}", self.raw_response)?;
        }
        Ok(())
    }
}

impl Error {
    /// Returns `true` if this error is potentially retryable.
    ///
    /// Network errors, per-attempt timeouts, and 5xx responses are retryable.
    /// Everything else, including `429`, ends the call.
    ///
    /// # Examples
    ///
    /// ```
    /// use callwire::{Error, HttpError, Severity};
    /// use http::{HeaderMap, Method, StatusCode};
    ///
    /// let err = Error::Http(Box::new(HttpError {
    ///     method: Method::GET,
    ///     route: "/users/{}".to_string(),
    ///     status: StatusCode::SERVICE_UNAVAILABLE,
    ///     attempts: 1,
    ///     retries_concluded: false,
    ///     severity: Severity::Expected,
    ///     raw_response: String::new(),
    ///     headers: HeaderMap::new(),
    /// }));
    /// assert!(err.is_retryable());
    /// ```
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Network { .. } | Error::Timeout { .. } => true,
            Error::Http(err) => err.status.is_server_error(),
            Error::Usage(_)
            | Error::ConfigurationError(_)
            | Error::InvalidUrl(_)
            | Error::SerializationFailed(_)
            | Error::NoContent { .. }
            | Error::ExplicitBackoff { .. }
            | Error::DeadlineExceeded { .. }
            | Error::DeserializationFailed { .. } => false,
        }
    }

    /// Returns the HTTP status code if the server answered.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Error::Http(err) => Some(err.status),
            Error::DeserializationFailed { status, .. } => Some(*status),
            Error::NoContent { .. } => Some(StatusCode::NO_CONTENT),
            _ => None,
        }
    }

    /// Returns the number of attempts made, if the call got that far.
    pub fn attempts(&self) -> Option<usize> {
        match self {
            Error::Http(err) => Some(err.attempts),
            Error::NoContent { attempts, .. }
            | Error::ExplicitBackoff { attempts, .. }
            | Error::Network { attempts, .. }
            | Error::Timeout { attempts, .. }
            | Error::DeadlineExceeded { attempts, .. }
            | Error::DeserializationFailed { attempts, .. } => Some(*attempts),
            _ => None,
        }
    }

    /// Returns the severity of this error.
    ///
    /// HTTP errors carry the severity decided by the classifier; the other
    /// variants have a fixed severity.
    pub fn severity(&self) -> Severity {
        match self {
            Error::Http(err) => err.severity,
            Error::NoContent { .. } => Severity::Expected,
            Error::ExplicitBackoff { .. }
            | Error::Network { .. }
            | Error::Timeout { .. }
            | Error::DeadlineExceeded { .. } => Severity::Transient,
            Error::Usage(_)
            | Error::ConfigurationError(_)
            | Error::InvalidUrl(_)
            | Error::SerializationFailed(_)
            | Error::DeserializationFailed { .. } => Severity::Fatal,
        }
    }

    /// Returns `true` for the distinguished `204 No Content` condition.
    pub fn is_no_content(&self) -> bool {
        matches!(self, Error::NoContent { .. })
    }

    /// Returns `true` if the call was refused locally because of a cool-down.
    pub fn is_explicit_backoff(&self) -> bool {
        matches!(self, Error::ExplicitBackoff { .. })
    }

    /// Returns the raw response body if this error has one.
    pub fn raw_response(&self) -> Option<&str> {
        match self {
            Error::Http(err) => Some(&err.raw_response),
            Error::DeserializationFailed { raw_response, .. } => Some(raw_response),
            _ => None,
        }
    }

    /// Returns the structured HTTP error, if this is one.
    pub fn as_http(&self) -> Option<&HttpError> {
        match self {
            Error::Http(err) => Some(err),
            _ => None,
        }
    }
}

/// A specialized `Result` type for HTTP calls.
pub type Result<T> = std::result::Result<T, Error>;
