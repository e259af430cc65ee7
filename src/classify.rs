//! Outcome classification.
//!
//! Turns a completed exchange into a [`StatusClass`] (what the retry engine does
//! next) and assigns a [`Severity`] (how telemetry should count it).

use crate::error::Error;
use http::StatusCode;
use std::collections::BTreeSet;

/// How an outcome should be counted by failure-rate telemetry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// A normal, anticipated condition (e.g. a 404 lookup miss, no content).
    Expected,
    /// A failure that may clear on its own (server errors, network trouble).
    Transient,
    /// A true failure that retrying will not fix.
    Fatal,
}

impl Severity {
    /// Returns the label used in span fields and metric tags.
    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Expected => "expected",
            Severity::Transient => "transient",
            Severity::Fatal => "fatal",
        }
    }

    /// Returns `true` if the outcome should count as a failure.
    pub fn is_failure(self) -> bool {
        self != Severity::Expected
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status codes treated as expected once retrying has concluded.
///
/// This is product policy, not protocol: the default list is
/// `401`, `403` and `404`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpectedStatuses(BTreeSet<u16>);

impl ExpectedStatuses {
    /// Creates a policy from an explicit list of statuses.
    pub fn new(statuses: impl IntoIterator<Item = StatusCode>) -> Self {
        Self(statuses.into_iter().map(|s| s.as_u16()).collect())
    }

    /// Returns `true` if `status` is on the list.
    pub fn contains(&self, status: StatusCode) -> bool {
        self.0.contains(&status.as_u16())
    }
}

impl Default for ExpectedStatuses {
    fn default() -> Self {
        Self::new([
            StatusCode::UNAUTHORIZED,
            StatusCode::FORBIDDEN,
            StatusCode::NOT_FOUND,
        ])
    }
}

/// What the engine does with a response status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum StatusClass {
    /// 2xx other than 204: decode the payload.
    Success,
    /// 204: the distinguished no-content condition, never retried.
    NoContent,
    /// 5xx: may be transient.
    Retryable,
    /// Anything else: retrying will not help.
    Terminal,
}

pub(crate) fn status_class(status: StatusCode) -> StatusClass {
    if status == StatusCode::NO_CONTENT {
        StatusClass::NoContent
    } else if status.is_success() {
        StatusClass::Success
    } else if status.is_server_error() {
        StatusClass::Retryable
    } else {
        StatusClass::Terminal
    }
}

/// Severity of a non-success HTTP status.
///
/// While retries may still happen every non-success is provisionally
/// expected, so interim attempts do not pollute error counts.
pub(crate) fn http_severity(
    status: StatusCode,
    concluded: bool,
    expected: &ExpectedStatuses,
) -> Severity {
    if !concluded || expected.contains(status) {
        Severity::Expected
    } else if status.is_server_error() {
        Severity::Transient
    } else {
        Severity::Fatal
    }
}

/// Marks an error as final and settles its severity.
pub(crate) fn conclude(mut error: Error, expected: &ExpectedStatuses) -> Error {
    if let Error::Http(http) = &mut error {
        http.retries_concluded = true;
        http.severity = http_severity(http.status, true, expected);
    }
    error
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::HttpError;
    use http::{HeaderMap, Method};

    #[test]
    fn test_status_classes() {
        assert_eq!(status_class(StatusCode::OK), StatusClass::Success);
        assert_eq!(status_class(StatusCode::CREATED), StatusClass::Success);
        assert_eq!(status_class(StatusCode::NO_CONTENT), StatusClass::NoContent);
        assert_eq!(status_class(StatusCode::BAD_GATEWAY), StatusClass::Retryable);
        assert_eq!(status_class(StatusCode::NOT_FOUND), StatusClass::Terminal);
        assert_eq!(
            status_class(StatusCode::TOO_MANY_REQUESTS),
            StatusClass::Terminal
        );
        assert_eq!(
            status_class(StatusCode::MOVED_PERMANENTLY),
            StatusClass::Terminal
        );
    }

    #[test]
    fn test_provisional_failures_are_expected() {
        let policy = ExpectedStatuses::default();
        for status in [400, 404, 500, 503] {
            let status = StatusCode::from_u16(status).unwrap();
            assert_eq!(http_severity(status, false, &policy), Severity::Expected);
        }
    }

    #[test]
    fn test_concluded_severity() {
        let policy = ExpectedStatuses::default();
        assert_eq!(
            http_severity(StatusCode::NOT_FOUND, true, &policy),
            Severity::Expected
        );
        assert_eq!(
            http_severity(StatusCode::FORBIDDEN, true, &policy),
            Severity::Expected
        );
        assert_eq!(
            http_severity(StatusCode::CONFLICT, true, &policy),
            Severity::Fatal
        );
        assert_eq!(
            http_severity(StatusCode::INTERNAL_SERVER_ERROR, true, &policy),
            Severity::Transient
        );

        let custom = ExpectedStatuses::new([StatusCode::CONFLICT]);
        assert_eq!(
            http_severity(StatusCode::CONFLICT, true, &custom),
            Severity::Expected
        );
        assert_eq!(
            http_severity(StatusCode::NOT_FOUND, true, &custom),
            Severity::Fatal
        );
    }

    #[test]
    fn test_conclude_sets_flag() {
        let error = Error::Http(Box::new(HttpError {
            method: Method::GET,
            route: "/r".to_string(),
            status: StatusCode::UNPROCESSABLE_ENTITY,
            attempts: 1,
            retries_concluded: false,
            severity: Severity::Expected,
            raw_response: String::new(),
            headers: HeaderMap::new(),
        }));
        let concluded = conclude(error, &ExpectedStatuses::default());
        let http = concluded.as_http().unwrap();
        assert!(http.retries_concluded);
        assert_eq!(http.severity, Severity::Fatal);
    }
}
