//! Backoff strategies and retry predicates.
//!
//! A [`RetryStrategy`] decides how long to wait before the next attempt and
//! when to give up. A [`RetryPredicate`] can narrow which failures are
//! retried. Predicates only see errors that are already retryable, so they
//! can never turn a decode failure, a usage error, a `204` or an explicit
//! backoff into another attempt.

use crate::Error;
use rand::Rng;
use std::time::Duration;

/// How long to wait between attempts, and how many retries to allow.
///
/// Attempts are also bounded by the call deadline: a retry whose delay would
/// cross it is not made.
///
/// # Examples
///
/// ```
/// use callwire::RetryStrategy;
/// use std::time::Duration;
///
/// // 50ms, 100ms, 200ms... capped at 5s, until the call deadline
/// let default = RetryStrategy::default();
///
/// // At most 5 retries, 100ms doubling up to 30s
/// let bounded = RetryStrategy::ExponentialBackoff {
///     initial_delay: Duration::from_millis(100),
///     max_delay: Duration::from_secs(30),
///     max_retries: Some(5),
///     jitter: true,
/// };
///
/// // Three retries, one second apart
/// let steady = RetryStrategy::Linear {
///     delay: Duration::from_secs(1),
///     max_retries: 3,
/// };
///
/// let never = RetryStrategy::None;
/// assert_eq!(never.delay_for_attempt(1), None);
/// ```
#[derive(Debug, Clone)]
pub enum RetryStrategy {
    /// Never retry.
    None,

    /// Double the delay after every retry.
    ///
    /// The n-th retry waits `initial_delay * 2^(n-1)`, capped at `max_delay`.
    /// With jitter the wait is drawn from the upper half of that value.
    ExponentialBackoff {
        /// Wait before the first retry.
        initial_delay: Duration,
        /// Upper bound on any single wait.
        max_delay: Duration,
        /// Retry limit; `None` retries until the call deadline.
        max_retries: Option<usize>,
        /// Randomize each wait.
        jitter: bool,
    },

    /// Wait the same delay before every retry.
    Linear {
        /// Wait before each retry.
        delay: Duration,
        /// Retry limit.
        max_retries: usize,
    },

    /// Delegate to a function of the attempt number that just failed
    /// (starting at 1). Returning `None` stops retrying.
    Custom {
        /// The schedule.
        delay_fn: fn(attempt: usize) -> Option<Duration>,
    },
}

impl RetryStrategy {
    /// Wait before retrying after failed attempt `attempt` (1-based), or
    /// `None` once retries are used up.
    pub fn delay_for_attempt(&self, attempt: usize) -> Option<Duration> {
        match *self {
            RetryStrategy::None => None,
            RetryStrategy::ExponentialBackoff {
                initial_delay,
                max_delay,
                max_retries,
                jitter,
            } => {
                if max_retries.is_some_and(|max| attempt > max) {
                    return None;
                }
                let doublings = attempt.saturating_sub(1).min(31) as u32;
                let delay = initial_delay
                    .saturating_mul(1u32 << doublings)
                    .min(max_delay);
                Some(if jitter { with_jitter(delay) } else { delay })
            }
            RetryStrategy::Linear { delay, max_retries } => {
                (attempt <= max_retries).then_some(delay)
            }
            RetryStrategy::Custom { delay_fn } => delay_fn(attempt),
        }
    }

    /// The retry limit, if there is one.
    pub fn max_retries(&self) -> Option<usize> {
        match *self {
            RetryStrategy::None => Some(0),
            RetryStrategy::ExponentialBackoff { max_retries, .. } => max_retries,
            RetryStrategy::Linear { max_retries, .. } => Some(max_retries),
            RetryStrategy::Custom { .. } => None,
        }
    }
}

impl Default for RetryStrategy {
    /// 50ms doubling up to 5s, jittered, limited only by the call deadline.
    fn default() -> Self {
        RetryStrategy::ExponentialBackoff {
            initial_delay: Duration::from_millis(50),
            max_delay: Duration::from_secs(5),
            max_retries: None,
            jitter: true,
        }
    }
}

fn with_jitter(delay: Duration) -> Duration {
    delay.mul_f64(rand::thread_rng().gen_range(0.5..=1.0))
}

/// Narrows which retryable failures get another attempt.
///
/// # Examples
///
/// ```
/// use callwire::{Error, RetryPredicate};
///
/// /// Gives up on a flapping gateway after two tries.
/// struct GatewayBudget;
///
/// impl RetryPredicate for GatewayBudget {
///     fn should_retry(&self, error: &Error, attempt: usize) -> bool {
///         match error.status() {
///             Some(status) if status.as_u16() == 502 => attempt < 2,
///             _ => true,
///         }
///     }
/// }
/// ```
pub trait RetryPredicate: Send + Sync {
    /// Whether to retry after `error` ended attempt `attempt` (1-based).
    fn should_retry(&self, error: &Error, attempt: usize) -> bool;
}

/// Retries everything [`Error::is_retryable`] allows: network errors,
/// per-attempt timeouts and 5xx responses. This is the default.
#[derive(Debug, Clone, Copy)]
pub struct RetryOnRetryable;

impl RetryPredicate for RetryOnRetryable {
    fn should_retry(&self, error: &Error, _attempt: usize) -> bool {
        error.is_retryable()
    }
}

/// Retries 5xx responses only.
#[derive(Debug, Clone, Copy)]
pub struct RetryOn5xx;

impl RetryPredicate for RetryOn5xx {
    fn should_retry(&self, error: &Error, _attempt: usize) -> bool {
        error.as_http().is_some_and(|err| err.status.is_server_error())
    }
}

/// Retries per-attempt timeouts only.
#[derive(Debug, Clone, Copy)]
pub struct RetryOnTimeout;

impl RetryPredicate for RetryOnTimeout {
    fn should_retry(&self, error: &Error, _attempt: usize) -> bool {
        matches!(error, Error::Timeout { .. })
    }
}

/// Retries network failures only.
#[derive(Debug, Clone, Copy)]
pub struct RetryOnConnectionError;

impl RetryPredicate for RetryOnConnectionError {
    fn should_retry(&self, error: &Error, _attempt: usize) -> bool {
        matches!(error, Error::Network { .. })
    }
}

/// Retries when any inner predicate agrees.
///
/// # Examples
///
/// ```
/// use callwire::retry::{OrPredicate, RetryOn5xx, RetryOnTimeout};
///
/// let predicate = OrPredicate::new(vec![Box::new(RetryOn5xx), Box::new(RetryOnTimeout)]);
/// ```
pub struct OrPredicate {
    predicates: Vec<Box<dyn RetryPredicate>>,
}

impl OrPredicate {
    /// Combines `predicates`.
    pub fn new(predicates: Vec<Box<dyn RetryPredicate>>) -> Self {
        Self { predicates }
    }
}

impl RetryPredicate for OrPredicate {
    fn should_retry(&self, error: &Error, attempt: usize) -> bool {
        self.predicates
            .iter()
            .any(|p| p.should_retry(error, attempt))
    }
}

/// Retries only when every inner predicate agrees.
///
/// # Examples
///
/// ```
/// use callwire::retry::{AndPredicate, RetryOn5xx};
/// use callwire::{Error, RetryPredicate};
///
/// struct FirstTries(usize);
///
/// impl RetryPredicate for FirstTries {
///     fn should_retry(&self, _error: &Error, attempt: usize) -> bool {
///         attempt <= self.0
///     }
/// }
///
/// let predicate = AndPredicate::new(vec![Box::new(RetryOn5xx), Box::new(FirstTries(3))]);
/// ```
pub struct AndPredicate {
    predicates: Vec<Box<dyn RetryPredicate>>,
}

impl AndPredicate {
    /// Combines `predicates`.
    pub fn new(predicates: Vec<Box<dyn RetryPredicate>>) -> Self {
        Self { predicates }
    }
}

impl RetryPredicate for AndPredicate {
    fn should_retry(&self, error: &Error, attempt: usize) -> bool {
        self.predicates
            .iter()
            .all(|p| p.should_retry(error, attempt))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{HttpError, Severity};
    use http::{HeaderMap, Method, StatusCode};

    #[test]
    fn test_exponential_schedule() {
        let strategy = RetryStrategy::ExponentialBackoff {
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(1000),
            max_retries: Some(5),
            jitter: false,
        };

        let schedule: Vec<_> = (1..=6).map(|n| strategy.delay_for_attempt(n)).collect();
        assert_eq!(
            schedule,
            vec![
                Some(Duration::from_millis(100)),
                Some(Duration::from_millis(200)),
                Some(Duration::from_millis(400)),
                Some(Duration::from_millis(800)),
                Some(Duration::from_millis(1000)),
                None,
            ]
        );
    }

    #[test]
    fn test_linear_and_none() {
        let strategy = RetryStrategy::Linear {
            delay: Duration::from_secs(1),
            max_retries: 2,
        };
        assert_eq!(strategy.delay_for_attempt(2), Some(Duration::from_secs(1)));
        assert_eq!(strategy.delay_for_attempt(3), None);
        assert_eq!(strategy.max_retries(), Some(2));

        assert_eq!(RetryStrategy::None.delay_for_attempt(1), None);
        assert_eq!(RetryStrategy::None.max_retries(), Some(0));
    }

    #[test]
    fn test_default_backoff_is_unbounded_and_capped() {
        let strategy = RetryStrategy::default();
        assert_eq!(strategy.max_retries(), None);

        let first = strategy.delay_for_attempt(1).unwrap();
        assert!(first >= Duration::from_millis(25) && first <= Duration::from_millis(50));

        let late = strategy.delay_for_attempt(400).unwrap();
        assert!(late <= Duration::from_secs(5));
    }

    #[test]
    fn test_custom_schedule() {
        let strategy = RetryStrategy::Custom {
            delay_fn: |attempt| (attempt < 3).then(|| Duration::from_millis(attempt as u64 * 7)),
        };
        assert_eq!(strategy.delay_for_attempt(2), Some(Duration::from_millis(14)));
        assert_eq!(strategy.delay_for_attempt(3), None);
    }

    #[test]
    fn test_predicates() {
        let server = Error::Http(Box::new(HttpError {
            method: Method::GET,
            route: "/".to_string(),
            status: StatusCode::BAD_GATEWAY,
            attempts: 1,
            retries_concluded: false,
            severity: Severity::Expected,
            raw_response: String::new(),
            headers: HeaderMap::new(),
        }));
        let timeout = Error::Timeout {
            method: Method::GET,
            route: "/".to_string(),
            attempts: 1,
            after: Duration::from_secs(5),
        };

        assert!(RetryOn5xx.should_retry(&server, 1));
        assert!(!RetryOn5xx.should_retry(&timeout, 1));
        assert!(RetryOnTimeout.should_retry(&timeout, 1));
        assert!(!RetryOnConnectionError.should_retry(&timeout, 1));

        let either = OrPredicate::new(vec![Box::new(RetryOn5xx), Box::new(RetryOnTimeout)]);
        assert!(either.should_retry(&server, 1) && either.should_retry(&timeout, 1));

        let both = AndPredicate::new(vec![Box::new(RetryOn5xx), Box::new(RetryOnTimeout)]);
        assert!(!both.should_retry(&server, 1));
    }
}
