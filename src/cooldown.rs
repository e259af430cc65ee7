//! Explicit backoff after the server signals overload.
//!
//! A `429 Too Many Requests` puts the whole client into a cool-down: until the
//! window elapses every attempt, from every concurrent call, is refused locally
//! without contacting the server. The window is the server's `Retry-After`
//! value when present, otherwise a fixed default.

use http::HeaderMap;
use std::sync::{PoisonError, RwLock};
use std::time::{Duration, Instant, SystemTime};

/// Default cool-down applied when a 429 carries no `Retry-After` header.
pub const DEFAULT_COOLDOWN_WINDOW: Duration = Duration::from_secs(10);

/// Longest cool-down a single throttle can impose.
pub const MAX_COOLDOWN_WINDOW: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Debug, Clone, Copy)]
struct Throttle {
    observed_at: Instant,
    until: Instant,
}

/// Per-client cool-down state.
///
/// Reads happen before every attempt and are concurrent; writes only happen
/// when a 429 is observed.
#[derive(Debug)]
pub(crate) struct Cooldown {
    window: Duration,
    last_throttle: RwLock<Option<Throttle>>,
}

impl Cooldown {
    pub(crate) fn new(window: Duration) -> Self {
        Self {
            window,
            last_throttle: RwLock::new(None),
        }
    }

    /// Returns the time left in the cool-down, or `None` if calls may proceed.
    pub(crate) fn remaining(&self, now: Instant) -> Option<Duration> {
        let guard = self
            .last_throttle
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        let throttle = (*guard)?;
        throttle
            .until
            .checked_duration_since(now)
            .filter(|left| !left.is_zero())
    }

    /// Records a throttle observed at `now`, replacing any earlier one.
    ///
    /// Returns the length of the window that was applied, which never
    /// exceeds [`MAX_COOLDOWN_WINDOW`].
    pub(crate) fn observe(&self, headers: &HeaderMap, now: Instant) -> Duration {
        let window = parse_retry_after(headers, SystemTime::now())
            .unwrap_or(self.window)
            .min(MAX_COOLDOWN_WINDOW);
        let mut guard = self
            .last_throttle
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        *guard = Some(Throttle {
            observed_at: now,
            until: now + window,
        });
        window
    }

    /// When the last throttle was observed.
    pub(crate) fn last_throttled_at(&self) -> Option<Instant> {
        let guard = self
            .last_throttle
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        (*guard).map(|t| t.observed_at)
    }
}

/// Parses the Retry-After header.
///
/// Supports both delay-seconds (integer) and HTTP-date formats. A date in the
/// past yields a zero delay.
pub(crate) fn parse_retry_after(headers: &HeaderMap, now: SystemTime) -> Option<Duration> {
    let header = headers.get(http::header::RETRY_AFTER)?.to_str().ok()?.trim();

    if let Ok(seconds) = header.parse::<u64>() {
        return Some(Duration::from_secs(seconds));
    }

    let date_time = httpdate::parse_http_date(header).ok()?;
    Some(date_time.duration_since(now).unwrap_or(Duration::ZERO))
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderValue;

    #[test]
    fn test_parse_retry_after_seconds() {
        let mut headers = HeaderMap::new();
        headers.insert("retry-after", HeaderValue::from_static("60"));

        let delay = parse_retry_after(&headers, SystemTime::now());
        assert_eq!(delay, Some(Duration::from_secs(60)));
    }

    #[test]
    fn test_parse_retry_after_http_date() {
        let now = SystemTime::now();
        let later = httpdate::fmt_http_date(now + Duration::from_secs(120));
        let mut headers = HeaderMap::new();
        headers.insert("retry-after", HeaderValue::from_str(&later).unwrap());

        let delay = parse_retry_after(&headers, now).unwrap();
        // HTTP dates have whole-second resolution.
        assert!(delay >= Duration::from_secs(119) && delay <= Duration::from_secs(120));

        let earlier = httpdate::fmt_http_date(now - Duration::from_secs(120));
        headers.insert("retry-after", HeaderValue::from_str(&earlier).unwrap());
        assert_eq!(parse_retry_after(&headers, now), Some(Duration::ZERO));
    }

    #[test]
    fn test_parse_retry_after_garbage() {
        let mut headers = HeaderMap::new();
        assert_eq!(parse_retry_after(&headers, SystemTime::now()), None);
        headers.insert("retry-after", HeaderValue::from_static("soon"));
        assert_eq!(parse_retry_after(&headers, SystemTime::now()), None);
    }

    #[test]
    fn test_default_window() {
        let cooldown = Cooldown::new(DEFAULT_COOLDOWN_WINDOW);
        let now = Instant::now();
        assert_eq!(cooldown.remaining(now), None);

        let applied = cooldown.observe(&HeaderMap::new(), now);
        assert_eq!(applied, DEFAULT_COOLDOWN_WINDOW);
        assert_eq!(cooldown.remaining(now), Some(DEFAULT_COOLDOWN_WINDOW));
        assert_eq!(
            cooldown.remaining(now + Duration::from_secs(4)),
            Some(Duration::from_secs(6))
        );
        assert_eq!(cooldown.remaining(now + Duration::from_secs(10)), None);
        assert_eq!(cooldown.last_throttled_at(), Some(now));
    }

    #[test]
    fn test_retry_after_overrides_window() {
        let cooldown = Cooldown::new(DEFAULT_COOLDOWN_WINDOW);
        let mut headers = HeaderMap::new();
        headers.insert("retry-after", HeaderValue::from_static("30"));
        let now = Instant::now();

        cooldown.observe(&headers, now);
        assert_eq!(cooldown.remaining(now), Some(Duration::from_secs(30)));
        assert!(cooldown.remaining(now + Duration::from_secs(15)).is_some());
    }

    #[test]
    fn test_later_throttle_replaces_earlier() {
        let cooldown = Cooldown::new(Duration::from_secs(10));
        let mut headers = HeaderMap::new();
        headers.insert("retry-after", HeaderValue::from_static("60"));
        let now = Instant::now();
        cooldown.observe(&headers, now);

        let later = now + Duration::from_secs(1);
        cooldown.observe(&HeaderMap::new(), later);
        assert_eq!(cooldown.remaining(later), Some(Duration::from_secs(10)));
    }

    #[test]
    fn test_oversized_retry_after_is_capped() {
        let cooldown = Cooldown::new(DEFAULT_COOLDOWN_WINDOW);
        let mut headers = HeaderMap::new();
        headers.insert(
            "retry-after",
            HeaderValue::from_static("18446744073709551615"),
        );
        let now = Instant::now();

        assert_eq!(cooldown.observe(&headers, now), MAX_COOLDOWN_WINDOW);
        assert_eq!(cooldown.remaining(now), Some(MAX_COOLDOWN_WINDOW));

        let unbounded = Cooldown::new(Duration::MAX);
        assert_eq!(unbounded.observe(&HeaderMap::new(), now), MAX_COOLDOWN_WINDOW);
    }
}
