//! Header-driven rate-limit heuristics.
//!
//! [`RateLimitPolicy`] is a plain value: it turns the rate-limit headers of a
//! response into a sleep duration. The HTTP client owns the clock and the
//! token bucket; nothing in here sleeps.

use reqwest::header::HeaderMap;
use serde::Serialize;
use std::time::Duration;

use crate::infrastructure::config::defaults;

pub const RETRY_AFTER: &str = "retry-after";
pub const REMAINING: &str = "x-hubspot-ratelimit-remaining";

/// The subset of response headers the policy looks at.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RateLimitHeaders {
    pub retry_after_secs: Option<u64>,
    pub remaining: Option<u64>,
}

impl RateLimitHeaders {
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let read = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u64>().ok())
        };
        Self {
            retry_after_secs: read(RETRY_AFTER),
            remaining: read(REMAINING),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RateLimitPolicy {
    pub low_threshold: u64,
    pub low_sleep: Duration,
    pub mid_threshold: u64,
    pub mid_sleep: Duration,
    pub jitter: Duration,
    pub default_retry_after: Duration,
    pub max_retries: u32,
}

impl Default for RateLimitPolicy {
    fn default() -> Self {
        Self {
            low_threshold: defaults::RATE_LIMIT_LOW_THRESHOLD,
            low_sleep: Duration::from_millis(defaults::RATE_LIMIT_LOW_SLEEP_MS),
            mid_threshold: defaults::RATE_LIMIT_MID_THRESHOLD,
            mid_sleep: Duration::from_millis(defaults::RATE_LIMIT_MID_SLEEP_MS),
            jitter: Duration::from_millis(defaults::RATE_LIMIT_JITTER_MS),
            default_retry_after: Duration::from_secs(defaults::RATE_LIMIT_DEFAULT_RETRY_AFTER_SECS),
            max_retries: defaults::RATE_LIMIT_MAX_RETRIES,
        }
    }
}

impl RateLimitPolicy {
    /// A policy that never sleeps. Used by tests against mock servers.
    pub fn immediate() -> Self {
        Self {
            low_sleep: Duration::ZERO,
            mid_sleep: Duration::ZERO,
            jitter: Duration::ZERO,
            default_retry_after: Duration::ZERO,
            ..Self::default()
        }
    }

    /// Sleep to apply after a response, before the next call.
    ///
    /// `Retry-After` wins outright; otherwise the remaining-quota header picks
    /// the low or mid sleep. Jitter is always added.
    pub fn delay_after(&self, headers: RateLimitHeaders) -> Duration {
        let base = if let Some(secs) = headers.retry_after_secs {
            Duration::from_secs(secs)
        } else {
            match headers.remaining {
                Some(left) if left < self.low_threshold => self.low_sleep,
                Some(left) if left < self.mid_threshold => self.mid_sleep,
                _ => Duration::ZERO,
            }
        };
        base + self.jitter
    }

    /// Backoff before retrying a 429.
    pub fn retry_delay(&self, headers: RateLimitHeaders) -> Duration {
        headers
            .retry_after_secs
            .map_or(self.default_retry_after, Duration::from_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;
    use rstest::rstest;

    fn h(retry_after: Option<u64>, remaining: Option<u64>) -> RateLimitHeaders {
        RateLimitHeaders {
            retry_after_secs: retry_after,
            remaining,
        }
    }

    #[rstest]
    #[case(h(Some(3), Some(1)), 3_100)]
    #[case(h(None, Some(4)), 2_100)]
    #[case(h(None, Some(5)), 600)]
    #[case(h(None, Some(19)), 600)]
    #[case(h(None, Some(20)), 100)]
    #[case(h(None, None), 100)]
    fn delay_after_headers(#[case] headers: RateLimitHeaders, #[case] expected_ms: u64) {
        let policy = RateLimitPolicy::default();
        assert_eq!(policy.delay_after(headers), Duration::from_millis(expected_ms));
    }

    #[test]
    fn retry_delay_falls_back_to_default() {
        let policy = RateLimitPolicy::default();
        assert_eq!(policy.retry_delay(h(None, None)), Duration::from_secs(10));
        assert_eq!(policy.retry_delay(h(Some(2), None)), Duration::from_secs(2));
    }

    #[test]
    fn immediate_policy_never_sleeps_without_retry_after() {
        let policy = RateLimitPolicy::immediate();
        assert_eq!(policy.delay_after(h(None, Some(0))), Duration::ZERO);
        assert_eq!(policy.retry_delay(h(None, None)), Duration::ZERO);
    }

    #[test]
    fn reads_headers_case_insensitively() {
        let mut headers = HeaderMap::new();
        headers.insert("Retry-After", HeaderValue::from_static("7"));
        headers.insert("X-HubSpot-RateLimit-Remaining", HeaderValue::from_static(" 12 "));
        headers.insert("x-other", HeaderValue::from_static("1"));
        assert_eq!(RateLimitHeaders::from_headers(&headers), h(Some(7), Some(12)));

        let mut junk = HeaderMap::new();
        junk.insert("retry-after", HeaderValue::from_static("Wed, 21 Oct 2015 07:28:00 GMT"));
        assert_eq!(RateLimitHeaders::from_headers(&junk), h(None, None));
    }
}
