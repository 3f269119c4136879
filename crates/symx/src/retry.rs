//! 🔁 Retry with exponential backoff: the "have you tried turning it off and on again" module.
//!
//! Feed reads and message posts go through here. Everything else gets one shot,
//! because a room lookup that fails just becomes a cache miss anyway.
//!
//! 🧠 Knowledge graph:
//! - `RetryPolicy`: built from `RetryConfig` (`backends::common_config`).
//! - `classify_reqwest_result`: connect / timeout / 408 / 429 / 5xx are worth another go.
//!   401 and friends are not. Retrying a rejected certificate is just harassment.
//! - `retry_with_backoff`: the loop. Logs nothing itself; callers pass `on_retry`.

use std::future::Future;
use std::time::Duration;

/// 📐 How many times, and how patiently.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Attempts including the first. `None` = unlimited.
    pub max_attempts: Option<u32>,
    pub initial_interval: Duration,
    pub multiplier: f64,
    pub max_interval: Duration,
}

impl RetryPolicy {
    /// One attempt, no waiting. For tests and for the impatient.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: Some(1),
            initial_interval: Duration::ZERO,
            multiplier: 1.0,
            max_interval: Duration::ZERO,
        }
    }

    /// ⏱️ Delay before retry number `retry_index` (1-based): `initial × multiplier^(n-1)`, capped.
    pub fn backoff_delay(&self, retry_index: u32) -> Duration {
        let exponent = retry_index.saturating_sub(1).min(1024) as i32;
        let factor = self.multiplier.max(1.0).powi(exponent);
        let secs = self.initial_interval.as_secs_f64() * factor;
        let cap = self.max_interval.as_secs_f64();
        // -- 💀 inf × 0 = NaN, and Duration::from_secs_f64 panics on both. Not today.
        if !secs.is_finite() || secs > cap {
            return self.max_interval;
        }
        Duration::from_secs_f64(secs.max(0.0))
    }
}

/// 🏷️ Why we're trying again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryReason {
    Connect,
    Timeout,
    RateLimited,
    ServerError,
    RequestTimeout,
}

impl RetryReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Connect => "connect",
            Self::Timeout => "timeout",
            Self::RateLimited => "rate_limited",
            Self::ServerError => "server_error",
            Self::RequestTimeout => "request_timeout",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    Retry {
        reason: RetryReason,
        retry_after: Option<Duration>,
    },
    DoNotRetry,
}

/// 📋 Handed to `on_retry` right before we nap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryAttempt {
    pub attempt: u32,
    pub delay: Duration,
    pub reason: RetryReason,
}

/// `Retry-After: <seconds>`. HTTP-date flavored values are ignored; backoff covers those.
pub fn parse_retry_after(headers: &reqwest::header::HeaderMap) -> Option<Duration> {
    let raw = headers.get(reqwest::header::RETRY_AFTER)?.to_str().ok()?.trim();
    raw.parse::<u64>().ok().map(Duration::from_secs)
}

/// 🕵️ Look at a reqwest outcome and decide whether it deserves a second chance.
pub fn classify_reqwest_result(
    result: &std::result::Result<reqwest::Response, reqwest::Error>,
) -> RetryDecision {
    match result {
        Ok(resp) => {
            let status = resp.status();
            let reason = if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
                RetryReason::RateLimited
            } else if status == reqwest::StatusCode::REQUEST_TIMEOUT {
                RetryReason::RequestTimeout
            } else if status.is_server_error() {
                RetryReason::ServerError
            } else {
                return RetryDecision::DoNotRetry;
            };
            RetryDecision::Retry {
                reason,
                retry_after: parse_retry_after(resp.headers()),
            }
        }
        Err(err) if err.is_timeout() => RetryDecision::Retry {
            reason: RetryReason::Timeout,
            retry_after: None,
        },
        Err(err) if err.is_connect() || err.is_request() => RetryDecision::Retry {
            reason: RetryReason::Connect,
            retry_after: None,
        },
        Err(_) => RetryDecision::DoNotRetry,
    }
}

/// 🔄 Run `operation` until it succeeds, `classify` says stop, or the policy runs out.
///
/// - `operation(attempt)` gets a 1-based attempt number.
/// - The last attempt's result is returned as-is, success or not.
pub async fn retry_with_backoff<T, E, Op, Fut, Classify, OnRetry>(
    policy: &RetryPolicy,
    mut operation: Op,
    mut classify: Classify,
    mut on_retry: OnRetry,
) -> std::result::Result<T, E>
where
    Op: FnMut(u32) -> Fut,
    Fut: Future<Output = std::result::Result<T, E>>,
    Classify: FnMut(&std::result::Result<T, E>) -> RetryDecision,
    OnRetry: FnMut(RetryAttempt),
{
    let mut attempt = 1u32;
    loop {
        let result = operation(attempt).await;
        let out_of_attempts = policy.max_attempts.is_some_and(|max| attempt >= max);
        let decision = if out_of_attempts {
            RetryDecision::DoNotRetry
        } else {
            classify(&result)
        };

        match decision {
            RetryDecision::Retry {
                reason,
                retry_after,
            } => {
                let delay = retry_after
                    .map(|d| d.min(policy.max_interval))
                    .unwrap_or_else(|| policy.backoff_delay(attempt));
                on_retry(RetryAttempt {
                    attempt,
                    delay,
                    reason,
                });
                tokio::time::sleep(delay).await;
                attempt = attempt.saturating_add(1);
            }
            RetryDecision::DoNotRetry => return result,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::{HeaderMap, HeaderValue, RETRY_AFTER};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn instant_policy(max_attempts: Option<u32>) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            initial_interval: Duration::ZERO,
            multiplier: 2.0,
            max_interval: Duration::ZERO,
        }
    }

    fn always_retry(r: &std::result::Result<&str, &str>) -> RetryDecision {
        match r {
            Err(_) => RetryDecision::Retry {
                reason: RetryReason::Connect,
                retry_after: None,
            },
            Ok(_) => RetryDecision::DoNotRetry,
        }
    }

    #[test]
    fn the_one_where_backoff_grows_and_then_hits_the_ceiling() {
        let policy = RetryPolicy {
            max_attempts: Some(5),
            initial_interval: Duration::from_millis(100),
            multiplier: 2.0,
            max_interval: Duration::from_millis(500),
        };
        assert_eq!(policy.backoff_delay(1), Duration::from_millis(100));
        assert_eq!(policy.backoff_delay(2), Duration::from_millis(200));
        assert_eq!(policy.backoff_delay(3), Duration::from_millis(400));
        assert_eq!(policy.backoff_delay(4), Duration::from_millis(500));
        assert_eq!(policy.backoff_delay(400), Duration::from_millis(500));
    }

    #[test]
    fn the_one_where_retry_after_is_read_in_seconds() {
        let mut headers = HeaderMap::new();
        headers.insert(RETRY_AFTER, HeaderValue::from_static("7"));
        assert_eq!(parse_retry_after(&headers), Some(Duration::from_secs(7)));

        headers.insert(RETRY_AFTER, HeaderValue::from_static("Wed, 21 Oct 2015 07:28:00 GMT"));
        assert_eq!(parse_retry_after(&headers), None);
    }

    #[tokio::test]
    async fn the_one_where_third_time_is_the_charm() {
        let attempts = Arc::new(AtomicU32::new(0));
        let seen = attempts.clone();

        let result = retry_with_backoff(
            &instant_policy(Some(5)),
            move |_attempt| {
                let seen = seen.clone();
                async move {
                    let n = seen.fetch_add(1, Ordering::SeqCst) + 1;
                    if n < 3 { Err("transient") } else { Ok("ok") }
                }
            },
            always_retry,
            |_info| {},
        )
        .await;

        assert_eq!(result, Ok("ok"));
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn the_one_where_we_give_up_after_max_attempts() {
        let attempts = Arc::new(AtomicU32::new(0));
        let seen = attempts.clone();
        let mut retries_logged = 0;

        let result: std::result::Result<&str, &str> = retry_with_backoff(
            &instant_policy(Some(2)),
            move |_attempt| {
                let seen = seen.clone();
                async move {
                    seen.fetch_add(1, Ordering::SeqCst);
                    Err("still broken")
                }
            },
            always_retry,
            |_info| retries_logged += 1,
        )
        .await;

        assert_eq!(result, Err("still broken"));
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
        assert_eq!(retries_logged, 1);
    }

    #[tokio::test]
    async fn the_one_where_do_not_retry_means_do_not_retry() {
        let attempts = Arc::new(AtomicU32::new(0));
        let seen = attempts.clone();

        let result: std::result::Result<&str, &str> = retry_with_backoff(
            &instant_policy(None),
            move |_attempt| {
                let seen = seen.clone();
                async move {
                    seen.fetch_add(1, Ordering::SeqCst);
                    Err("unauthorized")
                }
            },
            |_r| RetryDecision::DoNotRetry,
            |_info| {},
        )
        .await;

        assert_eq!(result, Err("unauthorized"));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }
}
