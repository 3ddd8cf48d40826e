use std::{sync::Arc, time::Duration};

use reqwest::{header::RETRY_AFTER, StatusCode};

use crate::{Cause, Response};

/// Predicate evaluated after every attempt.
///
/// It sees the attempt's response (read-only) and transport error and
/// decides whether to try again and which error, if any, to surface when
/// stopping.
pub type CheckRetry =
    Arc<dyn Fn(Option<&Response>, Option<&Cause>) -> RetryDecision + Send + Sync>;

/// Outcome of a [`CheckRetry`] evaluation.
#[derive(Clone, Debug, Default)]
pub struct RetryDecision {
    pub retry: bool,
    pub error: Option<Cause>,
}

impl RetryDecision {
    pub fn new(retry: bool, error: Option<Cause>) -> Self {
        Self { retry, error }
    }

    /// Stop without surfacing an extra error.
    pub fn stop() -> Self {
        Self::default()
    }
}

/// Wait before retry number `retry_index` (zero based).
///
/// Grows as `min * 2^retry_index`, clamped to `[min, max]`. A numeric
/// `Retry-After` on a 429 or 503 response replaces the exponential value,
/// still within the same bounds.
pub fn backoff(
    min: Duration,
    max: Duration,
    retry_index: usize,
    response: Option<&Response>,
) -> Duration {
    let max = max.max(min);

    if let Some(seconds) = response.and_then(retry_after_seconds) {
        return Duration::from_secs(seconds).clamp(min, max);
    }

    let exp = retry_index.min(31) as u32;
    min.checked_mul(1u32 << exp).unwrap_or(max).min(max)
}

fn retry_after_seconds(response: &Response) -> Option<u64> {
    if !matches!(
        response.status(),
        StatusCode::TOO_MANY_REQUESTS | StatusCode::SERVICE_UNAVAILABLE
    ) {
        return None;
    }
    response
        .headers()
        .get(RETRY_AFTER)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse::<u64>().ok())
}
