use std::time::Duration;

use crate::BuildError;

/// Timeouts, connection limits and retry budget of a [`Client`](crate::Client).
///
/// Zero means "not set" for every field: no timeout, unlimited connections,
/// no retries and no wait between attempts.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ClientOptions {
    /// Per-attempt timeout in milliseconds.
    pub timeout_ms: u64,
    /// Maximum idle (keep-alive) connections across all hosts.
    pub max_idle_conns: usize,
    /// Maximum idle connections kept per host.
    pub max_idle_conns_per_host: usize,
    /// Maximum concurrent connections per host.
    pub max_conns_per_host: usize,
    /// Maximum number of retries after the initial attempt.
    pub max_retries: usize,
    /// Lower bound of the wait between attempts, in milliseconds.
    pub retry_wait_min_ms: u64,
    /// Upper bound of the wait between attempts, in milliseconds.
    pub retry_wait_max_ms: u64,
}

impl ClientOptions {
    /// Reads options from `HTTPCLIENT_*` environment variables.
    ///
    /// Reads:
    /// - `HTTPCLIENT_TIMEOUT_MS`
    /// - `HTTPCLIENT_MAX_IDLE_CONNS`
    /// - `HTTPCLIENT_MAX_IDLE_CONNS_PER_HOST`
    /// - `HTTPCLIENT_MAX_CONNS_PER_HOST`
    /// - `HTTPCLIENT_MAX_RETRIES`
    /// - `HTTPCLIENT_RETRY_WAIT_MIN_MS`
    /// - `HTTPCLIENT_RETRY_WAIT_MAX_MS`
    ///
    /// Unset variables keep their default. Returns an error naming the
    /// first variable that is set but not a non-negative integer.
    pub fn from_env() -> Result<Self, BuildError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, BuildError> {
        fn read<T: std::str::FromStr>(
            lookup: &impl Fn(&str) -> Option<String>,
            key: &str,
            default: T,
        ) -> Result<T, BuildError> {
            match lookup(key) {
                Some(raw) if !raw.trim().is_empty() => {
                    raw.trim().parse().map_err(|_| BuildError::InvalidOption {
                        key: key.to_owned(),
                        value: raw.clone(),
                    })
                }
                _ => Ok(default),
            }
        }

        let defaults = Self::default();
        Ok(Self {
            timeout_ms: read(&lookup, "HTTPCLIENT_TIMEOUT_MS", defaults.timeout_ms)?,
            max_idle_conns: read(&lookup, "HTTPCLIENT_MAX_IDLE_CONNS", defaults.max_idle_conns)?,
            max_idle_conns_per_host: read(
                &lookup,
                "HTTPCLIENT_MAX_IDLE_CONNS_PER_HOST",
                defaults.max_idle_conns_per_host,
            )?,
            max_conns_per_host: read(
                &lookup,
                "HTTPCLIENT_MAX_CONNS_PER_HOST",
                defaults.max_conns_per_host,
            )?,
            max_retries: read(&lookup, "HTTPCLIENT_MAX_RETRIES", defaults.max_retries)?,
            retry_wait_min_ms: read(
                &lookup,
                "HTTPCLIENT_RETRY_WAIT_MIN_MS",
                defaults.retry_wait_min_ms,
            )?,
            retry_wait_max_ms: read(
                &lookup,
                "HTTPCLIENT_RETRY_WAIT_MAX_MS",
                defaults.retry_wait_max_ms,
            )?,
        })
    }

    pub(crate) fn timeout(&self) -> Option<Duration> {
        (self.timeout_ms > 0).then(|| Duration::from_millis(self.timeout_ms))
    }

    pub(crate) fn retry_wait_min(&self) -> Duration {
        Duration::from_millis(self.retry_wait_min_ms)
    }

    pub(crate) fn retry_wait_max(&self) -> Duration {
        Duration::from_millis(self.retry_wait_max_ms)
    }

    /// Idle connections to keep per host in the reqwest pool. reqwest has no
    /// global idle cap, so the global limit also bounds the per-host one.
    pub(crate) fn idle_per_host_limit(&self) -> Option<usize> {
        match (self.max_idle_conns, self.max_idle_conns_per_host) {
            (0, 0) => None,
            (0, per_host) => Some(per_host),
            (total, 0) => Some(total),
            (total, per_host) => Some(total.min(per_host)),
        }
    }
}

pub(crate) fn duration_to_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
