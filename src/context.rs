use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::TransportError;

/// Cancellation and deadline signal carried by a [`Request`](crate::Request).
///
/// Sends and backoff waits race this signal; once it fires no further
/// attempt is made.
#[derive(Clone, Debug, Default)]
pub struct Context {
    cancel: CancellationToken,
    deadline: Option<Instant>,
}

impl Context {
    /// A context that is never cancelled and has no deadline.
    pub fn background() -> Self {
        Self::default()
    }

    /// Sets a deadline `timeout` from now, keeping an earlier one if set.
    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    /// Sets an absolute deadline, keeping an earlier one if set.
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(match self.deadline {
            Some(current) => current.min(deadline),
            None => deadline,
        });
        self
    }

    /// Ties this context to an externally owned token.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Returns why the context is done, or `None` while it is still live.
    pub fn err(&self) -> Option<TransportError> {
        if self.cancel.is_cancelled() {
            return Some(TransportError::Cancelled);
        }
        match self.deadline {
            Some(deadline) if deadline <= Instant::now() => Some(TransportError::DeadlineExceeded),
            _ => None,
        }
    }

    /// Resolves once the context is cancelled or its deadline passes.
    pub async fn done(&self) -> TransportError {
        match self.deadline {
            Some(deadline) => tokio::select! {
                _ = self.cancel.cancelled() => TransportError::Cancelled,
                _ = tokio::time::sleep_until(deadline) => TransportError::DeadlineExceeded,
            },
            None => {
                self.cancel.cancelled().await;
                TransportError::Cancelled
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn background_is_live() {
        assert!(Context::background().err().is_none());
    }

    #[test]
    fn cancelled_context_reports_cancelled() {
        let ctx = Context::background();
        ctx.cancel();
        assert!(matches!(ctx.err(), Some(TransportError::Cancelled)));
    }

    #[test]
    fn cancellation_is_shared_with_external_token() {
        let token = CancellationToken::new();
        let ctx = Context::background().with_cancellation(token.clone());
        token.cancel();
        assert!(matches!(ctx.err(), Some(TransportError::Cancelled)));
    }

    #[tokio::test]
    async fn expired_deadline_reports_deadline_exceeded() {
        let ctx = Context::background().with_deadline(Instant::now() - Duration::from_millis(1));
        assert!(matches!(ctx.err(), Some(TransportError::DeadlineExceeded)));
        assert!(matches!(ctx.done().await, TransportError::DeadlineExceeded));
    }

    #[test]
    fn earlier_deadline_wins() {
        let now = Instant::now();
        let ctx = Context::background()
            .with_deadline(now + Duration::from_secs(5))
            .with_deadline(now + Duration::from_secs(60));
        assert_eq!(ctx.deadline(), Some(now + Duration::from_secs(5)));
    }
}
