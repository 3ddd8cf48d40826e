use std::{
    collections::HashMap,
    error::Error as StdError,
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use async_trait::async_trait;
use reqwest::{Method, Url};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::{
    policies::is_end_of_stream,
    retry::{backoff, CheckRetry},
    BoxError, Cause, Request, Response,
};

/// Failure to obtain a response for one attempt.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("{method} \"{url}\": connection failed: {source}")]
    Connect {
        method: Method,
        url: String,
        #[source]
        source: BoxError,
    },
    #[error("{method} \"{url}\": timeout awaiting response")]
    Timeout {
        method: Method,
        url: String,
        #[source]
        source: Option<BoxError>,
    },
    #[error("{method} \"{url}\": EOF")]
    Eof {
        method: Method,
        url: String,
        #[source]
        source: Option<BoxError>,
    },
    #[error("context canceled")]
    Cancelled,
    #[error("context deadline exceeded")]
    DeadlineExceeded,
    #[error("{method} \"{url}\": {source}")]
    Other {
        method: Method,
        url: String,
        #[source]
        source: BoxError,
    },
}

impl TransportError {
    fn from_reqwest(request: &Request, err: reqwest::Error) -> Self {
        let method = request.method().clone();
        let url = request.url().to_string();

        if err.is_timeout() {
            return Self::Timeout {
                method,
                url,
                source: Some(Box::new(err)),
            };
        }
        if err.is_connect() {
            return Self::Connect {
                method,
                url,
                source: Box::new(err),
            };
        }
        // reqwest's own message never says how the connection ended; the
        // hyper and io errors further down the chain do.
        if err.source().is_some_and(is_end_of_stream) {
            return Self::Eof {
                method,
                url,
                source: Some(Box::new(err)),
            };
        }
        Self::Other {
            method,
            url,
            source: Box::new(err),
        }
    }
}

/// Performs one physical send.
///
/// Implementations must not retry on their own; the client's retry loop
/// owns that decision.
#[async_trait]
pub trait Sender: Send + Sync {
    async fn send(&self, request: &Request) -> Result<Response, TransportError>;
}

/// Default [`Sender`] backed by a pooled `reqwest::Client`, with an optional
/// cap on concurrent connections per host.
#[derive(Clone, Debug)]
pub struct PooledSender {
    http: reqwest::Client,
    limiter: Option<HostLimiter>,
}

impl PooledSender {
    pub fn new(http: reqwest::Client) -> Self {
        Self {
            http,
            limiter: None,
        }
    }

    /// Caps in-flight exchanges per host. `0` means unlimited.
    pub fn with_max_conns_per_host(mut self, max: usize) -> Self {
        self.limiter = (max > 0).then(|| HostLimiter::new(max));
        self
    }
}

#[async_trait]
impl Sender for PooledSender {
    async fn send(&self, request: &Request) -> Result<Response, TransportError> {
        let permit = match &self.limiter {
            Some(limiter) => limiter.acquire(request.url()).await,
            None => None,
        };

        let mut builder = self
            .http
            .request(request.method().clone(), request.url().clone())
            .headers(request.headers().clone());
        if let Some(body) = request.body() {
            builder = builder.body(body.clone());
        }

        let response = builder
            .send()
            .await
            .map_err(|err| TransportError::from_reqwest(request, err))?;
        Ok(Response::from_reqwest(response, permit))
    }
}

#[derive(Clone, Debug)]
struct HostLimiter {
    max: usize,
    hosts: Arc<Mutex<HashMap<String, Arc<Semaphore>>>>,
}

impl HostLimiter {
    fn new(max: usize) -> Self {
        Self {
            max,
            hosts: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    async fn acquire(&self, url: &Url) -> Option<HostPermit> {
        let key = format!(
            "{}:{}",
            url.host_str().unwrap_or_default(),
            url.port_or_known_default().unwrap_or_default()
        );
        let semaphore = {
            let mut hosts = self.hosts.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(
                hosts
                    .entry(key.clone())
                    .or_insert_with(|| Arc::new(Semaphore::new(self.max))),
            )
        };
        // The semaphores are never closed, so acquiring only fails if that
        // changes; sending unthrottled is the fallback.
        let permit = semaphore.acquire_owned().await.ok()?;
        Some(HostPermit {
            permit: Some(permit),
            key,
            hosts: Arc::clone(&self.hosts),
        })
    }

    #[cfg(test)]
    fn tracked_hosts(&self) -> usize {
        self.hosts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

/// Slot in a host's connection budget.
///
/// Releasing the last slot of an otherwise unused host forgets the host.
pub(crate) struct HostPermit {
    permit: Option<OwnedSemaphorePermit>,
    key: String,
    hosts: Arc<Mutex<HashMap<String, Arc<Semaphore>>>>,
}

impl Drop for HostPermit {
    fn drop(&mut self) {
        let mut hosts = self.hosts.lock().unwrap_or_else(PoisonError::into_inner);
        // Permits and waiters each hold a clone of the semaphore, and new
        // ones are only cloned under this lock: a count of one means the map
        // is the last user.
        drop(self.permit.take());
        if hosts
            .get(&self.key)
            .is_some_and(|semaphore| Arc::strong_count(semaphore) == 1)
        {
            hosts.remove(&self.key);
        }
    }
}

/// Result of the retry loop: the last response and/or error.
#[derive(Debug, Default)]
pub(crate) struct AttemptOutcome {
    pub(crate) response: Option<Response>,
    pub(crate) error: Option<Cause>,
}

impl AttemptOutcome {
    fn failed(err: TransportError) -> Self {
        Self {
            response: None,
            error: Some(Arc::new(err)),
        }
    }
}

/// Bounded retry loop around a [`Sender`].
#[derive(Clone)]
pub(crate) struct Transport {
    sender: Arc<dyn Sender>,
    policy: CheckRetry,
    max_retries: usize,
    wait_min: Duration,
    wait_max: Duration,
}

impl Transport {
    pub(crate) fn new(
        sender: Arc<dyn Sender>,
        policy: CheckRetry,
        max_retries: usize,
        wait_min: Duration,
        wait_max: Duration,
    ) -> Self {
        Self {
            sender,
            policy,
            max_retries,
            wait_min,
            wait_max,
        }
    }

    /// Sends `request` until the policy stops, the retry budget runs out or
    /// the request context is done. Returns the last outcome unchanged.
    pub(crate) async fn execute(&self, request: &Request) -> AttemptOutcome {
        let ctx = request.context();
        let mut attempt = 0usize;

        loop {
            attempt += 1;
            if let Some(err) = ctx.err() {
                return AttemptOutcome::failed(err);
            }

            #[cfg(feature = "tracing")]
            tracing::debug!(
                method = %request.method(),
                url = %request.url(),
                attempt,
                "sending request"
            );

            let (response, error) = tokio::select! {
                biased;
                err = ctx.done() => (None, Some(Arc::new(err) as Cause)),
                result = self.sender.send(request) => match result {
                    Ok(response) => (Some(response), None),
                    Err(err) => (None, Some(Arc::new(err) as Cause)),
                },
            };

            let decision = (self.policy)(response.as_ref(), error.as_ref());
            if !decision.retry || attempt > self.max_retries || ctx.err().is_some() {
                #[cfg(feature = "tracing")]
                if decision.retry {
                    tracing::debug!(
                        method = %request.method(),
                        url = %request.url(),
                        attempts = attempt,
                        "giving up on request"
                    );
                }
                return AttemptOutcome {
                    response,
                    error: decision.error.or(error),
                };
            }

            let wait = backoff(self.wait_min, self.wait_max, attempt - 1, response.as_ref());
            drop(response);

            #[cfg(feature = "tracing")]
            tracing::debug!("retrying request after {} ms", wait.as_millis());

            tokio::select! {
                biased;
                err = ctx.done() => return AttemptOutcome::failed(err),
                _ = tokio::time::sleep(wait) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{
        io,
        sync::atomic::{AtomicUsize, Ordering},
    };

    use reqwest::StatusCode;

    use super::*;
    use crate::{policies, Context, RetryDecision};

    struct ScriptedSender {
        hits: AtomicUsize,
        status: Option<StatusCode>,
    }

    impl ScriptedSender {
        fn status(status: StatusCode) -> Arc<Self> {
            Arc::new(Self {
                hits: AtomicUsize::new(0),
                status: Some(status),
            })
        }

        fn eof() -> Arc<Self> {
            Arc::new(Self {
                hits: AtomicUsize::new(0),
                status: None,
            })
        }

        fn hits(&self) -> usize {
            self.hits.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Sender for ScriptedSender {
        async fn send(&self, request: &Request) -> Result<Response, TransportError> {
            self.hits.fetch_add(1, Ordering::SeqCst);
            match self.status {
                Some(status) => Ok(Response::new(status, request.url().clone(), "body")),
                None => Err(TransportError::Eof {
                    method: request.method().clone(),
                    url: request.url().to_string(),
                    source: Some(Box::new(io::Error::from(io::ErrorKind::UnexpectedEof))),
                }),
            }
        }
    }

    fn transport(sender: Arc<dyn Sender>, policy: CheckRetry, max_retries: usize) -> Transport {
        Transport::new(sender, policy, max_retries, Duration::ZERO, Duration::ZERO)
    }

    fn request(ctx: Context) -> Request {
        Request::new(ctx, Method::GET, "http://localhost/").expect("request must build")
    }

    #[tokio::test]
    async fn never_retry_makes_exactly_one_attempt() {
        for status in [StatusCode::OK, StatusCode::BAD_REQUEST, StatusCode::BAD_GATEWAY] {
            let sender = ScriptedSender::status(status);
            let outcome = transport(sender.clone(), Arc::new(policies::never_retry), 5)
                .execute(&request(Context::background()))
                .await;

            assert_eq!(sender.hits(), 1);
            assert_eq!(outcome.response.map(|r| r.status()), Some(status));
            assert!(outcome.error.is_none());
        }
    }

    #[tokio::test]
    async fn retries_until_budget_is_spent() {
        let sender = ScriptedSender::eof();
        let outcome = transport(sender.clone(), Arc::new(policies::retry_on_eof), 2)
            .execute(&request(Context::background()))
            .await;

        assert_eq!(sender.hits(), 3);
        assert!(outcome.response.is_none());
        let error = outcome.error.expect("last transport error must surface");
        assert!(error.to_string().contains("EOF"));
    }

    #[tokio::test]
    async fn retry_on_status_returns_last_response() {
        let sender = ScriptedSender::status(StatusCode::SERVICE_UNAVAILABLE);
        let policy: CheckRetry = Arc::new(|response: Option<&Response>, _: Option<&Cause>| {
            RetryDecision::new(
                response.is_some_and(|r| r.status().is_server_error()),
                None,
            )
        });
        let outcome = transport(sender.clone(), policy, 1)
            .execute(&request(Context::background()))
            .await;

        assert_eq!(sender.hits(), 2);
        assert_eq!(
            outcome.response.map(|r| r.status()),
            Some(StatusCode::SERVICE_UNAVAILABLE)
        );
        assert!(outcome.error.is_none());
    }

    #[tokio::test]
    async fn policy_error_is_surfaced_next_to_response() {
        let sender = ScriptedSender::status(StatusCode::OK);
        let note: Cause = Arc::new(io::Error::other("informational"));
        let surfaced = Arc::clone(&note);
        let policy: CheckRetry = Arc::new(move |_: Option<&Response>, _: Option<&Cause>| {
            RetryDecision::new(false, Some(Arc::clone(&surfaced)))
        });
        let outcome = transport(sender, policy, 0)
            .execute(&request(Context::background()))
            .await;

        assert!(outcome.response.is_some());
        assert!(outcome
            .error
            .is_some_and(|error| Arc::ptr_eq(&error, &note)));
    }

    #[tokio::test]
    async fn cancelled_context_never_sends() {
        let sender = ScriptedSender::status(StatusCode::OK);
        let ctx = Context::background();
        ctx.cancel();
        let outcome = transport(sender.clone(), Arc::new(policies::never_retry), 3)
            .execute(&request(ctx))
            .await;

        assert_eq!(sender.hits(), 0);
        assert!(outcome.response.is_none());
        let error = outcome.error.expect("cancellation must surface");
        assert_eq!(error.to_string(), "context canceled");
    }

    #[tokio::test]
    async fn cancellation_during_backoff_stops_retrying() {
        let sender = ScriptedSender::eof();
        let ctx = Context::background().with_timeout(Duration::from_millis(50));
        let transport = Transport::new(
            sender.clone(),
            Arc::new(policies::retry_on_eof),
            10,
            Duration::from_secs(5),
            Duration::from_secs(5),
        );
        let outcome = transport.execute(&request(ctx)).await;

        assert_eq!(sender.hits(), 1);
        let error = outcome.error.expect("deadline must surface");
        assert_eq!(error.to_string(), "context deadline exceeded");
    }

    #[test]
    fn transport_error_messages_name_method_and_url() {
        let err = TransportError::Eof {
            method: Method::POST,
            url: "http://localhost/post".to_owned(),
            source: None,
        };
        assert_eq!(err.to_string(), "POST \"http://localhost/post\": EOF");
    }

    fn host_url(host: usize) -> Url {
        Url::parse(&format!("http://host-{host}.test/")).expect("host url must parse")
    }

    #[tokio::test]
    async fn released_hosts_are_forgotten() {
        let limiter = HostLimiter::new(1);
        for host in 0..1000 {
            let permit = limiter.acquire(&host_url(host)).await;
            assert!(permit.is_some());
            assert_eq!(limiter.tracked_hosts(), 1);
        }
        assert_eq!(limiter.tracked_hosts(), 0);
    }

    #[tokio::test]
    async fn busy_host_is_kept_until_last_permit_goes() {
        let limiter = HostLimiter::new(1);
        let url = host_url(1);

        let first = limiter.acquire(&url).await.expect("first permit");
        let blocked = tokio::time::timeout(Duration::from_millis(20), limiter.acquire(&url)).await;
        assert!(blocked.is_err(), "second permit must wait for the first");
        assert_eq!(limiter.tracked_hosts(), 1);

        drop(first);
        assert_eq!(limiter.tracked_hosts(), 0);

        let again = limiter.acquire(&url).await.expect("permit after release");
        assert_eq!(limiter.tracked_hosts(), 1);
        drop(again);
        assert_eq!(limiter.tracked_hosts(), 0);
    }

    #[tokio::test]
    async fn waiter_keeps_host_alive_across_release() {
        let limiter = HostLimiter::new(1);
        let url = host_url(2);

        let first = limiter.acquire(&url).await.expect("first permit");
        let waiter = {
            let limiter = limiter.clone();
            let url = url.clone();
            tokio::spawn(async move { limiter.acquire(&url).await.is_some() })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        drop(first);
        assert!(waiter.await.expect("waiter task must finish"));
        assert_eq!(limiter.tracked_hosts(), 0);
    }
}
