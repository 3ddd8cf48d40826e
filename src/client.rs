use std::{fmt, sync::Arc, time::Duration};

use bytes::Bytes;
use serde::de::DeserializeOwned;

use crate::{
    classify::classify,
    decode::decode_into,
    options::duration_to_ms,
    policies,
    transport::{PooledSender, Transport},
    BodyReader, BuildError, Cause, CheckRetry, ClientOptions, Decoder, DumpLogger, Dumper,
    HttpError, JsonDecoder, Request, Response, ResponseError, Result, RetryDecision, Sender,
    StreamBodyReader, WireDumper,
};

#[derive(Clone)]
struct DumpSink {
    logger: DumpLogger,
    include_body: bool,
}

/// HTTP client with pluggable retries, structured errors and wire dumps.
///
/// Configuration is frozen at [`ClientBuilder::build`]; clones share the
/// same connection pool and are safe to use from many tasks at once.
#[derive(Clone)]
pub struct Client {
    transport: Transport,
    options: ClientOptions,
    body_reader: Arc<dyn BodyReader>,
    decoder: Arc<dyn Decoder>,
    dumper: Arc<dyn Dumper>,
    request_dump: Option<DumpSink>,
    response_dump: Option<DumpSink>,
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("options", &self.options)
            .field("request_dump", &self.request_dump.is_some())
            .field("response_dump", &self.response_dump.is_some())
            .finish_non_exhaustive()
    }
}

impl Client {
    /// Creates a client with default options: no timeout, no retries.
    pub fn new() -> std::result::Result<Self, BuildError> {
        ClientBuilder::new().build()
    }

    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    pub fn options(&self) -> &ClientOptions {
        &self.options
    }

    /// Sends `request` and returns the response.
    ///
    /// Responses with status `>= 400` and transport failures become an
    /// [`HttpError`]; the error body is captured into it.
    pub async fn send_request(&self, request: &Request) -> Result<Response> {
        self.dispatch(request).await
    }

    /// Sends `request` and decodes a successful JSON body into `T`.
    ///
    /// The returned response has its body drained.
    pub async fn send_request_and_decode<T>(&self, request: &Request) -> Result<(Response, T)>
    where
        T: DeserializeOwned,
    {
        let mut response = self.dispatch(request).await?;
        let decoded = match self.body_reader.read_all(response.body_mut()).await {
            Ok(bytes) => decode_into(self.decoder.as_ref(), &bytes),
            Err(err) => Err(err),
        };

        match decoded {
            Ok(value) => Ok((response, value)),
            Err(err) => Err(HttpError::from_parts(
                request.url().as_str(),
                Some(response.head().clone()),
                Bytes::new(),
                Some(Arc::new(ResponseError::Decode(err))),
            )),
        }
    }

    async fn dispatch(&self, request: &Request) -> Result<Response> {
        let url = request.url().as_str();
        self.log_request_dump(request);

        let outcome = self.transport.execute(request).await;
        let mut response = outcome.response;

        if let Some(response) = response.as_mut() {
            self.log_response_dump(response).await;
        }

        let error = outcome.error;
        let failure = classify(
            url,
            response.as_mut(),
            error.clone(),
            self.body_reader.as_ref(),
        )
        .await;
        if let Some(err) = failure {
            return Err(err);
        }

        match response {
            Some(response) => {
                #[cfg(feature = "tracing")]
                if let Some(error) = &error {
                    tracing::debug!(%url, %error, "ignoring error attached to successful response");
                }
                Ok(response)
            }
            None => Err(HttpError::from_parts(
                url,
                None,
                Bytes::new(),
                Some(Arc::new(ResponseError::Missing)),
            )),
        }
    }

    fn log_request_dump(&self, request: &Request) {
        let Some(sink) = &self.request_dump else {
            return;
        };
        match self.dumper.dump_request(request, sink.include_body) {
            Ok(dump) => (sink.logger)(&dump),
            Err(_err) => {
                #[cfg(feature = "tracing")]
                tracing::debug!(error = %_err, "skipping request dump");
            }
        }
    }

    async fn log_response_dump(&self, response: &mut Response) {
        let Some(sink) = &self.response_dump else {
            return;
        };
        match self.dumper.dump_response(response, sink.include_body).await {
            Ok(dump) => (sink.logger)(&dump),
            Err(_err) => {
                #[cfg(feature = "tracing")]
                tracing::debug!(error = %_err, "skipping response dump");
            }
        }
    }
}

enum TransportSource {
    Pooled,
    HttpClient(reqwest::Client),
    Custom(Arc<dyn Sender>),
}

/// Assembles a [`Client`].
///
/// Every setting is optional; see [`ClientOptions`] for the defaults.
/// Without [`ClientBuilder::check_retry_policy`] requests are never
/// retried, whatever [`ClientBuilder::max_retries`] says.
pub struct ClientBuilder {
    options: ClientOptions,
    transport: TransportSource,
    policy: Option<CheckRetry>,
    request_dump: Option<DumpSink>,
    response_dump: Option<DumpSink>,
    body_reader: Option<Arc<dyn BodyReader>>,
    decoder: Option<Arc<dyn Decoder>>,
    dumper: Option<Arc<dyn Dumper>>,
}

impl Default for ClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ClientBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientBuilder")
            .field("options", &self.options)
            .field("custom_policy", &self.policy.is_some())
            .finish_non_exhaustive()
    }
}

impl ClientBuilder {
    pub fn new() -> Self {
        Self {
            options: ClientOptions::default(),
            transport: TransportSource::Pooled,
            policy: None,
            request_dump: None,
            response_dump: None,
            body_reader: None,
            decoder: None,
            dumper: None,
        }
    }

    /// Replaces all numeric options at once.
    pub fn options(mut self, options: ClientOptions) -> Self {
        self.options = options;
        self
    }

    /// Sends through an existing `reqwest::Client`.
    ///
    /// Its own timeout and idle-pool settings win: a built client cannot be
    /// reconfigured, so [`ClientBuilder::timeout`] and the idle limits are
    /// ignored. The per-host connection cap still applies.
    pub fn http_client(mut self, http: reqwest::Client) -> Self {
        self.transport = TransportSource::HttpClient(http);
        self
    }

    /// Sends through a custom [`Sender`]. No connection limits are applied.
    pub fn sender(mut self, sender: Arc<dyn Sender>) -> Self {
        self.transport = TransportSource::Custom(sender);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.options.timeout_ms = duration_to_ms(timeout);
        self
    }

    pub fn max_idle_conns(mut self, max: usize) -> Self {
        self.options.max_idle_conns = max;
        self
    }

    pub fn max_idle_conns_per_host(mut self, max: usize) -> Self {
        self.options.max_idle_conns_per_host = max;
        self
    }

    pub fn max_conns_per_host(mut self, max: usize) -> Self {
        self.options.max_conns_per_host = max;
        self
    }

    pub fn max_retries(mut self, max: usize) -> Self {
        self.options.max_retries = max;
        self
    }

    pub fn retry_wait_min(mut self, wait: Duration) -> Self {
        self.options.retry_wait_min_ms = duration_to_ms(wait);
        self
    }

    pub fn retry_wait_max(mut self, wait: Duration) -> Self {
        self.options.retry_wait_max_ms = duration_to_ms(wait);
        self
    }

    /// Sets the predicate run after every attempt. See [`crate::policies`].
    pub fn check_retry_policy<F>(mut self, policy: F) -> Self
    where
        F: Fn(Option<&Response>, Option<&Cause>) -> RetryDecision + Send + Sync + 'static,
    {
        self.policy = Some(Arc::new(policy));
        self
    }

    /// Receives a wire dump of every outgoing request, before it is sent.
    pub fn request_dump_logger<F>(mut self, logger: F, include_body: bool) -> Self
    where
        F: Fn(&[u8]) + Send + Sync + 'static,
    {
        self.request_dump = Some(DumpSink {
            logger: Arc::new(logger),
            include_body,
        });
        self
    }

    /// Receives a wire dump of the final response of every call.
    pub fn response_dump_logger<F>(mut self, logger: F, include_body: bool) -> Self
    where
        F: Fn(&[u8]) + Send + Sync + 'static,
    {
        self.response_dump = Some(DumpSink {
            logger: Arc::new(logger),
            include_body,
        });
        self
    }

    pub fn body_reader(mut self, reader: Arc<dyn BodyReader>) -> Self {
        self.body_reader = Some(reader);
        self
    }

    pub fn decoder(mut self, decoder: Arc<dyn Decoder>) -> Self {
        self.decoder = Some(decoder);
        self
    }

    pub fn dumper(mut self, dumper: Arc<dyn Dumper>) -> Self {
        self.dumper = Some(dumper);
        self
    }

    pub fn build(self) -> std::result::Result<Client, BuildError> {
        let options = self.options;
        let sender: Arc<dyn Sender> = match self.transport {
            TransportSource::Pooled => {
                let mut builder = reqwest::Client::builder();
                if let Some(timeout) = options.timeout() {
                    builder = builder.timeout(timeout);
                }
                if let Some(max) = options.idle_per_host_limit() {
                    builder = builder.pool_max_idle_per_host(max);
                }
                let http = builder.build().map_err(BuildError::Client)?;
                Arc::new(
                    PooledSender::new(http).with_max_conns_per_host(options.max_conns_per_host),
                )
            }
            TransportSource::HttpClient(http) => {
                #[cfg(feature = "tracing")]
                if options.timeout().is_some() || options.idle_per_host_limit().is_some() {
                    tracing::debug!(
                        "caller-provided reqwest client: timeout and idle limits not applied"
                    );
                }
                Arc::new(
                    PooledSender::new(http).with_max_conns_per_host(options.max_conns_per_host),
                )
            }
            TransportSource::Custom(sender) => {
                #[cfg(feature = "tracing")]
                tracing::debug!("custom sender: connection limits not applied");
                sender
            }
        };

        let policy: CheckRetry = self
            .policy
            .unwrap_or_else(|| Arc::new(policies::never_retry));
        let transport = Transport::new(
            sender,
            policy,
            options.max_retries,
            options.retry_wait_min(),
            options.retry_wait_max(),
        );

        Ok(Client {
            transport,
            options,
            body_reader: self
                .body_reader
                .unwrap_or_else(|| Arc::new(StreamBodyReader)),
            decoder: self.decoder.unwrap_or_else(|| Arc::new(JsonDecoder)),
            dumper: self.dumper.unwrap_or_else(|| Arc::new(WireDumper)),
            request_dump: self.request_dump,
            response_dump: self.response_dump,
        })
    }
}
