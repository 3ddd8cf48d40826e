//! `retryable-httpclient` is a small async HTTP client built on `reqwest`.
//!
//! It adds what plain `reqwest` leaves to the caller:
//! - request builders for plain, header-annotated and JSON requests
//!   ([`Request`]);
//! - a bounded retry loop driven by a caller-supplied predicate, with no
//!   retries unless one is configured ([`ClientBuilder::check_retry_policy`]);
//! - one structured error for every failure, carrying URL, status, captured
//!   body and cause ([`HttpError`]);
//! - optional JSON decoding of successful bodies
//!   ([`Client::send_request_and_decode`]);
//! - wire-format dumps of requests and responses for diagnostics.

mod classify;
mod client;
mod context;
mod decode;
mod dump;
mod error;
mod options;
pub mod policies;
mod request;
mod response;
mod retry;
mod transport;

pub use client::{Client, ClientBuilder};
pub use context::Context;
pub use decode::{Decoder, JsonDecoder};
pub use dump::{DumpLogger, Dumper, WireDumper};
pub use error::{BoxError, BuildError, Cause, HttpError, ResponseError};
pub use options::ClientOptions;
pub use request::Request;
pub use response::{Body, BodyReader, Response, ResponseHead, StreamBodyReader};
pub use retry::{backoff, CheckRetry, RetryDecision};
pub use transport::{PooledSender, Sender, TransportError};

pub use reqwest::{header, Method, StatusCode, Url, Version};
pub use tokio_util::sync::CancellationToken;

pub type Result<T> = std::result::Result<T, HttpError>;
