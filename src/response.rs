use std::{fmt, mem, sync::Arc};

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{header::HeaderMap, StatusCode, Url, Version};
use crate::{transport::HostPermit, Cause};

/// Status line and headers of a response.
#[derive(Clone, Debug)]
pub struct ResponseHead {
    pub status: StatusCode,
    pub version: Version,
    pub headers: HeaderMap,
}

/// Response returned by a [`Sender`](crate::Sender).
///
/// The body is read at most once; after that it reports as drained and
/// further reads yield empty bytes. A failed read is remembered instead, so
/// every later reader gets the same error.
#[derive(Debug)]
pub struct Response {
    head: ResponseHead,
    url: Url,
    body: Body,
}

impl Response {
    /// Creates an in-memory response, mainly for custom senders and tests.
    pub fn new(status: StatusCode, url: Url, body: impl Into<Body>) -> Self {
        Self {
            head: ResponseHead {
                status,
                version: Version::HTTP_11,
                headers: HeaderMap::new(),
            },
            url,
            body: body.into(),
        }
    }

    pub(crate) fn from_reqwest(
        response: reqwest::Response,
        permit: Option<HostPermit>,
    ) -> Self {
        Self {
            head: ResponseHead {
                status: response.status(),
                version: response.version(),
                headers: response.headers().clone(),
            },
            url: response.url().clone(),
            body: Body {
                state: BodyState::Wire {
                    response,
                    _permit: permit,
                },
            },
        }
    }

    pub fn status(&self) -> StatusCode {
        self.head.status
    }

    pub fn version(&self) -> Version {
        self.head.version
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.head.headers
    }

    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.head.headers
    }

    /// Final URL after redirects.
    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn head(&self) -> &ResponseHead {
        &self.head
    }

    pub fn body(&self) -> &Body {
        &self.body
    }

    pub fn body_mut(&mut self) -> &mut Body {
        &mut self.body
    }

    /// Reads the remaining body and drains it.
    pub async fn bytes(&mut self) -> Result<Bytes, Cause> {
        self.body.read_all().await
    }
}

/// Response body: still on the wire, buffered in memory, drained, or
/// failed mid-read.
pub struct Body {
    state: BodyState,
}

enum BodyState {
    Wire {
        response: reqwest::Response,
        // Held until the body is read so that per-host connection caps
        // cover the whole exchange.
        _permit: Option<HostPermit>,
    },
    Buffered(Bytes),
    Drained,
    Failed(Cause),
}

impl Body {
    pub fn empty() -> Self {
        Self::from(Bytes::new())
    }

    pub fn is_drained(&self) -> bool {
        matches!(self.state, BodyState::Drained)
    }

    /// Returns `true` once a read from the wire has failed.
    pub fn is_failed(&self) -> bool {
        matches!(self.state, BodyState::Failed(_))
    }

    /// Reads everything left in the body and leaves it drained.
    ///
    /// A drained body reads as empty. A read failure drops the connection
    /// and sticks: later reads return the same error.
    pub async fn read_all(&mut self) -> Result<Bytes, Cause> {
        match mem::replace(&mut self.state, BodyState::Drained) {
            BodyState::Wire { response, _permit } => match response.bytes().await {
                Ok(bytes) => Ok(bytes),
                Err(err) => {
                    let cause: Cause = Arc::new(err);
                    self.state = BodyState::Failed(Arc::clone(&cause));
                    Err(cause)
                }
            },
            BodyState::Buffered(bytes) => Ok(bytes),
            BodyState::Drained => Ok(Bytes::new()),
            BodyState::Failed(cause) => {
                self.state = BodyState::Failed(Arc::clone(&cause));
                Err(cause)
            }
        }
    }

    /// Puts previously read bytes back so the next reader sees them.
    pub(crate) fn restore(&mut self, bytes: Bytes) {
        self.state = BodyState::Buffered(bytes);
    }
}

impl fmt::Debug for Body {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.state {
            BodyState::Wire { .. } => f.write_str("Body(<wire>)"),
            BodyState::Buffered(bytes) => write!(f, "Body({} bytes)", bytes.len()),
            BodyState::Drained => f.write_str("Body(<drained>)"),
            BodyState::Failed(cause) => write!(f, "Body(<failed: {cause}>)"),
        }
    }
}

impl From<Bytes> for Body {
    fn from(bytes: Bytes) -> Self {
        Self {
            state: BodyState::Buffered(bytes),
        }
    }
}

impl From<Vec<u8>> for Body {
    fn from(bytes: Vec<u8>) -> Self {
        Self::from(Bytes::from(bytes))
    }
}

impl From<String> for Body {
    fn from(text: String) -> Self {
        Self::from(Bytes::from(text))
    }
}

impl From<&'static str> for Body {
    fn from(text: &'static str) -> Self {
        Self::from(Bytes::from_static(text.as_bytes()))
    }
}

/// Reads response bodies on behalf of the dispatch pipeline.
#[async_trait]
pub trait BodyReader: Send + Sync {
    /// Reads the full body, leaving it drained.
    async fn read_all(&self, body: &mut Body) -> Result<Bytes, Cause>;
}

/// Default [`BodyReader`]: reads straight from the connection.
#[derive(Clone, Copy, Debug, Default)]
pub struct StreamBodyReader;

#[async_trait]
impl BodyReader for StreamBodyReader {
    async fn read_all(&self, body: &mut Body) -> Result<Bytes, Cause> {
        body.read_all().await
    }
}
