use std::{error::Error as StdError, fmt, sync::Arc};

use bytes::Bytes;

use crate::response::ResponseHead;

/// Shared, type-erased error carried as the cause of an [`HttpError`].
///
/// Causes are compared by identity, never by message, so they are kept
/// behind an `Arc` and cloned by pointer.
pub type Cause = Arc<dyn StdError + Send + Sync + 'static>;

/// Boxed error used for wrapped sources inside transport errors.
pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// Failure of one logical call: a response with status `>= 400`, a
/// transport failure, or a body that could not be read or decoded.
///
/// A status code of `0` means no response was received.
#[derive(Clone)]
pub struct HttpError {
    url: String,
    status_code: u16,
    body: String,
    raw_body: Bytes,
    cause: Option<Cause>,
    head: Option<ResponseHead>,
}

impl HttpError {
    /// Builds an error value, typically used as a match target for
    /// [`HttpError::matches`].
    ///
    /// `status_code == 0` and an empty `body` act as wildcards when the
    /// value is used as a target.
    pub fn new(
        url: impl Into<String>,
        status_code: u16,
        body: impl Into<String>,
        cause: Option<Cause>,
    ) -> Self {
        let body = body.into();
        Self {
            url: url.into(),
            status_code,
            raw_body: Bytes::from(body.clone()),
            body,
            cause,
            head: None,
        }
    }

    pub(crate) fn from_parts(
        url: &str,
        head: Option<ResponseHead>,
        raw_body: Bytes,
        cause: Option<Cause>,
    ) -> Self {
        Self {
            url: url.to_owned(),
            status_code: head.as_ref().map_or(0, |head| head.status.as_u16()),
            body: String::from_utf8_lossy(&raw_body).into_owned(),
            raw_body,
            cause,
            head,
        }
    }

    /// Target URL of the failed request.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// HTTP status of the failed response, `0` if none was received.
    pub fn status_code(&self) -> u16 {
        self.status_code
    }

    /// Captured response body as text, empty if none was captured.
    ///
    /// Invalid UTF-8 is replaced with `U+FFFD`; see [`HttpError::raw_body`]
    /// for the bytes as received.
    pub fn body(&self) -> &str {
        &self.body
    }

    /// Captured response body, byte for byte.
    pub fn raw_body(&self) -> &[u8] {
        &self.raw_body
    }

    /// Underlying error, if any.
    pub fn cause(&self) -> Option<&Cause> {
        self.cause.as_ref()
    }

    /// Status line and headers of the response that produced this error.
    ///
    /// The body has already been drained into [`HttpError::body`].
    pub fn response(&self) -> Option<&ResponseHead> {
        self.head.as_ref()
    }

    /// Returns `true` when the failure is a transport-level one.
    pub fn is_transport(&self) -> bool {
        self.status_code == 0
    }

    /// Fuzzy comparison against `target`.
    ///
    /// - status codes must be equal, unless the target's is `0`;
    /// - this body must contain the target's body (an empty target body
    ///   matches anything);
    /// - causes must be the same allocation, or both absent.
    ///
    /// The relation is asymmetric: wildcards are only honored on `target`.
    pub fn matches(&self, target: &HttpError) -> bool {
        same_status(self.status_code, target.status_code)
            && same_body(&self.body, &target.body)
            && same_cause(self.cause.as_ref(), target.cause.as_ref())
    }
}

fn same_status(status: u16, target: u16) -> bool {
    status == target || target == 0
}

fn same_body(body: &str, target: &str) -> bool {
    target.is_empty() || body.contains(target)
}

fn same_cause(cause: Option<&Cause>, target: Option<&Cause>) -> bool {
    match (cause, target) {
        (None, None) => true,
        // Thin-pointer comparison: the vtable half of the fat pointer is
        // not guaranteed unique per type.
        (Some(a), Some(b)) => Arc::as_ptr(a) as *const () == Arc::as_ptr(b) as *const (),
        _ => false,
    }
}

impl fmt::Display for HttpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "request to {} failed. httpStatus: [ ", self.url)?;
        if self.status_code > 0 {
            write!(f, "{}", self.status_code)?;
        } else {
            f.write_str("no status")?;
        }
        write!(f, " ] responseBody: [ {} ] error: [ ", self.body)?;
        match &self.cause {
            Some(cause) => write!(f, "{cause}")?,
            None => f.write_str("<nil>")?,
        }
        f.write_str(" ]")
    }
}

impl fmt::Debug for HttpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpError")
            .field("url", &self.url)
            .field("status_code", &self.status_code)
            .field("body", &self.body)
            .field("cause", &self.cause)
            .finish()
    }
}

impl StdError for HttpError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.cause
            .as_deref()
            .map(|cause| cause as &(dyn StdError + 'static))
    }
}

/// Context attached to failures that happen after a response arrived.
#[derive(Debug, thiserror::Error)]
pub enum ResponseError {
    /// The error body of a failed response could not be read.
    #[error("parsing response: {0}")]
    Parse(#[source] Cause),
    /// A successful body could not be read or decoded.
    #[error("decoding response: {0}")]
    Decode(#[source] Cause),
    /// The transport finished without a response or an error.
    #[error("no response received")]
    Missing,
}

/// Error returned while assembling a request or a client.
///
/// No network activity happens before these are returned.
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("creating request: invalid url {url:?}: {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },
    #[error("creating request: invalid header {name:?}")]
    InvalidHeader { name: String },
    #[error("encoding request payload: {0}")]
    Encode(#[source] serde_json::Error),
    #[error("building http client: {0}")]
    Client(#[source] reqwest::Error),
    #[error("reading options: {key} must be a non-negative integer, got {value:?}")]
    InvalidOption { key: String, value: String },
}
