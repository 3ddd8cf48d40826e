use bytes::Bytes;
use reqwest::{
    header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION, CONTENT_TYPE},
    Method, Url,
};
use serde::Serialize;

use crate::{BuildError, Context};

/// A fully built request. The dispatch pipeline only ever borrows it, so the
/// same value can be sent again.
#[derive(Clone, Debug)]
pub struct Request {
    method: Method,
    url: Url,
    headers: HeaderMap,
    body: Option<Bytes>,
    context: Context,
}

impl Request {
    /// Builds a request without body or headers.
    pub fn new(ctx: Context, method: Method, url: &str) -> Result<Self, BuildError> {
        let url = Url::parse(url).map_err(|source| BuildError::InvalidUrl {
            url: url.to_owned(),
            source,
        })?;
        Ok(Self {
            method,
            url,
            headers: HeaderMap::new(),
            body: None,
            context: ctx,
        })
    }

    /// Builds a request and appends each of `headers`.
    pub fn with_headers<I, K, V>(
        ctx: Context,
        method: Method,
        url: &str,
        headers: I,
    ) -> Result<Self, BuildError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut request = Self::new(ctx, method, url)?;
        request.append_headers(headers)?;
        Ok(request)
    }

    /// Builds a request whose body is `data` encoded as JSON.
    pub fn json<T>(ctx: Context, method: Method, url: &str, data: &T) -> Result<Self, BuildError>
    where
        T: Serialize + ?Sized,
    {
        let body = serde_json::to_vec(data).map_err(BuildError::Encode)?;
        Self::with_json_body(ctx, method, url, Bytes::from(body))
    }

    /// Builds a request whose body is an already encoded JSON document,
    /// sent byte-for-byte.
    pub fn json_str(
        ctx: Context,
        method: Method,
        url: &str,
        data: impl Into<String>,
    ) -> Result<Self, BuildError> {
        Self::with_json_body(ctx, method, url, Bytes::from(data.into()))
    }

    /// Builds a JSON request and appends each of `headers`.
    pub fn json_with_headers<T, I, K, V>(
        ctx: Context,
        method: Method,
        url: &str,
        data: &T,
        headers: I,
    ) -> Result<Self, BuildError>
    where
        T: Serialize + ?Sized,
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut request = Self::json(ctx, method, url, data)?;
        request.append_headers(headers)?;
        Ok(request)
    }

    fn with_json_body(
        ctx: Context,
        method: Method,
        url: &str,
        body: Bytes,
    ) -> Result<Self, BuildError> {
        let mut request = Self::new(ctx, method, url)?;
        request
            .headers
            .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        request.body = Some(body);
        Ok(request)
    }

    /// Appends headers, keeping any existing values for the same name.
    pub fn append_headers<I, K, V>(&mut self, headers: I) -> Result<(), BuildError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        for (name, value) in headers {
            let name = name.as_ref();
            let invalid = || BuildError::InvalidHeader {
                name: name.to_owned(),
            };
            let header_name = HeaderName::from_bytes(name.as_bytes()).map_err(|_| invalid())?;
            let header_value = HeaderValue::from_str(value.as_ref()).map_err(|_| invalid())?;
            self.headers.append(header_name, header_value);
        }
        Ok(())
    }

    /// Sets `Authorization: Bearer <token>`, replacing any previous value.
    ///
    /// A token that already carries the `Bearer ` scheme is used as is.
    pub fn set_bearer_authorization(&mut self, token: &str) -> Result<(), BuildError> {
        let value = HeaderValue::from_str(&bearer_value(token)).map_err(|_| {
            BuildError::InvalidHeader {
                name: AUTHORIZATION.as_str().to_owned(),
            }
        })?;
        self.headers.insert(AUTHORIZATION, value);
        Ok(())
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    pub fn body(&self) -> Option<&Bytes> {
        self.body.as_ref()
    }

    pub fn context(&self) -> &Context {
        &self.context
    }
}

/// `Authorization` value for `token`; a scheme already present (any case)
/// is kept as given.
fn bearer_value(token: &str) -> String {
    const SCHEME: &str = "bearer ";
    let token = token.trim();
    match token.as_bytes().get(..SCHEME.len()) {
        Some(head) if head.eq_ignore_ascii_case(SCHEME.as_bytes()) => token.to_owned(),
        _ => format!("Bearer {token}"),
    }
}
