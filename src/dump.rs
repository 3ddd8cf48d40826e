use std::sync::Arc;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, CONTENT_LENGTH, HOST};

use crate::{Cause, Request, Response};

/// Receives raw wire-format dumps of requests or responses.
pub type DumpLogger = Arc<dyn Fn(&[u8]) + Send + Sync>;

/// Serializes requests and responses for the dump loggers.
#[async_trait]
pub trait Dumper: Send + Sync {
    fn dump_request(&self, request: &Request, include_body: bool) -> Result<Vec<u8>, Cause>;

    /// Dumps `response`. When the body is included it must be left readable
    /// for whoever reads it next, or keep its read error if reading failed.
    async fn dump_response(
        &self,
        response: &mut Response,
        include_body: bool,
    ) -> Result<Vec<u8>, Cause>;
}

/// HTTP/1.1-style dump: request or status line, headers, blank line, and
/// optionally the body.
#[derive(Clone, Copy, Debug, Default)]
pub struct WireDumper;

#[async_trait]
impl Dumper for WireDumper {
    fn dump_request(&self, request: &Request, include_body: bool) -> Result<Vec<u8>, Cause> {
        let url = request.url();
        let mut target = url.path().to_owned();
        if let Some(query) = url.query() {
            target.push('?');
            target.push_str(query);
        }

        let mut out = format!("{} {target} HTTP/1.1\r\n", request.method()).into_bytes();
        if !request.headers().contains_key(HOST) {
            let host = url.host_str().unwrap_or_default();
            match url.port() {
                Some(port) => write_header(&mut out, HOST.as_str(), format!("{host}:{port}").as_bytes()),
                None => write_header(&mut out, HOST.as_str(), host.as_bytes()),
            }
        }
        write_headers(&mut out, request.headers());
        if let Some(body) = request.body() {
            if !request.headers().contains_key(CONTENT_LENGTH) {
                write_header(&mut out, CONTENT_LENGTH.as_str(), body.len().to_string().as_bytes());
            }
        }
        out.extend_from_slice(b"\r\n");

        if include_body {
            if let Some(body) = request.body() {
                out.extend_from_slice(body);
            }
        }
        Ok(out)
    }

    async fn dump_response(
        &self,
        response: &mut Response,
        include_body: bool,
    ) -> Result<Vec<u8>, Cause> {
        let status = response.status();
        let mut out = format!(
            "{:?} {} {}\r\n",
            response.version(),
            status.as_str(),
            status.canonical_reason().unwrap_or_default()
        )
        .into_bytes();
        write_headers(&mut out, response.headers());
        out.extend_from_slice(b"\r\n");

        if include_body {
            let body = response.body_mut().read_all().await?;
            out.extend_from_slice(&body);
            response.body_mut().restore(body);
        }
        Ok(out)
    }
}

fn write_headers(out: &mut Vec<u8>, headers: &HeaderMap) {
    for (name, value) in headers {
        write_header(out, name.as_str(), value.as_bytes());
    }
}

fn write_header(out: &mut Vec<u8>, name: &str, value: &[u8]) {
    out.extend_from_slice(name.as_bytes());
    out.extend_from_slice(b": ");
    out.extend_from_slice(value);
    out.extend_from_slice(b"\r\n");
}
