use std::sync::Arc;

use bytes::Bytes;

use crate::{BodyReader, Cause, HttpError, Response, ResponseError};

/// Turns the outcome of the retry loop into an [`HttpError`], if it is one.
///
/// - a response with status `>= 400` fails; its body is read into the error
///   (a read failure replaces the attempt error);
/// - a response below 400 passes, even when an error accompanies it;
/// - no response and an error fails with status `0`;
/// - nothing at all passes.
pub(crate) async fn classify(
    url: &str,
    response: Option<&mut Response>,
    error: Option<Cause>,
    reader: &dyn BodyReader,
) -> Option<HttpError> {
    if let Some(response) = response {
        if response.status().as_u16() < 400 {
            return None;
        }
        let head = response.head().clone();
        return Some(match reader.read_all(response.body_mut()).await {
            Ok(bytes) => HttpError::from_parts(url, Some(head), bytes, error),
            Err(err) => HttpError::from_parts(
                url,
                Some(head),
                Bytes::new(),
                Some(Arc::new(ResponseError::Parse(err))),
            ),
        });
    }

    error.map(|cause| HttpError::from_parts(url, None, Bytes::new(), Some(cause)))
}

#[cfg(test)]
mod tests {
    use std::io;

    use async_trait::async_trait;
    use reqwest::{StatusCode, Url};

    use super::*;
    use crate::{Body, StreamBodyReader};

    const URL: &str = "http://localhost/items";

    struct BrokenReader;

    #[async_trait]
    impl BodyReader for BrokenReader {
        async fn read_all(&self, body: &mut Body) -> Result<Bytes, Cause> {
            let _ = body.read_all().await;
            Err(Arc::new(io::Error::other("connection reset mid-body")))
        }
    }

    fn response(status: StatusCode, body: &'static str) -> Response {
        Response::new(status, Url::parse(URL).expect("static url must parse"), body)
    }

    fn cause(message: &str) -> Cause {
        Arc::new(io::Error::other(message.to_owned()))
    }

    #[tokio::test]
    async fn success_statuses_pass() {
        for status in [StatusCode::OK, StatusCode::NO_CONTENT, StatusCode::FOUND] {
            let mut response = response(status, "ignored");
            assert!(classify(URL, Some(&mut response), None, &StreamBodyReader)
                .await
                .is_none());
            assert!(!response.body().is_drained());
        }
    }

    #[tokio::test]
    async fn failure_statuses_capture_full_body() {
        for status in [StatusCode::BAD_REQUEST, StatusCode::NOT_FOUND, StatusCode::BAD_GATEWAY] {
            let mut response = response(status, r#"{"error":"nope"}"#);
            let err = classify(URL, Some(&mut response), None, &StreamBodyReader)
                .await
                .expect("status >= 400 must fail");

            assert_eq!(err.status_code(), status.as_u16());
            assert_eq!(err.body(), r#"{"error":"nope"}"#);
            assert_eq!(err.url(), URL);
            assert!(err.cause().is_none());
            assert!(response.body().is_drained());
            assert_eq!(err.response().map(|head| head.status), Some(status));
        }
    }

    #[tokio::test]
    async fn failure_status_keeps_attempt_error() {
        let attempt = cause("informational");
        let mut response = response(StatusCode::TOO_MANY_REQUESTS, "slow down");
        let err = classify(URL, Some(&mut response), Some(Arc::clone(&attempt)), &StreamBodyReader)
            .await
            .expect("status >= 400 must fail");

        assert!(err.matches(&HttpError::new(URL, 429, "slow", Some(attempt))));
    }

    #[tokio::test]
    async fn body_read_failure_masks_attempt_error() {
        let mut response = response(StatusCode::INTERNAL_SERVER_ERROR, "partial");
        let err = classify(URL, Some(&mut response), Some(cause("original")), &BrokenReader)
            .await
            .expect("status >= 400 must fail");

        assert_eq!(err.status_code(), 500);
        assert_eq!(err.body(), "");
        assert_eq!(
            err.cause().map(ToString::to_string).as_deref(),
            Some("parsing response: connection reset mid-body")
        );
    }

    #[tokio::test]
    async fn success_status_with_error_falls_through() {
        let mut response = response(StatusCode::OK, "{}");
        assert!(
            classify(URL, Some(&mut response), Some(cause("note")), &StreamBodyReader)
                .await
                .is_none()
        );
    }

    #[tokio::test]
    async fn missing_response_with_error_has_no_status() {
        let err = classify(URL, None, Some(cause("connection refused")), &StreamBodyReader)
            .await
            .expect("transport error must fail");

        assert_eq!(err.status_code(), 0);
        assert_eq!(err.body(), "");
        assert!(err.is_transport());
        assert!(err.response().is_none());
    }

    #[tokio::test]
    async fn non_utf8_error_body_is_kept_verbatim() {
        let raw = vec![b'o', b'k', 0xff, 0xfe];
        let mut response = Response::new(
            StatusCode::BAD_REQUEST,
            Url::parse(URL).expect("static url must parse"),
            raw.clone(),
        );
        let err = classify(URL, Some(&mut response), None, &StreamBodyReader)
            .await
            .expect("status >= 400 must fail");

        assert_eq!(err.raw_body(), &raw[..]);
        assert_eq!(err.body(), "ok\u{fffd}\u{fffd}");
    }

    #[tokio::test]
    async fn nothing_at_all_passes() {
        assert!(classify(URL, None, None, &StreamBodyReader).await.is_none());
    }

    #[tokio::test]
    async fn classifying_a_drained_body_twice_does_not_panic() {
        let mut response = response(StatusCode::SERVICE_UNAVAILABLE, "down");
        let first = classify(URL, Some(&mut response), None, &StreamBodyReader)
            .await
            .expect("must fail");
        let second = classify(URL, Some(&mut response), None, &StreamBodyReader)
            .await
            .expect("must fail again");

        assert_eq!(first.body(), "down");
        assert_eq!(second.body(), "");
        assert_eq!(second.status_code(), 503);
    }
}
