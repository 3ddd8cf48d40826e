//! Ready-made [`CheckRetry`](crate::CheckRetry) predicates.

use std::{error::Error as StdError, io};

use crate::{Cause, Response, RetryDecision, TransportError};

/// Never retries and surfaces nothing extra. Used when no policy is set.
pub fn never_retry(_response: Option<&Response>, _error: Option<&Cause>) -> RetryDecision {
    RetryDecision::stop()
}

/// Retries when the connection ended before a full response arrived.
///
/// The transport error, if any, is always surfaced unchanged.
pub fn retry_on_eof(_response: Option<&Response>, error: Option<&Cause>) -> RetryDecision {
    match error {
        Some(error) => RetryDecision::new(is_end_of_stream(&**error), Some(error.clone())),
        None => RetryDecision::stop(),
    }
}

/// Walks the error chain looking for an end-of-stream condition: a
/// [`TransportError::Eof`], an I/O error caused by the peer closing or
/// resetting the connection, or a message mentioning `EOF`.
pub fn is_end_of_stream(error: &(dyn StdError + 'static)) -> bool {
    let mut current = Some(error);
    while let Some(err) = current {
        if let Some(TransportError::Eof { .. }) = err.downcast_ref::<TransportError>() {
            return true;
        }
        if let Some(io_err) = err.downcast_ref::<io::Error>() {
            if matches!(
                io_err.kind(),
                io::ErrorKind::UnexpectedEof
                    | io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionAborted
                    | io::ErrorKind::BrokenPipe
            ) {
                return true;
            }
        }
        let message = err.to_string();
        if message.contains("EOF") || message.contains("connection closed before message completed")
        {
            return true;
        }
        current = err.source();
    }
    false
}
