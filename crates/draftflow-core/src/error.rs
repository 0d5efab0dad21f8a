//! Error taxonomy for streaming sessions and splices.
//!
//! `DecodeError` and `TransportError` end a session in `Failed`;
//! `PreconditionError` is returned before any stream is opened.
//! User cancellation is an outcome, not an error.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Malformed UTF-8 in the chunk stream.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// The stream ended inside a multi-byte character.
    #[error("stream ended with {pending} byte(s) of an incomplete character")]
    Truncated { pending: usize },
    /// Bytes that can never start or continue a character.
    #[error("invalid UTF-8 sequence at stream byte {offset}")]
    InvalidSequence { offset: u64 },
}

/// Categories of transport failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportErrorKind {
    /// HTTP status error (4xx, 5xx)
    HttpStatus,
    /// Connection refused, reset, or DNS failure
    Connection,
    /// Connect or request timeout
    Timeout,
    /// The response body broke off mid-stream
    Body,
}

/// Failure of the streaming channel itself.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct TransportError {
    pub kind: TransportErrorKind,
    /// One-line summary suitable for display
    pub message: String,
    /// Optional raw details (e.g. error body)
    pub details: Option<String>,
}

impl TransportError {
    pub fn new(kind: TransportErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            details: None,
        }
    }

    /// Creates an HTTP status error, lifting `detail`/`error.message` out of a JSON body.
    pub fn http_status(status: u16, body: &str) -> Self {
        let details = (!body.is_empty()).then(|| body.to_string());
        let summary = serde_json::from_str::<serde_json::Value>(body)
            .ok()
            .and_then(|json| {
                json.get("detail")
                    .and_then(|v| v.as_str())
                    .or_else(|| {
                        json.get("error")
                            .and_then(|e| e.get("message"))
                            .and_then(|v| v.as_str())
                    })
                    .map(str::to_string)
            });
        let message = match summary {
            Some(msg) => format!("HTTP {status}: {msg}"),
            None => format!("HTTP {status}"),
        };
        Self {
            kind: TransportErrorKind::HttpStatus,
            message,
            details,
        }
    }
}

/// Anything that drives a session to `Failed`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StreamError {
    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
}

/// Rejected before any streaming begins; never mutates state.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PreconditionError {
    #[error("selection must be at least {min} characters (got {len})")]
    SelectionTooShort { len: usize, min: usize },
    #[error("selection {start}..{end} is outside the document ({len} characters)")]
    SelectionOutOfBounds { start: usize, end: usize, len: usize },
    #[error("prompt is empty")]
    EmptyPrompt,
    #[error("session has already been started")]
    SessionNotIdle,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_http_status_extracts_detail() {
        let err = TransportError::http_status(404, r#"{"detail":"Content not found"}"#);
        assert_eq!(err.kind, TransportErrorKind::HttpStatus);
        assert_eq!(err.message, "HTTP 404: Content not found");
        assert!(err.details.is_some());
    }

    #[test]
    fn test_http_status_plain_body() {
        let err = TransportError::http_status(502, "");
        assert_eq!(err.message, "HTTP 502");
        assert_eq!(err.details, None);
    }

    #[test]
    fn test_stream_error_display_wraps_source() {
        let err = StreamError::from(DecodeError::Truncated { pending: 2 });
        assert_eq!(
            err.to_string(),
            "decode error: stream ended with 2 byte(s) of an incomplete character"
        );
    }
}
