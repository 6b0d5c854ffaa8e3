use std::fmt;

use serde::{Deserialize, Serialize};

/// Broad error kind, used for status selection and for the `error` payload
/// carried by canonical stream events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InvalidArgument,
    Unimplemented,
    Unavailable,
    RequestFailed,
    StreamError,
    Internal,
    Aborted,
    AdapterNotFound,
}

impl ErrorKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::InvalidArgument => "invalid_argument",
            ErrorKind::Unimplemented => "unimplemented",
            ErrorKind::Unavailable => "unavailable",
            ErrorKind::RequestFailed => "request_failed",
            ErrorKind::StreamError => "stream_error",
            ErrorKind::Internal => "internal",
            ErrorKind::Aborted => "aborted",
            ErrorKind::AdapterNotFound => "adapter_not_found",
        }
    }

    /// HTTP status a gateway should answer with for this kind.
    #[must_use]
    pub fn http_status(self) -> http::StatusCode {
        match self {
            ErrorKind::InvalidArgument => http::StatusCode::BAD_REQUEST,
            ErrorKind::Unimplemented => http::StatusCode::NOT_IMPLEMENTED,
            ErrorKind::Unavailable => http::StatusCode::SERVICE_UNAVAILABLE,
            ErrorKind::RequestFailed | ErrorKind::StreamError => http::StatusCode::BAD_GATEWAY,
            ErrorKind::Internal => http::StatusCode::INTERNAL_SERVER_ERROR,
            // nginx's "client closed request"
            ErrorKind::Aborted => http::StatusCode::from_u16(499)
                .unwrap_or(http::StatusCode::INTERNAL_SERVER_ERROR),
            ErrorKind::AdapterNotFound => http::StatusCode::NOT_FOUND,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ordered key/value pairs attached to an error for operators.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ErrorContext(Vec<(&'static str, String)>);

impl ErrorContext {
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, v)| v.as_str())
    }

    #[must_use]
    pub fn entries(&self) -> &[(&'static str, String)] {
        &self.0
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    fn push(&mut self, key: &'static str, value: String) {
        self.0.push((key, value));
    }
}

/// Error type used across the gateway core.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("Invalid argument: {message}")]
    InvalidArgument {
        message: String,
        context: ErrorContext,
    },
    #[error("Unimplemented: {message}")]
    Unimplemented {
        message: String,
        context: ErrorContext,
    },
    #[error("Upstream unavailable: {message}")]
    Unavailable {
        message: String,
        context: ErrorContext,
    },
    #[error("Upstream request failed: status={status}, message={message}")]
    RequestFailed {
        status: u16,
        message: String,
        context: ErrorContext,
    },
    #[error("Stream error: {message}")]
    StreamError {
        message: String,
        context: ErrorContext,
    },
    #[error("Internal error: {message}")]
    Internal {
        message: String,
        context: ErrorContext,
    },
    #[error("Aborted: {message}")]
    Aborted {
        message: String,
        context: ErrorContext,
    },
    #[error("Adapter not found: {name}")]
    AdapterNotFound { name: String, context: ErrorContext },
}

impl GatewayError {
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        GatewayError::InvalidArgument {
            message: message.into(),
            context: ErrorContext::default(),
        }
    }

    pub fn unimplemented(message: impl Into<String>) -> Self {
        GatewayError::Unimplemented {
            message: message.into(),
            context: ErrorContext::default(),
        }
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        GatewayError::Unavailable {
            message: message.into(),
            context: ErrorContext::default(),
        }
    }

    pub fn request_failed(status: u16, message: impl Into<String>) -> Self {
        GatewayError::RequestFailed {
            status,
            message: message.into(),
            context: ErrorContext::default(),
        }
    }

    pub fn stream(message: impl Into<String>) -> Self {
        GatewayError::StreamError {
            message: message.into(),
            context: ErrorContext::default(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        GatewayError::Internal {
            message: message.into(),
            context: ErrorContext::default(),
        }
    }

    pub fn aborted(message: impl Into<String>) -> Self {
        GatewayError::Aborted {
            message: message.into(),
            context: ErrorContext::default(),
        }
    }

    pub fn adapter_not_found(name: impl Into<String>) -> Self {
        GatewayError::AdapterNotFound {
            name: name.into(),
            context: ErrorContext::default(),
        }
    }

    /// Attach an operator-facing context entry.
    #[must_use]
    pub fn with_context(mut self, key: &'static str, value: impl Into<String>) -> Self {
        self.context_mut().push(key, value.into());
        self
    }

    /// Attach the offending raw payload, truncated to a log-friendly size.
    #[must_use]
    pub fn with_payload(self, payload: &[u8]) -> Self {
        let text = String::from_utf8_lossy(payload);
        self.with_context("payload", crate::util::truncate_chars(&text, PAYLOAD_CONTEXT_MAX))
    }

    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            GatewayError::InvalidArgument { .. } => ErrorKind::InvalidArgument,
            GatewayError::Unimplemented { .. } => ErrorKind::Unimplemented,
            GatewayError::Unavailable { .. } => ErrorKind::Unavailable,
            GatewayError::RequestFailed { .. } => ErrorKind::RequestFailed,
            GatewayError::StreamError { .. } => ErrorKind::StreamError,
            GatewayError::Internal { .. } => ErrorKind::Internal,
            GatewayError::Aborted { .. } => ErrorKind::Aborted,
            GatewayError::AdapterNotFound { .. } => ErrorKind::AdapterNotFound,
        }
    }

    #[must_use]
    pub fn context(&self) -> &ErrorContext {
        match self {
            GatewayError::InvalidArgument { context, .. }
            | GatewayError::Unimplemented { context, .. }
            | GatewayError::Unavailable { context, .. }
            | GatewayError::RequestFailed { context, .. }
            | GatewayError::StreamError { context, .. }
            | GatewayError::Internal { context, .. }
            | GatewayError::Aborted { context, .. }
            | GatewayError::AdapterNotFound { context, .. } => context,
        }
    }

    fn context_mut(&mut self) -> &mut ErrorContext {
        match self {
            GatewayError::InvalidArgument { context, .. }
            | GatewayError::Unimplemented { context, .. }
            | GatewayError::Unavailable { context, .. }
            | GatewayError::RequestFailed { context, .. }
            | GatewayError::StreamError { context, .. }
            | GatewayError::Internal { context, .. }
            | GatewayError::Aborted { context, .. }
            | GatewayError::AdapterNotFound { context, .. } => context,
        }
    }

    /// Upstream status for `RequestFailed`, `None` otherwise.
    #[must_use]
    pub fn upstream_status(&self) -> Option<u16> {
        match self {
            GatewayError::RequestFailed { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Status to surface to a downstream HTTP client. Upstream 4xx/5xx codes
    /// are forwarded as-is for `RequestFailed`.
    #[must_use]
    pub fn http_status(&self) -> http::StatusCode {
        if let Some(status) = self.upstream_status() {
            if (400..600).contains(&status) {
                if let Ok(code) = http::StatusCode::from_u16(status) {
                    return code;
                }
            }
        }
        self.kind().http_status()
    }

    /// Structured form carried by `error` stream events.
    #[must_use]
    pub fn to_payload(&self) -> ErrorPayload {
        ErrorPayload {
            kind: self.kind(),
            message: self.to_string(),
            status: self.upstream_status(),
        }
    }
}

const PAYLOAD_CONTEXT_MAX: usize = 512;

/// Structured error payload of an `error` canonical event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub kind: ErrorKind,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_http_status() {
        assert_eq!(
            ErrorKind::InvalidArgument.http_status(),
            http::StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ErrorKind::Unimplemented.http_status(),
            http::StatusCode::NOT_IMPLEMENTED
        );
        assert_eq!(
            ErrorKind::Unavailable.http_status(),
            http::StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(ErrorKind::Aborted.http_status().as_u16(), 499);
        assert_eq!(
            ErrorKind::AdapterNotFound.http_status(),
            http::StatusCode::NOT_FOUND
        );
    }

    #[test]
    fn test_request_failed_forwards_upstream_status() {
        let err = GatewayError::request_failed(429, "slow down");
        assert_eq!(err.kind(), ErrorKind::RequestFailed);
        assert_eq!(err.http_status(), http::StatusCode::TOO_MANY_REQUESTS);

        let odd = GatewayError::request_failed(302, "redirected");
        assert_eq!(odd.http_status(), http::StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn test_context_is_ordered_and_queryable() {
        let err = GatewayError::stream("bad chunk")
            .with_context("channel", "primary")
            .with_payload(b"{not json");
        assert_eq!(err.context().get("channel"), Some("primary"));
        assert_eq!(err.context().get("payload"), Some("{not json"));
        assert_eq!(err.context().entries()[0].0, "channel");
        assert!(err.context().get("missing").is_none());
    }

    #[test]
    fn test_payload_context_is_truncated() {
        let big = vec![b'a'; 4096];
        let err = GatewayError::internal("decode").with_payload(&big);
        let payload = err.context().get("payload").unwrap();
        assert!(payload.len() <= PAYLOAD_CONTEXT_MAX + 3);
        assert!(payload.ends_with("..."));
    }

    #[test]
    fn test_to_payload() {
        let payload = GatewayError::request_failed(500, "boom").to_payload();
        assert_eq!(payload.kind, ErrorKind::RequestFailed);
        assert_eq!(payload.status, Some(500));
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["kind"], "request_failed");

        let payload = GatewayError::aborted("cancelled").to_payload();
        let json = serde_json::to_value(&payload).unwrap();
        assert!(json.get("status").is_none());
    }
}
