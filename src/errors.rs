use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::ids::NodeId;

/// Structured validation error raised before a request leaves the client.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ValidationError {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
}

impl ValidationError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            field: None,
        }
    }

    pub fn with_field(mut self, field: impl Into<String>) -> Self {
        self.field = Some(field.into());
        self
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(field) = &self.field {
            write!(f, "{}: {}", field, self.message)
        } else {
            write!(f, "{}", self.message)
        }
    }
}

impl std::error::Error for ValidationError {}

impl From<&str> for ValidationError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

/// Error envelope for a non-2xx backend response.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct APIError {
    pub status: u16,
    pub code: Option<String>,
    pub message: String,
    pub request_id: Option<String>,
    /// Raw response body for debugging (when available).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_body: Option<String>,
}

impl APIError {
    pub fn new(status: u16, message: impl Into<String>) -> Self {
        Self {
            status,
            code: None,
            message: message.into(),
            request_id: None,
            raw_body: None,
        }
    }
}

impl fmt::Display for APIError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(code) = &self.code {
            write!(f, "{} ({}): {}", code, self.status, self.message)
        } else {
            write!(f, "{}: {}", self.status, self.message)
        }
    }
}

impl std::error::Error for APIError {}

/// Severity of a compiler diagnostic.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DiagnosticLevel {
    Error,
    Warning,
}

/// One leveled finding reported by workflow compilation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Diagnostic {
    pub level: DiagnosticLevel,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_id: Option<NodeId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
}

/// Compile validation failure (HTTP 422) with its diagnostics.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CompileError {
    pub message: String,
    #[serde(default)]
    pub diagnostics: Vec<Diagnostic>,
}

impl CompileError {
    pub fn errors(&self) -> impl Iterator<Item = &Diagnostic> {
        self.diagnostics
            .iter()
            .filter(|d| d.level == DiagnosticLevel::Error)
    }

    pub fn warnings(&self) -> impl Iterator<Item = &Diagnostic> {
        self.diagnostics
            .iter()
            .filter(|d| d.level == DiagnosticLevel::Warning)
    }
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let errors = self.errors().count();
        let warnings = self.warnings().count();
        write!(
            f,
            "{} ({} errors, {} warnings)",
            self.message, errors, warnings
        )
    }
}

impl std::error::Error for CompileError {}

/// Convenience alias for fallible client results.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Transport-level error (connection refused, DNS/TLS, timeouts, broken streams).
#[derive(Debug, Error)]
#[error("{kind}: {message}")]
pub struct TransportError {
    pub kind: TransportErrorKind,
    pub message: String,
    #[source]
    pub source: Option<reqwest::Error>,
}

impl TransportError {
    pub(crate) fn from_reqwest(err: reqwest::Error) -> Self {
        let kind = if err.is_timeout() {
            TransportErrorKind::Timeout
        } else if err.is_connect() {
            TransportErrorKind::Connect
        } else if err.is_request() {
            TransportErrorKind::Request
        } else {
            TransportErrorKind::Other
        };
        let message = with_hint(kind, err.to_string());
        Self {
            kind,
            message,
            source: Some(err),
        }
    }

    /// Copy of this error without the underlying reqwest source.
    pub(crate) fn detached(&self) -> Self {
        Self {
            kind: self.kind,
            message: self.message.clone(),
            source: None,
        }
    }
}

/// Broad transport error kinds for classification.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum TransportErrorKind {
    Timeout,
    Connect,
    Request,
    Other,
}

impl fmt::Display for TransportErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            TransportErrorKind::Timeout => "timeout",
            TransportErrorKind::Connect => "connect",
            TransportErrorKind::Request => "request",
            TransportErrorKind::Other => "transport",
        };
        write!(f, "{label}")
    }
}

fn with_hint(kind: TransportErrorKind, message: String) -> String {
    let lower = message.to_ascii_lowercase();
    if kind == TransportErrorKind::Connect || lower.contains("connection refused") {
        return format!(
            "{message} (is the backend running? check BACKEND_URL / NEXT_PUBLIC_BACKEND_URL)"
        );
    }
    if lower.contains("cors") || lower.contains("cross-origin") {
        return format!("{message} (cross-origin request blocked; route calls through the same-origin proxy)");
    }
    message
}

/// Unified error type surfaced by the crate.
#[derive(Debug, Error)]
pub enum Error {
    #[error("config error: {0}")]
    Config(String),

    #[error("{0}")]
    Validation(#[from] ValidationError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{0}")]
    Api(#[from] APIError),

    #[error("compile failed: {0}")]
    Compile(#[from] CompileError),

    #[error("{0}")]
    Transport(#[from] TransportError),

    #[error("stream protocol error: {message}")]
    StreamProtocol {
        message: String,
        raw_data: Option<String>,
    },

    #[error("expected {expected} stream, got content-type {received} (status {status})")]
    StreamContentType {
        expected: &'static str,
        received: String,
        status: u16,
    },

    #[error("storage error: {0}")]
    Storage(String),
}

impl Error {
    /// HTTP status of the failure; `0` when the request never got a response.
    pub fn status(&self) -> u16 {
        match self {
            Error::Api(err) => err.status,
            Error::Compile(_) => 422,
            _ => 0,
        }
    }

    /// Clone for fan-out to callers sharing one in-flight request.
    ///
    /// Transport errors lose their reqwest source and decode errors keep only
    /// their message.
    pub(crate) fn duplicate(&self) -> Error {
        match self {
            Error::Config(msg) => Error::Config(msg.clone()),
            Error::Validation(err) => Error::Validation(err.clone()),
            Error::Serialization(err) => {
                Error::Serialization(serde::de::Error::custom(err.to_string()))
            }
            Error::Api(err) => Error::Api(err.clone()),
            Error::Compile(err) => Error::Compile(err.clone()),
            Error::Transport(err) => Error::Transport(err.detached()),
            Error::StreamProtocol { message, raw_data } => Error::StreamProtocol {
                message: message.clone(),
                raw_data: raw_data.clone(),
            },
            Error::StreamContentType {
                expected,
                received,
                status,
            } => Error::StreamContentType {
                expected: *expected,
                received: received.clone(),
                status: *status,
            },
            Error::Storage(msg) => Error::Storage(msg.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_error_formats_with_field() {
        let err = ValidationError::new("is required").with_field("workflow_id");
        assert_eq!(err.to_string(), "workflow_id: is required");
    }

    #[test]
    fn api_error_keeps_status_and_code() {
        let api_err = APIError {
            status: 404,
            code: Some("not_found".into()),
            message: "workflow not found".into(),
            request_id: None,
            raw_body: None,
        };
        assert_eq!(api_err.to_string(), "not_found (404): workflow not found");
        assert_eq!(Error::from(api_err).status(), 404);
    }

    #[test]
    fn transport_errors_report_status_zero() {
        let err = Error::Transport(TransportError {
            kind: TransportErrorKind::Connect,
            message: "refused".into(),
            source: None,
        });
        assert_eq!(err.status(), 0);
    }

    #[test]
    fn connect_errors_get_backend_hint() {
        let msg = with_hint(TransportErrorKind::Connect, "tcp connect error".into());
        assert!(msg.contains("BACKEND_URL"));
        let msg = with_hint(TransportErrorKind::Other, "CORS policy violation".into());
        assert!(msg.contains("same-origin proxy"));
        let msg = with_hint(TransportErrorKind::Timeout, "timed out".into());
        assert_eq!(msg, "timed out");
    }

    #[test]
    fn compile_error_splits_levels() {
        let err = CompileError {
            message: "Workflow validation failed".into(),
            diagnostics: vec![
                Diagnostic {
                    level: DiagnosticLevel::Error,
                    message: "missing input".into(),
                    node_id: Some("n1".into()),
                    field: None,
                },
                Diagnostic {
                    level: DiagnosticLevel::Warning,
                    message: "unused output".into(),
                    node_id: None,
                    field: None,
                },
            ],
        };
        assert_eq!(err.errors().count(), 1);
        assert_eq!(err.warnings().count(), 1);
        assert_eq!(
            err.to_string(),
            "Workflow validation failed (1 errors, 1 warnings)"
        );
    }
}
