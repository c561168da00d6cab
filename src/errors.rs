//! Application error codes.
//!
//! # Responsibilities
//! - Define the closed set of known application errors
//! - Map each code to a client-facing message and HTTP status
//! - Carry extra context (fields, message stack) for logging
//! - Render an error as a JSON body through a [`ResponseWriter`]
//!
//! # Design Decisions
//! - Codes are an enum; callers match on variants instead of inspecting types
//! - The client only ever sees the code's message, never the source error

use std::collections::BTreeMap;
use std::fmt;

use axum::http::StatusCode;
use serde::Serialize;

use crate::http::recorder::{ResponseWriter, WriteError};

/// Known error codes and their HTTP mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ErrorCode {
    #[default]
    Other,
    Database,
    Redis,
    ServiceNotAvailable,
    RequestTimeout,
}

impl ErrorCode {
    /// Client-facing message for this code.
    pub fn message(&self) -> &'static str {
        match self {
            ErrorCode::Other => "Internal server error",
            ErrorCode::Database => "Database error",
            ErrorCode::Redis => "Redis error",
            ErrorCode::ServiceNotAvailable => "Service not available",
            ErrorCode::RequestTimeout => "Request timed out",
        }
    }

    /// HTTP status used when this code reaches the client.
    pub fn status(&self) -> StatusCode {
        match self {
            ErrorCode::RequestTimeout => StatusCode::REQUEST_TIMEOUT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.message())
    }
}

/// JSON body written for an error response.
#[derive(Debug, Serialize)]
pub struct ErrorBody<'a> {
    pub error: &'a str,
}

/// An application error with optional context.
#[derive(Debug, Default)]
pub struct AppError {
    code: ErrorCode,
    message: Option<String>,
    fields: BTreeMap<String, serde_json::Value>,
    messages: Vec<String>,
    source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl AppError {
    pub fn new(code: ErrorCode) -> Self {
        Self {
            code,
            ..Default::default()
        }
    }

    /// Wrap an underlying error under the given code.
    pub fn wrap(code: ErrorCode, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self {
            code,
            source: Some(Box::new(source)),
            ..Default::default()
        }
    }

    /// Override the client-facing message.
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// Attach a structured field (logged, never sent to the client).
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    /// Push a message onto the error's message stack.
    pub fn push_message(mut self, message: impl Into<String>) -> Self {
        self.messages.push(message.into());
        self
    }

    pub fn code(&self) -> ErrorCode {
        self.code
    }

    pub fn message(&self) -> &str {
        self.message.as_deref().unwrap_or_else(|| self.code.message())
    }

    pub fn fields(&self) -> &BTreeMap<String, serde_json::Value> {
        &self.fields
    }

    pub fn messages(&self) -> &[String] {
        &self.messages
    }

    pub fn status(&self) -> StatusCode {
        self.code.status()
    }

    /// Write `{"error": <message>}` with the code's status.
    pub fn write_to(&self, writer: &ResponseWriter) -> Result<(), WriteError> {
        tracing::debug!(
            code = ?self.code,
            fields = ?self.fields,
            messages = ?self.messages,
            source = self.source.as_ref().map(|e| e.to_string()),
            "Writing error response"
        );
        writer.write_json(self.status(), &ErrorBody { error: self.message() })
    }
}

impl From<ErrorCode> for AppError {
    fn from(code: ErrorCode) -> Self {
        AppError::new(code)
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.source {
            Some(source) => write!(f, "{}: {}", self.message(), source),
            None => f.write_str(self.message()),
        }
    }
}

impl std::error::Error for AppError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn std::error::Error + 'static))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_code_mapping() {
        assert_eq!(ErrorCode::RequestTimeout.status(), StatusCode::REQUEST_TIMEOUT);
        assert_eq!(ErrorCode::RequestTimeout.message(), "Request timed out");
        assert_eq!(ErrorCode::Database.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(ErrorCode::default(), ErrorCode::Other);
    }

    #[test]
    fn test_message_override_and_context() {
        let err = AppError::new(ErrorCode::Redis)
            .with_message("cache unavailable")
            .with_field("key", "user:1")
            .push_message("while loading profile");

        assert_eq!(err.message(), "cache unavailable");
        assert_eq!(err.fields().get("key"), Some(&serde_json::json!("user:1")));
        assert_eq!(err.messages(), ["while loading profile".to_string()]);
        assert_eq!(err.to_string(), "cache unavailable");
    }

    #[test]
    fn test_wrapped_source_display() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "connection reset");
        let err = AppError::wrap(ErrorCode::Database, io);

        assert_eq!(err.to_string(), "Database error: connection reset");
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_write_timeout_body() {
        let writer = ResponseWriter::new();
        AppError::from(ErrorCode::RequestTimeout).write_to(&writer).unwrap();

        let record = writer.record();
        assert_eq!(record.status, StatusCode::REQUEST_TIMEOUT);
        assert_eq!(writer.body_snapshot(), br#"{"error":"Request timed out"}"#.to_vec());
    }
}
