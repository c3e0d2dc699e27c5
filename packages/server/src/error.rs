//! Error handling for registries and portals
//!
//! Every registry and portal operation returns [`PortalResult`]. Each error
//! carries:
//! - A machine-readable **code** (e.g. `"DUPLICATE_NAME"`)
//! - A human-readable **message**
//! - An HTTP **status code** used by the HTTP transport
//! - A unique **digest** on the wire for log correlation
//! - Optional **details** (validation failures, offending names)
//!
//! Errors travelling over a network transport keep their kind: the remote
//! side sends the code, and [`PortalError::from_wire`] rebuilds the same
//! variant locally.

use portico_core::{AddressError, ValidationError};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Boxed error returned by user functions
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Portal error type covering every failure mode of the system
#[derive(Debug, Error)]
pub enum PortalError {
    /// Empty name, missing function or schema
    #[error("Invalid argument: {message}")]
    InvalidArgument { message: String },

    /// Name already registered
    #[error("Duplicate name: '{name}' is already registered")]
    DuplicateName { name: String },

    /// Unknown function, service, method or address target
    #[error("Not found: {what}")]
    NotFound { what: String },

    /// No portal answers to the scheme
    #[error("Unsupported scheme: '{scheme}'")]
    UnsupportedScheme { scheme: String },

    /// Address could not be parsed or does not fit the portal
    #[error("Invalid address: {message}")]
    InvalidAddress { message: String },

    /// Boundary schema check failed
    #[error("Validation failed: {message}")]
    ValidationFailed {
        message: String,
        errors: Vec<ValidationError>,
    },

    /// The callee returned an error
    #[error("Execution of '{function}' failed: {message}")]
    ExecutionFailed {
        function: String,
        message: String,
        #[source]
        source: Option<BoxError>,
    },

    /// Socket or connection errors
    #[error("Transport error ({transport}): {message}")]
    TransportFailed {
        transport: &'static str,
        message: String,
    },

    /// Deadline of the call context expired
    #[error("Timeout: {message}")]
    Timeout { message: String, timeout_ms: u64 },

    /// Call context was cancelled
    #[error("Cancelled: {message}")]
    Cancelled { message: String },

    /// `start` on a running portal
    #[error("Portal already running: {portal}")]
    AlreadyRunning { portal: String },

    /// Operation needs a running portal
    #[error("Portal not running: {portal}")]
    NotRunning { portal: String },

    /// JSON encoding or decoding errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl PortalError {
    /// Get the machine-readable error code
    pub fn code(&self) -> &'static str {
        match self {
            PortalError::InvalidArgument { .. } => "INVALID_ARGUMENT",
            PortalError::DuplicateName { .. } => "DUPLICATE_NAME",
            PortalError::NotFound { .. } => "NOT_FOUND",
            PortalError::UnsupportedScheme { .. } => "UNSUPPORTED_SCHEME",
            PortalError::InvalidAddress { .. } => "INVALID_ADDRESS",
            PortalError::ValidationFailed { .. } => "VALIDATION_FAILED",
            PortalError::ExecutionFailed { .. } => "EXECUTION_FAILED",
            PortalError::TransportFailed { .. } => "TRANSPORT_FAILED",
            PortalError::Timeout { .. } => "TIMEOUT",
            PortalError::Cancelled { .. } => "CANCELLED",
            PortalError::AlreadyRunning { .. } => "ALREADY_RUNNING",
            PortalError::NotRunning { .. } => "NOT_RUNNING",
            PortalError::Serialization(_) => "SERIALIZATION_ERROR",
        }
    }

    /// Get the appropriate HTTP status code
    pub fn status_code(&self) -> u16 {
        match self {
            PortalError::InvalidArgument { .. } => 400,
            PortalError::DuplicateName { .. } => 409,
            PortalError::NotFound { .. } => 404,
            PortalError::UnsupportedScheme { .. } => 400,
            PortalError::InvalidAddress { .. } => 400,
            PortalError::ValidationFailed { .. } => 400,
            PortalError::ExecutionFailed { .. } => 500,
            PortalError::TransportFailed { .. } => 502,
            PortalError::Timeout { .. } => 504,
            PortalError::Cancelled { .. } => 499,
            PortalError::AlreadyRunning { .. } => 409,
            PortalError::NotRunning { .. } => 503,
            PortalError::Serialization(_) => 400,
        }
    }

    /// Message without the kind prefix, as sent to remote peers
    pub fn message(&self) -> String {
        match self {
            PortalError::InvalidArgument { message }
            | PortalError::InvalidAddress { message }
            | PortalError::ValidationFailed { message, .. }
            | PortalError::ExecutionFailed { message, .. }
            | PortalError::TransportFailed { message, .. }
            | PortalError::Timeout { message, .. }
            | PortalError::Cancelled { message } => message.clone(),
            PortalError::DuplicateName { name } => name.clone(),
            PortalError::NotFound { what } => what.clone(),
            PortalError::UnsupportedScheme { scheme } => scheme.clone(),
            PortalError::AlreadyRunning { portal } | PortalError::NotRunning { portal } => {
                portal.clone()
            }
            PortalError::Serialization(e) => e.to_string(),
        }
    }

    /// Convert to a structured error response
    pub fn to_error_response(&self) -> ErrorResponse {
        ErrorResponse {
            result: None,
            error: self.to_string(),
            message: self.message(),
            code: self.code().to_string(),
            status: self.status_code(),
            digest: Uuid::new_v4().to_string(),
            details: self.details(),
        }
    }

    /// Get additional error-specific details
    fn details(&self) -> Option<serde_json::Value> {
        match self {
            PortalError::ValidationFailed { errors, .. } if !errors.is_empty() => {
                Some(serde_json::json!({ "errors": errors }))
            }
            PortalError::DuplicateName { name } => Some(serde_json::json!({ "name": name })),
            PortalError::ExecutionFailed { function, .. } => {
                Some(serde_json::json!({ "function": function }))
            }
            PortalError::UnsupportedScheme { scheme } => {
                Some(serde_json::json!({ "scheme": scheme }))
            }
            PortalError::Timeout { timeout_ms, .. } => {
                Some(serde_json::json!({ "timeoutMs": timeout_ms }))
            }
            _ => None,
        }
    }

    /// Rebuild an error received from a remote peer.
    ///
    /// `message` is the bare message ([`PortalError::message`]); `function`
    /// names the call target. Unknown codes become `ExecutionFailed`.
    pub fn from_wire(code: &str, message: impl Into<String>, function: &str) -> Self {
        let message = message.into();
        match code {
            "INVALID_ARGUMENT" => PortalError::InvalidArgument { message },
            "DUPLICATE_NAME" => PortalError::DuplicateName { name: message },
            "NOT_FOUND" => PortalError::NotFound { what: message },
            "UNSUPPORTED_SCHEME" => PortalError::UnsupportedScheme { scheme: message },
            "INVALID_ADDRESS" => PortalError::InvalidAddress { message },
            "VALIDATION_FAILED" | "SERIALIZATION_ERROR" => PortalError::ValidationFailed {
                message,
                errors: Vec::new(),
            },
            "TRANSPORT_FAILED" => PortalError::TransportFailed {
                transport: "remote",
                message,
            },
            "TIMEOUT" => PortalError::Timeout {
                message,
                timeout_ms: 0,
            },
            "CANCELLED" => PortalError::Cancelled { message },
            "ALREADY_RUNNING" => PortalError::AlreadyRunning { portal: message },
            "NOT_RUNNING" => PortalError::NotRunning { portal: message },
            _ => PortalError::ExecutionFailed {
                function: function.to_string(),
                message,
                source: None,
            },
        }
    }

    // Convenience constructors

    /// Create an invalid argument error
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        PortalError::InvalidArgument {
            message: message.into(),
        }
    }

    /// Create a duplicate name error
    pub fn duplicate(name: impl Into<String>) -> Self {
        PortalError::DuplicateName { name: name.into() }
    }

    /// Create a not found error
    pub fn not_found(what: impl Into<String>) -> Self {
        PortalError::NotFound { what: what.into() }
    }

    /// Create an unsupported scheme error
    pub fn unsupported_scheme(scheme: impl Into<String>) -> Self {
        PortalError::UnsupportedScheme {
            scheme: scheme.into(),
        }
    }

    /// Create an invalid address error
    pub fn invalid_address(message: impl Into<String>) -> Self {
        PortalError::InvalidAddress {
            message: message.into(),
        }
    }

    /// Create a validation error from schema failures
    pub fn validation(message: impl Into<String>, errors: Vec<ValidationError>) -> Self {
        PortalError::ValidationFailed {
            message: message.into(),
            errors,
        }
    }

    /// Wrap a callee error with the function name
    pub fn execution(function: impl Into<String>, source: BoxError) -> Self {
        PortalError::ExecutionFailed {
            function: function.into(),
            message: source.to_string(),
            source: Some(source),
        }
    }

    /// Create an execution error from a plain message
    pub fn execution_message(function: impl Into<String>, message: impl Into<String>) -> Self {
        PortalError::ExecutionFailed {
            function: function.into(),
            message: message.into(),
            source: None,
        }
    }

    /// Create a transport error
    pub fn transport(transport: &'static str, message: impl Into<String>) -> Self {
        PortalError::TransportFailed {
            transport,
            message: message.into(),
        }
    }

    /// Create a timeout error
    pub fn timeout(message: impl Into<String>, timeout_ms: u64) -> Self {
        PortalError::Timeout {
            message: message.into(),
            timeout_ms,
        }
    }

    /// Create a cancellation error
    pub fn cancelled(message: impl Into<String>) -> Self {
        PortalError::Cancelled {
            message: message.into(),
        }
    }

    /// Create an already running error
    pub fn already_running(portal: impl Into<String>) -> Self {
        PortalError::AlreadyRunning {
            portal: portal.into(),
        }
    }

    /// Create a not running error
    pub fn not_running(portal: impl Into<String>) -> Self {
        PortalError::NotRunning {
            portal: portal.into(),
        }
    }
}

impl From<AddressError> for PortalError {
    fn from(error: AddressError) -> Self {
        PortalError::InvalidAddress {
            message: error.to_string(),
        }
    }
}

/// Structured error body for JSON serialization
///
/// Shares the `result`/`error` envelope of successful responses so a client
/// can always read both fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Always null for error responses
    pub result: Option<serde_json::Value>,

    /// Human-readable error message
    pub error: String,

    /// Message without the kind prefix
    #[serde(default)]
    pub message: String,

    /// Machine-readable error code (e.g. "NOT_FOUND")
    pub code: String,

    /// HTTP status code
    pub status: u16,

    /// Unique error identifier for log correlation
    #[serde(default)]
    pub digest: String,

    /// Additional error-specific details
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ErrorResponse {
    /// Create a new error response
    pub fn new(code: impl Into<String>, message: impl Into<String>, status: u16) -> Self {
        let message = message.into();
        Self {
            result: None,
            error: message.clone(),
            message,
            code: code.into(),
            status,
            digest: Uuid::new_v4().to_string(),
            details: None,
        }
    }

    /// Add details to the error response
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    /// Convert to JSON string
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| {
            format!(
                r#"{{"result":null,"error":"{}","code":"{}","status":{},"digest":"{}"}}"#,
                self.error.replace('"', "'"),
                self.code,
                self.status,
                self.digest
            )
        })
    }
}

/// Convenient Result type for portal operations
pub type PortalResult<T> = Result<T, PortalError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(PortalError::duplicate("f").code(), "DUPLICATE_NAME");
        assert_eq!(PortalError::not_found("f").code(), "NOT_FOUND");
        assert_eq!(PortalError::unsupported_scheme("ftp").code(), "UNSUPPORTED_SCHEME");
        assert_eq!(PortalError::not_running("http").code(), "NOT_RUNNING");
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(PortalError::not_found("f").status_code(), 404);
        assert_eq!(PortalError::validation("bad", vec![]).status_code(), 400);
        assert_eq!(PortalError::execution_message("f", "boom").status_code(), 500);
        assert_eq!(PortalError::transport("http", "refused").status_code(), 502);
        assert_eq!(PortalError::timeout("slow", 10).status_code(), 504);
    }

    #[test]
    fn test_execution_error_keeps_source() {
        let source: BoxError = "division by zero".into();
        let error = PortalError::execution("divide", source);
        assert_eq!(
            error.to_string(),
            "Execution of 'divide' failed: division by zero"
        );
        assert!(std::error::Error::source(&error).is_some());
    }

    #[test]
    fn test_error_response() {
        let error = PortalError::validation(
            "input rejected",
            vec![ValidationError::new("email", "required")],
        );
        let response = error.to_error_response();

        assert!(response.result.is_none());
        assert_eq!(response.code, "VALIDATION_FAILED");
        assert_eq!(response.status, 400);
        assert_eq!(response.message, "input rejected");
        assert!(!response.digest.is_empty());

        let details = response.details.unwrap();
        assert_eq!(details["errors"][0]["path"], "email");
    }

    #[test]
    fn test_error_response_json() {
        let response = ErrorResponse::new("TEST_ERROR", "Test message", 500);
        let json: serde_json::Value = serde_json::from_str(&response.to_json()).unwrap();

        assert_eq!(json["result"], serde_json::Value::Null);
        assert_eq!(json["error"], "Test message");
        assert_eq!(json["code"], "TEST_ERROR");
        assert_eq!(json["status"], 500);
    }

    #[test]
    fn test_from_wire_keeps_kind() {
        assert!(matches!(
            PortalError::from_wire("NOT_FOUND", "function 'x'", "x"),
            PortalError::NotFound { .. }
        ));
        assert!(matches!(
            PortalError::from_wire("VALIDATION_FAILED", "bad", "x"),
            PortalError::ValidationFailed { .. }
        ));
        match PortalError::from_wire("NOT_RUNNING", "websocket", "x") {
            PortalError::NotRunning { portal } => assert_eq!(portal, "websocket"),
            other => panic!("unexpected {:?}", other),
        }
        assert!(matches!(
            PortalError::from_wire("ALREADY_RUNNING", "http", "x"),
            PortalError::AlreadyRunning { .. }
        ));
        match PortalError::from_wire("SOMETHING_ELSE", "boom", "divide") {
            PortalError::ExecutionFailed { function, message, .. } => {
                assert_eq!(function, "divide");
                assert_eq!(message, "boom");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_address_error_conversion() {
        let error: PortalError = portico_core::Address::parse("nope").unwrap_err().into();
        assert_eq!(error.code(), "INVALID_ADDRESS");
    }
}
