//! Boundary adapter for failures of unknown shape.
//!
//! Backends report failures in many shapes: a status code from an HTTP layer, a
//! short machine code from a database API, a bare message from a fetch wrapper, or
//! nothing useful at all. Everything is normalized into a [`RawError`] before it
//! reaches the classifier so that classification never has to guess at fields.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::store::StoreError;

/// Name given to failures tagged as input validation problems.
pub const VALIDATION_ERROR: &str = "ValidationError";

/// Name given to failures tagged as storage problems.
pub const STORAGE_ERROR: &str = "StorageError";

/// Name given to failures tagged as processing problems.
pub const PROCESSING_ERROR: &str = "ProcessingError";

/// Name given to transport-level failures.
pub const NETWORK_ERROR: &str = "NetworkError";

const UNKNOWN_MESSAGE: &str = "unknown error";

/// Normalized failure as seen by the classifier.
///
/// # Examples
///
/// ```rust
/// use breakwater::RawError;
///
/// let err = RawError::new("duplicate key value")
///     .with_code("23505")
///     .with_status(409);
///
/// assert_eq!(err.code.as_deref(), Some("23505"));
/// assert_eq!(err.status, Some(409));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawError {
    /// Error class name, e.g. `TypeError` or `ValidationError`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Human-readable message. Empty when the source had none.
    #[serde(default)]
    pub message: String,
    /// Short machine code reported by a backend.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    /// Transport status code.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    /// Offending input field for validation failures.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    /// Provider that produced the failure, for language-model calls.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
}

impl RawError {
    /// Create an error with only a message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ..Self::default()
        }
    }

    /// The failure value was absent altogether.
    pub fn absent() -> Self {
        Self::new(UNKNOWN_MESSAGE)
    }

    /// Input validation failure on `field`.
    pub fn validation(message: impl Into<String>, field: impl Into<String>) -> Self {
        Self::new(message)
            .with_name(VALIDATION_ERROR)
            .with_field(field)
    }

    /// Storage-layer failure.
    pub fn storage(message: impl Into<String>) -> Self {
        Self::new(message).with_name(STORAGE_ERROR)
    }

    /// Set the error class name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Set the machine code.
    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    /// Set the transport status.
    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    /// Set the offending field.
    pub fn with_field(mut self, field: impl Into<String>) -> Self {
        self.field = Some(field.into());
        self
    }

    /// Set the provider.
    pub fn with_provider(mut self, provider: impl Into<String>) -> Self {
        self.provider = Some(provider.into());
        self
    }

    /// Returns true if `name` equals `expected`.
    pub fn is_named(&self, expected: &str) -> bool {
        self.name.as_deref() == Some(expected)
    }

    /// Returns true if the status is in the 4xx client-error range.
    pub fn is_client_error(&self) -> bool {
        matches!(self.status, Some(400..=499))
    }

    /// Best available description: the message, else the code, else a placeholder.
    pub fn description(&self) -> &str {
        if !self.message.is_empty() {
            &self.message
        } else if let Some(code) = self.code.as_deref().filter(|c| !c.is_empty()) {
            code
        } else {
            UNKNOWN_MESSAGE
        }
    }
}

impl fmt::Display for RawError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.code, &self.status) {
            (Some(code), _) => write!(f, "[{}] {}", code, self.description()),
            (None, Some(status)) => write!(f, "[{}] {}", status, self.description()),
            (None, None) => write!(f, "{}", self.description()),
        }
    }
}

impl std::error::Error for RawError {}

impl From<&str> for RawError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

impl From<String> for RawError {
    fn from(message: String) -> Self {
        Self::new(message)
    }
}

impl From<std::io::Error> for RawError {
    fn from(err: std::io::Error) -> Self {
        use std::io::ErrorKind;

        let raw = Self::new(err.to_string());
        match err.kind() {
            ErrorKind::ConnectionRefused
            | ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::NotConnected
            | ErrorKind::TimedOut => raw.with_name(NETWORK_ERROR),
            ErrorKind::PermissionDenied => raw.with_status(403),
            _ => raw.with_name(STORAGE_ERROR),
        }
    }
}

impl From<StoreError> for RawError {
    fn from(err: StoreError) -> Self {
        Self::storage(err.to_string())
    }
}

impl From<Value> for RawError {
    /// Duck-typed conversion for failures that arrive as loose JSON.
    ///
    /// Objects contribute `name`, `message` (or `error`), `code`, `status` (or
    /// `statusCode`), `field`, and `provider` when those have usable types. Every
    /// other shape becomes a message-only error.
    fn from(value: Value) -> Self {
        match value {
            Value::Null => Self::absent(),
            Value::String(s) => Self::new(s),
            Value::Object(map) => {
                let text = |key: &str| map.get(key).and_then(Value::as_str).map(str::to_string);

                let message = text("message")
                    .or_else(|| text("error"))
                    .unwrap_or_default();
                let code = match map.get("code") {
                    Some(Value::String(s)) => Some(s.clone()),
                    Some(Value::Number(n)) => Some(n.to_string()),
                    _ => None,
                };
                let status = map
                    .get("status")
                    .or_else(|| map.get("statusCode"))
                    .and_then(Value::as_u64)
                    .and_then(|n| u16::try_from(n).ok());

                Self {
                    name: text("name"),
                    message,
                    code,
                    status,
                    field: text("field"),
                    provider: text("provider"),
                }
            }
            other => Self::new(other.to_string()),
        }
    }
}
