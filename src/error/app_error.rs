//! The classified, immutable error record.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::context::ErrorContext;

/// Coarse category of a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Transport failure reaching a dependency.
    Network,
    /// The hosted backend rejected or failed the request.
    BackendApi,
    /// Input was rejected.
    Validation,
    /// The caller is not signed in or the session is invalid.
    Authentication,
    /// The caller is signed in but not allowed to do this.
    Permission,
    /// A file upload failed.
    Upload,
    /// Server-side processing of accepted work failed.
    Processing,
    /// Durable storage failed.
    Storage,
    /// A language-model provider is unavailable.
    ProviderUnavailable,
    /// Nothing more specific applies.
    Unknown,
}

impl ErrorKind {
    /// All kinds, in declaration order.
    pub const ALL: [ErrorKind; 10] = [
        ErrorKind::Network,
        ErrorKind::BackendApi,
        ErrorKind::Validation,
        ErrorKind::Authentication,
        ErrorKind::Permission,
        ErrorKind::Upload,
        ErrorKind::Processing,
        ErrorKind::Storage,
        ErrorKind::ProviderUnavailable,
        ErrorKind::Unknown,
    ];

    /// Message shown to users when nothing more specific is known.
    pub fn default_user_message(self) -> &'static str {
        match self {
            ErrorKind::Network => "Connection problem. Please check your internet connection.",
            ErrorKind::BackendApi => "The server could not complete the request. Please try again.",
            ErrorKind::Validation => "Please check your input and try again.",
            ErrorKind::Authentication => "Your session has expired. Please sign in again.",
            ErrorKind::Permission => "You do not have permission to do that.",
            ErrorKind::Upload => "Upload failed. Please try again.",
            ErrorKind::Processing => "Processing failed. Please try again in a moment.",
            ErrorKind::Storage => "Could not save data. Please try again.",
            ErrorKind::ProviderUnavailable => {
                "The AI service is temporarily unavailable. Trying another provider."
            }
            ErrorKind::Unknown => "Something went wrong. Please try again.",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::Network => "network",
            ErrorKind::BackendApi => "backend_api",
            ErrorKind::Validation => "validation",
            ErrorKind::Authentication => "authentication",
            ErrorKind::Permission => "permission",
            ErrorKind::Upload => "upload",
            ErrorKind::Processing => "processing",
            ErrorKind::Storage => "storage",
            ErrorKind::ProviderUnavailable => "provider_unavailable",
            ErrorKind::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

/// How bad a failure is. Ordered from least to most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// Expected, user-correctable.
    Low,
    /// Degraded but recoverable.
    Medium,
    /// A dependency is failing.
    High,
    /// Data was lost or an invariant broke.
    Critical,
}

impl Severity {
    /// All severities, least severe first.
    pub const ALL: [Severity; 4] = [
        Severity::Low,
        Severity::Medium,
        Severity::High,
        Severity::Critical,
    ];

    /// Only High and Critical records leave the process.
    pub fn is_forwarded(self) -> bool {
        matches!(self, Severity::High | Severity::Critical)
    }

    /// Presentation hints for surfacing an error of this severity.
    pub fn presentation(self) -> Presentation {
        match self {
            Severity::Low => Presentation {
                toast_duration: Some(Duration::from_secs(3)),
                retry_action: false,
            },
            Severity::Medium => Presentation {
                toast_duration: Some(Duration::from_secs(5)),
                retry_action: true,
            },
            Severity::High => Presentation {
                toast_duration: Some(Duration::from_secs(8)),
                retry_action: true,
            },
            Severity::Critical => Presentation {
                toast_duration: None,
                retry_action: true,
            },
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        };
        f.write_str(name)
    }
}

/// How a UI layer should surface an error. Derived from severity alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Presentation {
    /// How long a toast stays up. `None` means until dismissed.
    pub toast_duration: Option<Duration>,
    /// Whether to offer a retry action.
    pub retry_action: bool,
}

/// Recovery hint carried by provider failures: picks the next provider to try.
#[derive(Clone)]
pub struct ProviderFallback(Arc<dyn Fn() -> Option<String> + Send + Sync>);

impl ProviderFallback {
    /// Wrap a selector.
    pub fn new<F>(select: F) -> Self
    where
        F: Fn() -> Option<String> + Send + Sync + 'static,
    {
        Self(Arc::new(select))
    }

    /// The next provider to try, or `None` if every candidate is exhausted.
    pub fn next_provider(&self) -> Option<String> {
        (self.0)()
    }
}

impl fmt::Debug for ProviderFallback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ProviderFallback").field(&"<fn>").finish()
    }
}

/// A classified failure.
///
/// Built once by the classifier (or [`AppError::builder`]) and never mutated; all
/// fields are read through accessors.
///
/// # Examples
///
/// ```rust
/// use breakwater::{AppError, ErrorKind, Severity};
///
/// let err = AppError::builder(ErrorKind::Storage, "disk quota exceeded")
///     .severity(Severity::High)
///     .retryable(false)
///     .build();
///
/// assert_eq!(err.kind(), ErrorKind::Storage);
/// assert!(err.severity().is_forwarded());
/// assert_eq!(err.user_message(), "Could not save data. Please try again.");
/// ```
#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppError {
    kind: ErrorKind,
    severity: Severity,
    message: String,
    user_message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    code: Option<String>,
    retryable: bool,
    timestamp: DateTime<Utc>,
    #[serde(default)]
    context: ErrorContext,
    #[serde(skip)]
    fallback: Option<ProviderFallback>,
}

impl AppError {
    /// Start building an error of `kind`.
    ///
    /// Defaults: Medium severity, retryable, the kind's default user message, and
    /// the current time.
    pub fn builder(kind: ErrorKind, message: impl Into<String>) -> AppErrorBuilder {
        AppErrorBuilder {
            kind,
            severity: Severity::Medium,
            message: message.into(),
            user_message: None,
            code: None,
            retryable: true,
            timestamp: None,
            context: ErrorContext::new(),
            fallback: None,
        }
    }

    /// Category.
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Severity.
    pub fn severity(&self) -> Severity {
        self.severity
    }

    /// Technical message.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Message suitable for end users.
    pub fn user_message(&self) -> &str {
        &self.user_message
    }

    /// Backend machine code, if any.
    pub fn code(&self) -> Option<&str> {
        self.code.as_deref()
    }

    /// Retry hint from classification.
    ///
    /// Informational only. Whether an operation is actually retried is decided
    /// by the retry predicate of [`RetryExecutor`](crate::RetryExecutor).
    pub fn is_retryable(&self) -> bool {
        self.retryable
    }

    /// When the error was classified.
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// Context captured at classification time.
    pub fn context(&self) -> &ErrorContext {
        &self.context
    }

    /// Recovery hint, present for provider failures.
    pub fn fallback(&self) -> Option<&ProviderFallback> {
        self.fallback.as_ref()
    }

    /// Presentation hints, derived from severity alone.
    pub fn presentation(&self) -> Presentation {
        self.severity.presentation()
    }
}

impl fmt::Debug for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppError")
            .field("kind", &self.kind)
            .field("severity", &self.severity)
            .field("message", &self.message)
            .field("user_message", &self.user_message)
            .field("code", &self.code)
            .field("retryable", &self.retryable)
            .field("timestamp", &self.timestamp)
            .field("context", &self.context)
            .field("fallback", &self.fallback.is_some())
            .finish()
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}): {}", self.kind, self.severity, self.message)
    }
}

impl std::error::Error for AppError {}

/// Builder for [`AppError`].
#[derive(Debug)]
pub struct AppErrorBuilder {
    kind: ErrorKind,
    severity: Severity,
    message: String,
    user_message: Option<String>,
    code: Option<String>,
    retryable: bool,
    timestamp: Option<DateTime<Utc>>,
    context: ErrorContext,
    fallback: Option<ProviderFallback>,
}

impl AppErrorBuilder {
    /// Set severity.
    pub fn severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    /// Set the user-facing message.
    pub fn user_message(mut self, message: impl Into<String>) -> Self {
        self.user_message = Some(message.into());
        self
    }

    /// Set the machine code.
    pub fn code(mut self, code: Option<String>) -> Self {
        self.code = code;
        self
    }

    /// Set the retry hint.
    pub fn retryable(mut self, retryable: bool) -> Self {
        self.retryable = retryable;
        self
    }

    /// Set the timestamp. Defaults to now.
    pub fn timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// Set the context.
    pub fn context(mut self, context: ErrorContext) -> Self {
        self.context = context;
        self
    }

    /// Attach a provider fallback.
    pub fn fallback(mut self, fallback: ProviderFallback) -> Self {
        self.fallback = Some(fallback);
        self
    }

    /// Finish.
    pub fn build(self) -> AppError {
        AppError {
            kind: self.kind,
            severity: self.severity,
            user_message: self
                .user_message
                .unwrap_or_else(|| self.kind.default_user_message().to_string()),
            message: self.message,
            code: self.code,
            retryable: self.retryable,
            timestamp: self.timestamp.unwrap_or_else(Utc::now),
            context: self.context,
            fallback: self.fallback,
        }
    }
}
