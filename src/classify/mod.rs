//! Classification of raw failures into [`AppError`] records.
//!
//! Classification is pure and total: every [`RawError`] yields an [`AppError`],
//! including the empty one produced from a null failure. Rules are checked in a
//! fixed order and the first match wins; later rules are strictly more general.
//!
//! | # | Matches | Kind | Severity | Retryable |
//! |---|---------|------|----------|-----------|
//! | 1 | failed-fetch message | Network | High online, Medium offline | yes |
//! | 2 | short machine code | per [`codes::lookup`] | per table | per table |
//! | 3 | `operation == "file_upload"` | Upload | Medium | yes |
//! | 4 | `operation` contains `llm`, or provider named in message | ProviderUnavailable | Medium | yes |
//! | 5 | `ValidationError` | Validation | Low | no |
//! | 6 | auth-looking message or 401 | Authentication | High | no |
//! | 7 | permission-looking message or 403 | Permission | High | no |
//! | 8 | `StorageError` | Storage | Medium | yes |
//! | 9 | `ProcessingError` | Processing | Medium | yes |
//! | 10 | anything else | Unknown | Medium | yes |
//!
//! # Examples
//!
//! ```rust
//! use breakwater::{ErrorClassifier, ErrorContext, ErrorKind, RawError, Severity};
//!
//! let classifier = ErrorClassifier::default();
//! let raw = RawError::new("Failed to fetch").with_name("TypeError");
//!
//! let online = classifier.classify(&raw, &ErrorContext::new(), true);
//! assert_eq!(online.kind(), ErrorKind::Network);
//! assert_eq!(online.severity(), Severity::High);
//!
//! let offline = classifier.classify(&raw, &ErrorContext::new(), false);
//! assert_eq!(offline.severity(), Severity::Medium);
//! ```

pub mod codes;
mod provider;

pub use provider::{ProviderRotation, DEFAULT_PROVIDERS};

use std::sync::Arc;

use crate::clock::{Clock, SystemClock};
use crate::error::{
    AppError, ErrorContext, ErrorKind, RawError, Severity, NETWORK_ERROR, PROCESSING_ERROR,
    PROVIDER_KEY, STORAGE_ERROR, VALIDATION_ERROR,
};

/// Operation name that selects upload-specific messages.
pub const FILE_UPLOAD_OPERATION: &str = "file_upload";

const NETWORK_MARKERS: [&str; 5] = [
    "failed to fetch",
    "network request failed",
    "networkerror",
    "network error",
    "load failed",
];

const AUTH_MARKERS: [&str; 7] = [
    "jwt",
    "unauthorized",
    "not authenticated",
    "invalid token",
    "session expired",
    "invalid login credentials",
    "refresh token",
];

const PERMISSION_MARKERS: [&str; 4] = [
    "permission denied",
    "row-level security",
    "forbidden",
    "not allowed",
];

/// Maps raw failures to classified errors.
///
/// Classified errors are stamped with the classifier's clock.
#[derive(Debug, Clone)]
pub struct ErrorClassifier {
    rotation: ProviderRotation,
    clock: Arc<dyn Clock>,
}

impl Default for ErrorClassifier {
    fn default() -> Self {
        Self::with_rotation(ProviderRotation::default())
    }
}

impl ErrorClassifier {
    /// Classifier using a custom provider rotation.
    pub fn with_rotation(rotation: ProviderRotation) -> Self {
        Self {
            rotation,
            clock: Arc::new(SystemClock),
        }
    }

    /// Stamp classified errors with `clock` instead of the system clock.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// The provider rotation used for fallbacks.
    pub fn rotation(&self) -> &ProviderRotation {
        &self.rotation
    }

    /// Classify `raw` under `context`. `online` is the current connectivity.
    pub fn classify(&self, raw: &RawError, context: &ErrorContext, online: bool) -> AppError {
        let context = enrich(context, raw);
        let message = raw.description().to_string();
        let now = self.clock.now();
        let builder = |kind| {
            AppError::builder(kind, message.clone())
                .code(raw.code.clone())
                .timestamp(now)
                .context(context.clone())
        };

        if is_network_failure(raw) {
            let severity = if online {
                Severity::High
            } else {
                Severity::Medium
            };
            return builder(ErrorKind::Network).severity(severity).build();
        }

        if let Some(code) = raw.code.as_deref().filter(|c| codes::is_machine_code(c)) {
            let rule = codes::lookup(code);
            return builder(rule.kind)
                .severity(rule.severity)
                .retryable(rule.retryable)
                .user_message(rule.user_message)
                .build();
        }

        let operation = context.operation().unwrap_or_default();

        if operation == FILE_UPLOAD_OPERATION {
            return builder(ErrorKind::Upload)
                .user_message(upload_advice(&raw.message))
                .build();
        }

        let named_provider = self.rotation.mentioned_in(&raw.message);
        if operation.to_ascii_lowercase().contains("llm") || named_provider.is_some() {
            let failed = raw
                .provider
                .as_deref()
                .or_else(|| context.provider())
                .or(named_provider);
            return builder(ErrorKind::ProviderUnavailable)
                .fallback(self.rotation.fallback_for(failed))
                .build();
        }

        if raw.is_named(VALIDATION_ERROR) {
            let user_message = match raw.field.as_deref() {
                Some(field) => format!("Please check the {} field.", field),
                None => ErrorKind::Validation.default_user_message().to_string(),
            };
            return builder(ErrorKind::Validation)
                .severity(Severity::Low)
                .retryable(false)
                .user_message(user_message)
                .build();
        }

        if looks_like_auth(raw) {
            return builder(ErrorKind::Authentication)
                .severity(Severity::High)
                .retryable(false)
                .build();
        }

        if looks_like_permission(raw) {
            return builder(ErrorKind::Permission)
                .severity(Severity::High)
                .retryable(false)
                .build();
        }

        if raw.is_named(STORAGE_ERROR) {
            return builder(ErrorKind::Storage).build();
        }

        if raw.is_named(PROCESSING_ERROR) {
            return builder(ErrorKind::Processing).build();
        }

        builder(ErrorKind::Unknown).build()
    }
}

/// Classify with the default provider rotation.
pub fn classify(raw: &RawError, context: &ErrorContext, online: bool) -> AppError {
    ErrorClassifier::default().classify(raw, context, online)
}

/// Returns true if the failure looks like a transport failure.
pub fn is_network_failure(raw: &RawError) -> bool {
    if raw.is_named(NETWORK_ERROR) {
        return true;
    }
    let lower = raw.message.to_ascii_lowercase();
    NETWORK_MARKERS.iter().any(|m| lower.contains(m))
}

/// Returns true if the failure looks like a missing or invalid session.
pub fn looks_like_auth(raw: &RawError) -> bool {
    if raw.status == Some(401) {
        return true;
    }
    let lower = raw.message.to_ascii_lowercase();
    AUTH_MARKERS.iter().any(|m| lower.contains(m))
}

fn looks_like_permission(raw: &RawError) -> bool {
    if raw.status == Some(403) {
        return true;
    }
    let lower = raw.message.to_ascii_lowercase();
    PERMISSION_MARKERS.iter().any(|m| lower.contains(m))
}

fn upload_advice(message: &str) -> &'static str {
    let lower = message.to_ascii_lowercase();
    if lower.contains("size") || lower.contains("too large") {
        "The file is too large. Please choose a smaller file."
    } else if lower.contains("type") || lower.contains("format") {
        "This file type is not supported."
    } else if lower.contains("network") {
        "Upload interrupted by a network problem. Please check your connection."
    } else if lower.contains("timeout") || lower.contains("timed out") {
        "The upload took too long. Please try again."
    } else if lower.contains("storage") || lower.contains("bucket") || lower.contains("quota") {
        "File storage is unavailable right now. Please try again later."
    } else {
        ErrorKind::Upload.default_user_message()
    }
}

fn enrich(context: &ErrorContext, raw: &RawError) -> ErrorContext {
    let mut context = context.clone();
    if let Some(name) = &raw.name {
        context.insert("name", name.clone());
    }
    if let Some(status) = raw.status {
        context.insert("status", status);
    }
    if let Some(provider) = &raw.provider {
        context.insert(PROVIDER_KEY, provider.clone());
    }
    context
}

#[cfg(test)]
mod tests;
