//! Fixed lookup for short machine codes reported by the hosted backend.

use crate::error::{ErrorKind, Severity};

/// Outcome of looking up a machine code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CodeRule {
    /// Resulting kind.
    pub kind: ErrorKind,
    /// Resulting severity.
    pub severity: Severity,
    /// Retry hint.
    pub retryable: bool,
    /// Message shown to users.
    pub user_message: &'static str,
}

/// Undefined column.
pub const UNDEFINED_COLUMN: &str = "42703";
/// Column or table missing from the API schema cache.
pub const SCHEMA_CACHE_MISS: &str = "PGRST204";
/// Value could not be parsed, typically a malformed identifier.
pub const INVALID_TEXT_REPRESENTATION: &str = "22P02";
/// Uniqueness constraint violated.
pub const UNIQUE_VIOLATION: &str = "23505";
/// Single-row lookup matched no rows.
pub const NO_ROWS: &str = "PGRST116";
/// Foreign-key constraint violated.
pub const FOREIGN_KEY_VIOLATION: &str = "23503";

/// Codes that no amount of retrying will fix.
pub const TERMINAL_CODES: [&str; 6] = [
    UNDEFINED_COLUMN,
    SCHEMA_CACHE_MISS,
    INVALID_TEXT_REPRESENTATION,
    UNIQUE_VIOLATION,
    NO_ROWS,
    FOREIGN_KEY_VIOLATION,
];

const MAX_CODE_LEN: usize = 12;

/// Returns true if `code` looks like a short machine code.
pub fn is_machine_code(code: &str) -> bool {
    !code.is_empty() && code.len() <= MAX_CODE_LEN && code.chars().all(|c| c.is_ascii_alphanumeric())
}

/// Returns true if `code` is one of the known terminal codes.
pub fn is_terminal(code: &str) -> bool {
    TERMINAL_CODES.contains(&code)
}

/// Look up a machine code. Unknown codes map to a retryable backend failure.
pub fn lookup(code: &str) -> CodeRule {
    match code {
        UNDEFINED_COLUMN | SCHEMA_CACHE_MISS => CodeRule {
            kind: ErrorKind::BackendApi,
            severity: Severity::High,
            retryable: false,
            user_message: "The server is out of date with this app. Please contact support.",
        },
        INVALID_TEXT_REPRESENTATION => CodeRule {
            kind: ErrorKind::Validation,
            severity: Severity::Medium,
            retryable: false,
            user_message: "Invalid identifier format.",
        },
        UNIQUE_VIOLATION => CodeRule {
            kind: ErrorKind::Validation,
            severity: Severity::Low,
            retryable: false,
            user_message: "This item already exists.",
        },
        NO_ROWS => CodeRule {
            kind: ErrorKind::BackendApi,
            severity: Severity::Low,
            retryable: false,
            user_message: "The requested item was not found.",
        },
        FOREIGN_KEY_VIOLATION => CodeRule {
            kind: ErrorKind::BackendApi,
            severity: Severity::Medium,
            retryable: false,
            user_message: "This item references data that no longer exists.",
        },
        _ => CodeRule {
            kind: ErrorKind::BackendApi,
            severity: Severity::Medium,
            retryable: true,
            user_message: ErrorKind::BackendApi.default_user_message(),
        },
    }
}
