//! Key-value context attached to classified errors
//!
//! An `ErrorContext` travels with a failure from the call site to the classifier and
//! ends up inside the resulting [`AppError`](crate::AppError). It is deliberately
//! opaque: the core only reads a handful of well-known keys (`operation`, `provider`,
//! `operation_id`) and passes everything else through untouched.
//!
//! # Examples
//!
//! ```
//! use breakwater::ErrorContext;
//!
//! let ctx = ErrorContext::new()
//!     .with("operation", "file_upload")
//!     .with("bucket", "avatars");
//!
//! assert_eq!(ctx.operation(), Some("file_upload"));
//! assert_eq!(ctx.get_str("bucket"), Some("avatars"));
//! ```

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Well-known key naming the logical operation that failed.
pub const OPERATION_KEY: &str = "operation";

/// Well-known key naming the language-model provider in use.
pub const PROVIDER_KEY: &str = "provider";

/// Well-known key carrying the circuit-breaker operation id.
pub const OPERATION_ID_KEY: &str = "operation_id";

/// Ordered map of context values
///
/// Keys are kept sorted so the serialized form is stable.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ErrorContext {
    entries: BTreeMap<String, Value>,
}

impl ErrorContext {
    /// Create an empty context
    pub fn new() -> Self {
        Self::default()
    }

    /// Shorthand for a context holding only `operation`
    ///
    /// # Examples
    ///
    /// ```
    /// use breakwater::ErrorContext;
    ///
    /// let ctx = ErrorContext::for_operation("llm_chat");
    /// assert_eq!(ctx.operation(), Some("llm_chat"));
    /// ```
    pub fn for_operation(operation: impl Into<String>) -> Self {
        let operation: String = operation.into();
        Self::new().with(OPERATION_KEY, operation)
    }

    /// Add a value, replacing any previous value under the same key
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(key, value);
        self
    }

    /// Insert a value in place
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.entries.insert(key.into(), value.into());
    }

    /// Look up a raw value
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.get(key)
    }

    /// Look up a value that is a JSON string
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.entries.get(key).and_then(Value::as_str)
    }

    /// The `operation` entry, if it is a string
    pub fn operation(&self) -> Option<&str> {
        self.get_str(OPERATION_KEY)
    }

    /// The `provider` entry, if it is a string
    pub fn provider(&self) -> Option<&str> {
        self.get_str(PROVIDER_KEY)
    }

    /// Combine two contexts. Entries in `other` win on key collisions.
    ///
    /// # Examples
    ///
    /// ```
    /// use breakwater::ErrorContext;
    ///
    /// let base = ErrorContext::new().with("a", 1).with("b", 1);
    /// let merged = base.merged(&ErrorContext::new().with("b", 2));
    ///
    /// assert_eq!(merged.get("a"), Some(&1.into()));
    /// assert_eq!(merged.get("b"), Some(&2.into()));
    /// ```
    pub fn merged(mut self, other: &ErrorContext) -> Self {
        for (key, value) in &other.entries {
            self.entries.insert(key.clone(), value.clone());
        }
        self
    }

    /// Iterate entries in key order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if there are no entries
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl fmt::Display for ErrorContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (key, value) in &self.entries {
            if !first {
                write!(f, ", ")?;
            }
            first = false;
            write!(f, "{}={}", key, value)?;
        }
        Ok(())
    }
}

impl<K, V> FromIterator<(K, V)> for ErrorContext
where
    K: Into<String>,
    V: Into<Value>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            entries: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}
