//! Error taxonomy shared by every component.
//!
//! - [`RawError`]: the boundary adapter any foreign failure is converted into
//! - [`AppError`]: the immutable, classified record produced by the classifier
//! - [`ErrorContext`]: opaque key-value context carried from call site to record

mod app_error;
mod context;
mod raw;

pub use app_error::{
    AppError, AppErrorBuilder, ErrorKind, Presentation, ProviderFallback, Severity,
};
pub use context::{ErrorContext, OPERATION_ID_KEY, OPERATION_KEY, PROVIDER_KEY};
pub use raw::{RawError, NETWORK_ERROR, PROCESSING_ERROR, STORAGE_ERROR, VALIDATION_ERROR};
