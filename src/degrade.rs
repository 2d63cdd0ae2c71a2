//! Graceful degradation: try the real thing, settle for a substitute.
//!
//! No classification, no retry, nothing written to the error log. A failing
//! primary only leaves an info-level trace naming the label.

use std::fmt::Display;
use std::future::Future;

/// Run `primary`; on failure, log a notice and return what `fallback` produces.
///
/// The fallback is only invoked when the primary fails. If the fallback fails
/// too, its error is returned.
///
/// # Examples
///
/// ```rust
/// use breakwater::with_fallback;
///
/// # tokio_test::block_on(async {
/// let name = with_fallback(
///     async { Err::<String, _>("profile service down") },
///     || async { Ok::<_, std::convert::Infallible>("Guest".to_string()) },
///     Some("load_profile"),
/// )
/// .await;
///
/// assert_eq!(name.unwrap(), "Guest");
/// # });
/// ```
pub async fn with_fallback<T, E, E2, P, F, Fut>(
    primary: P,
    fallback: F,
    label: Option<&str>,
) -> Result<T, E2>
where
    P: Future<Output = Result<T, E>>,
    E: Display,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, E2>>,
{
    match primary.await {
        Ok(value) => Ok(value),
        Err(error) => {
            notice(label, &error);
            fallback().await
        }
    }
}

/// Like [`with_fallback`], for fallbacks that cannot fail.
///
/// # Examples
///
/// ```rust
/// use breakwater::with_fallback_value;
///
/// # tokio_test::block_on(async {
/// let items: Vec<u32> = with_fallback_value(
///     async { Err::<Vec<u32>, _>("cache miss") },
///     Vec::new,
///     None,
/// )
/// .await;
///
/// assert!(items.is_empty());
/// # });
/// ```
pub async fn with_fallback_value<T, E, P, F>(primary: P, fallback: F, label: Option<&str>) -> T
where
    P: Future<Output = Result<T, E>>,
    E: Display,
    F: FnOnce() -> T,
{
    match primary.await {
        Ok(value) => value,
        Err(error) => {
            notice(label, &error);
            fallback()
        }
    }
}

fn notice(label: Option<&str>, error: &dyn Display) {
    tracing::info!(
        label = label.unwrap_or("operation"),
        error = %error,
        "primary failed, using fallback"
    );
}
