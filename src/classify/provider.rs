//! Language-model provider rotation.

use crate::error::ProviderFallback;

/// Providers tried in order when one becomes unavailable.
pub const DEFAULT_PROVIDERS: [&str; 3] = ["openai", "anthropic", "gemini"];

/// Fixed, ordered rotation of candidate providers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderRotation {
    providers: Vec<String>,
}

impl Default for ProviderRotation {
    fn default() -> Self {
        Self::new(DEFAULT_PROVIDERS)
    }
}

impl ProviderRotation {
    /// Build a rotation from provider names, lowercased.
    pub fn new<I, S>(providers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            providers: providers
                .into_iter()
                .map(|p| p.as_ref().to_ascii_lowercase())
                .collect(),
        }
    }

    /// Provider names in rotation order.
    pub fn providers(&self) -> &[String] {
        &self.providers
    }

    /// First provider whose name appears in `text`, case-insensitively.
    pub fn mentioned_in(&self, text: &str) -> Option<&str> {
        let lower = text.to_ascii_lowercase();
        self.providers
            .iter()
            .find(|p| lower.contains(p.as_str()))
            .map(String::as_str)
    }

    /// The provider after `failed` in rotation order, skipping `failed` itself.
    ///
    /// When `failed` is not part of the rotation, the first provider is returned.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use breakwater::classify::ProviderRotation;
    ///
    /// let rotation = ProviderRotation::default();
    /// assert_eq!(rotation.next_after(Some("openai")), Some("anthropic"));
    /// assert_eq!(rotation.next_after(Some("gemini")), Some("openai"));
    /// assert_eq!(rotation.next_after(None), Some("openai"));
    /// ```
    pub fn next_after(&self, failed: Option<&str>) -> Option<&str> {
        let failed = failed.map(str::to_ascii_lowercase);
        let start = failed
            .as_deref()
            .and_then(|f| self.providers.iter().position(|p| p == f))
            .map_or(0, |i| i + 1);

        (0..self.providers.len())
            .map(|offset| &self.providers[(start + offset) % self.providers.len()])
            .find(|p| Some(p.as_str()) != failed.as_deref())
            .map(String::as_str)
    }

    /// Recovery hint that yields the provider after `failed`.
    pub fn fallback_for(&self, failed: Option<&str>) -> ProviderFallback {
        let next = self.next_after(failed).map(str::to_string);
        ProviderFallback::new(move || next.clone())
    }
}
