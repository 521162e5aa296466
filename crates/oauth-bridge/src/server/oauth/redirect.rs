//! Client redirect URI allow-list.

use regex::RegexSet;

/// Decides which client redirect URIs this server will send codes to.
#[derive(Debug, Clone)]
pub struct RedirectPolicy {
    patterns: RegexSet,
}

impl RedirectPolicy {
    /// Compile the allow-list.
    ///
    /// # Errors
    ///
    /// Returns error if any pattern is not a valid regex.
    pub fn new<S: AsRef<str>>(patterns: &[S]) -> Result<Self, regex::Error> {
        Ok(Self { patterns: RegexSet::new(patterns)? })
    }

    /// Check `uri`: it must parse as an absolute URL, carry no fragment, and
    /// match at least one pattern.
    #[must_use]
    pub fn is_allowed(&self, uri: &str) -> bool {
        match url::Url::parse(uri) {
            Ok(parsed) if parsed.fragment().is_none() => self.patterns.is_match(uri),
            _ => false,
        }
    }
}
