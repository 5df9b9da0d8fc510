//! Extraction of the account path from an inbound request path.
//!
//! The account path is what follows the instance base URL in a Nitter feed
//! URL: one or more comma-separated usernames, optionally followed by
//! `/media`, `/search` or `/with_replies`.

use regex::Regex;
use std::fmt;
use std::sync::LazyLock;
use thiserror::Error;

static ACCOUNT_PATH: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:^|/)([_a-zA-Z0-9]+(?:,[_a-zA-Z0-9]+)*(?:/(?:media|search|with_replies))?)$")
        .expect("account path regex is valid")
});

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AccountError {
    /// Browsers probe for this on every page load.
    #[error("favicon requested")]
    Favicon,
    #[error("invalid user")]
    Invalid,
}

/// Validated account path, e.g. `NASA`, `a,b` or `NASA/with_replies`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountPath(String);

impl AccountPath {
    /// Finds the account path at the end of `path`.
    ///
    /// Anything before the final match is ignored, so `/feeds/nasa` yields
    /// `nasa`. A trailing slash is not accepted.
    pub fn extract(path: &str) -> Result<Self, AccountError> {
        if path.ends_with("favicon.ico") {
            return Err(AccountError::Favicon);
        }
        ACCOUNT_PATH
            .captures(path)
            .and_then(|caps| caps.get(1))
            .map(|m| Self(m.as_str().to_string()))
            .ok_or(AccountError::Invalid)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AccountPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
