//! App Store identifier parsing
//!
//! Turns the many shapes an App Store link can take into a single numeric
//! `AppIdentifier` that the resolver uses as its cache key.

use std::fmt;
use std::str::FromStr;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

/// Matches `id123` (path form) and `id=123` (query form)
static APP_ID_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"id=?(\d+)").expect("app id pattern is valid"));

/// Errors that can occur when parsing an App Store identifier
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdentifierError {
    /// Input was empty or whitespace only
    #[error("Empty App Store identifier")]
    Empty,

    /// Input looked like a URL but could not be parsed as an http(s) URL
    #[error("Invalid URL provided: '{0}'")]
    InvalidUrl(String),

    /// No numeric app ID could be found in the input
    #[error("Invalid App Store URL format: '{0}'")]
    NoAppId(String),
}

/// Numeric App Store ID used as the cache key
///
/// Always holds a non-empty string of ASCII digits. Construct it with
/// [`AppIdentifier::parse`] or `str::parse`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AppIdentifier(String);

impl AppIdentifier {
    /// Parses an App Store URL, an `id=` token, or a bare numeric ID
    ///
    /// Accepted shapes include:
    /// - `6747951776`
    /// - `id=6747951776`
    /// - `https://apps.apple.com/us/app/cartoonify-me/id6747951776`
    /// - `https://itunes.apple.com/lookup?id=6747951776`
    pub fn parse(input: &str) -> Result<Self, IdentifierError> {
        let input = input.trim();
        if input.is_empty() {
            return Err(IdentifierError::Empty);
        }

        if input.bytes().all(|b| b.is_ascii_digit()) {
            return Ok(Self::from_digits(input));
        }

        if input.contains("://") {
            let url = Url::parse(input).map_err(|_| IdentifierError::InvalidUrl(input.to_string()))?;
            if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
                return Err(IdentifierError::InvalidUrl(input.to_string()));
            }
        }

        APP_ID_PATTERN
            .captures(input)
            .and_then(|caps| caps.get(1))
            .map(|m| Self::from_digits(m.as_str()))
            .ok_or_else(|| IdentifierError::NoAppId(input.to_string()))
    }

    /// Strips leading zeros so `0389801252` and `389801252` share a cache key
    fn from_digits(digits: &str) -> Self {
        let trimmed = digits.trim_start_matches('0');
        if trimmed.is_empty() {
            Self("0".to_string())
        } else {
            Self(trimmed.to_string())
        }
    }

    /// The bare numeric ID
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AppIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for AppIdentifier {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl FromStr for AppIdentifier {
    type Err = IdentifierError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for AppIdentifier {
    type Error = IdentifierError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<AppIdentifier> for String {
    fn from(id: AppIdentifier) -> Self {
        id.0
    }
}
