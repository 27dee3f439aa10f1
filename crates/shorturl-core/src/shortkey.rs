use crate::error::CoreError;
use serde::{Deserialize, Serialize};
use std::fmt::Display;

/// A validated short key identifying a shortened URL.
///
/// Keys are 1-128 characters long and contain only ASCII alphanumerics,
/// hyphens, or underscores. Generated keys use letters only; caller-chosen
/// keys (for example batch correlation ids) may use the wider set.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ShortKey(String);

const MIN_LENGTH: usize = 1;
/// Matches the width of the relational `short_key` column.
pub const MAX_LENGTH: usize = 128;

impl ShortKey {
    /// Creates a new `ShortKey` after validating the input.
    pub fn new(key: impl Into<String>) -> Result<Self, CoreError> {
        let key = key.into();
        Self::validate(&key)?;
        Ok(Self(key))
    }

    /// Creates a `ShortKey` without validation.
    ///
    /// Use this only for keys produced by trusted internal sources
    /// (generators, rows read back from storage).
    pub fn new_unchecked(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Parses either a bare key or a full short URL such as
    /// `http://host/base/abcDEFgh`, keeping the last path segment.
    pub fn from_url_or_key(input: &str) -> Result<Self, CoreError> {
        let trimmed = input.trim().trim_end_matches('/');
        let segment = trimmed.rsplit('/').next().unwrap_or(trimmed);
        Self::new(segment)
    }

    /// Builds the full short URL under the given base URL.
    pub fn to_url(&self, base_url: &str) -> String {
        format!("{}/{}", base_url.trim_end_matches('/'), self.0)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn validate(key: &str) -> Result<(), CoreError> {
        if key.len() < MIN_LENGTH || key.len() > MAX_LENGTH {
            return Err(CoreError::InvalidShortKey(format!(
                "length must be between {} and {}, got {}",
                MIN_LENGTH,
                MAX_LENGTH,
                key.len()
            )));
        }

        if !key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(CoreError::InvalidShortKey(format!(
                "must contain only alphanumeric characters, hyphens, or underscores: '{}'",
                key
            )));
        }

        Ok(())
    }
}

impl Display for ShortKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for ShortKey {
    type Error = CoreError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<ShortKey> for String {
    fn from(value: ShortKey) -> Self {
        value.0
    }
}
