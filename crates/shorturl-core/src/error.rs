use crate::shortkey::ShortKey;
use thiserror::Error;

/// Result type for repository operations.
pub type Result<T> = std::result::Result<T, StorageError>;

#[derive(Debug, Clone, Error)]
pub enum StorageError {
    /// The URL already has an active record; carries that record's key.
    #[error("url already shortened as {0}")]
    Conflict(ShortKey),
    /// The short key is already in use, possibly by a tombstoned record.
    #[error("short key already exists: {0}")]
    KeyTaken(String),
    #[error("short key not found: {0}")]
    NotFound(String),
    #[error("storage backend unavailable: {0}")]
    Unavailable(String),
    #[error("storage operation timed out: {0}")]
    Timeout(String),
    #[error("storage query failed: {0}")]
    Query(String),
    #[error("stored data is invalid: {0}")]
    InvalidData(String),
    #[error("journal i/o failed: {0}")]
    Journal(String),
    #[error("storage operation failed: {0}")]
    Operation(String),
}

/// Errors raised while constructing core values.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoreError {
    #[error("invalid short key: {0}")]
    InvalidShortKey(String),
}

impl StorageError {
    /// Whether the error is a fault of the backend rather than an expected
    /// outcome such as a conflict or a missing key.
    pub fn is_fault(&self) -> bool {
        !matches!(
            self,
            StorageError::Conflict(_) | StorageError::KeyTaken(_) | StorageError::NotFound(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conflict_is_not_a_fault() {
        let key = ShortKey::new_unchecked("abc12345");
        assert!(!StorageError::Conflict(key).is_fault());
        assert!(!StorageError::NotFound("x".into()).is_fault());
        assert!(StorageError::Unavailable("down".into()).is_fault());
    }

    #[test]
    fn conflict_message_names_existing_key() {
        let key = ShortKey::new_unchecked("abc12345");
        assert_eq!(
            StorageError::Conflict(key).to_string(),
            "url already shortened as abc12345"
        );
    }
}
