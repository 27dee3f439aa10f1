use crate::service::ShortUrl;
use shorturl_core::{CoreError, StorageError};
use thiserror::Error;
use tonic::{Code, Status};

pub type Result<T> = std::result::Result<T, ShortenerError>;

#[derive(Debug, Clone, Error)]
pub enum ShortenerError {
    #[error("invalid url: {0}")]
    InvalidUrl(String),
    #[error("invalid short key: {0}")]
    InvalidShortKey(String),
    /// The URL was already shortened; carries the existing short URL.
    #[error("url already shortened as {}", .0.url)]
    UrlConflict(ShortUrl),
    #[error("short key already exists: {0}")]
    KeyTaken(String),
    #[error("short key not found: {0}")]
    NotFound(String),
    #[error("short url was deleted: {0}")]
    Gone(String),
    #[error("no free short key after {0} attempts")]
    KeyExhausted(u32),
    #[error("storage error: {0}")]
    Storage(#[source] StorageError),
}

impl From<CoreError> for ShortenerError {
    fn from(value: CoreError) -> Self {
        match value {
            CoreError::InvalidShortKey(message) => Self::InvalidShortKey(message),
        }
    }
}

impl From<ShortenerError> for Status {
    fn from(error: ShortenerError) -> Self {
        match error {
            ShortenerError::InvalidUrl(message) | ShortenerError::InvalidShortKey(message) => {
                Status::new(Code::InvalidArgument, message)
            }
            ShortenerError::UrlConflict(existing) => Status::new(Code::AlreadyExists, existing.url),
            ShortenerError::KeyTaken(key) => Status::new(Code::AlreadyExists, key),
            ShortenerError::NotFound(key) => Status::new(Code::NotFound, key),
            ShortenerError::Gone(key) => {
                Status::new(Code::FailedPrecondition, format!("short url was deleted: {key}"))
            }
            ShortenerError::KeyExhausted(attempts) => Status::new(
                Code::ResourceExhausted,
                format!("no free short key after {attempts} attempts"),
            ),
            ShortenerError::Storage(source) => storage_status(source),
        }
    }
}

fn storage_status(error: StorageError) -> Status {
    let code = match &error {
        StorageError::Timeout(_) => Code::DeadlineExceeded,
        StorageError::Unavailable(_) => Code::Unavailable,
        _ => Code::Internal,
    };
    Status::new(code, error.to_string())
}
