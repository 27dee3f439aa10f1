//! Core types and traits for the shorturl service.
//!
//! This crate provides the record model, the validated key and owner
//! identifiers, and the storage contract every backend implements.

pub mod error;
pub mod owner;
pub mod repository;
pub mod shortkey;

pub use error::{CoreError, Result, StorageError};
pub use owner::OwnerId;
pub use repository::{
    Lookup, ReadRepository, Repository, ShortUrlRecord, StatsRepository, UserUrl,
};
pub use shortkey::ShortKey;
