//! Storage backends for the shorturl service.
//!
//! - [`MemoryRepository`]: a map behind one reader/writer lock, optionally
//!   made durable by a [`Journal`].
//! - [`PostgresRepository`]: a relational table that relies on unique
//!   indexes for key and URL uniqueness.

pub mod journal;
pub mod memory;
pub mod postgres;

pub use journal::{Journal, JournalEntry, ReplayTarget};
pub use memory::MemoryRepository;
pub use postgres::{PostgresRepository, PostgresSettings};
pub use shorturl_core::{
    Lookup, OwnerId, ReadRepository, Repository, Result, ShortKey, ShortUrlRecord,
    StatsRepository, StorageError, UserUrl,
};
