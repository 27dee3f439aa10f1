use crate::error::Result;
use crate::owner::OwnerId;
use crate::shortkey::ShortKey;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// A stored mapping from a short key to the URL it stands for.
///
/// Only `deleted` ever changes after creation, and only from `false` to
/// `true`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShortUrlRecord {
    pub short_key: ShortKey,
    pub original_url: String,
    /// The user that created the record.
    pub owner: OwnerId,
    /// Tombstone flag. Records are never physically removed.
    pub deleted: bool,
}

impl ShortUrlRecord {
    /// Creates an active record.
    pub fn new(short_key: ShortKey, original_url: impl Into<String>, owner: OwnerId) -> Self {
        Self {
            short_key,
            original_url: original_url.into(),
            owner,
            deleted: false,
        }
    }
}

/// Result of looking a key up.
///
/// A tombstoned record still carries its URL; callers must refuse to
/// redirect when `deleted` is set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lookup {
    pub original_url: String,
    pub short_key: ShortKey,
    pub deleted: bool,
}

/// One row of a user's listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserUrl {
    pub short_key: ShortKey,
    pub original_url: String,
    pub deleted: bool,
}

impl From<ShortUrlRecord> for UserUrl {
    fn from(record: ShortUrlRecord) -> Self {
        Self {
            short_key: record.short_key,
            original_url: record.original_url,
            deleted: record.deleted,
        }
    }
}

/// A read-only view of a repository.
#[async_trait]
pub trait ReadRepository: Send + Sync + 'static {
    /// Retrieves the record for a given short key.
    ///
    /// Returns `Err(NotFound)` if no record with that key was ever stored.
    /// Tombstoned records are returned with `deleted = true`.
    async fn get(&self, key: &ShortKey) -> Result<Lookup>;

    /// Lists every record created by `owner`, tombstoned ones included.
    /// An owner without records gets an empty list.
    async fn get_user_urls(&self, owner: &OwnerId) -> Result<Vec<UserUrl>>;
}

#[async_trait]
pub trait Repository: ReadRepository {
    /// One-time setup: schema creation or journal replay.
    /// Safe to call on every start.
    async fn bootstrap(&self) -> Result<()>;

    /// Inserts `(key, url)` owned by `owner` and returns the stored key.
    ///
    /// Returns `Err(Conflict(existing))` when `url` already has an active
    /// record, and `Err(KeyTaken)` when `key` is already used by any record.
    async fn set(&self, owner: &OwnerId, key: &ShortKey, url: &str) -> Result<ShortKey>;

    /// Tombstones the record for `key` if `owner` created it.
    ///
    /// Unknown keys and keys owned by someone else are left untouched and
    /// still return `Ok(())`, so callers learn nothing about other users'
    /// records.
    async fn delete(&self, owner: &OwnerId, key: &ShortKey) -> Result<()>;

    /// Checks that the backend is reachable.
    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}

/// Aggregate queries for operational statistics.
#[async_trait]
pub trait StatsRepository: Send + Sync + 'static {
    /// Number of records that are not tombstoned.
    async fn count_urls(&self) -> Result<u64>;

    /// Number of distinct owners.
    async fn count_users(&self) -> Result<u64>;
}
