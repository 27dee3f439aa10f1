use crate::journal::{Journal, ReplayTarget};
use async_trait::async_trait;
use parking_lot::RwLock;
use shorturl_core::{
    Lookup, OwnerId, ReadRepository, Repository, Result, ShortKey, ShortUrlRecord, StorageError,
    UserUrl,
};
use std::collections::HashMap;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
struct Entry {
    original_url: String,
    owner: OwnerId,
    deleted: bool,
    /// Insertion order, used to list a user's records stably.
    seq: u64,
}

impl Entry {
    fn to_record(&self, key: &ShortKey) -> ShortUrlRecord {
        ShortUrlRecord {
            short_key: key.clone(),
            original_url: self.original_url.clone(),
            owner: self.owner.clone(),
            deleted: self.deleted,
        }
    }
}

#[derive(Debug, Default)]
struct State {
    records: HashMap<ShortKey, Entry>,
    /// URL -> key, for records that are not tombstoned.
    active_urls: HashMap<String, ShortKey>,
    next_seq: u64,
}

impl State {
    fn insert(&mut self, owner: &OwnerId, key: &ShortKey, url: &str) -> Result<ShortUrlRecord> {
        if let Some(existing) = self.active_urls.get(url) {
            return Err(StorageError::Conflict(existing.clone()));
        }
        if self.records.contains_key(key) {
            return Err(StorageError::KeyTaken(key.to_string()));
        }

        let entry = Entry {
            original_url: url.to_owned(),
            owner: owner.clone(),
            deleted: false,
            seq: self.bump_seq(),
        };
        let record = entry.to_record(key);
        self.active_urls.insert(url.to_owned(), key.clone());
        self.records.insert(key.clone(), entry);
        Ok(record)
    }

    /// The tombstoned form of `key`'s record, if `owner` may delete it and
    /// it is still active.
    fn tombstone_for(&self, owner: &OwnerId, key: &ShortKey) -> Option<ShortUrlRecord> {
        let entry = self.records.get(key)?;
        if entry.owner != *owner || entry.deleted {
            return None;
        }
        let mut record = entry.to_record(key);
        record.deleted = true;
        Some(record)
    }

    /// Returns true when the tombstone was newly set.
    fn tombstone(&mut self, owner: &OwnerId, key: &ShortKey) -> bool {
        let Some(entry) = self.records.get_mut(key) else {
            return false;
        };
        if entry.owner != *owner || entry.deleted {
            return false;
        }

        entry.deleted = true;
        if self.active_urls.get(&entry.original_url) == Some(key) {
            self.active_urls.remove(&entry.original_url);
        }
        true
    }

    /// Undoes an `insert` whose journal write failed.
    fn forget(&mut self, key: &ShortKey) {
        if let Some(entry) = self.records.remove(key) {
            if self.active_urls.get(&entry.original_url) == Some(key) {
                self.active_urls.remove(&entry.original_url);
            }
        }
    }

    /// Last-write-wins upsert used by journal replay. Never clears a
    /// tombstone.
    fn restore(&mut self, record: ShortUrlRecord) {
        let ShortUrlRecord {
            short_key,
            original_url,
            owner,
            deleted,
        } = record;

        let (seq, was_deleted) = match self.records.remove(&short_key) {
            Some(previous) => {
                if self.active_urls.get(&previous.original_url) == Some(&short_key) {
                    self.active_urls.remove(&previous.original_url);
                }
                (previous.seq, previous.deleted)
            }
            None => (self.bump_seq(), false),
        };

        let mut deleted = deleted || was_deleted;
        if !deleted {
            if let Some(active) = self.active_urls.get(&original_url) {
                warn!(
                    key = %short_key,
                    active = %active,
                    url = %original_url,
                    "journal holds a second active record for url, tombstoning it"
                );
                deleted = true;
            }
        }
        if !deleted {
            self.active_urls
                .insert(original_url.clone(), short_key.clone());
        }
        self.records.insert(
            short_key,
            Entry {
                original_url,
                owner,
                deleted,
                seq,
            },
        );
    }

    fn bump_seq(&mut self) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        seq
    }
}

/// In-memory implementation of the repository contract.
///
/// All state sits behind a single reader/writer lock: lookups and listings
/// run concurrently, inserts and deletes are exclusive. The lock is never
/// held across an `.await`.
///
/// With a [`Journal`] attached, every insert and every effective delete is
/// appended to it and [`Repository::bootstrap`] replays it, which makes the
/// map survive restarts. A failed append leaves the map unchanged and is
/// returned to the caller. Without a journal the repository is purely
/// volatile.
#[derive(Debug, Default)]
pub struct MemoryRepository {
    state: RwLock<State>,
    journal: Option<Journal>,
}

impl MemoryRepository {
    /// Creates a volatile in-memory repository.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a repository persisted through `journal`.
    pub fn with_journal(journal: Journal) -> Self {
        Self {
            state: RwLock::default(),
            journal: Some(journal),
        }
    }

    pub fn journal(&self) -> Option<&Journal> {
        self.journal.as_ref()
    }

    /// Returns every record, in insertion order.
    pub fn snapshot(&self) -> Vec<ShortUrlRecord> {
        let state = self.state.read();
        let mut entries: Vec<_> = state.records.iter().collect();
        entries.sort_by_key(|(_, entry)| entry.seq);
        entries
            .into_iter()
            .map(|(key, entry)| entry.to_record(key))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.state.read().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Appends a full snapshot to the journal, if any.
    pub async fn flush(&self) -> Result<()> {
        let Some(journal) = &self.journal else {
            return Ok(());
        };
        journal.save(&self.snapshot()).await
    }

    /// Rewrites the journal to one line per record, if any.
    pub async fn compact(&self) -> Result<()> {
        let Some(journal) = &self.journal else {
            return Ok(());
        };
        journal.compact(&self.snapshot()).await
    }

    async fn persist(&self, record: &ShortUrlRecord) -> Result<()> {
        let Some(journal) = &self.journal else {
            return Ok(());
        };
        journal.append(record).await.inspect_err(|e| {
            warn!(key = %record.short_key, error = %e, "failed to append record to journal");
        })
    }
}

impl ReplayTarget for MemoryRepository {
    fn replay(&self, record: ShortUrlRecord) {
        self.state.write().restore(record);
    }
}

#[async_trait]
impl ReadRepository for MemoryRepository {
    async fn get(&self, key: &ShortKey) -> Result<Lookup> {
        let state = self.state.read();
        let entry = state
            .records
            .get(key)
            .ok_or_else(|| StorageError::NotFound(key.to_string()))?;

        Ok(Lookup {
            original_url: entry.original_url.clone(),
            short_key: key.clone(),
            deleted: entry.deleted,
        })
    }

    async fn get_user_urls(&self, owner: &OwnerId) -> Result<Vec<UserUrl>> {
        let state = self.state.read();
        let mut owned: Vec<_> = state
            .records
            .iter()
            .filter(|(_, entry)| entry.owner == *owner)
            .collect();
        owned.sort_by_key(|(_, entry)| entry.seq);

        Ok(owned
            .into_iter()
            .map(|(key, entry)| UserUrl::from(entry.to_record(key)))
            .collect())
    }
}

#[async_trait]
impl Repository for MemoryRepository {
    async fn bootstrap(&self) -> Result<()> {
        let Some(journal) = &self.journal else {
            return Ok(());
        };

        let replayed = journal.load(self).await?;
        info!(
            path = %journal.path().display(),
            entries = replayed,
            records = self.len(),
            "replayed journal"
        );
        Ok(())
    }

    async fn set(&self, owner: &OwnerId, key: &ShortKey, url: &str) -> Result<ShortKey> {
        let record = self.state.write().insert(owner, key, url)?;
        if let Err(e) = self.persist(&record).await {
            self.state.write().forget(key);
            return Err(e);
        }
        debug!(key = %key, owner = %owner, "stored short url");
        Ok(record.short_key)
    }

    async fn delete(&self, owner: &OwnerId, key: &ShortKey) -> Result<()> {
        // Owner is immutable and tombstones are monotonic, so the record
        // stays valid between the journal write and applying it.
        let tombstoned = self.state.read().tombstone_for(owner, key);
        let Some(record) = tombstoned else {
            debug!(key = %key, owner = %owner, "delete had no effect");
            return Ok(());
        };

        self.persist(&record).await?;
        self.state.write().tombstone(owner, key);
        debug!(key = %key, owner = %owner, "tombstoned short url");
        Ok(())
    }
}
