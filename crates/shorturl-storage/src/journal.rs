use serde::{Deserialize, Serialize};
use shorturl_core::{OwnerId, Result, ShortKey, ShortUrlRecord, StorageError};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::Mutex;
use tracing::{debug, trace};

/// One line of the journal file.
///
/// `uuid` is a per-write sequence number starting at 1; it is not a record
/// identifier and is ignored on replay. `user_id` and `is_deleted` are
/// omitted when empty/false, so lines for anonymous active records keep the
/// plain three-field shape and older journals without them still load.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalEntry {
    pub uuid: String,
    pub short_url: String,
    pub original_url: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub user_id: String,
    #[serde(default, skip_serializing_if = "is_false")]
    pub is_deleted: bool,
}

fn is_false(value: &bool) -> bool {
    !*value
}

impl JournalEntry {
    fn from_record(seq: usize, record: &ShortUrlRecord) -> Self {
        Self {
            uuid: seq.to_string(),
            short_url: record.short_key.to_string(),
            original_url: record.original_url.clone(),
            user_id: record.owner.as_str().to_owned(),
            is_deleted: record.deleted,
        }
    }

    /// Stored keys are trusted as written: older journals hold keys that
    /// predate [`ShortKey`] validation.
    fn into_record(self) -> ShortUrlRecord {
        ShortUrlRecord {
            short_key: ShortKey::new_unchecked(self.short_url),
            original_url: self.original_url,
            owner: OwnerId::new(self.user_id),
            deleted: self.is_deleted,
        }
    }
}

/// Receives records replayed from a journal, oldest first.
///
/// Replay must behave as an upsert: the same key appears once per write
/// that touched it and the last occurrence carries the current state.
pub trait ReplayTarget: Send + Sync {
    fn replay(&self, record: ShortUrlRecord);
}

/// Append-only, newline-delimited JSON log of records.
///
/// Writes are serialized through an internal lock, so one `Journal` may be
/// shared by concurrent writers. Two writers using different `Journal`
/// values on the same path are not coordinated.
#[derive(Debug)]
pub struct Journal {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl Journal {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends every record of `snapshot`, numbering lines from 1.
    ///
    /// The file is never truncated here, so repeated saves of a growing map
    /// make the journal grow quadratically. Use [`Journal::compact`] to
    /// bound it.
    pub async fn save(&self, snapshot: &[ShortUrlRecord]) -> Result<()> {
        let bytes = encode(snapshot)?;
        let _guard = self.write_lock.lock().await;
        self.append_bytes(&bytes).await?;
        debug!(path = %self.path.display(), records = snapshot.len(), "saved snapshot to journal");
        Ok(())
    }

    /// Appends a single record.
    pub async fn append(&self, record: &ShortUrlRecord) -> Result<()> {
        let bytes = encode(std::slice::from_ref(record))?;
        let _guard = self.write_lock.lock().await;
        self.append_bytes(&bytes).await?;
        trace!(path = %self.path.display(), key = %record.short_key, "appended record to journal");
        Ok(())
    }

    /// Replaces the journal with exactly one line per record of `snapshot`.
    ///
    /// The new content is written to a sibling file and renamed over the
    /// journal, so a crash leaves either the old or the new file.
    pub async fn compact(&self, snapshot: &[ShortUrlRecord]) -> Result<()> {
        let bytes = encode(snapshot)?;
        let tmp = self.tmp_path();

        let _guard = self.write_lock.lock().await;
        self.ensure_parent().await?;
        fs::write(&tmp, &bytes)
            .await
            .map_err(|e| journal_error(&tmp, e))?;
        fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| journal_error(&self.path, e))?;

        debug!(path = %self.path.display(), records = snapshot.len(), "compacted journal");
        Ok(())
    }

    /// Replays the journal into `target` in file order and returns the
    /// number of entries read. A missing file replays nothing.
    pub async fn load<T: ReplayTarget + ?Sized>(&self, target: &T) -> Result<usize> {
        let file = match File::open(&self.path).await {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "journal does not exist yet, nothing to replay");
                return Ok(0);
            }
            Err(e) => return Err(journal_error(&self.path, e)),
        };

        let mut lines = BufReader::new(file).lines();
        let mut line_no = 0usize;
        let mut replayed = 0usize;

        while let Some(line) = lines
            .next_line()
            .await
            .map_err(|e| journal_error(&self.path, e))?
        {
            line_no += 1;
            if line.trim().is_empty() {
                continue;
            }

            let record = serde_json::from_str::<JournalEntry>(&line)
                .map(JournalEntry::into_record)
                .map_err(|e| {
                    StorageError::Journal(format!(
                        "{}:{}: malformed entry: {}",
                        self.path.display(),
                        line_no,
                        e
                    ))
                })?;

            target.replay(record);
            replayed += 1;
        }

        Ok(replayed)
    }

    async fn append_bytes(&self, bytes: &[u8]) -> Result<()> {
        self.ensure_parent().await?;

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| journal_error(&self.path, e))?;

        file.write_all(bytes)
            .await
            .map_err(|e| journal_error(&self.path, e))?;
        file.flush()
            .await
            .map_err(|e| journal_error(&self.path, e))
    }

    async fn ensure_parent(&self) -> Result<()> {
        match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => fs::create_dir_all(parent)
                .await
                .map_err(|e| journal_error(parent, e)),
            _ => Ok(()),
        }
    }

    fn tmp_path(&self) -> PathBuf {
        let mut name = self.path.clone().into_os_string();
        name.push(".tmp");
        PathBuf::from(name)
    }
}

fn encode(records: &[ShortUrlRecord]) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    for (i, record) in records.iter().enumerate() {
        let entry = JournalEntry::from_record(i + 1, record);
        serde_json::to_writer(&mut out, &entry)
            .map_err(|e| StorageError::Journal(format!("failed to encode entry: {e}")))?;
        out.push(b'\n');
    }
    Ok(out)
}

fn journal_error(path: &Path, err: std::io::Error) -> StorageError {
    StorageError::Journal(format!("{}: {err}", path.display()))
}
