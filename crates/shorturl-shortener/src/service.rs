use crate::error::{Result, ShortenerError};
use crate::pipeline::{BatchDeleteHandle, BatchDeleter, PipelineSettings};
use shorturl_core::{OwnerId, Repository, ShortKey, StatsRepository, StorageError};
use shorturl_generator::Generator;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use typed_builder::TypedBuilder;

#[derive(Debug, Clone, TypedBuilder)]
pub struct ShortenerSettings {
    /// Prefix of every short URL handed back to callers.
    #[builder(setter(into))]
    pub base_url: String,
    /// How many generated keys `shorten` tries before giving up.
    #[builder(default = 5)]
    pub max_key_attempts: u32,
    #[builder(default = 1)]
    pub delete_workers: usize,
}

/// A short key together with its full URL under the configured base.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShortUrl {
    pub key: ShortKey,
    pub url: String,
}

impl ShortUrl {
    pub fn new(key: ShortKey, base_url: &str) -> Self {
        let url = key.to_url(base_url);
        Self { key, url }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserShortUrl {
    pub short_url: ShortUrl,
    pub original_url: String,
    pub deleted: bool,
}

/// One entry of a batch shorten request. The correlation id doubles as the
/// short key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchItem {
    pub correlation_id: String,
    pub original_url: String,
}

impl BatchItem {
    pub fn new(correlation_id: impl Into<String>, original_url: impl Into<String>) -> Self {
        Self {
            correlation_id: correlation_id.into(),
            original_url: original_url.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchOutcome {
    Created,
    /// The URL already had an active record; `short_url` points at it.
    Conflict,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchResult {
    pub correlation_id: String,
    pub short_url: ShortUrl,
    pub outcome: BatchOutcome,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stats {
    pub urls: u64,
    pub users: u64,
}

/// Shortens, resolves, lists and deletes URLs on top of a [`Repository`].
///
/// The generator is not expected to produce unique keys. A key collision
/// reported by the repository is retried with a fresh key, up to
/// `max_key_attempts` times.
#[derive(Debug)]
pub struct ShortenerService<R, G> {
    repository: Arc<R>,
    generator: Arc<G>,
    settings: ShortenerSettings,
    deleter: BatchDeleter<R>,
}

impl<R, G> Clone for ShortenerService<R, G> {
    fn clone(&self) -> Self {
        Self {
            repository: Arc::clone(&self.repository),
            generator: Arc::clone(&self.generator),
            settings: self.settings.clone(),
            deleter: self.deleter.clone(),
        }
    }
}

impl<R: Repository, G: Generator> ShortenerService<R, G> {
    pub fn new(repository: R, generator: G, settings: ShortenerSettings) -> Self {
        Self::with_shared(Arc::new(repository), generator, settings)
    }

    /// Builds a service over a repository that other components also hold.
    pub fn with_shared(repository: Arc<R>, generator: G, settings: ShortenerSettings) -> Self {
        let deleter = BatchDeleter::new(
            Arc::clone(&repository),
            PipelineSettings::builder()
                .workers(settings.delete_workers)
                .build(),
        );
        Self {
            repository,
            generator: Arc::new(generator),
            settings,
            deleter,
        }
    }

    pub fn repository(&self) -> &Arc<R> {
        &self.repository
    }

    pub fn settings(&self) -> &ShortenerSettings {
        &self.settings
    }

    fn short_url(&self, key: ShortKey) -> ShortUrl {
        ShortUrl::new(key, &self.settings.base_url)
    }

    /// Validates that the URL has a valid format (has a scheme and host).
    fn validate_url(url: &str) -> Result<()> {
        if url.is_empty() {
            return Err(ShortenerError::InvalidUrl(
                "URL cannot be empty".to_string(),
            ));
        }

        let Some((scheme, rest)) = url.split_once("://") else {
            return Err(ShortenerError::InvalidUrl(format!(
                "URL must have a valid scheme and host: {}",
                url
            )));
        };

        let scheme = scheme.to_lowercase();
        if scheme != "http" && scheme != "https" {
            return Err(ShortenerError::InvalidUrl(format!(
                "URL scheme must be http or https: {}",
                scheme
            )));
        }

        let host = rest.split(['/', '?', '#']).next().unwrap_or_default();
        if host.is_empty() {
            return Err(ShortenerError::InvalidUrl(format!(
                "URL must have a valid scheme and host: {}",
                url
            )));
        }

        Ok(())
    }

    fn store_error(&self, error: StorageError) -> ShortenerError {
        match error {
            StorageError::Conflict(existing) => {
                ShortenerError::UrlConflict(self.short_url(existing))
            }
            StorageError::KeyTaken(key) => ShortenerError::KeyTaken(key),
            other => ShortenerError::Storage(other),
        }
    }

    /// Shortens `url` under a freshly generated key.
    ///
    /// Returns [`ShortenerError::UrlConflict`] with the existing short URL
    /// when `url` is already shortened.
    pub async fn shorten(&self, owner: &OwnerId, url: &str) -> Result<ShortUrl> {
        Self::validate_url(url)?;

        for attempt in 1..=self.settings.max_key_attempts {
            let key: ShortKey = self.generator.generate().into();
            match self.repository.set(owner, &key, url).await {
                Ok(stored) => {
                    debug!(key = %stored, owner = %owner, "shortened url");
                    return Ok(self.short_url(stored));
                }
                Err(StorageError::KeyTaken(_)) => {
                    debug!(key = %key, attempt, "generated key already taken, retrying");
                }
                Err(e) => return Err(self.store_error(e)),
            }
        }

        warn!(
            attempts = self.settings.max_key_attempts,
            "ran out of attempts to find a free short key"
        );
        Err(ShortenerError::KeyExhausted(self.settings.max_key_attempts))
    }

    /// Shortens `url` under a caller-chosen key. No retry on collision.
    pub async fn shorten_with_key(
        &self,
        owner: &OwnerId,
        key: &ShortKey,
        url: &str,
    ) -> Result<ShortUrl> {
        Self::validate_url(url)?;

        let stored = self
            .repository
            .set(owner, key, url)
            .await
            .map_err(|e| self.store_error(e))?;
        Ok(self.short_url(stored))
    }

    /// Shortens every item under its correlation id.
    ///
    /// Items with an empty correlation id or URL are skipped. A URL that is
    /// already shortened yields [`BatchOutcome::Conflict`] with the existing
    /// short URL; any other failure aborts the batch. Items stored before the
    /// failure stay stored.
    pub async fn shorten_batch(
        &self,
        owner: &OwnerId,
        items: Vec<BatchItem>,
    ) -> Result<Vec<BatchResult>> {
        let mut results = Vec::with_capacity(items.len());

        for item in items {
            if item.correlation_id.is_empty() || item.original_url.is_empty() {
                debug!(correlation_id = %item.correlation_id, "skipping incomplete batch item");
                continue;
            }

            let key = ShortKey::new(item.correlation_id.as_str())?;
            let (short_url, outcome) =
                match self.shorten_with_key(owner, &key, &item.original_url).await {
                    Ok(short_url) => (short_url, BatchOutcome::Created),
                    Err(ShortenerError::UrlConflict(existing)) => {
                        (existing, BatchOutcome::Conflict)
                    }
                    Err(e) => return Err(e),
                };

            results.push(BatchResult {
                correlation_id: item.correlation_id,
                short_url,
                outcome,
            });
        }

        Ok(results)
    }

    /// Returns the original URL behind `key`.
    ///
    /// Tombstoned keys are [`ShortenerError::Gone`], keys that never existed
    /// are [`ShortenerError::NotFound`].
    pub async fn resolve(&self, key: &ShortKey) -> Result<String> {
        match self.repository.get(key).await {
            Ok(lookup) if lookup.deleted => Err(ShortenerError::Gone(key.to_string())),
            Ok(lookup) => Ok(lookup.original_url),
            Err(StorageError::NotFound(key)) => Err(ShortenerError::NotFound(key)),
            Err(e) => Err(ShortenerError::Storage(e)),
        }
    }

    pub async fn user_urls(&self, owner: &OwnerId) -> Result<Vec<UserShortUrl>> {
        let urls = self
            .repository
            .get_user_urls(owner)
            .await
            .map_err(ShortenerError::Storage)?;

        Ok(urls
            .into_iter()
            .map(|url| UserShortUrl {
                short_url: self.short_url(url.short_key),
                original_url: url.original_url,
                deleted: url.deleted,
            })
            .collect())
    }

    /// Starts tombstoning `inputs` (bare keys or full short URLs) for
    /// `owner` and returns immediately.
    ///
    /// Inputs that do not parse as keys are left out of the run and listed
    /// by [`BatchDeleteHandle::rejected`]; the rest are still deleted.
    pub fn delete_urls<S: AsRef<str>>(
        &self,
        owner: &OwnerId,
        inputs: &[S],
        cancel: &CancellationToken,
    ) -> BatchDeleteHandle {
        let mut keys = Vec::with_capacity(inputs.len());
        let mut rejected = Vec::new();
        for input in inputs {
            let input = input.as_ref();
            match ShortKey::from_url_or_key(input) {
                Ok(key) => keys.push(key),
                Err(e) => {
                    warn!(owner = %owner, input, error = %e, "skipping malformed delete entry");
                    rejected.push(input.to_owned());
                }
            }
        }

        info!(
            owner = %owner,
            keys = keys.len(),
            rejected = rejected.len(),
            "accepted batch delete"
        );
        self.deleter
            .spawn(owner.clone(), keys, cancel)
            .with_rejected(rejected)
    }

    pub async fn ping(&self) -> Result<()> {
        self.repository.ping().await.map_err(ShortenerError::Storage)
    }
}

impl<R: Repository + StatsRepository, G: Generator> ShortenerService<R, G> {
    pub async fn stats(&self) -> Result<Stats> {
        let urls = self
            .repository
            .count_urls()
            .await
            .map_err(ShortenerError::Storage)?;
        let users = self
            .repository
            .count_users()
            .await
            .map_err(ShortenerError::Storage)?;
        Ok(Stats { urls, users })
    }
}
