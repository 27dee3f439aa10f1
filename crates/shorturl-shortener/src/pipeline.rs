use shorturl_core::{OwnerId, Repository, ShortKey, StorageError};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};
use typed_builder::TypedBuilder;

/// Tuning for [`BatchDeleter`].
#[derive(Debug, Clone, Copy, TypedBuilder)]
pub struct PipelineSettings {
    /// Number of delete tasks consuming the key stream. Values below 1 are
    /// treated as 1.
    #[builder(default = 1)]
    pub workers: usize,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// Result of one delete attempt.
#[derive(Debug, Clone)]
pub struct DeleteOutcome {
    pub key: ShortKey,
    pub result: Result<(), StorageError>,
}

/// Summary of a drained pipeline run.
///
/// `succeeded` counts every key whose delete call returned `Ok`, which
/// includes keys the caller does not own: those are silent no-ops.
#[derive(Debug, Default)]
pub struct BatchDeleteReport {
    pub submitted: usize,
    pub succeeded: usize,
    pub failed: Vec<(ShortKey, StorageError)>,
    /// Inputs that never entered the pipeline because they are not keys.
    pub rejected: Vec<String>,
}

impl BatchDeleteReport {
    /// Keys that never got an outcome because the run was cancelled.
    pub fn skipped(&self) -> usize {
        self.submitted - self.succeeded - self.failed.len()
    }

    fn record(&mut self, outcome: DeleteOutcome) {
        match outcome.result {
            Ok(()) => self.succeeded += 1,
            Err(error) => self.failed.push((outcome.key, error)),
        }
    }
}

/// Tombstones a list of keys on behalf of one owner without making the
/// caller wait for each delete.
///
/// A generator task feeds keys one at a time into a single-slot channel and
/// `workers` delete tasks pull from it, each emitting a [`DeleteOutcome`]
/// per key. Every task checks the shared cancellation token before it takes
/// or hands over a key; a delete already in flight is allowed to finish and
/// its outcome is still delivered. Outcomes arrive in completion order, not
/// input order.
#[derive(Debug)]
pub struct BatchDeleter<R> {
    repository: Arc<R>,
    settings: PipelineSettings,
}

impl<R> Clone for BatchDeleter<R> {
    fn clone(&self) -> Self {
        Self {
            repository: Arc::clone(&self.repository),
            settings: self.settings,
        }
    }
}

impl<R: Repository> BatchDeleter<R> {
    pub fn new(repository: Arc<R>, settings: PipelineSettings) -> Self {
        Self {
            repository,
            settings,
        }
    }

    /// Starts a run and returns a handle to its outcome stream.
    ///
    /// The run stops early when `cancel` (or the handle's own token, a child
    /// of it) is cancelled, or when the handle is dropped.
    pub fn spawn(
        &self,
        owner: OwnerId,
        keys: Vec<ShortKey>,
        cancel: &CancellationToken,
    ) -> BatchDeleteHandle {
        let cancel = cancel.child_token();
        let submitted = keys.len();
        let workers = self.settings.workers.max(1);

        let (key_tx, key_rx) = mpsc::channel(1);
        let (outcome_tx, outcome_rx) = mpsc::channel(1);

        debug!(owner = %owner, keys = submitted, workers, "starting batch delete");

        tokio::spawn(generate(keys, key_tx, cancel.clone()));

        let key_rx = Arc::new(Mutex::new(key_rx));
        for worker in 0..workers {
            tokio::spawn(delete_worker(
                worker,
                Arc::clone(&self.repository),
                owner.clone(),
                Arc::clone(&key_rx),
                outcome_tx.clone(),
                cancel.clone(),
            ));
        }

        BatchDeleteHandle {
            outcomes: outcome_rx,
            cancel,
            submitted,
            rejected: Vec::new(),
        }
    }
}

async fn generate(keys: Vec<ShortKey>, tx: mpsc::Sender<ShortKey>, cancel: CancellationToken) {
    for key in keys {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                trace!("batch delete generator cancelled");
                return;
            }
            sent = tx.send(key) => {
                if sent.is_err() {
                    return;
                }
            }
        }
    }
}

async fn next_key(keys: &Mutex<mpsc::Receiver<ShortKey>>) -> Option<ShortKey> {
    keys.lock().await.recv().await
}

async fn delete_worker<R: Repository>(
    worker: usize,
    repository: Arc<R>,
    owner: OwnerId,
    keys: Arc<Mutex<mpsc::Receiver<ShortKey>>>,
    outcomes: mpsc::Sender<DeleteOutcome>,
    cancel: CancellationToken,
) {
    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            next = next_key(&keys) => next,
        };
        let Some(key) = next else {
            break;
        };

        let result = repository.delete(&owner, &key).await;
        if let Err(e) = &result {
            warn!(worker, key = %key, error = %e, "failed to delete short url");
        }

        // A delete that ran is always reported; the handle drains until the
        // stream closes.
        if outcomes.send(DeleteOutcome { key, result }).await.is_err() {
            break;
        }
    }
    trace!(worker, "batch delete worker finished");
}

/// Handle to a running batch delete.
///
/// Dropping the handle cancels the run, as does [`BatchDeleteHandle::cancel`].
/// Use [`BatchDeleteHandle::detach`] to let it finish in the background.
#[derive(Debug)]
pub struct BatchDeleteHandle {
    outcomes: mpsc::Receiver<DeleteOutcome>,
    cancel: CancellationToken,
    submitted: usize,
    rejected: Vec<String>,
}

impl BatchDeleteHandle {
    pub(crate) fn with_rejected(mut self, rejected: Vec<String>) -> Self {
        self.rejected = rejected;
        self
    }

    /// Inputs left out of the run because they could not be parsed.
    pub fn rejected(&self) -> &[String] {
        &self.rejected
    }

    /// Number of keys handed to the pipeline.
    pub fn submitted(&self) -> usize {
        self.submitted
    }

    /// Stops the run. Deletes already in flight still complete.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Waits for the next outcome. `None` once every worker has stopped.
    pub async fn next(&mut self) -> Option<DeleteOutcome> {
        self.outcomes.recv().await
    }

    /// Collects outcomes until the stream closes.
    pub async fn drain(mut self) -> BatchDeleteReport {
        let mut report = BatchDeleteReport {
            submitted: self.submitted,
            rejected: std::mem::take(&mut self.rejected),
            ..Default::default()
        };
        while let Some(outcome) = self.next().await {
            report.record(outcome);
        }
        report
    }

    /// Lets the run finish in a background task that logs failures.
    pub fn detach(self) -> JoinHandle<BatchDeleteReport> {
        tokio::spawn(async move {
            let report = self.drain().await;
            if report.failed.is_empty() {
                debug!(
                    succeeded = report.succeeded,
                    skipped = report.skipped(),
                    "batch delete finished"
                );
            } else {
                warn!(
                    succeeded = report.succeeded,
                    failed = report.failed.len(),
                    rejected = report.rejected.len(),
                    skipped = report.skipped(),
                    "batch delete finished with failures"
                );
            }
            report
        })
    }
}

impl Drop for BatchDeleteHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use parking_lot::Mutex as SyncMutex;
    use shorturl_core::{Lookup, ReadRepository, UserUrl};
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::{Notify, Semaphore};

    /// Records every delete call. Keys starting with `bad` fail.
    #[derive(Default)]
    struct RecordingRepository {
        deleted: SyncMutex<Vec<(OwnerId, ShortKey)>>,
    }

    #[async_trait]
    impl ReadRepository for RecordingRepository {
        async fn get(&self, key: &ShortKey) -> shorturl_core::Result<Lookup> {
            Err(StorageError::NotFound(key.to_string()))
        }

        async fn get_user_urls(&self, _owner: &OwnerId) -> shorturl_core::Result<Vec<UserUrl>> {
            Ok(Vec::new())
        }
    }

    #[async_trait]
    impl Repository for RecordingRepository {
        async fn bootstrap(&self) -> shorturl_core::Result<()> {
            Ok(())
        }

        async fn set(
            &self,
            _owner: &OwnerId,
            key: &ShortKey,
            _url: &str,
        ) -> shorturl_core::Result<ShortKey> {
            Ok(key.clone())
        }

        async fn delete(&self, owner: &OwnerId, key: &ShortKey) -> shorturl_core::Result<()> {
            self.deleted.lock().push((owner.clone(), key.clone()));
            if key.as_str().starts_with("bad") {
                return Err(StorageError::Unavailable("backend down".into()));
            }
            Ok(())
        }
    }

    /// Blocks every delete until a permit is released.
    struct GatedRepository {
        calls: AtomicUsize,
        entered: Notify,
        gate: Semaphore,
    }

    impl GatedRepository {
        fn new() -> Self {
            Self {
                calls: AtomicUsize::new(0),
                entered: Notify::new(),
                gate: Semaphore::new(0),
            }
        }
    }

    #[async_trait]
    impl ReadRepository for GatedRepository {
        async fn get(&self, key: &ShortKey) -> shorturl_core::Result<Lookup> {
            Err(StorageError::NotFound(key.to_string()))
        }

        async fn get_user_urls(&self, _owner: &OwnerId) -> shorturl_core::Result<Vec<UserUrl>> {
            Ok(Vec::new())
        }
    }

    #[async_trait]
    impl Repository for GatedRepository {
        async fn bootstrap(&self) -> shorturl_core::Result<()> {
            Ok(())
        }

        async fn set(
            &self,
            _owner: &OwnerId,
            key: &ShortKey,
            _url: &str,
        ) -> shorturl_core::Result<ShortKey> {
            Ok(key.clone())
        }

        async fn delete(&self, _owner: &OwnerId, _key: &ShortKey) -> shorturl_core::Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.entered.notify_one();
            self.gate
                .acquire()
                .await
                .map_err(|e| StorageError::Operation(e.to_string()))?
                .forget();
            Ok(())
        }
    }

    fn keys(names: &[&str]) -> Vec<ShortKey> {
        names.iter().map(|n| ShortKey::new_unchecked(*n)).collect()
    }

    fn deleter<R: Repository>(repo: &Arc<R>, workers: usize) -> BatchDeleter<R> {
        BatchDeleter::new(
            Arc::clone(repo),
            PipelineSettings::builder().workers(workers).build(),
        )
    }

    #[tokio::test]
    async fn every_key_gets_exactly_one_delete() {
        let repo = Arc::new(RecordingRepository::default());
        let input = keys(&["k1", "k2", "k3", "k4", "k5"]);

        let report = deleter(&repo, 1)
            .spawn(OwnerId::new("user1"), input.clone(), &CancellationToken::new())
            .drain()
            .await;

        assert_eq!(report.submitted, 5);
        assert_eq!(report.succeeded, 5);
        assert!(report.failed.is_empty());
        assert_eq!(report.skipped(), 0);

        let calls = repo.deleted.lock();
        let called: Vec<_> = calls.iter().map(|(_, k)| k.clone()).collect();
        assert_eq!(called, input);
        assert!(calls.iter().all(|(o, _)| o.as_str() == "user1"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn fan_out_covers_every_key_once() {
        let repo = Arc::new(RecordingRepository::default());
        let input: Vec<ShortKey> = (0..100)
            .map(|i| ShortKey::new_unchecked(format!("key{i:03}")))
            .collect();

        let report = deleter(&repo, 4)
            .spawn(OwnerId::new("user1"), input.clone(), &CancellationToken::new())
            .drain()
            .await;

        assert_eq!(report.succeeded, 100);

        let calls = repo.deleted.lock();
        assert_eq!(calls.len(), 100);
        let unique: HashSet<_> = calls.iter().map(|(_, k)| k.clone()).collect();
        assert_eq!(unique, input.into_iter().collect::<HashSet<_>>());
    }

    #[tokio::test]
    async fn failures_are_reported_per_key_without_stopping() {
        let repo = Arc::new(RecordingRepository::default());

        let report = deleter(&repo, 2)
            .spawn(
                OwnerId::new("user1"),
                keys(&["k1", "bad1", "k2", "bad2", "k3"]),
                &CancellationToken::new(),
            )
            .drain()
            .await;

        assert_eq!(report.succeeded, 3);
        let mut failed: Vec<_> = report.failed.iter().map(|(k, _)| k.as_str()).collect();
        failed.sort();
        assert_eq!(failed, ["bad1", "bad2"]);
        assert!(report
            .failed
            .iter()
            .all(|(_, e)| matches!(e, StorageError::Unavailable(_))));
        assert_eq!(repo.deleted.lock().len(), 5);
    }

    #[tokio::test]
    async fn outcomes_can_be_streamed() {
        let repo = Arc::new(RecordingRepository::default());
        let mut handle = deleter(&repo, 1).spawn(
            OwnerId::new("user1"),
            keys(&["k1", "k2"]),
            &CancellationToken::new(),
        );

        let mut seen = Vec::new();
        while let Some(outcome) = handle.next().await {
            assert!(outcome.result.is_ok());
            seen.push(outcome.key);
        }
        assert_eq!(seen, keys(&["k1", "k2"]));
    }

    #[tokio::test]
    async fn empty_batch_closes_immediately() {
        let repo = Arc::new(RecordingRepository::default());

        let report = deleter(&repo, 3)
            .spawn(OwnerId::new("user1"), Vec::new(), &CancellationToken::new())
            .drain()
            .await;

        assert_eq!(report.submitted, 0);
        assert_eq!(report.succeeded, 0);
        assert!(repo.deleted.lock().is_empty());
    }

    #[tokio::test]
    async fn cancelled_before_start_issues_no_deletes() {
        let repo = Arc::new(RecordingRepository::default());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let report = deleter(&repo, 2)
            .spawn(OwnerId::new("user1"), keys(&["k1", "k2", "k3"]), &cancel)
            .drain()
            .await;

        assert_eq!(report.skipped(), 3);
        assert!(repo.deleted.lock().is_empty());
    }

    #[tokio::test]
    async fn cancel_lets_in_flight_delete_finish_and_starts_no_more() {
        let repo = Arc::new(GatedRepository::new());
        let handle = deleter(&repo, 1).spawn(
            OwnerId::new("user1"),
            keys(&["k1", "k2", "k3", "k4", "k5"]),
            &CancellationToken::new(),
        );

        repo.entered.notified().await;
        handle.cancel();
        repo.gate.add_permits(5);

        let report = handle.drain().await;
        assert_eq!(repo.calls.load(Ordering::SeqCst), 1);
        assert_eq!(report.succeeded, 1);
        assert!(report.failed.is_empty());
        assert_eq!(report.skipped(), 4);
    }

    #[tokio::test]
    async fn parent_token_cancels_the_run() {
        let repo = Arc::new(GatedRepository::new());
        let parent = CancellationToken::new();
        let handle = deleter(&repo, 1).spawn(OwnerId::new("user1"), keys(&["k1", "k2"]), &parent);

        repo.entered.notified().await;
        parent.cancel();
        repo.gate.add_permits(2);

        let report = handle.drain().await;
        assert_eq!(repo.calls.load(Ordering::SeqCst), 1);
        assert_eq!(report.succeeded, 1);
        assert_eq!(report.skipped(), 1);
    }

    #[tokio::test]
    async fn dropping_the_handle_does_not_cancel_the_parent() {
        let repo = Arc::new(RecordingRepository::default());
        let parent = CancellationToken::new();

        drop(deleter(&repo, 1).spawn(OwnerId::new("user1"), keys(&["k1"]), &parent));

        assert!(!parent.is_cancelled());
    }

    #[tokio::test]
    async fn detached_run_completes_in_background() {
        let repo = Arc::new(RecordingRepository::default());

        let report = deleter(&repo, 2)
            .spawn(
                OwnerId::new("user1"),
                keys(&["k1", "bad1", "k2"]),
                &CancellationToken::new(),
            )
            .detach()
            .await
            .unwrap();

        assert_eq!(report.succeeded, 2);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(repo.deleted.lock().len(), 3);
    }
}
