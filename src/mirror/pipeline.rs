//! The mirror loop: enumerate, filter, transfer, count, publish.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use super::control::{Inner, MirrorRequest};
use super::progress::ProgressKind;
use super::resume::ResumeFilter;
use super::state::{RunSnapshot, RunStatus};
use super::transfer::{self, TransferRecord, TransferStage};
use crate::destination::{local, DestinationStore};
use crate::format::format_size;
use crate::retry;
use crate::source::{Batch, ItemId, MediaItem, SourceError};

/// Body of the spawned run task. Always ends in a terminal status.
pub(super) async fn run(
    inner: Arc<Inner>,
    request: MirrorRequest,
    store: Arc<dyn DestinationStore>,
) -> RunSnapshot {
    preflight(&request, store.as_ref()).await;

    let resume = ResumeFilter::new(store.clone(), request.retry);
    let stage = TransferStage::new(
        inner.source.clone(),
        store,
        request.staging_dir.clone(),
        request.retry,
    );

    let (status, error) = drive(&inner, &request, &resume, &stage).await;

    let snapshot = inner.update_and_publish(ProgressKind::Finished(status), |state| {
        state.finish(status, error)
    });
    tracing::info!(
        status = %snapshot.status,
        downloaded = snapshot.downloaded,
        skipped = snapshot.skipped,
        failed = snapshot.failed,
        "Mirror run finished"
    );
    snapshot
}

async fn drive(
    inner: &Inner,
    request: &MirrorRequest,
    resume: &ResumeFilter,
    stage: &TransferStage,
) -> (RunStatus, Option<String>) {
    let mut after: Option<ItemId> = None;

    loop {
        if inner.lock().cancel_requested() {
            return (RunStatus::Stopped, None);
        }

        let batch = match fetch_batch(inner, request, after).await {
            Ok(batch) => batch,
            Err(e) => {
                tracing::error!(channel = %request.channel, "Listing failed: {}", e);
                return (
                    RunStatus::Failed,
                    Some(format!("Listing {} failed: {}", request.channel, e)),
                );
            }
        };
        if batch.items.is_empty() {
            return (RunStatus::Completed, None);
        }

        for item in &batch.items {
            after = Some(item.id);
            inner.update_and_publish(ProgressKind::ItemStarted, |state| {
                state.set_current(Some(item.clone()))
            });

            let record = process_item(inner, resume, stage, item).await;
            let outcome = record.outcome;
            let snapshot = inner.update_and_publish(ProgressKind::ItemFinished(outcome), |state| {
                state.record(record)
            });
            debug_assert!(snapshot.is_balanced());

            if snapshot.cancel_requested {
                tracing::info!(
                    items_seen = snapshot.items_seen,
                    "Stop honoured after {}",
                    item.filename
                );
                return (RunStatus::Stopped, None);
            }
        }

        if !batch.has_more {
            return (RunStatus::Completed, None);
        }
    }
}

async fn fetch_batch(
    inner: &Inner,
    request: &MirrorRequest,
    after: Option<ItemId>,
) -> Result<Batch, SourceError> {
    let source = &inner.source;
    let channel = request.channel.as_str();
    let direction = request.direction;
    let limit = request.page_size;
    let guarded = retry::retry_with_backoff(&request.retry, SourceError::retry_action, move || {
        source.next_batch(channel, after, direction, limit)
    })
    .await?;
    Ok(guarded.value)
}

async fn process_item(
    inner: &Inner,
    resume: &ResumeFilter,
    stage: &TransferStage,
    item: &MediaItem,
) -> TransferRecord {
    match resume.should_skip(item).await {
        Ok(true) => {
            tracing::info!(item_id = item.id, filename = %item.filename, "Already mirrored, skipping");
            TransferRecord::skipped(item)
        }
        Ok(false) => {
            let total = item.size;
            let on_bytes = |done: u64| {
                inner.update_and_publish(ProgressKind::ItemProgress { done, total }, |state| {
                    state.set_current_bytes(done)
                });
            };
            let record = stage.transfer(item, &on_bytes).await;
            if record.outcome.is_success() {
                tracing::info!(
                    item_id = item.id,
                    size_bytes = record.bytes_transferred,
                    "Mirrored {} ({})",
                    item.filename,
                    format_size(record.bytes_transferred)
                );
            } else {
                tracing::error!(
                    item_id = item.id,
                    filename = %item.filename,
                    "Transfer failed: {}",
                    record.error.as_deref().unwrap_or("unknown error")
                );
            }
            record
        }
        Err(e) => {
            tracing::error!(item_id = item.id, filename = %item.filename, "Existence check failed: {}", e);
            TransferRecord::failed(item, Duration::ZERO, format!("existence check failed: {}", e))
        }
    }
}

/// Advisory checks before the first item. Nothing here fails the run.
async fn preflight(request: &MirrorRequest, store: &dyn DestinationStore) {
    match transfer::clear_stale_staging(&request.staging_dir).await {
        Ok(0) => {}
        Ok(n) => tracing::info!("Removed {} stale staging file(s) from {}", n, request.staging_dir.display()),
        Err(e) => tracing::warn!("Could not scan staging directory {}: {}", request.staging_dir.display(), e),
    }

    match store.list_names().await {
        Ok(names) => tracing::info!(
            existing = names.len(),
            "Destination {} holds {} file(s)",
            store.describe(),
            names.len()
        ),
        Err(e) => tracing::warn!("Could not list destination {}: {}", store.describe(), e),
    }

    if request.min_free_space == 0 {
        return;
    }
    match store.free_space().await {
        Ok(Some(free)) => warn_if_low("Destination", &store.describe(), free, request.min_free_space),
        Ok(None) => {}
        Err(e) => tracing::debug!("Destination free space unknown: {}", e),
    }
    let staging_free = staging_free_space(&request.staging_dir).await;
    if let Some(free) = staging_free {
        warn_if_low(
            "Staging",
            &request.staging_dir.display().to_string(),
            free,
            request.min_free_space,
        );
    }
}

async fn staging_free_space(dir: &Path) -> Option<u64> {
    let dir = dir.to_path_buf();
    tokio::task::spawn_blocking(move || local::available_space(&dir))
        .await
        .ok()
        .flatten()
}

fn warn_if_low(what: &str, location: &str, free: u64, floor: u64) {
    if free < floor {
        tracing::warn!(
            free_bytes = free,
            "{} {} has only {} free (below {})",
            what,
            location,
            format_size(free),
            format_size(floor)
        );
    } else {
        tracing::debug!(free_bytes = free, "{} {} has {} free", what, location, format_size(free));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mirror::progress::{ProgressEvent, ProgressSink};
    use crate::mirror::{MirrorController, TransferOutcome};
    use crate::mirror::testing::{item, FakeSource, MemoryProvider, MemoryStore};
    use crate::retry::RetryConfig;
    use crate::types::Direction;
    use std::path::PathBuf;
    use std::sync::Mutex;
    use tempfile::TempDir;

    fn request(staging: &TempDir, page_size: usize) -> MirrorRequest {
        MirrorRequest {
            channel: "somechan".into(),
            target_folder: "Telegram_Mirror".into(),
            direction: Direction::OldestFirst,
            staging_dir: staging.path().to_path_buf(),
            page_size,
            retry: RetryConfig {
                max_retries: 2,
                base_delay_secs: 0,
                max_delay_secs: 0,
            },
            min_free_space: 0,
        }
    }

    /// Checks staging emptiness and counter balance at every item boundary.
    struct BoundaryWatch {
        staging: PathBuf,
        violations: Mutex<Vec<String>>,
        finished: Mutex<Vec<TransferOutcome>>,
        bytes: Mutex<Vec<(u64, u64, u64)>>,
    }

    impl BoundaryWatch {
        fn new(staging: &TempDir) -> Arc<Self> {
            Arc::new(Self {
                staging: staging.path().to_path_buf(),
                violations: Mutex::new(Vec::new()),
                finished: Mutex::new(Vec::new()),
                bytes: Mutex::new(Vec::new()),
            })
        }
    }

    impl ProgressSink for BoundaryWatch {
        fn on_event(&self, event: &ProgressEvent) {
            if let ProgressKind::ItemProgress { done, total } = event.kind {
                self.bytes.lock().unwrap().push((done, total, event.snapshot.current_bytes));
            }
            let ProgressKind::ItemFinished(outcome) = event.kind else {
                return;
            };
            let snap = &event.snapshot;
            let leftovers = std::fs::read_dir(&self.staging).unwrap().count();
            if leftovers != 0 {
                self.violations
                    .lock()
                    .unwrap()
                    .push(format!("{leftovers} staging file(s) after item {}", snap.items_seen));
            }
            if !snap.is_balanced() {
                self.violations
                    .lock()
                    .unwrap()
                    .push(format!("unbalanced counters after item {}", snap.items_seen));
            }
            self.finished.lock().unwrap().push(outcome);
        }
    }

    fn abc_source() -> FakeSource {
        FakeSource::new()
            .with_item(item(1, "A.mp4", 100))
            .with_item(item(2, "B.mp4", 200))
            .with_item(item(3, "C.bin", 50))
    }

    fn abc_store() -> Arc<MemoryStore> {
        Arc::new(
            MemoryStore::new()
                .with_object("B.mp4", 200)
                .truncating("C.bin", 40),
        )
    }

    #[tokio::test]
    async fn test_mixed_outcomes_scenario() {
        let staging = TempDir::new().unwrap();
        let store = abc_store();
        let source = Arc::new(abc_source());
        let watch = BoundaryWatch::new(&staging);
        let ctl = MirrorController::new(
            source.clone(),
            Arc::new(MemoryProvider(store.clone())),
            vec![watch.clone() as Arc<dyn ProgressSink>],
        );

        let done = ctl.start(request(&staging, 2)).unwrap().wait().await.unwrap();

        assert_eq!(done.status, RunStatus::Completed);
        assert_eq!(
            (done.downloaded, done.skipped, done.failed, done.items_seen),
            (1, 1, 1, 3)
        );
        assert_eq!(done.total_bytes, 100);
        assert!(done.last_error.unwrap().contains("C.bin"));

        let outcomes: Vec<_> = ctl.records().iter().map(|r| r.outcome).collect();
        assert_eq!(
            outcomes,
            [
                TransferOutcome::Downloaded,
                TransferOutcome::SkippedExists,
                TransferOutcome::Failed
            ]
        );
        // B was never downloaded and C was purged.
        assert_eq!(source.downloads(), [1, 3]);
        assert_eq!(store.names(), ["A.mp4", "B.mp4"]);
        assert!(watch.violations.lock().unwrap().is_empty());
        assert_eq!(watch.finished.lock().unwrap().len(), 3);
        // Completed bodies of A and C were reported; B was skipped before staging.
        let completed: Vec<_> = watch
            .bytes
            .lock()
            .unwrap()
            .iter()
            .filter(|(done, total, _)| done == total)
            .copied()
            .collect();
        assert_eq!(completed, [(100, 100, 100), (50, 50, 50)]);
    }

    #[tokio::test]
    async fn test_rerun_reattempts_purged_item() {
        let staging = TempDir::new().unwrap();
        let store = abc_store();
        let source = Arc::new(abc_source());
        let ctl = MirrorController::new(
            source.clone(),
            Arc::new(MemoryProvider(store.clone())),
            Vec::new(),
        );

        ctl.start(request(&staging, 10)).unwrap().wait().await.unwrap();
        let second = ctl.start(request(&staging, 10)).unwrap().wait().await.unwrap();

        assert_eq!((second.downloaded, second.skipped, second.failed), (0, 2, 1));
        assert_eq!(source.downloads(), [1, 3, 3]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limited_item_waits_exactly_and_succeeds() {
        let staging = TempDir::new().unwrap();
        let store = Arc::new(MemoryStore::new());
        let source = FakeSource::new()
            .with_item(item(4, "D.mov", 64))
            .fail_download(4, SourceError::RateLimited(3))
            .fail_download(4, SourceError::RateLimited(3));
        let ctl = MirrorController::new(
            Arc::new(source),
            Arc::new(MemoryProvider(store.clone())),
            Vec::new(),
        );

        let started = tokio::time::Instant::now();
        let done = ctl.start(request(&staging, 10)).unwrap().wait().await.unwrap();

        assert_eq!(started.elapsed(), Duration::from_secs(6));
        assert_eq!(done.status, RunStatus::Completed);
        assert_eq!((done.downloaded, done.failed), (1, 0));
        assert!(done.last_error.is_none());
        assert_eq!(store.size_of("D.mov"), Some(64));
        assert!(ctl.records()[0].outcome.is_success());
    }

    #[tokio::test]
    async fn test_listing_failure_fails_run_and_keeps_progress() {
        let staging = TempDir::new().unwrap();
        let store = Arc::new(MemoryStore::new());
        let source = abc_source().fail_listing(1, SourceError::Unavailable("CHANNEL_PRIVATE".into()));
        let ctl = MirrorController::new(
            Arc::new(source),
            Arc::new(MemoryProvider(store.clone())),
            Vec::new(),
        );

        let done = ctl.start(request(&staging, 1)).unwrap().wait().await.unwrap();

        assert_eq!(done.status, RunStatus::Failed);
        assert_eq!(done.items_seen, 1);
        assert_eq!(done.downloaded, 1);
        assert!(done.last_error.unwrap().contains("CHANNEL_PRIVATE"));
        assert_eq!(store.names(), ["A.mp4"]);
    }

    #[tokio::test]
    async fn test_per_item_failures_do_not_stop_run() {
        let staging = TempDir::new().unwrap();
        let store = Arc::new(
            MemoryStore::new()
                .fail_exists("A.mp4", crate::destination::StoreError::Unavailable("stale handle".into())),
        );
        let source = abc_source().fail_download(2, SourceError::Unavailable("file reference expired".into()));
        let ctl = MirrorController::new(
            Arc::new(source),
            Arc::new(MemoryProvider(store.clone())),
            Vec::new(),
        );

        let done = ctl.start(request(&staging, 10)).unwrap().wait().await.unwrap();

        assert_eq!(done.status, RunStatus::Completed);
        assert_eq!((done.downloaded, done.failed), (1, 2));
        assert!(done.is_balanced());
        assert_eq!(store.names(), ["C.bin"]);
    }

    #[tokio::test]
    async fn test_newest_first_order() {
        let staging = TempDir::new().unwrap();
        let source = Arc::new(abc_source());
        let ctl = MirrorController::new(
            source.clone(),
            Arc::new(MemoryProvider(Arc::new(MemoryStore::new()))),
            Vec::new(),
        );
        let mut req = request(&staging, 2);
        req.direction = Direction::NewestFirst;

        ctl.start(req).unwrap().wait().await.unwrap();

        assert_eq!(source.downloads(), [3, 2, 1]);
    }

    #[tokio::test]
    async fn test_preflight_removes_stale_staging() {
        let staging = TempDir::new().unwrap();
        std::fs::write(staging.path().join("77.part"), b"half a file").unwrap();
        let ctl = MirrorController::new(
            Arc::new(FakeSource::new()),
            Arc::new(MemoryProvider(Arc::new(MemoryStore::new()))),
            Vec::new(),
        );

        let done = ctl.start(request(&staging, 10)).unwrap().wait().await.unwrap();

        assert_eq!(done.status, RunStatus::Completed);
        assert_eq!(done.items_seen, 0);
        assert!(!staging.path().join("77.part").exists());
    }
}
