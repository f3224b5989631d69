use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use futures_util::future::join_all;
use metadata::{LibraryEnumerator, RawLoader};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::cache::CacheStore;
use crate::{load_into_cache, ItemOutcome};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CachingSummary {
    pub total: usize,
    pub already_cached: usize,
    pub cached: usize,
    pub failed: usize,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CachingStatus {
    Running,
    Paused,
    Completed(CachingSummary),
    Cancelled,
}

impl CachingStatus {
    pub fn is_active(&self) -> bool {
        matches!(self, CachingStatus::Running | CachingStatus::Paused)
    }
}

pub(crate) struct CachingContext<L, E> {
    pub cache: Arc<CacheStore>,
    pub loader: Arc<L>,
    pub enumerator: Arc<E>,
    pub cache_path: PathBuf,
    pub chunk_size: usize,
}

/// One pass over the community library that fills the cache.
///
/// The status channel doubles as the pause gate: the worker only starts a new
/// chunk while the status is not [`CachingStatus::Paused`].
pub struct BackgroundCachingJob {
    status: Arc<watch::Sender<CachingStatus>>,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl BackgroundCachingJob {
    pub(crate) fn start<L: RawLoader, E: LibraryEnumerator>(ctx: CachingContext<L, E>) -> Self {
        let (status, _) = watch::channel(CachingStatus::Running);
        let status = Arc::new(status);
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(run_caching(ctx, Arc::clone(&status), cancel.clone()));
        Self {
            status,
            cancel,
            handle,
        }
    }

    pub fn status(&self) -> CachingStatus {
        self.status.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<CachingStatus> {
        self.status.subscribe()
    }

    /// Closes the gate. The chunk in flight still runs to completion.
    pub fn pause(&self) -> bool {
        self.status.send_if_modified(|status| {
            if *status == CachingStatus::Running {
                *status = CachingStatus::Paused;
                true
            } else {
                false
            }
        })
    }

    pub fn resume(&self) -> bool {
        self.status.send_if_modified(|status| {
            if *status == CachingStatus::Paused {
                *status = CachingStatus::Running;
                true
            } else {
                false
            }
        })
    }

    /// Stops the pass at the next chunk boundary without persisting.
    /// Leaving `Paused` also opens the gate, so a paused worker wakes and exits.
    pub fn cancel(&self) {
        self.cancel.cancel();
        self.status.send_if_modified(|status| {
            if status.is_active() {
                *status = CachingStatus::Cancelled;
                true
            } else {
                false
            }
        });
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    pub async fn join(self) {
        if let Err(err) = self.handle.await {
            warn!("Background caching task join error: {}", err);
        }
    }
}

async fn run_caching<L: RawLoader, E: LibraryEnumerator>(
    ctx: CachingContext<L, E>,
    status: Arc<watch::Sender<CachingStatus>>,
    cancel: CancellationToken,
) {
    let started = Instant::now();
    ctx.cache.load_from_file(&ctx.cache_path).await;

    let mut seen = HashSet::new();
    let mut levels = ctx.enumerator.community_levels();
    levels.retain(|level| seen.insert(level.normalized_id().to_string()));

    let mut summary = CachingSummary {
        total: levels.len(),
        ..CachingSummary::default()
    };
    info!(
        "Background caching started: {} community levels, {} already cached",
        levels.len(),
        ctx.cache.len()
    );

    let mut gate = status.subscribe();
    for chunk in levels.chunks(ctx.chunk_size.max(1)) {
        if !pass_gate(&mut gate, &cancel).await {
            info!(
                "Background caching cancelled after {} new entries",
                summary.cached
            );
            return;
        }

        let mut handles = Vec::with_capacity(chunk.len());
        for level in chunk {
            if ctx.cache.contains(&level.level_id) {
                summary.already_cached += 1;
                continue;
            }
            let loader = Arc::clone(&ctx.loader);
            let cache = Arc::clone(&ctx.cache);
            let level = level.clone();
            let token = cancel.child_token();
            handles.push(tokio::spawn(async move {
                load_into_cache(loader.as_ref(), &cache, &level, &token).await
            }));
        }

        for outcome in join_all(handles).await {
            match outcome {
                Ok(ItemOutcome::Loaded(_)) => summary.cached += 1,
                Ok(ItemOutcome::Failed) => summary.failed += 1,
                Ok(ItemOutcome::Canceled) => {}
                Err(err) => {
                    warn!("Background load task join error: {}", err);
                    summary.failed += 1;
                }
            }
        }
    }

    if cancel.is_cancelled() {
        debug!("Background caching cancelled before persisting");
        return;
    }

    let cache = Arc::clone(&ctx.cache);
    let path = ctx.cache_path.clone();
    match tokio::task::spawn_blocking(move || cache.save_to_file(&path)).await {
        Ok(Ok(count)) => info!("Saved {} beatmap details to {:?}", count, ctx.cache_path),
        Ok(Err(err)) => error!("Failed to save details cache {:?}: {}", ctx.cache_path, err),
        Err(err) => error!("Details cache save join error: {}", err),
    }

    info!(
        "Background caching finished in {:?}: {} loaded, {} failed, {} already cached",
        started.elapsed(),
        summary.cached,
        summary.failed,
        summary.already_cached
    );
    status.send_if_modified(|current| {
        if current.is_active() {
            *current = CachingStatus::Completed(summary);
            true
        } else {
            false
        }
    });
}

/// Waits until the job is not paused. Returns `false` once cancelled.
async fn pass_gate(
    gate: &mut watch::Receiver<CachingStatus>,
    cancel: &CancellationToken,
) -> bool {
    let opened = tokio::select! {
        biased;
        _ = cancel.cancelled() => false,
        opened = async {
            gate.wait_for(|status| *status != CachingStatus::Paused)
                .await
                .is_ok()
        } => opened,
    };
    opened && !cancel.is_cancelled()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{custom_level, ScriptedLoader};
    use std::time::Duration;

    fn context(
        loader: Arc<ScriptedLoader>,
        library: Vec<common::BeatmapDescriptor>,
        cache: Arc<CacheStore>,
        cache_path: PathBuf,
        chunk_size: usize,
    ) -> CachingContext<ScriptedLoader, Vec<common::BeatmapDescriptor>> {
        CachingContext {
            cache,
            loader,
            enumerator: Arc::new(library),
            cache_path,
            chunk_size,
        }
    }

    async fn wait_done(job: &BackgroundCachingJob) -> CachingStatus {
        let mut rx = job.subscribe();
        let status = rx.wait_for(|status| !status.is_active()).await.unwrap().clone();
        status
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn failures_are_skipped_and_retried_next_pass() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("details.json");
        let library: Vec<_> = (0..50).map(custom_level).collect();
        let loader = Arc::new(ScriptedLoader::new());
        for index in [3, 17, 42] {
            loader.fail(&library[index].level_id);
        }
        let cache = Arc::new(CacheStore::new());

        let job = BackgroundCachingJob::start(context(
            Arc::clone(&loader),
            library.clone(),
            Arc::clone(&cache),
            path.clone(),
            5,
        ));
        let status = wait_done(&job).await;
        assert_eq!(
            status,
            CachingStatus::Completed(CachingSummary {
                total: 50,
                already_cached: 0,
                cached: 47,
                failed: 3,
            })
        );
        assert_eq!(cache.len(), 47);
        assert_eq!(loader.calls().len(), 50);
        assert!(path.exists());

        loader.clear_calls();
        let job = BackgroundCachingJob::start(context(
            Arc::clone(&loader),
            library.clone(),
            Arc::clone(&cache),
            path,
            5,
        ));
        wait_done(&job).await;
        let mut retried = loader.calls();
        retried.sort();
        let mut expected: Vec<String> = [3, 17, 42]
            .iter()
            .map(|index| library[*index].level_id.clone())
            .collect();
        expected.sort();
        assert_eq!(retried, expected);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn persisted_cache_is_merged_before_loading() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("details.json");
        let library: Vec<_> = (0..8).map(custom_level).collect();

        let seeded = CacheStore::new();
        let loader = ScriptedLoader::new();
        for level in &library[..5] {
            seeded.put(loader.record_for(level));
        }
        seeded.save_to_file(&path).unwrap();

        let loader = Arc::new(loader);
        let cache = Arc::new(CacheStore::new());
        let job = BackgroundCachingJob::start(context(
            Arc::clone(&loader),
            library,
            Arc::clone(&cache),
            path,
            3,
        ));
        let status = wait_done(&job).await;
        match status {
            CachingStatus::Completed(summary) => {
                assert_eq!(summary.already_cached, 5);
                assert_eq!(summary.cached, 3);
            }
            other => panic!("unexpected status {:?}", other),
        }
        assert_eq!(loader.calls().len(), 3);
        assert_eq!(cache.len(), 8);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn pause_holds_at_chunk_boundary_and_resume_finishes() {
        let dir = tempfile::tempdir().unwrap();
        let library: Vec<_> = (0..20).map(custom_level).collect();
        let loader = Arc::new(ScriptedLoader::with_latency(Duration::from_millis(40)));
        let cache = Arc::new(CacheStore::new());
        let job = BackgroundCachingJob::start(context(
            Arc::clone(&loader),
            library.clone(),
            Arc::clone(&cache),
            dir.path().join("details.json"),
            4,
        ));

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(job.pause());
        assert_eq!(job.status(), CachingStatus::Paused);
        tokio::time::sleep(Duration::from_millis(200)).await;
        let held = loader.calls().len();
        assert_eq!(held % 4, 0);
        assert!(held < 20);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(loader.calls().len(), held);

        assert!(job.resume());
        wait_done(&job).await;
        assert_eq!(cache.len(), 20);
        let mut calls = loader.calls();
        calls.sort();
        calls.dedup();
        assert_eq!(calls.len(), 20);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn cancel_wakes_a_paused_job_without_persisting() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("details.json");
        let library: Vec<_> = (0..12).map(custom_level).collect();
        let loader = Arc::new(ScriptedLoader::with_latency(Duration::from_millis(30)));
        let job = BackgroundCachingJob::start(context(
            loader,
            library,
            Arc::new(CacheStore::new()),
            path.clone(),
            3,
        ));

        tokio::time::sleep(Duration::from_millis(5)).await;
        job.pause();
        job.cancel();
        assert_eq!(job.status(), CachingStatus::Cancelled);
        tokio::time::timeout(Duration::from_secs(2), job.join())
            .await
            .unwrap();
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn duplicate_suffix_variants_load_once() {
        let dir = tempfile::tempdir().unwrap();
        let first = custom_level(1);
        let mut variant = first.clone();
        variant.level_id = format!("{} Another Folder", first.level_id);
        let loader = Arc::new(ScriptedLoader::new());
        let cache = Arc::new(CacheStore::new());
        let job = BackgroundCachingJob::start(context(
            Arc::clone(&loader),
            vec![first, variant],
            Arc::clone(&cache),
            dir.path().join("details.json"),
            5,
        ));
        wait_done(&job).await;
        assert_eq!(loader.calls().len(), 1);
        assert_eq!(cache.len(), 1);
    }
}
