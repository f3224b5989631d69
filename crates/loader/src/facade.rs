use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use common::{BeatmapDescriptor, MetadataRecord};
use metadata::{LibraryEnumerator, RawLoader};
use parking_lot::Mutex;
use tracing::{debug, error, info};

use crate::background::{BackgroundCachingJob, CachingContext, CachingStatus};
use crate::cache::CacheStore;
use crate::config::LoaderConfig;
use crate::on_demand::{OnDemandControl, OnDemandHandle, OnDemandLoader, OnDemandRequest};

/// Coordinates background caching with interactive loads over one cache.
///
/// An on-demand load always wins: starting one pauses the background pass,
/// and the pass resumes once the newest on-demand load completes or is
/// cancelled. Locks are taken in the order `on_demand` then `caching`.
pub struct LoaderFacade<L: RawLoader, E: LibraryEnumerator> {
    inner: Arc<FacadeInner<L, E>>,
}

impl<L: RawLoader, E: LibraryEnumerator> Clone for LoaderFacade<L, E> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct FacadeInner<L, E> {
    config: LoaderConfig,
    cache_path: PathBuf,
    cache: Arc<CacheStore>,
    raw_loader: Arc<L>,
    enumerator: Arc<E>,
    caching: Mutex<Option<BackgroundCachingJob>>,
    on_demand: Mutex<OnDemandSlot>,
    /// Generation whose results may still be delivered; 0 when none.
    deliverable: Arc<AtomicU64>,
}

#[derive(Default)]
struct OnDemandSlot {
    generation: u64,
    active: Option<OnDemandLoader>,
    /// Set when an on-demand load paused the background pass.
    resume_caching: bool,
}

impl OnDemandSlot {
    fn is_loading(&self) -> bool {
        self.active
            .as_ref()
            .map(|loader| !loader.is_finished() && !loader.is_cancelled())
            .unwrap_or(false)
    }
}

impl<L: RawLoader, E: LibraryEnumerator> LoaderFacade<L, E> {
    /// `cache_path` is the resolved cache file, usually
    /// [`LoaderConfig::cache_file`] of the loaded config.
    pub fn new(
        config: LoaderConfig,
        cache_path: PathBuf,
        cache: Arc<CacheStore>,
        raw_loader: Arc<L>,
        enumerator: Arc<E>,
    ) -> Self {
        Self {
            inner: Arc::new(FacadeInner {
                config,
                cache_path,
                cache,
                raw_loader,
                enumerator,
                caching: Mutex::new(None),
                on_demand: Mutex::new(OnDemandSlot::default()),
                deliverable: Arc::new(AtomicU64::new(0)),
            }),
        }
    }

    pub fn cache(&self) -> &Arc<CacheStore> {
        &self.inner.cache
    }

    pub fn config(&self) -> &LoaderConfig {
        &self.inner.config
    }

    /// Starts a background pass over the community library.
    ///
    /// Without `force` a live pass is left alone. With `force` it is cancelled
    /// and a new pass starts over a fresh enumeration. Levels already in the
    /// cache are never parsed again.
    pub fn start_background_caching(&self, force: bool) {
        let inner = &self.inner;
        let mut slot = inner.on_demand.lock();
        let mut caching = inner.caching.lock();

        if let Some(job) = caching.as_ref() {
            if job.status().is_active() {
                if !force {
                    debug!("Background caching already running");
                    return;
                }
                info!("Restarting background caching");
                job.cancel();
            }
        }

        let job = BackgroundCachingJob::start(CachingContext {
            cache: Arc::clone(&inner.cache),
            loader: Arc::clone(&inner.raw_loader),
            enumerator: Arc::clone(&inner.enumerator),
            cache_path: inner.cache_path.clone(),
            chunk_size: inner.config.caching_chunk(),
        });
        if slot.is_loading() && job.pause() {
            slot.resume_caching = true;
        }
        *caching = Some(job);
    }

    pub fn pause_background_caching(&self) {
        let mut slot = self.inner.on_demand.lock();
        slot.resume_caching = false;
        if let Some(job) = self.inner.caching.lock().as_ref() {
            if job.pause() {
                info!("Background caching paused");
            }
        }
    }

    /// Resumes a paused pass. While an on-demand load is running the resume
    /// is deferred until that load settles.
    pub fn resume_background_caching(&self) {
        let mut slot = self.inner.on_demand.lock();
        let caching = self.inner.caching.lock();
        let Some(job) = caching.as_ref() else {
            return;
        };
        if job.status() != CachingStatus::Paused {
            return;
        }
        if slot.is_loading() {
            slot.resume_caching = true;
            return;
        }
        if job.resume() {
            info!("Background caching resumed");
        }
    }

    /// Tears down the background pass. Meant for host shutdown; UI navigation
    /// should pause instead so progress is kept.
    pub fn cancel_background_caching(&self) {
        let mut slot = self.inner.on_demand.lock();
        slot.resume_caching = false;
        if let Some(job) = self.inner.caching.lock().as_ref() {
            job.cancel();
            info!("Background caching cancelled");
        }
    }

    /// Loads details for `descriptors` right now, superseding any load already
    /// in flight. `on_complete` receives records in input order.
    pub fn load_on_demand<P, C>(
        &self,
        descriptors: Vec<BeatmapDescriptor>,
        on_progress: P,
        on_complete: C,
    ) -> OnDemandHandle
    where
        P: Fn(usize) + Send + Sync + 'static,
        C: FnOnce(Vec<Arc<MetadataRecord>>) + Send + 'static,
    {
        let inner = &self.inner;
        let mut slot = inner.on_demand.lock();
        slot.generation += 1;
        let generation = slot.generation;
        inner.deliverable.store(generation, Ordering::Release);
        if let Some(previous) = slot.active.take() {
            debug!("Superseding on-demand load {}", generation - 1);
            previous.cancel();
        }

        if let Some(job) = inner.caching.lock().as_ref() {
            if job.pause() {
                debug!("Background caching paused for on-demand load");
                slot.resume_caching = true;
            }
        }

        let weak = Arc::downgrade(inner);
        let on_settled = Box::new(move || {
            if let Some(inner) = weak.upgrade() {
                inner.settle(generation);
            }
        });
        let loader = OnDemandLoader::start(
            Arc::clone(&inner.raw_loader),
            Arc::clone(&inner.cache),
            inner.config.on_demand_window(),
            inner.config.progress_interval(),
            OnDemandRequest {
                descriptors,
                on_progress: Arc::new(on_progress),
                on_complete: Box::new(deliver_if_current(
                    Arc::clone(&inner.deliverable),
                    generation,
                    on_complete,
                )),
                on_settled,
            },
        );
        let done = loader.done_token();
        slot.active = Some(loader);

        let weak_inner = Arc::downgrade(inner);
        let control: Weak<dyn OnDemandControl> = weak_inner;
        OnDemandHandle::new(control, generation, done)
    }

    pub fn cancel_on_demand_load(&self) {
        let generation = self.inner.on_demand.lock().generation;
        self.inner.cancel_generation(generation);
    }

    pub fn is_caching(&self) -> bool {
        self.caching_status()
            .map(|status| status.is_active())
            .unwrap_or(false)
    }

    pub fn is_loading(&self) -> bool {
        self.inner.on_demand.lock().is_loading()
    }

    pub fn is_fully_cached(&self) -> bool {
        matches!(self.caching_status(), Some(CachingStatus::Completed(_)))
    }

    /// `None` until background caching has been started once.
    pub fn caching_status(&self) -> Option<CachingStatus> {
        self.inner.caching.lock().as_ref().map(|job| job.status())
    }

    /// Waits for the current background pass to leave `Running`/`Paused`.
    pub async fn wait_for_background_caching(&self) -> Option<CachingStatus> {
        let mut status = {
            let caching = self.inner.caching.lock();
            caching.as_ref()?.subscribe()
        };
        let finished = status
            .wait_for(|status| !status.is_active())
            .await
            .ok()
            .map(|status| status.clone());
        finished
    }

    /// Stops both jobs and writes the cache one last time. A save started by
    /// the background pass is waited for rather than raced.
    pub async fn shutdown(&self) {
        self.cancel_on_demand_load();
        let job = {
            let _slot = self.inner.on_demand.lock();
            self.inner.caching.lock().take()
        };
        if let Some(job) = job {
            job.cancel();
            job.join().await;
        }

        let cache = Arc::clone(&self.inner.cache);
        let path = self.inner.cache_path.clone();
        match tokio::task::spawn_blocking(move || cache.save_to_file(&path)).await {
            Ok(Ok(count)) => info!(
                "Saved {} beatmap details to {:?} on shutdown",
                count, self.inner.cache_path
            ),
            Ok(Err(err)) => error!(
                "Failed to save details cache {:?} on shutdown: {}",
                self.inner.cache_path, err
            ),
            Err(err) => error!("Details cache save join error: {}", err),
        }
    }
}

impl<L, E> FacadeInner<L, E> {
    /// Called by a load that completed normally.
    fn settle(&self, generation: u64) {
        let mut slot = self.on_demand.lock();
        if slot.generation != generation {
            return;
        }
        slot.active = None;
        if std::mem::take(&mut slot.resume_caching) {
            self.resume_after_on_demand();
        }
    }

    fn resume_after_on_demand(&self) {
        if let Some(job) = self.caching.lock().as_ref() {
            if job.resume() {
                debug!("Background caching resumed after on-demand load");
            }
        }
    }
}

impl<L: RawLoader, E: LibraryEnumerator> OnDemandControl for FacadeInner<L, E> {
    fn cancel_generation(&self, generation: u64) {
        let mut slot = self.on_demand.lock();
        if slot.generation != generation {
            return;
        }
        let Some(active) = slot.active.take() else {
            return;
        };
        self.deliverable.store(0, Ordering::Release);
        active.cancel();
        debug!("On-demand load {} cancelled", generation);
        if std::mem::take(&mut slot.resume_caching) {
            self.resume_after_on_demand();
        }
    }
}

/// Drops the result of a load that was superseded or cancelled after its
/// task already decided to complete.
fn deliver_if_current<C>(
    deliverable: Arc<AtomicU64>,
    generation: u64,
    on_complete: C,
) -> impl FnOnce(Vec<Arc<MetadataRecord>>) + Send + 'static
where
    C: FnOnce(Vec<Arc<MetadataRecord>>) + Send + 'static,
{
    move |records| {
        if deliverable.load(Ordering::Acquire) == generation {
            on_complete(records);
        } else {
            debug!("Dropping result of stale on-demand load {}", generation);
        }
    }
}
