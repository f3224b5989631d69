use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use common::{BeatmapDescriptor, MetadataRecord};
use futures_util::stream::{FuturesUnordered, StreamExt};
use metadata::RawLoader;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cache::CacheStore;
use crate::{load_into_cache, ItemOutcome};

pub type ProgressCallback = Arc<dyn Fn(usize) + Send + Sync>;
pub type CompleteCallback = Box<dyn FnOnce(Vec<Arc<MetadataRecord>>) + Send>;

pub(crate) struct OnDemandRequest {
    pub descriptors: Vec<BeatmapDescriptor>,
    pub on_progress: ProgressCallback,
    pub on_complete: CompleteCallback,
    /// Runs after `on_complete`; skipped when the load is cancelled.
    pub on_settled: Box<dyn FnOnce() + Send>,
}

/// An interactive load of details for an ordered list of levels.
///
/// Cache misses are parsed through a sliding window of at most `window`
/// in-flight loads. The result keeps the input order; levels that failed to
/// load are left out.
pub struct OnDemandLoader {
    cancel: CancellationToken,
    done: CancellationToken,
}

impl OnDemandLoader {
    pub(crate) fn start<L: RawLoader>(
        loader: Arc<L>,
        cache: Arc<CacheStore>,
        window: usize,
        progress_interval: Duration,
        request: OnDemandRequest,
    ) -> Self {
        let cancel = CancellationToken::new();
        let done = CancellationToken::new();
        let task_cancel = cancel.clone();
        let task_done = done.clone();
        tokio::spawn(async move {
            let _done = task_done.drop_guard();
            run_on_demand(loader, cache, window.max(1), progress_interval, request, task_cancel)
                .await;
        });
        Self { cancel, done }
    }

    /// Requests cancellation of every outstanding load. `on_complete` will not
    /// run. Loads that still finish keep their results in the cache.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn is_finished(&self) -> bool {
        self.done.is_cancelled()
    }

    pub(crate) fn done_token(&self) -> CancellationToken {
        self.done.clone()
    }
}

async fn run_on_demand<L: RawLoader>(
    loader: Arc<L>,
    cache: Arc<CacheStore>,
    window: usize,
    progress_interval: Duration,
    request: OnDemandRequest,
    cancel: CancellationToken,
) {
    let OnDemandRequest {
        descriptors,
        on_progress,
        on_complete,
        on_settled,
    } = request;

    let total = descriptors.len();
    let mut slots: Vec<Option<Arc<MetadataRecord>>> = vec![None; total];
    let resolved = Arc::new(AtomicUsize::new(0));
    let mut queue = VecDeque::new();

    for (index, descriptor) in descriptors.into_iter().enumerate() {
        let ready = match MetadataRecord::from_built_in(&descriptor) {
            Some(record) => Some(Arc::new(record)),
            None => cache.get(&descriptor.level_id),
        };
        match ready {
            Some(record) => {
                slots[index] = Some(record);
                resolved.fetch_add(1, Ordering::Relaxed);
            }
            None => queue.push_back((index, descriptor)),
        }
    }
    debug!(
        "On-demand load: {} levels, {} to parse",
        total,
        queue.len()
    );

    let reporter = cancel.child_token();
    let _stop_reporter = reporter.clone().drop_guard();
    tokio::spawn(report_progress(
        on_progress,
        Arc::clone(&resolved),
        progress_interval,
        reporter,
    ));

    let mut in_flight = FuturesUnordered::new();
    loop {
        while in_flight.len() < window {
            let Some((index, descriptor)) = queue.pop_front() else {
                break;
            };
            let loader = Arc::clone(&loader);
            let cache = Arc::clone(&cache);
            let token = cancel.child_token();
            in_flight.push(tokio::spawn(async move {
                let outcome = load_into_cache(loader.as_ref(), &cache, &descriptor, &token).await;
                (index, outcome)
            }));
        }

        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!(
                    "On-demand load cancelled with {} of {} resolved",
                    resolved.load(Ordering::Relaxed),
                    total
                );
                return;
            }
            next = in_flight.next() => next,
        };

        match next {
            Some(Ok((index, ItemOutcome::Loaded(record)))) => {
                slots[index] = Some(record);
                resolved.fetch_add(1, Ordering::Relaxed);
            }
            Some(Ok((_, ItemOutcome::Failed | ItemOutcome::Canceled))) => {}
            Some(Err(err)) => warn!("On-demand load task join error: {}", err),
            None => break,
        }
    }

    let records: Vec<Arc<MetadataRecord>> = slots.into_iter().flatten().collect();
    if records.len() < total {
        info!(
            "On-demand load finished: {} of {} levels loaded",
            records.len(),
            total
        );
    } else {
        debug!("On-demand load finished: {} levels", total);
    }
    if cancel.is_cancelled() {
        return;
    }
    on_complete(records);
    on_settled();
}

async fn report_progress(
    on_progress: ProgressCallback,
    resolved: Arc<AtomicUsize>,
    every: Duration,
    stop: CancellationToken,
) {
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            biased;
            _ = stop.cancelled() => break,
            _ = ticker.tick() => on_progress(resolved.load(Ordering::Relaxed)),
        }
    }
}

pub(crate) trait OnDemandControl: Send + Sync {
    fn cancel_generation(&self, generation: u64);
}

/// Caller-side handle for one on-demand load.
pub struct OnDemandHandle {
    control: Weak<dyn OnDemandControl>,
    generation: u64,
    done: CancellationToken,
}

impl OnDemandHandle {
    pub(crate) fn new(
        control: Weak<dyn OnDemandControl>,
        generation: u64,
        done: CancellationToken,
    ) -> Self {
        Self {
            control,
            generation,
            done,
        }
    }

    /// Cancels this load if it is still the current one.
    pub fn cancel(&self) {
        if let Some(control) = self.control.upgrade() {
            control.cancel_generation(self.generation);
        }
    }

    pub fn is_finished(&self) -> bool {
        self.done.is_cancelled()
    }

    /// Resolves once the load task has exited, whether it completed or not.
    pub async fn finished(&self) {
        self.done.cancelled().await;
    }
}
