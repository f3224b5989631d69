//! Loading and caching of derived beatmap details.
//!
//! [`LoaderFacade`] is the entry point: it owns the shared [`CacheStore`],
//! the background pass that fills it, and the single interactive load that
//! may pre-empt that pass.

mod background;
mod cache;
mod config;
mod facade;
mod on_demand;

#[cfg(test)]
mod testing;

use std::sync::Arc;

use common::{BeatmapDescriptor, MetadataRecord};
use metadata::RawLoader;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

pub use background::{BackgroundCachingJob, CachingStatus, CachingSummary};
pub use cache::{CacheError, CacheStore};
pub use config::{
    config_path_from_env, load_config, load_or_create_config, resolve_path, ConfigError,
    LoaderConfig, CONFIG_VERSION,
};
pub use facade::LoaderFacade;
pub use on_demand::{CompleteCallback, OnDemandHandle, OnDemandLoader, ProgressCallback};

pub(crate) enum ItemOutcome {
    Loaded(Arc<MetadataRecord>),
    Failed,
    Canceled,
}

/// Parses one level and stores the result. Failures stay local to the item.
pub(crate) async fn load_into_cache<L: RawLoader>(
    loader: &L,
    cache: &CacheStore,
    descriptor: &BeatmapDescriptor,
    cancel: &CancellationToken,
) -> ItemOutcome {
    match loader.load(descriptor, cancel).await {
        Ok(record) => ItemOutcome::Loaded(cache.put(record)),
        Err(err) if err.is_canceled() => {
            debug!("Load canceled for {}", descriptor.level_id);
            ItemOutcome::Canceled
        }
        Err(err) => {
            warn!("Failed to load details for {}: {}", descriptor.level_id, err);
            ItemOutcome::Failed
        }
    }
}
