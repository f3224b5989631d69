use std::future::Future;

use common::{BeatmapDescriptor, MetadataRecord};
use tokio_util::sync::CancellationToken;

#[derive(Debug)]
pub enum LoadError {
    Canceled,
    Io(std::io::Error),
    Parse(String),
}

impl LoadError {
    pub fn is_canceled(&self) -> bool {
        matches!(self, LoadError::Canceled)
    }
}

impl std::fmt::Display for LoadError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LoadError::Canceled => write!(f, "load canceled"),
            LoadError::Io(err) => write!(f, "io error: {}", err),
            LoadError::Parse(message) => write!(f, "parse error: {}", message),
        }
    }
}

impl std::error::Error for LoadError {}

impl From<std::io::Error> for LoadError {
    fn from(err: std::io::Error) -> Self {
        LoadError::Io(err)
    }
}

/// Parses the on-disk representation of a community level.
///
/// Implementations must watch `cancel` and return [`LoadError::Canceled`]
/// within one suspension point after it fires. Any other error is treated as
/// a failure of that single level, never of the batch it belongs to.
pub trait RawLoader: Send + Sync + 'static {
    fn load(
        &self,
        descriptor: &BeatmapDescriptor,
        cancel: &CancellationToken,
    ) -> impl Future<Output = Result<MetadataRecord, LoadError>> + Send;
}

/// Supplies the current set of levels in the library.
pub trait LibraryEnumerator: Send + Sync + 'static {
    fn levels(&self) -> Vec<BeatmapDescriptor>;

    fn community_levels(&self) -> Vec<BeatmapDescriptor> {
        self.levels()
            .into_iter()
            .filter(BeatmapDescriptor::is_custom)
            .collect()
    }
}

impl LibraryEnumerator for Vec<BeatmapDescriptor> {
    fn levels(&self) -> Vec<BeatmapDescriptor> {
        self.clone()
    }
}
