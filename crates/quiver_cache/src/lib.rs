use std::path::Path;
use std::sync::Arc;

use quiver_core::types::ProcessedAsset;

pub use self::content_cache::*;

mod content_cache;

pub type CacheRef = Arc<dyn Cache + Send + Sync>;

/// Persistent store of processed assets keyed by source path
///
/// Reads never fail, anything that prevents a valid entry from being returned is a miss.
#[mockall::automock]
pub trait Cache {
  fn read(&self, path: &Path) -> Option<ProcessedAsset>;

  /// Persist an entry, failures are logged and otherwise ignored
  fn write(&self, path: &Path, asset: &ProcessedAsset);

  /// Treat the entry for a path as missing until it is written again
  fn invalidate(&self, path: &Path);

  fn delete(&self, path: &Path);
}
