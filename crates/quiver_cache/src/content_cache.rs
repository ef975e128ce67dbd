use std::collections::HashSet;
use std::path::Path;
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;

use anyhow::Context;
use parking_lot::RwLock;
use quiver_core::hash::hash_string;
use quiver_core::types::BuildOptions;
use quiver_core::types::BuildTarget;
use quiver_core::types::ProcessedAsset;
use quiver_core::version::quiver_version;
use quiver_filesystem::last_modified;
use quiver_filesystem::FileSystemRef;
use serde::Serialize;

use crate::Cache;

/// The build options that change the output of the pipeline
///
/// Entries written with different values are never read back, which invalidates the whole
/// cache on option changes without deleting anything.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CacheFingerprint<'a> {
  #[serde(rename = "publicURL")]
  public_url: &'a str,
  minify: bool,
  hmr: bool,
  target: &'a BuildTarget,
  scope_hoist: bool,
  version: &'a str,
}

/// File system backed cache of processed assets
///
/// Entries live at `<cache_dir>/<key[..2]>/<key[2..]>.json`, where the key hashes the
/// options fingerprint together with the source path.
#[derive(Debug)]
pub struct ContentCache {
  dir: PathBuf,
  dir_exists: AtomicBool,
  fs: FileSystemRef,
  invalidated: RwLock<HashSet<PathBuf>>,
  options_hash: String,
}

impl ContentCache {
  pub fn new(fs: FileSystemRef, options: &BuildOptions) -> Self {
    let fingerprint = CacheFingerprint {
      public_url: &options.public_url,
      minify: options.minify,
      hmr: options.hmr,
      target: &options.target,
      scope_hoist: options.scope_hoist,
      version: quiver_version(),
    };

    let options_hash = hash_string(&serde_json::to_string(&fingerprint).unwrap_or_default());
    let dir = if options.cache_dir.is_absolute() {
      options.cache_dir.clone()
    } else {
      options.project_root.join(&options.cache_dir)
    };

    Self {
      dir,
      dir_exists: AtomicBool::new(false),
      fs,
      invalidated: RwLock::new(HashSet::new()),
      options_hash,
    }
  }

  pub fn dir(&self) -> &Path {
    &self.dir
  }

  /// Location of the entry for a source path
  pub fn cache_file(&self, path: &Path) -> PathBuf {
    let key = hash_string(&format!("{}{}", self.options_hash, path.display()));
    self
      .dir
      .join(&key[..2])
      .join(format!("{}.json", &key[2..]))
  }

  fn ensure_dir_exists(&self) -> anyhow::Result<()> {
    if self.dir_exists.load(Ordering::Acquire) {
      return Ok(());
    }

    self.fs.create_dir_all(&self.dir)?;

    // One directory per leading byte keeps the number of entries per directory small
    for i in 0..256 {
      self.fs.create_dir_all(&self.dir.join(format!("{:02x}", i)))?;
    }

    self.dir_exists.store(true, Ordering::Release);
    Ok(())
  }

  fn try_write(&self, path: &Path, asset: &ProcessedAsset) -> anyhow::Result<()> {
    self.ensure_dir_exists()?;

    let mut asset = asset.clone();
    for dependency in asset.dependencies.iter_mut() {
      if dependency.included_in_parent {
        dependency.mtime = Some(
          last_modified(self.fs.as_ref(), &dependency.name)
            .with_context(|| format!("Failed to stat {}", dependency.name))?,
        );
      }
    }

    let json = serde_json::to_vec(&asset)?;
    self.fs.write(&self.cache_file(path), &json)?;
    self.invalidated.write().remove(path);

    Ok(())
  }

  fn try_read(&self, path: &Path) -> anyhow::Result<Option<ProcessedAsset>> {
    let cache_file = self.cache_file(path);
    if self.fs.modified(path)? > self.fs.modified(&cache_file)? {
      return Ok(None);
    }

    let asset: ProcessedAsset = serde_json::from_slice(&self.fs.read(&cache_file)?)?;
    for dependency in asset.dependencies.iter() {
      if dependency.included_in_parent {
        let mtime = last_modified(self.fs.as_ref(), &dependency.name)?;
        if dependency.mtime.is_none_or(|recorded| mtime > recorded) {
          return Ok(None);
        }
      }
    }

    Ok(Some(asset))
  }
}

impl Cache for ContentCache {
  #[tracing::instrument(level = "debug", skip(self))]
  fn read(&self, path: &Path) -> Option<ProcessedAsset> {
    if self.invalidated.read().contains(path) {
      return None;
    }

    match self.try_read(path) {
      Ok(asset) => asset,
      Err(error) => {
        tracing::trace!("Cache miss for {}: {error}", path.display());
        None
      }
    }
  }

  #[tracing::instrument(level = "debug", skip(self, asset))]
  fn write(&self, path: &Path, asset: &ProcessedAsset) {
    if let Err(error) = self.try_write(path, asset) {
      tracing::error!("Error writing to cache: {error}");
    }
  }

  fn invalidate(&self, path: &Path) {
    self.invalidated.write().insert(path.to_path_buf());
  }

  fn delete(&self, path: &Path) {
    if self.fs.remove_file(&self.cache_file(path)).is_ok() {
      self.invalidated.write().remove(path);
    }
  }
}

#[cfg(test)]
mod tests {
  use std::io;
  use std::sync::Arc;

  use pretty_assertions::assert_eq;
  use quiver_core::types::Dependency;
  use quiver_core::types::FileType;
  use quiver_core::types::RenditionValue;
  use quiver_filesystem::in_memory_file_system::InMemoryFileSystem;
  use quiver_filesystem::FileSystem;
  use quiver_filesystem::MockFileSystem;

  use super::*;

  fn options() -> BuildOptions {
    BuildOptions {
      project_root: PathBuf::from("/project"),
      ..BuildOptions::default()
    }
  }

  fn asset(dependencies: Vec<Dependency>) -> ProcessedAsset {
    let mut asset = ProcessedAsset {
      id: String::from("src/a.js"),
      hash: String::from("hash"),
      ..ProcessedAsset::default()
    };
    for dependency in dependencies {
      asset.dependencies.add(dependency);
    }
    asset
      .generated
      .insert(FileType::Js, RenditionValue::from("module.exports = 1;"));
    asset
  }

  fn setup() -> (Arc<InMemoryFileSystem>, ContentCache) {
    let fs = Arc::new(InMemoryFileSystem::default());
    fs.write_file(Path::new("/project/src/a.js"), "module.exports = 1;");
    let cache = ContentCache::new(fs.clone(), &options());
    (fs, cache)
  }

  #[test]
  fn reads_back_written_entries() {
    let (_fs, cache) = setup();
    let path = Path::new("/project/src/a.js");

    cache.write(path, &asset(vec![Dependency::new("./b")]));

    assert_eq!(cache.read(path), Some(asset(vec![Dependency::new("./b")])));
  }

  #[test]
  fn entries_live_in_hex_subdirectories() {
    let (fs, cache) = setup();
    let path = Path::new("/project/src/a.js");

    cache.write(path, &asset(vec![]));

    let cache_file = cache.cache_file(path);
    let bucket = cache_file.parent().unwrap();
    assert_eq!(bucket.parent().unwrap(), Path::new("/project/.cache"));
    assert_eq!(bucket.file_name().unwrap().len(), 2);
    assert!(fs.is_file(&cache_file));
    assert!(fs.is_dir(Path::new("/project/.cache/00")));
    assert!(fs.is_dir(Path::new("/project/.cache/ff")));
  }

  #[test]
  fn modified_sources_miss() {
    let (fs, cache) = setup();
    let path = Path::new("/project/src/a.js");

    cache.write(path, &asset(vec![]));
    fs.touch(path).unwrap();

    assert_eq!(cache.read(path), None);
  }

  #[test]
  fn modified_inlined_dependencies_miss() {
    let (fs, cache) = setup();
    let path = Path::new("/project/src/a.js");
    fs.write_file(Path::new("/project/src/a.css"), "body {}");
    let dependency = Dependency::included_in_parent("/project/src/a.css");

    cache.write(path, &asset(vec![dependency.clone()]));
    assert!(cache.read(path).is_some());

    fs.touch(Path::new("/project/src/a.css")).unwrap();
    assert_eq!(cache.read(path), None);
  }

  #[test]
  fn glob_dependencies_use_the_latest_match() {
    let (fs, cache) = setup();
    let path = Path::new("/project/src/a.js");
    fs.write_file(Path::new("/project/src/styles/a.css"), "a");
    fs.write_file(Path::new("/project/src/styles/b.css"), "b");

    cache.write(
      path,
      &asset(vec![Dependency::included_in_parent("/project/src/styles/*.css")]),
    );
    assert!(cache.read(path).is_some());

    fs.touch(Path::new("/project/src/styles/b.css")).unwrap();
    assert_eq!(cache.read(path), None);
  }

  #[test]
  fn invalidated_paths_miss_until_written() {
    let (_fs, cache) = setup();
    let path = Path::new("/project/src/a.js");

    cache.write(path, &asset(vec![]));
    cache.invalidate(path);
    assert_eq!(cache.read(path), None);

    cache.write(path, &asset(vec![]));
    assert!(cache.read(path).is_some());
  }

  #[test]
  fn deleted_entries_miss() {
    let (_fs, cache) = setup();
    let path = Path::new("/project/src/a.js");

    cache.write(path, &asset(vec![]));
    cache.delete(path);

    assert_eq!(cache.read(path), None);
  }

  #[test]
  fn option_changes_miss() {
    let (fs, cache) = setup();
    let path = Path::new("/project/src/a.js");
    cache.write(path, &asset(vec![]));

    let minified = ContentCache::new(
      fs,
      &BuildOptions {
        minify: true,
        ..options()
      },
    );

    assert_ne!(minified.cache_file(path), cache.cache_file(path));
    assert_eq!(minified.read(path), None);
  }

  #[test]
  fn corrupt_entries_miss() {
    let (fs, cache) = setup();
    let path = Path::new("/project/src/a.js");
    cache.write(path, &asset(vec![]));

    fs.write_file(&cache.cache_file(path), "{ not json");

    assert_eq!(cache.read(path), None);
  }

  #[test]
  fn write_failures_are_swallowed() {
    let mut fs = MockFileSystem::new();
    fs.expect_create_dir_all().returning(|_| Ok(()));
    fs.expect_write()
      .returning(|_, _| Err(io::Error::other("disk full")));

    let cache = ContentCache::new(Arc::new(fs), &options());

    cache.write(Path::new("/project/src/a.js"), &asset(vec![]));
  }
}
