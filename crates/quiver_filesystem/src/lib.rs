use std::io;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::SystemTime;
use std::time::UNIX_EPOCH;

/// In-memory file-system for testing
pub mod in_memory_file_system;

/// File-system implementation using std::fs
pub mod os_file_system;

/// FileSystem abstraction instance
///
/// This should be `OsFileSystem` for non-testing environments and `InMemoryFileSystem` for testing.
pub type FileSystemRef = Arc<dyn FileSystem + Send + Sync>;

/// Trait abstracting file-system operations
///
/// Only the operations the bundler needs are exposed. Modification times are part of the
/// contract because the content cache validates entries against them.
#[mockall::automock]
pub trait FileSystem: std::fmt::Debug {
  fn cwd(&self) -> io::Result<PathBuf>;

  fn canonicalize(&self, path: &Path) -> io::Result<PathBuf>;

  /// Create a directory and all of its missing parents
  fn create_dir_all(&self, path: &Path) -> io::Result<()>;

  fn read(&self, path: &Path) -> io::Result<Vec<u8>>;

  fn read_to_string(&self, path: &Path) -> io::Result<String>;

  /// Write a file, replacing any existing contents and bumping its modification time
  fn write(&self, path: &Path, contents: &[u8]) -> io::Result<()>;

  fn remove_file(&self, path: &Path) -> io::Result<()>;

  fn modified(&self, path: &Path) -> io::Result<SystemTime>;

  fn is_file(&self, path: &Path) -> bool;

  fn is_dir(&self, path: &Path) -> bool;

  /// List the files matching a glob pattern, sorted
  fn glob(&self, pattern: &str) -> io::Result<Vec<PathBuf>>;
}

/// Returns true when the path contains glob syntax
pub fn is_glob(path: &str) -> bool {
  path.contains(['*', '?', '[', '{'])
}

/// Converts a modification time to milliseconds since the unix epoch
pub fn mtime_millis(time: SystemTime) -> u64 {
  time
    .duration_since(UNIX_EPOCH)
    .map(|duration| duration.as_millis() as u64)
    .unwrap_or_default()
}

/// Latest modification time of a path, or of every file matching it when it is a glob
pub fn last_modified(fs: &dyn FileSystem, path: &str) -> io::Result<u64> {
  if is_glob(path) {
    let mut latest = 0;
    for file in fs.glob(path)? {
      latest = latest.max(mtime_millis(fs.modified(&file)?));
    }

    return Ok(latest);
  }

  Ok(mtime_millis(fs.modified(Path::new(path))?))
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn detects_glob_patterns() {
    assert!(is_glob("src/*.js"));
    assert!(is_glob("src/{a,b}.js"));
    assert!(!is_glob("src/a.js"));
  }
}
