use std::io;
use std::path::Path;
use std::path::PathBuf;
use std::time::SystemTime;

use crate::FileSystem;

#[derive(Default, Debug)]
pub struct OsFileSystem;

impl FileSystem for OsFileSystem {
  fn cwd(&self) -> io::Result<PathBuf> {
    std::env::current_dir()
  }

  fn canonicalize(&self, path: &Path) -> io::Result<PathBuf> {
    std::fs::canonicalize(path)
  }

  fn create_dir_all(&self, path: &Path) -> io::Result<()> {
    std::fs::create_dir_all(path)
  }

  fn read(&self, path: &Path) -> io::Result<Vec<u8>> {
    std::fs::read(path)
  }

  fn read_to_string(&self, path: &Path) -> io::Result<String> {
    std::fs::read_to_string(path)
  }

  fn write(&self, path: &Path, contents: &[u8]) -> io::Result<()> {
    std::fs::write(path, contents)
  }

  fn remove_file(&self, path: &Path) -> io::Result<()> {
    std::fs::remove_file(path)
  }

  fn modified(&self, path: &Path) -> io::Result<SystemTime> {
    std::fs::metadata(path)?.modified()
  }

  fn is_file(&self, path: &Path) -> bool {
    path.is_file()
  }

  fn is_dir(&self, path: &Path) -> bool {
    path.is_dir()
  }

  fn glob(&self, pattern: &str) -> io::Result<Vec<PathBuf>> {
    let paths = glob::glob(pattern).map_err(|err| io::Error::other(err.to_string()))?;

    let mut files = paths
      .filter_map(Result::ok)
      .filter(|path| path.is_file())
      .collect::<Vec<PathBuf>>();

    files.sort();
    Ok(files)
  }
}

#[cfg(test)]
mod tests {
  use assert_fs::prelude::*;
  use assert_fs::TempDir;

  use super::*;

  #[test]
  fn globs_only_files() {
    let dir = TempDir::new().unwrap();
    dir.child("src/a.js").write_str("a").unwrap();
    dir.child("src/b.js").write_str("b").unwrap();
    dir.child("src/nested").create_dir_all().unwrap();

    let pattern = dir.path().join("src/*").to_string_lossy().to_string();
    let files = OsFileSystem.glob(&pattern).unwrap();

    assert_eq!(
      files,
      vec![dir.path().join("src/a.js"), dir.path().join("src/b.js")]
    );
  }

  #[test]
  fn writes_and_reads_back() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("file.txt");

    OsFileSystem.write(&path, b"contents").unwrap();

    assert_eq!(OsFileSystem.read_to_string(&path).unwrap(), "contents");
    assert!(OsFileSystem.modified(&path).is_ok());
  }
}
