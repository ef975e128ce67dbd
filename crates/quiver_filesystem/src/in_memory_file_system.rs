use std::collections::BTreeMap;
use std::io;
use std::path::Component;
use std::path::Path;
use std::path::PathBuf;
use std::time::Duration;
use std::time::SystemTime;
use std::time::UNIX_EPOCH;

use parking_lot::RwLock;

use crate::FileSystem;

#[cfg(not(target_os = "windows"))]
fn root_dir() -> PathBuf {
  PathBuf::from("/")
}

#[cfg(target_os = "windows")]
fn root_dir() -> PathBuf {
  PathBuf::from("C:/")
}

/// In memory implementation of a file-system entry
#[derive(Debug)]
enum InMemoryFileSystemEntry {
  File {
    contents: Vec<u8>,
    modified: SystemTime,
  },
  Directory,
}

/// In memory implementation of the `FileSystem` trait, for testing purposes.
///
/// Modification times come from a logical clock that advances one second on every write or
/// touch, so ordering between writes is always observable.
#[derive(Debug)]
pub struct InMemoryFileSystem {
  files: RwLock<BTreeMap<PathBuf, InMemoryFileSystemEntry>>,
  current_working_directory: RwLock<PathBuf>,
  clock: RwLock<u64>,
}

impl Default for InMemoryFileSystem {
  fn default() -> Self {
    Self {
      files: Default::default(),
      current_working_directory: RwLock::new(root_dir()),
      clock: RwLock::new(1_000_000),
    }
  }
}

impl InMemoryFileSystem {
  /// Change the current working directory. Used for resolving relative paths.
  pub fn set_current_working_directory(&self, cwd: &Path) {
    let cwd = self.resolve(cwd);
    let mut state = self.current_working_directory.write();
    *state = cwd;
  }

  /// Write a utf-8 file
  pub fn write_file(&self, path: &Path, contents: impl Into<String>) {
    let contents: String = contents.into();
    let _ = self.write(path, contents.as_bytes());
  }

  /// Advance the modification time of a file without changing it
  pub fn touch(&self, path: &Path) -> io::Result<()> {
    let path = self.resolve(path);
    let now = self.tick();
    let mut files = self.files.write();

    match files.get_mut(&path) {
      Some(InMemoryFileSystemEntry::File { modified, .. }) => {
        *modified = now;
        Ok(())
      }
      _ => Err(io::Error::new(io::ErrorKind::NotFound, "File not found")),
    }
  }

  fn tick(&self) -> SystemTime {
    let mut clock = self.clock.write();
    *clock += 1;
    UNIX_EPOCH + Duration::from_secs(*clock)
  }

  fn resolve(&self, path: &Path) -> PathBuf {
    let cwd = self.current_working_directory.read();
    let mut result = if path.is_absolute() {
      vec![]
    } else {
      cwd.components().collect()
    };

    for component in path.components() {
      match component {
        Component::Prefix(prefix) => {
          result = vec![Component::Prefix(prefix)];
        }
        Component::RootDir => {
          result.push(Component::RootDir);
        }
        Component::CurDir => {}
        Component::ParentDir => {
          result.pop();
        }
        Component::Normal(path) => {
          result.push(Component::Normal(path));
        }
      }
    }

    PathBuf::from_iter(result)
  }
}

impl FileSystem for InMemoryFileSystem {
  fn cwd(&self) -> io::Result<PathBuf> {
    Ok(self.current_working_directory.read().clone())
  }

  fn canonicalize(&self, path: &Path) -> io::Result<PathBuf> {
    Ok(self.resolve(path))
  }

  fn create_dir_all(&self, path: &Path) -> io::Result<()> {
    let path = self.resolve(path);
    let mut files = self.files.write();

    let mut dir = Some(path.as_path());
    while let Some(path) = dir {
      files
        .entry(path.to_path_buf())
        .or_insert(InMemoryFileSystemEntry::Directory);
      dir = path.parent();
    }

    Ok(())
  }

  fn read(&self, path: &Path) -> io::Result<Vec<u8>> {
    let path = self.resolve(path);
    let files = self.files.read();
    match files.get(&path) {
      None => Err(io::Error::new(io::ErrorKind::NotFound, "File not found")),
      Some(InMemoryFileSystemEntry::File { contents, .. }) => Ok(contents.clone()),
      Some(InMemoryFileSystemEntry::Directory) => Err(io::Error::new(
        io::ErrorKind::InvalidInput,
        "Path is a directory",
      )),
    }
  }

  fn read_to_string(&self, path: &Path) -> io::Result<String> {
    let bytes = self.read(path)?;
    String::from_utf8(bytes).map_err(|_| io::Error::other("Unable to read file as string"))
  }

  fn write(&self, path: &Path, contents: &[u8]) -> io::Result<()> {
    let path = self.resolve(path);
    let modified = self.tick();
    let mut files = self.files.write();

    files.insert(
      path.clone(),
      InMemoryFileSystemEntry::File {
        contents: contents.to_vec(),
        modified,
      },
    );

    let mut dir = path.parent();
    while let Some(path) = dir {
      files.insert(path.to_path_buf(), InMemoryFileSystemEntry::Directory);
      dir = path.parent();
    }

    Ok(())
  }

  fn remove_file(&self, path: &Path) -> io::Result<()> {
    let path = self.resolve(path);
    let mut files = self.files.write();
    match files.remove(&path) {
      Some(InMemoryFileSystemEntry::File { .. }) => Ok(()),
      Some(directory) => {
        files.insert(path, directory);
        Err(io::Error::new(
          io::ErrorKind::InvalidInput,
          "Path is a directory",
        ))
      }
      None => Err(io::Error::new(io::ErrorKind::NotFound, "File not found")),
    }
  }

  fn modified(&self, path: &Path) -> io::Result<SystemTime> {
    let path = self.resolve(path);
    let files = self.files.read();
    match files.get(&path) {
      Some(InMemoryFileSystemEntry::File { modified, .. }) => Ok(*modified),
      Some(InMemoryFileSystemEntry::Directory) => Ok(UNIX_EPOCH),
      None => Err(io::Error::new(io::ErrorKind::NotFound, "File not found")),
    }
  }

  fn is_file(&self, path: &Path) -> bool {
    let path = self.resolve(path);
    matches!(
      self.files.read().get(&path),
      Some(InMemoryFileSystemEntry::File { .. })
    )
  }

  fn is_dir(&self, path: &Path) -> bool {
    let path = self.resolve(path);
    matches!(
      self.files.read().get(&path),
      Some(InMemoryFileSystemEntry::Directory)
    )
  }

  fn glob(&self, pattern: &str) -> io::Result<Vec<PathBuf>> {
    let pattern = self.resolve(Path::new(pattern));
    let pattern = pattern.to_string_lossy();
    let files = self.files.read();

    Ok(
      files
        .iter()
        .filter(|(_, entry)| matches!(entry, InMemoryFileSystemEntry::File { .. }))
        .filter(|(path, _)| glob_match::glob_match(&pattern, &path.to_string_lossy()))
        .map(|(path, _)| path.clone())
        .collect(),
    )
  }
}
