use std::collections::HashMap;
use std::fmt::Debug;
use std::path::Component;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use parking_lot::RwLock;
use quiver_core::diagnostic::Diagnostic;
use quiver_filesystem::is_glob;
use quiver_filesystem::FileSystemRef;
use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

/// Extensions tried, in order, when a specifier omits one
const DEFAULT_EXTENSIONS: [&str; 6] = ["js", "jsx", "mjs", "json", "css", "pcss"];

/// The fields of a package manifest the bundler reads
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageJson {
  pub name: Option<String>,

  pub main: Option<String>,

  /// Either a boolean or a list of files with side effects
  pub side_effects: Option<Value>,
}

impl PackageJson {
  /// Only an explicit `false` marks a package free of side effects
  pub fn side_effects(&self) -> bool {
    !matches!(self.side_effects, Some(Value::Bool(false)))
  }
}

/// Turns dependency specifiers into file paths
#[mockall::automock]
pub trait Resolver: Debug + Send + Sync {
  fn resolve(&self, specifier: &str, from: &Path) -> anyhow::Result<PathBuf>;

  /// The nearest package manifest at or above a directory
  fn find_package(&self, dir: &Path) -> anyhow::Result<Option<PackageJson>>;
}

pub type ResolverRef = Arc<dyn Resolver>;

/// Resolves specifiers the way node does: relative paths, absolute paths from the project
/// root and packages from `node_modules`, trying known extensions and directory indexes
#[derive(Debug)]
pub struct NodeResolver {
  extensions: Vec<String>,
  fs: FileSystemRef,
  packages: RwLock<HashMap<PathBuf, Option<PackageJson>>>,
  root_dir: PathBuf,
}

impl NodeResolver {
  pub fn new(fs: FileSystemRef, root_dir: PathBuf) -> Self {
    Self {
      extensions: DEFAULT_EXTENSIONS.iter().map(|ext| ext.to_string()).collect(),
      fs,
      packages: RwLock::new(HashMap::new()),
      root_dir,
    }
  }

  /// Additional extensions to try, after the defaults
  pub fn with_extensions<I, S>(mut self, extensions: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    for extension in extensions {
      let extension = extension.into();
      let extension = extension.trim_start_matches('.').to_string();
      if !self.extensions.contains(&extension) {
        self.extensions.push(extension);
      }
    }
    self
  }

  fn load_as_file(&self, path: &Path) -> Option<PathBuf> {
    if self.fs.is_file(path) {
      return Some(path.to_path_buf());
    }

    let file_name = path.file_name()?.to_string_lossy().to_string();
    self
      .extensions
      .iter()
      .map(|ext| path.with_file_name(format!("{}.{}", file_name, ext)))
      .find(|candidate| self.fs.is_file(candidate))
  }

  fn load_as_directory(&self, path: &Path) -> Option<PathBuf> {
    if !self.fs.is_dir(path) {
      return None;
    }

    let package = self.read_package(path);
    if let Some(main) = package.as_ref().and_then(|package| package.main.as_ref()) {
      let main = normalize_path(&path.join(main));
      if let Some(resolved) = self
        .load_as_file(&main)
        .or_else(|| self.load_index(&main))
      {
        return Some(resolved);
      }
    }

    self.load_index(path)
  }

  fn load_index(&self, dir: &Path) -> Option<PathBuf> {
    self
      .extensions
      .iter()
      .map(|ext| dir.join(format!("index.{}", ext)))
      .find(|candidate| self.fs.is_file(candidate))
  }

  fn load_node_module(&self, specifier: &str, from_dir: &Path) -> Option<PathBuf> {
    for dir in from_dir.ancestors() {
      if dir.file_name().is_some_and(|name| name == "node_modules") {
        continue;
      }

      let candidate = dir.join("node_modules").join(specifier);
      if let Some(resolved) = self
        .load_as_file(&candidate)
        .or_else(|| self.load_as_directory(&candidate))
      {
        return Some(resolved);
      }
    }

    None
  }

  fn read_package(&self, dir: &Path) -> Option<PackageJson> {
    if let Some(package) = self.packages.read().get(dir) {
      return package.clone();
    }

    let manifest = dir.join("package.json");
    let package = if self.fs.is_file(&manifest) {
      match self
        .fs
        .read_to_string(&manifest)
        .context("Failed to read package.json")
        .and_then(|contents| {
          serde_json::from_str::<PackageJson>(&contents).context("Invalid package.json")
        }) {
        Ok(package) => Some(package),
        Err(error) => {
          tracing::warn!("Ignoring {}: {error:#}", manifest.display());
          None
        }
      }
    } else {
      None
    };

    self
      .packages
      .write()
      .insert(dir.to_path_buf(), package.clone());

    package
  }
}

impl Resolver for NodeResolver {
  #[tracing::instrument(level = "trace", skip(self))]
  fn resolve(&self, specifier: &str, from: &Path) -> anyhow::Result<PathBuf> {
    let from_dir = from.parent().unwrap_or(Path::new("/"));

    if is_glob(specifier) {
      return Ok(normalize_path(&from_dir.join(specifier)));
    }

    let resolved = if let Some(rest) = specifier
      .strip_prefix('/')
      .or_else(|| specifier.strip_prefix("~/"))
    {
      let base = normalize_path(&self.root_dir.join(rest));
      self
        .load_as_file(&base)
        .or_else(|| self.load_as_directory(&base))
    } else if specifier.starts_with("./") || specifier.starts_with("../") || specifier == "." {
      let base = normalize_path(&from_dir.join(specifier));
      self
        .load_as_file(&base)
        .or_else(|| self.load_as_directory(&base))
    } else if Path::new(specifier).is_absolute() {
      let base = normalize_path(Path::new(specifier));
      self
        .load_as_file(&base)
        .or_else(|| self.load_as_directory(&base))
    } else {
      self.load_node_module(specifier, from_dir)
    };

    resolved.ok_or_else(|| {
      anyhow::Error::new(
        Diagnostic::new(format!(
          "Cannot resolve dependency '{}' from '{}'",
          specifier,
          from.display()
        ))
        .with_origin("quiver::resolver"),
      )
    })
  }

  fn find_package(&self, dir: &Path) -> anyhow::Result<Option<PackageJson>> {
    for dir in dir.ancestors() {
      if let Some(package) = self.read_package(dir) {
        return Ok(Some(package));
      }
    }

    Ok(None)
  }
}

/// Removes `.` and `..` components without touching the file system
pub fn normalize_path(path: &Path) -> PathBuf {
  let mut normalized = PathBuf::new();
  for component in path.components() {
    match component {
      Component::CurDir => {}
      Component::ParentDir => {
        if !normalized.pop() {
          normalized.push("..");
        }
      }
      component => normalized.push(component),
    }
  }
  normalized
}

#[cfg(test)]
mod tests {
  use pretty_assertions::assert_eq;
  use quiver_filesystem::in_memory_file_system::InMemoryFileSystem;

  use super::*;

  fn resolver(files: &[(&str, &str)]) -> NodeResolver {
    let fs = InMemoryFileSystem::default();
    for (path, contents) in files {
      fs.write_file(Path::new(path), contents.to_string());
    }

    NodeResolver::new(Arc::new(fs), PathBuf::from("/app"))
  }

  #[test]
  fn resolves_relative_specifiers_with_extensions() {
    let resolver = resolver(&[("/app/src/b.js", ""), ("/app/styles/c.css", "")]);

    assert_eq!(
      resolver.resolve("./b", Path::new("/app/src/a.js")).unwrap(),
      PathBuf::from("/app/src/b.js")
    );
    assert_eq!(
      resolver
        .resolve("../styles/c.css", Path::new("/app/src/a.js"))
        .unwrap(),
      PathBuf::from("/app/styles/c.css")
    );
  }

  #[test]
  fn resolves_root_relative_specifiers() {
    let resolver = resolver(&[("/app/lib/util.js", "")]);

    assert_eq!(
      resolver
        .resolve("/lib/util", Path::new("/app/src/deep/a.js"))
        .unwrap(),
      PathBuf::from("/app/lib/util.js")
    );
  }

  #[test]
  fn resolves_packages_through_main_and_index() {
    let resolver = resolver(&[
      (
        "/app/node_modules/lodash/package.json",
        r#"{ "name": "lodash", "main": "lib/lodash" }"#,
      ),
      ("/app/node_modules/lodash/lib/lodash.js", ""),
      ("/app/node_modules/tiny/index.js", ""),
    ]);

    assert_eq!(
      resolver
        .resolve("lodash", Path::new("/app/src/a.js"))
        .unwrap(),
      PathBuf::from("/app/node_modules/lodash/lib/lodash.js")
    );
    assert_eq!(
      resolver.resolve("tiny", Path::new("/app/src/a.js")).unwrap(),
      PathBuf::from("/app/node_modules/tiny/index.js")
    );
  }

  #[test]
  fn missing_files_fail_with_a_diagnostic() {
    let resolver = resolver(&[]);

    let error = resolver
      .resolve("./missing", Path::new("/app/src/a.js"))
      .unwrap_err();

    let diagnostic = error.downcast_ref::<Diagnostic>().unwrap();
    assert_eq!(
      diagnostic.message,
      "Cannot resolve dependency './missing' from '/app/src/a.js'"
    );
  }

  #[test]
  fn globs_resolve_relative_to_the_importer() {
    let resolver = resolver(&[]);

    assert_eq!(
      resolver
        .resolve("./pages/*.js", Path::new("/app/src/a.js"))
        .unwrap(),
      PathBuf::from("/app/src/pages/*.js")
    );
  }

  #[test]
  fn finds_the_nearest_package() {
    let resolver = resolver(&[(
      "/app/package.json",
      r#"{ "name": "app", "sideEffects": false }"#,
    )]);

    let package = resolver
      .find_package(Path::new("/app/src/components"))
      .unwrap()
      .unwrap();

    assert_eq!(package.name.as_deref(), Some("app"));
    assert!(!package.side_effects());
  }

  #[test]
  fn normalizes_paths() {
    assert_eq!(
      normalize_path(Path::new("/app/src/../lib/./a.js")),
      PathBuf::from("/app/lib/a.js")
    );
  }
}
