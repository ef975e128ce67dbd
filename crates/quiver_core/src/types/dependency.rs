use indexmap::IndexMap;
use serde::Deserialize;
use serde::Serialize;

use super::SourceLocation;

/// A dependency denotes a connection between two assets
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Dependency {
  /// The import specifier, unique within the declaring asset
  pub name: String,

  /// Loaded on demand, which places the target in a child bundle
  pub dynamic: bool,

  /// The target is physically inlined into the parent, such as an imported stylesheet
  ///
  /// These dependencies are watched rather than loaded, and their modification time is
  /// recorded in the cache entry of the parent.
  pub included_in_parent: bool,

  /// Resolution failures are ignored
  pub optional: bool,

  /// Set by scope hoisting when the import is conditional, forcing the target to be wrapped
  pub should_wrap: bool,

  /// Marks the dependency of a configured entry. Nothing sets this at the moment, so bundle
  /// naming treats it as always false.
  pub entry: bool,

  /// Modification time captured when the parent was written to the cache
  #[serde(skip_serializing_if = "Option::is_none")]
  pub mtime: Option<u64>,

  #[serde(skip_serializing_if = "Option::is_none")]
  pub loc: Option<SourceLocation>,
}

impl Dependency {
  pub fn new(name: impl Into<String>) -> Self {
    Dependency {
      name: name.into(),
      ..Dependency::default()
    }
  }

  pub fn dynamic(name: impl Into<String>) -> Self {
    Dependency {
      dynamic: true,
      ..Dependency::new(name)
    }
  }

  pub fn included_in_parent(name: impl Into<String>) -> Self {
    Dependency {
      included_in_parent: true,
      ..Dependency::new(name)
    }
  }
}

/// Ordered mapping from the declared import name to its dependency
///
/// Adding a dependency under an existing name replaces the previous declaration in place, so
/// a name is never listed twice.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Dependencies(IndexMap<String, Dependency>);

impl Dependencies {
  pub fn add(&mut self, dependency: Dependency) {
    self.0.insert(dependency.name.clone(), dependency);
  }

  pub fn get(&self, name: &str) -> Option<&Dependency> {
    self.0.get(name)
  }

  pub fn get_mut(&mut self, name: &str) -> Option<&mut Dependency> {
    self.0.get_mut(name)
  }

  pub fn iter(&self) -> impl Iterator<Item = &Dependency> {
    self.0.values()
  }

  pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Dependency> {
    self.0.values_mut()
  }

  pub fn len(&self) -> usize {
    self.0.len()
  }

  pub fn is_empty(&self) -> bool {
    self.0.is_empty()
  }

  pub fn clear(&mut self) {
    self.0.clear();
  }

  pub fn into_vec(self) -> Vec<Dependency> {
    self.0.into_values().collect()
  }
}

impl FromIterator<Dependency> for Dependencies {
  fn from_iter<I: IntoIterator<Item = Dependency>>(iter: I) -> Self {
    let mut dependencies = Dependencies::default();
    for dependency in iter {
      dependencies.add(dependency);
    }
    dependencies
  }
}

impl Serialize for Dependencies {
  fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
  where
    S: serde::Serializer,
  {
    serializer.collect_seq(self.0.values())
  }
}

impl<'de> Deserialize<'de> for Dependencies {
  fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
  where
    D: serde::Deserializer<'de>,
  {
    let dependencies: Vec<Dependency> = Deserialize::deserialize(deserializer)?;
    Ok(dependencies.into_iter().collect())
  }
}
