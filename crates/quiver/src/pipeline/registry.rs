use std::collections::BTreeMap;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use anyhow::anyhow;
use quiver_filesystem::is_glob;

use super::AssetHandler;
use crate::handlers::CssHandler;
use crate::handlers::GlobHandler;
use crate::handlers::JsHandler;
use crate::handlers::JsonHandler;
use crate::handlers::RawHandler;

const BUILTIN_EXTENSIONS: [(&str, &str); 9] = [
  ("js", "js"),
  ("jsx", "js"),
  ("es6", "js"),
  ("mjs", "js"),
  ("cjs", "js"),
  ("json", "json"),
  ("json5", "json"),
  ("css", "css"),
  ("pcss", "css"),
];

/// Selects the handler of an asset by its extension
///
/// Unknown extensions are handled as raw files that are copied to the output, and glob
/// patterns expand to an object of every matching file.
#[derive(Debug)]
pub struct HandlerRegistry {
  extensions: HashMap<String, Arc<dyn AssetHandler>>,
  handlers: HashMap<&'static str, Arc<dyn AssetHandler>>,
  glob: Arc<dyn AssetHandler>,
  raw: Arc<dyn AssetHandler>,
}

impl HandlerRegistry {
  /// The builtin handlers, plus `extensions` mapping further extensions to handler names
  pub fn new(extensions: &BTreeMap<String, String>) -> anyhow::Result<Self> {
    let handlers: Vec<Arc<dyn AssetHandler>> = vec![
      Arc::new(CssHandler),
      Arc::new(JsHandler),
      Arc::new(JsonHandler),
    ];

    let mut registry = HandlerRegistry {
      extensions: HashMap::new(),
      handlers: handlers
        .into_iter()
        .map(|handler| (handler.name(), handler))
        .collect(),
      glob: Arc::new(GlobHandler),
      raw: Arc::new(RawHandler),
    };

    for (extension, handler) in BUILTIN_EXTENSIONS {
      registry.register_extension(extension, handler)?;
    }

    for (extension, handler) in extensions {
      registry.register_extension(extension, handler)?;
    }

    Ok(registry)
  }

  pub fn register_extension(&mut self, extension: &str, handler: &str) -> anyhow::Result<()> {
    let handler = match handler {
      "raw" => self.raw.clone(),
      name => self
        .handlers
        .get(name)
        .cloned()
        .ok_or_else(|| anyhow!("Unknown asset handler '{}' for extension '{}'", name, extension))?,
    };

    self.extensions.insert(
      extension.trim_start_matches('.').to_lowercase(),
      handler,
    );

    Ok(())
  }

  /// Finds the handler for a path
  ///
  /// Paths looked up from inside the pipeline are never treated as globs, they name a
  /// rendition of a file that exists.
  pub fn find(&self, path: &Path, from_pipeline: bool) -> Arc<dyn AssetHandler> {
    if !from_pipeline && is_glob(&path.to_string_lossy()) {
      return self.glob.clone();
    }

    path
      .extension()
      .and_then(|extension| {
        self
          .extensions
          .get(&extension.to_string_lossy().to_lowercase())
      })
      .cloned()
      .unwrap_or_else(|| self.raw.clone())
  }

  /// Every extension with a registered handler
  pub fn extensions(&self) -> impl Iterator<Item = &str> {
    self.extensions.keys().map(|extension| extension.as_str())
  }
}
