use std::collections::HashSet;
use std::path::Path;
use std::path::PathBuf;
use std::sync::LazyLock;

use quiver_core::types::Dependency;
use quiver_core::types::FileType;
use quiver_core::types::Rendition;
use regex::Captures;
use regex::Regex;

use super::location_at;
use crate::pipeline::Asset;
use crate::pipeline::AssetHandler;
use crate::pipeline::Generation;
use crate::pipeline::HandlerError;
use crate::pipeline::PipelineContext;

static IMPORT_RE: LazyLock<Regex> = LazyLock::new(|| {
  Regex::new(r#"@import\s+(?:url\(\s*)?['"]?([^'")\s;]+)['"]?\s*\)?[^;]*;"#)
    .expect("valid import pattern")
});

static URL_RE: LazyLock<Regex> = LazyLock::new(|| {
  Regex::new(r#"url\(\s*(?:"([^"]*)"|'([^']*)'|([^)'"\s]*))\s*\)"#).expect("valid url pattern")
});

static COMMENT_RE: LazyLock<Regex> =
  LazyLock::new(|| Regex::new(r"(?s)/\*.*?\*/").expect("valid comment pattern"));

/// Stylesheets
///
/// `@import`ed stylesheets are inlined into the importing one, and files referenced through
/// `url()` become bundles of their own. Every stylesheet also produces an empty script so
/// that importing it from a script is valid.
#[derive(Debug)]
pub struct CssHandler;

impl AssetHandler for CssHandler {
  fn name(&self) -> &'static str {
    "css"
  }

  fn asset_type(&self, _path: &Path) -> Option<FileType> {
    Some(FileType::Css)
  }

  fn might_have_dependencies(&self, asset: &Asset) -> bool {
    let code = asset.code();
    code.contains("@import") || code.contains("url(")
  }

  fn collect_dependencies(&self, asset: &mut Asset, ctx: &PipelineContext) -> anyhow::Result<()> {
    let code = asset.code().to_string();
    for captures in IMPORT_RE.captures_iter(&code) {
      let (Some(statement), Some(specifier)) = (captures.get(0), captures.get(1)) else {
        continue;
      };

      if is_remote(specifier.as_str()) {
        continue;
      }

      let resolved = resolve_import(ctx, specifier.as_str(), &asset.name).map_err(|error| {
        HandlerError::at(format!("{error:#}"), location_at(&code, statement.start()))
      })?;

      asset.add_dependency(Dependency {
        loc: Some(location_at(&code, statement.start())),
        ..Dependency::included_in_parent(resolved.to_string_lossy())
      });
    }

    Ok(())
  }

  fn transform(&self, asset: &mut Asset, ctx: &PipelineContext) -> anyhow::Result<()> {
    let mut seen = HashSet::from([asset.name.clone()]);
    let inlined = inline_imports(ctx, &asset.name, asset.code(), &mut seen)?;

    let rewritten = URL_RE
      .replace_all(&inlined, |captures: &Captures| {
        let url = captures
          .get(1)
          .or_else(|| captures.get(2))
          .or_else(|| captures.get(3))
          .map(|url| url.as_str())
          .unwrap_or_default();

        format!("url(\"{}\")", asset.add_url_dependency(url, ctx))
      })
      .to_string();

    asset.contents = Some(if ctx.options.build.minify {
      minify(&rewritten)
    } else {
      rewritten
    });

    Ok(())
  }

  fn generate(&self, asset: &mut Asset, _ctx: &PipelineContext) -> anyhow::Result<Generation> {
    Ok(Generation::Renditions(vec![
      Rendition::new(FileType::Css, asset.code()),
      Rendition::new(FileType::Js, "").without_dependencies(),
    ]))
  }
}

fn is_remote(specifier: &str) -> bool {
  specifier.contains("://") || specifier.starts_with("//")
}

fn resolve_import(ctx: &PipelineContext, specifier: &str, from: &Path) -> anyhow::Result<PathBuf> {
  let specifier = if specifier.starts_with('.') || specifier.starts_with('/') || specifier.starts_with('~') {
    specifier.to_string()
  } else {
    format!("./{specifier}")
  };

  ctx.resolver.resolve(&specifier, from)
}

/// Replaces `@import` statements with the imported source, recursively
///
/// A stylesheet is only inlined once, later imports of it are dropped.
fn inline_imports(
  ctx: &PipelineContext,
  path: &Path,
  code: &str,
  seen: &mut HashSet<PathBuf>,
) -> anyhow::Result<String> {
  let mut output = String::with_capacity(code.len());
  let mut last = 0;

  for captures in IMPORT_RE.captures_iter(code) {
    let (Some(statement), Some(specifier)) = (captures.get(0), captures.get(1)) else {
      continue;
    };

    if is_remote(specifier.as_str()) {
      continue;
    }

    output.push_str(&code[last..statement.start()]);
    last = statement.end();

    let resolved = resolve_import(ctx, specifier.as_str(), path)?;
    if !seen.insert(resolved.clone()) {
      continue;
    }

    let imported = ctx.fs.read_to_string(&resolved)?;
    output.push_str(&inline_imports(ctx, &resolved, &imported, seen)?);
  }

  output.push_str(&code[last..]);
  Ok(output)
}

fn minify(code: &str) -> String {
  COMMENT_RE
    .replace_all(code, "")
    .lines()
    .map(str::trim)
    .filter(|line| !line.is_empty())
    .collect::<Vec<_>>()
    .join("")
}

#[cfg(test)]
mod tests {
  use std::sync::Arc;

  use pretty_assertions::assert_eq;
  use quiver_core::types::BuildOptions;
  use quiver_filesystem::in_memory_file_system::InMemoryFileSystem;
  use quiver_filesystem::FileSystemRef;

  use super::*;
  use crate::pipeline::HandlerRegistry;
  use crate::pipeline::Pipeline;
  use crate::pipeline::PipelineOptions;
  use crate::resolver::NodeResolver;

  fn pipeline(files: &[(&str, &str)]) -> Pipeline {
    let fs = Arc::new(InMemoryFileSystem::default());
    for (path, contents) in files {
      fs.write_file(Path::new(path), contents.to_string());
    }

    let fs: FileSystemRef = fs;
    let build = BuildOptions {
      source_maps: false,
      ..BuildOptions::default()
    };

    Pipeline::new(PipelineContext {
      registry: Arc::new(HandlerRegistry::new(&build.extensions).unwrap()),
      options: Arc::new(PipelineOptions {
        build,
        root_dir: PathBuf::from("/app"),
        entry_files: Vec::new(),
      }),
      resolver: Arc::new(NodeResolver::new(fs.clone(), PathBuf::from("/app"))),
      fs,
    })
  }

  #[test]
  fn inlines_imports() {
    let pipeline = pipeline(&[
      ("/app/a.css", "@import './b.css';\n.a { color: red; }"),
      ("/app/b.css", ".b { color: blue; }\n"),
    ]);

    let processed = pipeline.process(Path::new("/app/a.css"), false).unwrap();

    assert_eq!(
      processed.generated[&FileType::Css].to_code(),
      ".b { color: blue; }\n\n.a { color: red; }"
    );
    assert_eq!(processed.generated[&FileType::Js].to_code(), "");

    let dependency = processed.dependencies.get("/app/b.css").unwrap();
    assert!(dependency.included_in_parent);
  }

  #[test]
  fn urls_become_bundle_references() {
    let pipeline = pipeline(&[
      ("/app/a.css", ".logo { background: url('./img/logo.png?v=1'); }"),
      ("/app/img/logo.png", "PNG"),
    ]);

    let processed = pipeline.process(Path::new("/app/a.css"), false).unwrap();

    let dependency = processed.dependencies.get("./img/logo.png").unwrap();
    assert!(dependency.dynamic);

    let css = processed.generated[&FileType::Css].to_code();
    assert!(css.starts_with(".logo { background: url(\""));
    assert!(css.ends_with(".png?v=1\"); }"));
  }

  #[test]
  fn leaves_remote_and_inline_urls() {
    let pipeline = pipeline(&[(
      "/app/a.css",
      ".a { background: url(data:image/png;base64,AAAA); }\n.b { background: url(\"https://example.com/b.png\"); }",
    )]);

    let processed = pipeline.process(Path::new("/app/a.css"), false).unwrap();

    assert!(processed.dependencies.is_empty());
    assert!(processed.generated[&FileType::Css]
      .to_code()
      .contains("url(\"https://example.com/b.png\")"));
  }

  #[test]
  fn missing_imports_point_at_the_statement() {
    let pipeline = pipeline(&[("/app/a.css", ".a {}\n@import './missing.css';")]);

    let error = pipeline
      .process(Path::new("/app/a.css"), false)
      .unwrap_err();

    let diagnostic = error
      .downcast_ref::<quiver_core::diagnostic::Diagnostic>()
      .unwrap();
    assert_eq!(diagnostic.origin.as_deref(), Some("css"));
    assert!(diagnostic.message.starts_with("Cannot resolve dependency './missing.css'"));
  }

  #[test]
  fn minifies() {
    assert_eq!(
      minify("/* header */\n.a {\n  color: red;\n}\n"),
      ".a {color: red;}"
    );
  }
}
