//! Node-style module resolution.
//!
//! Supports:
//! - Relative and absolute specifiers with extension probing
//! - Directory resolution (`package.json` entry fields, then `index.*`)
//! - Bare specifiers, walking `node_modules` up from the importer
//! - Scoped packages and package sub-paths
//! - `exports` root entry as a string or a condition object
//!
//! Paths are normalized lexically; symlinks are not followed so packages
//! keep their `node_modules` location.

use crate::error::Result;
use crate::paths::{self, is_external_url};
use crate::plugin::{
    HookFilter, HookResult, Plugin, PluginBuild, PluginError, PluginPipeline, ResolveArgs,
    ResolveHook, ResolveResult,
};
use crate::prebundle::MAIN_FIELDS;
use async_trait::async_trait;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// Default extensions for probing. JavaScript wins over TypeScript; `.ts`
/// files are served as is unless a plugin transpiles them.
pub const DEFAULT_EXTENSIONS: &[&str] = &[".js", ".jsx", ".mjs", ".cjs", ".ts", ".tsx", ".json"];

const EXPORT_CONDITIONS: &[&str] = &["browser", "import", "module", "default"];

/// Hook called with every resolved file; may point it somewhere else.
#[async_trait]
pub trait ResolvedRedirect: Send + Sync {
    async fn redirect(&self, resolved: &Path, importer: Option<&str>) -> Result<Option<PathBuf>>;
}

/// Resolves relative, absolute and bare specifiers on disk.
pub struct NodeResolvePlugin {
    extensions: Vec<String>,
    redirect: Option<Arc<dyn ResolvedRedirect>>,
}

impl NodeResolvePlugin {
    #[must_use]
    pub fn new() -> Self {
        Self {
            extensions: DEFAULT_EXTENSIONS.iter().map(|e| (*e).to_string()).collect(),
            redirect: None,
        }
    }

    /// Pass every resolved path through `redirect`.
    #[must_use]
    pub fn with_redirect(mut self, redirect: Arc<dyn ResolvedRedirect>) -> Self {
        self.redirect = Some(redirect);
        self
    }

    #[must_use]
    pub fn with_extensions(mut self, extensions: &[&str]) -> Self {
        self.extensions = extensions.iter().map(|e| (*e).to_string()).collect();
        self
    }
}

impl Default for NodeResolvePlugin {
    fn default() -> Self {
        Self::new()
    }
}

impl Plugin for NodeResolvePlugin {
    fn name(&self) -> &str {
        "node-resolve"
    }

    fn setup(self: Arc<Self>, build: &mut PluginBuild<'_>) {
        build.on_resolve(HookFilter::any(), self);
    }
}

#[async_trait]
impl ResolveHook for NodeResolvePlugin {
    async fn resolve(
        &self,
        args: &ResolveArgs,
        pipeline: &PluginPipeline,
    ) -> HookResult<Option<ResolveResult>> {
        let spec = args.path.as_str();
        if spec.starts_with("node:") || is_external_url(spec) {
            return Ok(None);
        }
        let dir = args
            .resolve_dir
            .clone()
            .unwrap_or_else(|| pipeline.root().to_path_buf());

        let Some(resolved) = resolve_specifier(spec, &dir, &self.extensions) else {
            debug!(specifier = spec, dir = %dir.display(), "node-resolve: not found");
            return Ok(None);
        };

        if let Some(redirect) = &self.redirect {
            let target = redirect
                .redirect(&resolved, args.importer.as_deref())
                .await
                .map_err(|e| PluginError::msg(e.to_string()))?;
            if let Some(bundle) = target {
                debug!(from = %resolved.display(), to = %bundle.display(), "redirected to bundle");
                return Ok(Some(ResolveResult::file(bundle.to_string_lossy())));
            }
        }
        Ok(Some(ResolveResult::file(resolved.to_string_lossy())))
    }
}

/// Resolve `spec` from the directory `dir`.
#[must_use]
pub fn resolve_specifier(spec: &str, dir: &Path, extensions: &[String]) -> Option<PathBuf> {
    if spec.is_empty() {
        return None;
    }
    if spec.starts_with("./") || spec.starts_with("../") || spec == "." || spec == ".." {
        return resolve_path(&paths::normalize(&dir.join(spec)), extensions);
    }
    if Path::new(spec).is_absolute() {
        return resolve_path(&paths::normalize(Path::new(spec)), extensions);
    }
    resolve_bare(spec, dir, extensions)
}

/// Resolve a file path: exact, then with extensions, then as a directory.
fn resolve_path(base: &Path, extensions: &[String]) -> Option<PathBuf> {
    if base.is_file() {
        return Some(base.to_path_buf());
    }
    for ext in extensions {
        let mut with_ext = base.as_os_str().to_owned();
        with_ext.push(ext);
        let with_ext = PathBuf::from(with_ext);
        if with_ext.is_file() {
            return Some(with_ext);
        }
    }
    if base.is_dir() {
        return resolve_directory(base, extensions);
    }
    None
}

/// Resolve a directory (package.json entry > index.*).
fn resolve_directory(dir: &Path, extensions: &[String]) -> Option<PathBuf> {
    if let Some(pkg) = read_package_json(&dir.join("package.json")) {
        if let Some(entry) = package_entry(&pkg) {
            let target = paths::normalize(&dir.join(entry));
            if target != dir {
                if let Some(found) = resolve_path(&target, extensions) {
                    return Some(found);
                }
            }
        }
    }
    extensions.iter().find_map(|ext| {
        let index = dir.join(format!("index{ext}"));
        index.is_file().then_some(index)
    })
}

/// Resolve a bare specifier by walking `node_modules` upward.
fn resolve_bare(spec: &str, dir: &Path, extensions: &[String]) -> Option<PathBuf> {
    let (name, subpath) = parse_bare_specifier(spec);
    let mut current = Some(dir);
    while let Some(d) = current {
        let pkg_dir = d.join("node_modules").join(name);
        if pkg_dir.is_dir() {
            return match subpath {
                Some(sub) => resolve_path(&pkg_dir.join(sub), extensions),
                None => resolve_directory(&pkg_dir, extensions),
            };
        }
        current = d.parent();
    }
    None
}

/// Split a bare specifier into package name and optional sub-path.
fn parse_bare_specifier(spec: &str) -> (&str, Option<&str>) {
    let name_end = if spec.starts_with('@') {
        spec.match_indices('/').nth(1).map(|(i, _)| i)
    } else {
        spec.find('/')
    };
    match name_end {
        Some(i) => (&spec[..i], Some(&spec[i + 1..]).filter(|s| !s.is_empty())),
        None => (spec, None),
    }
}

fn read_package_json(path: &Path) -> Option<Value> {
    let content = std::fs::read_to_string(path).ok()?;
    serde_json::from_str(&content).ok()
}

/// Entry file of a package: `exports["."]`, then the main fields.
fn package_entry(pkg: &Value) -> Option<&str> {
    if let Some(exports) = pkg.get("exports") {
        let root = exports.get(".").unwrap_or(exports);
        if let Some(target) = export_target(root) {
            return Some(target);
        }
    }
    MAIN_FIELDS
        .iter()
        .find_map(|field| pkg.get(*field).and_then(Value::as_str))
        .filter(|s| !s.is_empty())
}

fn export_target(value: &Value) -> Option<&str> {
    match value {
        Value::String(s) => Some(s.as_str()),
        Value::Object(map) => EXPORT_CONDITIONS
            .iter()
            .find_map(|c| map.get(*c).and_then(export_target)),
        _ => None,
    }
}
