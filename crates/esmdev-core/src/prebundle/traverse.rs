//! Dependency trace from entry points to the third-party boundary.
//!
//! Modules are expanded breadth-first through the plugin pipeline's resolve
//! and load hooks. Boundary modules are recorded but never expanded, and a
//! module is expanded at most once however many paths reach it.

use crate::error::Result;
use crate::imports::scan_imports;
use crate::paths::is_external_url;
use crate::plugin::{LoadArgs, Loader, PluginPipeline, ResolveArgs, DEFAULT_NAMESPACE};
use crate::rewrite::literal_dynamic_specifier;
use futures::future::join_all;
use regex_lite::Regex;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tracing::{debug, warn};

/// An import discovered during the trace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraversalEdge {
    pub importer: PathBuf,
    pub resolved: PathBuf,
}

/// Trace imports from `entries`, stopping at modules where `stop` holds.
///
/// Edges are deduplicated by resolved path. Specifiers that cannot be
/// resolved are reported and skipped.
pub async fn traverse(
    pipeline: &PluginPipeline,
    entries: &[PathBuf],
    stop: &(dyn Fn(&Path) -> bool + Sync),
) -> Result<Vec<TraversalEdge>> {
    let mut visited: HashSet<PathBuf> = entries.iter().cloned().collect();
    let mut seen_importees = HashSet::new();
    let mut edges = Vec::new();
    let mut frontier: Vec<PathBuf> = entries.to_vec();
    let mut depth = 0usize;

    while !frontier.is_empty() {
        debug!(depth, modules = frontier.len(), "tracing level");
        let levels = join_all(frontier.iter().map(|m| imports_of(pipeline, m))).await;

        let mut next = Vec::new();
        for (importer, imports) in frontier.iter().zip(levels) {
            for resolved in imports? {
                if seen_importees.insert(resolved.clone()) {
                    edges.push(TraversalEdge {
                        importer: importer.clone(),
                        resolved: resolved.clone(),
                    });
                }
                if !stop(&resolved) && visited.insert(resolved.clone()) {
                    next.push(resolved);
                }
            }
        }
        frontier = next;
        depth += 1;
    }

    Ok(edges)
}

/// Resolved file-namespace imports of one module.
async fn imports_of(pipeline: &PluginPipeline, module: &Path) -> Result<Vec<PathBuf>> {
    let path = module.to_string_lossy();
    let Some(loaded) = pipeline.load(&LoadArgs::new(path.as_ref(), None)).await? else {
        warn!(module = %module.display(), "cannot load module during traversal");
        return Ok(Vec::new());
    };

    let loader = loaded.loader.unwrap_or_else(|| Loader::from_path(module));
    let specifiers = match loader {
        Loader::Html => html_module_scripts(&loaded.contents),
        Loader::Js | Loader::Jsx | Loader::Ts | Loader::Tsx => {
            script_specifiers(module, &loaded.contents)
        }
        _ => return Ok(Vec::new()),
    };

    let mut resolved = Vec::new();
    for specifier in specifiers {
        if is_external_url(&specifier) {
            continue;
        }
        let found = pipeline.resolve(&ResolveArgs::new(&specifier, module)).await?;
        match found {
            Some(r) if r.namespace() == DEFAULT_NAMESPACE && !r.external => {
                resolved.push(PathBuf::from(r.path));
            }
            Some(_) => {}
            None => {
                warn!(
                    specifier = %specifier,
                    importer = %module.display(),
                    "cannot resolve during traversal"
                );
            }
        }
    }
    Ok(resolved)
}

fn script_specifiers(module: &Path, source: &str) -> Vec<String> {
    let imports = match scan_imports(source) {
        Ok(imports) => imports,
        Err(e) => {
            warn!(module = %module.display(), error = %e, "failed to scan imports during traversal");
            return Vec::new();
        }
    };
    imports
        .iter()
        .filter_map(|span| {
            let raw = span.specifier(source);
            if span.is_dynamic() {
                literal_dynamic_specifier(raw)
            } else {
                Some(raw.to_string())
            }
        })
        .collect()
}

/// `src` of every `<script type="module" src="...">` in an HTML page.
pub fn html_module_scripts(html: &str) -> Vec<String> {
    static SCRIPT: OnceLock<Option<Regex>> = OnceLock::new();
    static SRC: OnceLock<Option<Regex>> = OnceLock::new();

    let (Some(script), Some(src)) = (
        SCRIPT
            .get_or_init(|| Regex::new(r"(?i)<script\b([^>]*)>").ok())
            .as_ref(),
        SRC.get_or_init(|| Regex::new(r#"(?i)\bsrc\s*=\s*(?:"([^"]*)"|'([^']*)')"#).ok())
            .as_ref(),
    ) else {
        return Vec::new();
    };

    script
        .captures_iter(html)
        .filter_map(|caps| {
            let attrs = caps.get(1)?.as_str();
            let lower = attrs.to_ascii_lowercase();
            if !lower.contains("type=\"module\"") && !lower.contains("type='module'") {
                return None;
            }
            let src = src.captures(attrs)?;
            src.get(1).or_else(|| src.get(2)).map(|m| m.as_str().to_string())
        })
        .filter(|s| !s.is_empty())
        .collect()
}
