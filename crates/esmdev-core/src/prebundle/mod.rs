//! Dependency prebundling.
//!
//! Traces the module graph from the configured entries, collects every
//! boundary module (by default, JavaScript inside `node_modules`) and has an
//! external bundler flatten each one into a single ES module under the
//! output directory. The result is a [`BundleMap`] the resolver consults to
//! redirect boundary modules to their bundle.

mod bundle_map;
mod bundler;
mod optimizer;
mod traverse;

pub use bundle_map::{
    BundleMap, CommonjsAnalysis, PrebundleMetadata, BUNDLE_MAP_FILE, COMMONJS_FILE, METADATA_FILE,
};
pub use bundler::{parse_metafile, BundleOutput, BundleRequest, DependencyBundler, EsbuildBundler, MAIN_FIELDS};
pub use optimizer::{DepOptimizer, OptimizedState};
pub use traverse::{html_module_scripts, traverse, TraversalEdge};

use crate::config::DevConfig;
use crate::error::{Error, Result};
use crate::paths;
use crate::plugin::{PluginPipeline, ResolveArgs};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Outcome of a successful prebundle run.
#[derive(Debug, Clone, Default)]
pub struct PrebundleOutput {
    pub bundle_map: BundleMap,
    pub commonjs: CommonjsAnalysis,
}

/// Runs the trace and the external bundler.
pub struct Prebundler {
    config: Arc<DevConfig>,
    bundler: Arc<dyn DependencyBundler>,
}

impl Prebundler {
    pub fn new(config: Arc<DevConfig>, bundler: Arc<dyn DependencyBundler>) -> Self {
        Self { config, bundler }
    }

    /// Prebundle everything reachable from the configured entries.
    ///
    /// `pipeline` is used for tracing only; it must not redirect boundary
    /// modules to bundles. On success the output directory holds the new
    /// bundles and the CommonJS analysis; on failure it is left as it was.
    pub async fn run(&self, pipeline: &PluginPipeline) -> Result<PrebundleOutput> {
        let root = &self.config.root;
        let dest = self.config.out_dir();
        let started = Instant::now();

        let stop = |p: &Path| self.config.needs_prebundle(p);
        let edges = traverse(pipeline, &self.config.entry_paths(), &stop).await?;

        let mut boundary: BTreeSet<PathBuf> = edges
            .into_iter()
            .map(|e| e.resolved)
            .filter(|p| self.config.needs_prebundle(p))
            .collect();
        boundary.extend(self.resolve_included(pipeline).await?);

        let specifiers: Vec<String> = boundary
            .iter()
            .map(|p| paths::root_relative(root, p))
            .collect();
        info!("prebundling [{}]", specifiers.join(", "));

        let parent = dest.parent().unwrap_or(root);
        tokio::fs::create_dir_all(parent).await?;
        let staging = tempfile::Builder::new()
            .prefix(".esmdev-staging")
            .tempdir_in(parent)?;

        let outputs = if boundary.is_empty() {
            Vec::new()
        } else {
            let request = BundleRequest {
                root: root.clone(),
                entries: boundary.into_iter().collect(),
                outdir: staging.path().to_path_buf(),
                define: self.config.define.clone(),
            };
            let secs = self.config.prebundle.timeout_secs;
            tokio::time::timeout(Duration::from_secs(secs), self.bundler.bundle(&request))
                .await
                .map_err(|_| Error::Timeout {
                    what: "prebundle",
                    secs,
                })??
        };

        let mut output = PrebundleOutput::default();
        for out in &outputs {
            let inside = out.output.strip_prefix(staging.path()).map_err(|_| {
                Error::Bundler(format!(
                    "output {} is outside the output directory",
                    out.output.display()
                ))
            })?;
            let bundle = paths::root_relative(root, &dest.join(inside));
            if out.is_commonjs {
                output.commonjs.insert(bundle.clone());
            }
            output
                .bundle_map
                .insert(paths::root_relative(root, &out.entry), bundle);
        }

        output
            .commonjs
            .save(&staging.path().join(COMMONJS_FILE))?;
        PrebundleMetadata {
            hash: PrebundleMetadata::current(root),
            dependencies: output.bundle_map.keys().map(str::to_string).collect(),
        }
        .save(&staging.path().join(METADATA_FILE))?;

        let from = staging.path().to_path_buf();
        tokio::task::spawn_blocking(move || esmdev_util::fs::replace_dir(&from, &dest))
            .await
            .map_err(|e| Error::other(format!("cannot swap in prebundle output: {e}")))??;
        print_stats(&outputs, started.elapsed());
        Ok(output)
    }

    /// Resolve `prebundle.include` specifiers from the project root.
    async fn resolve_included(&self, pipeline: &PluginPipeline) -> Result<Vec<PathBuf>> {
        let importer = self.config.root.join("package.json");
        let mut found = Vec::new();
        for specifier in &self.config.prebundle.include {
            match pipeline
                .resolve(&ResolveArgs::new(specifier.as_str(), &importer))
                .await?
            {
                Some(r) if r.namespace() == crate::plugin::DEFAULT_NAMESPACE => {
                    debug!(specifier = %specifier, path = %r.path, "included dependency");
                    found.push(PathBuf::from(r.path));
                }
                _ => warn!(specifier = %specifier, "cannot resolve included dependency"),
            }
        }
        Ok(found)
    }
}

fn print_stats(outputs: &[BundleOutput], elapsed: Duration) {
    for out in outputs {
        info!(
            entry = %out.entry.display(),
            size = %format_size(out.bytes),
            commonjs = out.is_commonjs,
            "bundled dependency"
        );
    }
    info!(
        count = outputs.len(),
        elapsed_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
        "prebundle finished"
    );
}

#[allow(clippy::cast_precision_loss)]
fn format_size(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{bytes} B")
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KiB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1} MiB", bytes as f64 / (1024.0 * 1024.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(512), "512 B");
        assert_eq!(format_size(2048), "2.0 KiB");
        assert_eq!(format_size(3 * 1024 * 1024), "3.0 MiB");
    }
}
