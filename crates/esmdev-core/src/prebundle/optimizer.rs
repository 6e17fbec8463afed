//! Live dependency optimizer.
//!
//! Holds the current bundle map and CommonJS analysis, and reruns the
//! prebundler when a boundary module has no bundle yet. Concurrent misses
//! share one run; the new state replaces the old one only after it has been
//! persisted, and clients are told to reload.

use super::{BundleMap, CommonjsAnalysis, DependencyBundler, PrebundleMetadata, Prebundler};
use super::{BUNDLE_MAP_FILE, COMMONJS_FILE, METADATA_FILE};
use crate::config::DevConfig;
use crate::error::{Error, Result};
use crate::hmr::{HmrBroadcaster, HmrPayload};
use crate::paths;
use crate::plugin::PluginPipeline;
use crate::plugins::ResolvedRedirect;
use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::{Mutex, RwLock};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

/// Bundle map and interop analysis of the latest successful run.
#[derive(Debug, Clone, Default)]
pub struct OptimizedState {
    pub bundle_map: BundleMap,
    pub commonjs: CommonjsAnalysis,
}

type Run = Shared<BoxFuture<'static, Result<Arc<OptimizedState>, Arc<Error>>>>;

/// Shared handle to the optimizer.
#[derive(Clone)]
pub struct DepOptimizer {
    inner: Arc<Inner>,
}

struct Inner {
    config: Arc<DevConfig>,
    prebundler: Prebundler,
    trace: Arc<PluginPipeline>,
    hmr: HmrBroadcaster,
    state: RwLock<Arc<OptimizedState>>,
    inflight: Mutex<Option<Run>>,
    runs: AtomicU64,
}

impl DepOptimizer {
    /// Create an optimizer, warm-started from the output directory.
    ///
    /// `trace` is the pipeline used to walk the module graph during a run.
    pub fn new(
        config: Arc<DevConfig>,
        bundler: Arc<dyn DependencyBundler>,
        trace: Arc<PluginPipeline>,
        hmr: HmrBroadcaster,
    ) -> Self {
        let state = warm_state(&config);
        Self {
            inner: Arc::new(Inner {
                prebundler: Prebundler::new(config.clone(), bundler),
                config,
                trace,
                hmr,
                state: RwLock::new(Arc::new(state)),
                inflight: Mutex::new(None),
                runs: AtomicU64::new(0),
            }),
        }
    }

    /// Current state. Cheap; the state is swapped, never mutated.
    #[must_use]
    pub fn state(&self) -> Arc<OptimizedState> {
        self.inner.state.read().clone()
    }

    /// Whether `path` is a bundle built from CommonJS.
    #[must_use]
    pub fn is_commonjs(&self, path: &Path) -> bool {
        self.state().commonjs.is_commonjs(&self.inner.config.root, path)
    }

    /// Number of prebundle runs started so far.
    #[must_use]
    pub fn runs(&self) -> u64 {
        self.inner.runs.load(Ordering::SeqCst)
    }

    /// Bundle serving `resolved`, prebundling first when it has none yet.
    ///
    /// Returns `Ok(None)` for modules outside the boundary.
    pub async fn bundle_for(&self, resolved: &Path, importer: Option<&str>) -> Result<Option<PathBuf>> {
        let config = &self.inner.config;
        if !config.needs_prebundle(resolved) {
            return Ok(None);
        }
        if let Some(bundle) = self.state().bundle_map.lookup(&config.root, resolved) {
            return Ok(Some(bundle));
        }

        let specifier = paths::root_relative(&config.root, resolved);
        info!(
            specifier = %specifier,
            importer = importer.unwrap_or("<entry>"),
            "found module not bundled yet, running prebundle"
        );
        let state = self.optimize().await?;
        state
            .bundle_map
            .lookup(&config.root, resolved)
            .map(Some)
            .ok_or(Error::BundleMissing { specifier })
    }

    /// Run the prebundler, or join the run already in flight.
    ///
    /// The run is a spawned task: it finishes even when every caller
    /// waiting on it goes away.
    pub async fn optimize(&self) -> Result<Arc<OptimizedState>> {
        let run = {
            let mut inflight = self.inner.inflight.lock();
            if let Some(run) = inflight.as_ref() {
                debug!("joining in-flight prebundle");
                run.clone()
            } else {
                let run = spawn_run(self.inner.clone());
                *inflight = Some(run.clone());
                run
            }
        };
        run.await.map_err(Error::prebundle_shared)
    }
}

/// Start a run on the runtime. The task clears `inflight` when it ends, so
/// the next miss starts a fresh run.
fn spawn_run(inner: Arc<Inner>) -> Run {
    let task = tokio::spawn(async move {
        let result = run_once(inner.clone()).await;
        *inner.inflight.lock() = None;
        result
    });
    async move {
        task.await.unwrap_or_else(|e| {
            Err(Arc::new(Error::other(format!("prebundle task failed: {e}"))))
        })
    }
    .boxed()
    .shared()
}

#[async_trait]
impl ResolvedRedirect for DepOptimizer {
    async fn redirect(&self, resolved: &Path, importer: Option<&str>) -> Result<Option<PathBuf>> {
        self.bundle_for(resolved, importer).await
    }
}

async fn run_once(inner: Arc<Inner>) -> Result<Arc<OptimizedState>, Arc<Error>> {
    inner.runs.fetch_add(1, Ordering::SeqCst);
    let output = inner.prebundler.run(&inner.trace).await.map_err(Arc::new)?;

    let map_path = inner.config.out_dir().join(BUNDLE_MAP_FILE);
    output.bundle_map.save(&map_path).map_err(Arc::new)?;

    let state = Arc::new(OptimizedState {
        bundle_map: output.bundle_map,
        commonjs: output.commonjs,
    });
    *inner.state.write() = state.clone();
    inner.hmr.send(HmrPayload::Reload);
    Ok(state)
}

fn warm_state(config: &DevConfig) -> OptimizedState {
    let dir = config.out_dir();
    if let Some(meta) = PrebundleMetadata::load(&dir.join(METADATA_FILE)) {
        if meta.hash != PrebundleMetadata::current(&config.root) {
            info!("dependencies changed since last prebundle, starting cold");
            return OptimizedState::default();
        }
    }
    let state = OptimizedState {
        bundle_map: BundleMap::load_or_empty(&dir.join(BUNDLE_MAP_FILE)),
        commonjs: CommonjsAnalysis::load_or_empty(&dir.join(COMMONJS_FILE)),
    };
    debug!(bundles = state.bundle_map.len(), "loaded cached bundle map");
    state
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin::{load_fn, resolve_fn, FnPlugin, HookFilter, LoadResult, ResolveResult};
    use crate::prebundle::{BundleOutput, BundleRequest};
    use std::time::Duration;

    /// Writes `export default 1` per entry; entries under `cjs-*` are CommonJS.
    struct FakeBundler {
        delay: Duration,
        fail: bool,
    }

    #[async_trait]
    impl DependencyBundler for FakeBundler {
        async fn bundle(&self, request: &BundleRequest) -> Result<Vec<BundleOutput>> {
            tokio::time::sleep(self.delay).await;
            if self.fail {
                return Err(Error::Bundler("boom".into()));
            }
            let mut outputs = Vec::new();
            for entry in &request.entries {
                let rel = entry.strip_prefix(&request.root).unwrap();
                let output = request.outdir.join(rel);
                std::fs::create_dir_all(output.parent().unwrap()).unwrap();
                std::fs::write(&output, "export default 1").unwrap();
                outputs.push(BundleOutput {
                    entry: entry.clone(),
                    output,
                    is_commonjs: entry.to_string_lossy().contains("cjs-"),
                    bytes: 16,
                });
            }
            Ok(outputs)
        }
    }

    fn trace_pipeline(root: &Path) -> Arc<PluginPipeline> {
        let root = root.to_path_buf();
        let plugin = FnPlugin::new("memory", move |build| {
            let root = root.clone();
            build.on_resolve(
                HookFilter::any(),
                resolve_fn(move |args| {
                    let path = root.join("node_modules").join(&args.path).join("index.js");
                    Ok(Some(ResolveResult::file(path.to_string_lossy())))
                }),
            );
            build.on_load(
                HookFilter::new(r"main\.js$").unwrap(),
                load_fn(|_| Ok(Some(LoadResult::contents("import 'react'; import 'cjs-lib';")))),
            );
        });
        Arc::new(PluginPipeline::new("/", vec![plugin]))
    }

    fn optimizer(root: &Path, fail: bool) -> (DepOptimizer, HmrBroadcaster) {
        optimizer_with(root, fail, |_| {})
    }

    fn optimizer_with(
        root: &Path,
        fail: bool,
        configure: impl FnOnce(&mut DevConfig),
    ) -> (DepOptimizer, HmrBroadcaster) {
        let mut config = DevConfig::new(root.to_path_buf());
        config.entries = vec!["main.js".into()];
        configure(&mut config);
        let hmr = HmrBroadcaster::default();
        let optimizer = DepOptimizer::new(
            Arc::new(config),
            Arc::new(FakeBundler {
                delay: Duration::from_millis(20),
                fail,
            }),
            trace_pipeline(root),
            hmr.clone(),
        );
        (optimizer, hmr)
    }

    #[tokio::test]
    async fn test_concurrent_misses_share_one_run() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        let (optimizer, hmr) = optimizer(root, false);
        let mut rx = hmr.subscribe();

        let react = root.join("node_modules/react/index.js");
        let lib = root.join("node_modules/cjs-lib/index.js");
        let (a, b) = tokio::join!(
            optimizer.bundle_for(&react, Some("/src/a.js")),
            optimizer.bundle_for(&lib, Some("/src/b.js")),
        );

        assert_eq!(optimizer.runs(), 1);
        assert_eq!(
            a.unwrap(),
            Some(root.join("web_modules/node_modules/react/index.js"))
        );
        let lib_bundle = b.unwrap().unwrap();
        assert!(optimizer.is_commonjs(&lib_bundle));
        assert_eq!(rx.recv().await.unwrap(), HmrPayload::Reload);

        // Hit: no further run
        optimizer.bundle_for(&react, None).await.unwrap();
        assert_eq!(optimizer.runs(), 1);
    }

    #[tokio::test]
    async fn test_outside_boundary_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let (optimizer, _) = optimizer(dir.path(), false);
        let out = optimizer
            .bundle_for(&dir.path().join("src/a.js"), None)
            .await
            .unwrap();
        assert_eq!(out, None);
        assert_eq!(optimizer.runs(), 0);
    }

    #[tokio::test]
    async fn test_not_traced_is_bundle_missing() {
        let dir = tempfile::tempdir().unwrap();
        let (optimizer, _) = optimizer(dir.path(), false);
        let err = optimizer
            .bundle_for(&dir.path().join("node_modules/vue/index.js"), None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::BundleMissing { ref specifier } if specifier == "node_modules/vue/index.js"));
    }

    #[tokio::test]
    async fn test_failed_run_keeps_previous_state() {
        let dir = tempfile::tempdir().unwrap();
        let (optimizer, _) = optimizer(dir.path(), true);
        let err = optimizer.optimize().await.unwrap_err();
        assert!(err.to_string().starts_with("Cannot prebundle: "));
        assert!(optimizer.state().bundle_map.is_empty());
        assert!(!dir.path().join("web_modules").exists());
    }

    #[tokio::test]
    async fn test_warm_start_reads_persisted_map() {
        let dir = tempfile::tempdir().unwrap();
        {
            let (optimizer, _) = optimizer(dir.path(), false);
            optimizer.optimize().await.unwrap();
        }
        let (warm, _) = optimizer(dir.path(), false);
        assert_eq!(warm.state().bundle_map.len(), 2);
        assert!(warm.state().commonjs.len() == 1);

        std::fs::write(dir.path().join("package-lock.json"), "{\"v\":2}").unwrap();
        let (cold, _) = optimizer(dir.path(), false);
        assert!(cold.state().bundle_map.is_empty());
    }

    #[tokio::test]
    async fn test_run_completes_after_waiter_is_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        let (optimizer, hmr) = optimizer(root, false);
        let mut rx = hmr.subscribe();

        // The waiter gives up long before the bundler is done
        let waited = tokio::time::timeout(Duration::from_millis(5), optimizer.optimize()).await;
        assert!(waited.is_err());

        assert_eq!(rx.recv().await.unwrap(), HmrPayload::Reload);
        assert_eq!(optimizer.runs(), 1);
        assert_eq!(optimizer.state().bundle_map.len(), 2);
        assert!(root.join("web_modules").join(BUNDLE_MAP_FILE).is_file());
    }

    #[tokio::test]
    async fn test_slow_bundler_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let (optimizer, _) = optimizer_with(dir.path(), false, |config| {
            config.prebundle.timeout_secs = 0;
        });

        let err = optimizer.optimize().await.unwrap_err();
        let message = err.to_string();
        assert!(message.starts_with("Cannot prebundle: "), "{message}");
        assert!(message.contains("timed out after 0s"), "{message}");
        assert!(optimizer.state().bundle_map.is_empty());
        assert!(!dir.path().join("web_modules").exists());
    }

    #[tokio::test]
    async fn test_included_dependency_is_bundled() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        let (optimizer, _) = optimizer_with(root, false, |config| {
            config.prebundle.include = vec!["vue".into()];
        });

        let vue = root.join("node_modules/vue/index.js");
        let bundle = optimizer.bundle_for(&vue, None).await.unwrap();
        assert_eq!(
            bundle,
            Some(root.join("web_modules/node_modules/vue/index.js"))
        );
        assert_eq!(optimizer.state().bundle_map.len(), 3);
    }
}
