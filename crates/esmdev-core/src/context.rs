//! Composition root for a dev server front-end.
//!
//! ```text
//! GET /src/App.js
//!   → resolve (url-resolver, node-resolve → bundle redirect)
//!   → load (file-loader, virtual namespaces)
//!   → transform (json, define, user plugins, html, rewrite)
//!   → served as application/javascript
//! ```
//!
//! Prebundle tracing uses a second pipeline without the bundle redirect, so
//! a run triggered from inside a resolve never waits on itself.

use crate::config::DevConfig;
use crate::error::{Error, Result};
use crate::graph::{HmrFlags, ModuleGraph, ModuleKey};
use crate::hmr::{now_ms, ClientMessage, HmrBroadcaster, HmrPayload};
use crate::paths::{clean_url, request_to_file};
use crate::plugin::{
    LoadArgs, Loader, Plugin, PluginError, PluginPipeline, ResolveArgs, TransformArgs,
};
use crate::plugins::{
    public_url, DefinePlugin, FileLoaderPlugin, HmrClientPlugin, HtmlPlugin, JsonPlugin,
    NodeBuiltinsPlugin, NodeResolvePlugin, RewritePlugin, UrlResolverPlugin,
};
use crate::prebundle::{DepOptimizer, DependencyBundler, EsbuildBundler};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, trace, warn};

/// A transformed module ready to send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServedModule {
    pub contents: String,
    pub loader: Loader,
}

impl ServedModule {
    #[must_use]
    pub fn content_type(&self) -> &'static str {
        match self.loader {
            Loader::Html => "text/html; charset=utf-8",
            _ => "application/javascript; charset=utf-8",
        }
    }
}

/// Pipeline, module graph, optimizer and HMR channel of one project.
pub struct DevContext {
    config: Arc<DevConfig>,
    pipeline: Arc<PluginPipeline>,
    trace: Arc<PluginPipeline>,
    graph: Arc<ModuleGraph>,
    optimizer: DepOptimizer,
    hmr: HmrBroadcaster,
}

impl DevContext {
    /// Build a context that prebundles with the configured esbuild binary.
    pub fn new(config: DevConfig, plugins: Vec<Arc<dyn Plugin>>) -> Result<Self> {
        let bundler = Arc::new(EsbuildBundler::new(&config.prebundle.esbuild));
        Self::with_bundler(config, bundler, plugins)
    }

    /// Build a context around an explicit dependency bundler.
    pub fn with_bundler(
        mut config: DevConfig,
        bundler: Arc<dyn DependencyBundler>,
        plugins: Vec<Arc<dyn Plugin>>,
    ) -> Result<Self> {
        config.root = dunce::canonicalize(&config.root)?;
        let config = Arc::new(config);
        let root = config.root.clone();
        let hmr = HmrBroadcaster::default();
        let graph = Arc::new(ModuleGraph::new());

        let trace = Arc::new(PluginPipeline::new(
            root.clone(),
            vec![
                Arc::new(UrlResolverPlugin),
                Arc::new(NodeResolvePlugin::new()),
                Arc::new(NodeBuiltinsPlugin),
                Arc::new(FileLoaderPlugin),
            ],
        ));
        let optimizer = DepOptimizer::new(config.clone(), bundler, trace.clone(), hmr.clone());

        let mut chain: Vec<Arc<dyn Plugin>> = vec![
            Arc::new(UrlResolverPlugin),
            Arc::new(HmrClientPlugin),
            Arc::new(NodeResolvePlugin::new().with_redirect(Arc::new(optimizer.clone()))),
            Arc::new(NodeBuiltinsPlugin),
            Arc::new(FileLoaderPlugin),
            Arc::new(JsonPlugin),
            Arc::new(DefinePlugin::new(&config.define)),
        ];
        chain.extend(plugins);
        if config.hmr {
            chain.push(Arc::new(HtmlPlugin));
        }
        chain.push(Arc::new(RewritePlugin::new(
            graph.clone(),
            Some(optimizer.clone()),
        )));

        info!(root = %root.display(), plugins = chain.len(), "dev context ready");
        Ok(Self {
            pipeline: Arc::new(PluginPipeline::new(root, chain)),
            config,
            trace,
            graph,
            optimizer,
            hmr,
        })
    }

    #[must_use]
    pub fn config(&self) -> &DevConfig {
        &self.config
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.config.root
    }

    #[must_use]
    pub fn pipeline(&self) -> &PluginPipeline {
        &self.pipeline
    }

    #[must_use]
    pub fn graph(&self) -> &ModuleGraph {
        &self.graph
    }

    #[must_use]
    pub fn optimizer(&self) -> &DepOptimizer {
        &self.optimizer
    }

    #[must_use]
    pub fn hmr(&self) -> &HmrBroadcaster {
        &self.hmr
    }

    /// Resolve, load and transform the module behind a request URL.
    ///
    /// Returns `Ok(None)` when nothing claims the URL, or when it is not a
    /// script or HTML page; such requests belong to the static file handler.
    pub async fn serve_module(&self, url: &str) -> Result<Option<ServedModule>> {
        let args = ResolveArgs {
            path: url.to_string(),
            resolve_dir: Some(self.config.root.clone()),
            ..Default::default()
        };
        let Some(resolved) = self.pipeline.resolve(&args).await? else {
            debug!(url, "no module for request");
            return Ok(None);
        };
        if resolved.external {
            return Ok(None);
        }

        let namespace = resolved.namespace.as_deref();
        let Some(loaded) = self
            .pipeline
            .load(&LoadArgs::new(resolved.path.as_str(), namespace))
            .await?
        else {
            return Ok(None);
        };

        let loader = loaded
            .loader
            .unwrap_or_else(|| Loader::from_path(Path::new(&resolved.path)));
        if !loader.is_script() && loader != Loader::Html {
            return Ok(None);
        }

        if loader.is_script() {
            let key = ModuleKey::new(PathBuf::from(&resolved.path), namespace);
            self.graph.ensure_entry(
                &key,
                HmrFlags {
                    is_hmr_enabled: self.config.hmr,
                    has_hmr_accept: false,
                },
            );
        }

        let transformed = self
            .pipeline
            .transform(TransformArgs {
                path: resolved.path.clone(),
                namespace: resolved.namespace.clone(),
                contents: loaded.contents.clone(),
                loader: Some(loader),
            })
            .await?;

        let served = match transformed {
            Some(out) => ServedModule {
                contents: out.contents.unwrap_or(loaded.contents),
                loader: out.loader.unwrap_or(loader),
            },
            None => ServedModule {
                contents: loaded.contents,
                loader,
            },
        };
        Ok(Some(served))
    }

    /// Invalidate a changed file and broadcast the resulting payload.
    ///
    /// Changes inside the prebundle output directory are ignored.
    pub fn on_file_change(&self, path: &Path) -> Option<HmrPayload> {
        if !self.config.hmr || path.starts_with(self.config.out_dir()) {
            return None;
        }

        let invalidation = self.graph.invalidate(path);
        let root = &self.config.root;
        let payload =
            HmrPayload::from_invalidation(&invalidation, now_ms(), |k| public_url(root, k));
        info!(path = %path.display(), "file changed");
        self.hmr.send(payload.clone());
        trace!("module graph after invalidation:\n{}", self.graph);
        Some(payload)
    }

    /// Apply a message received on an HMR socket.
    pub fn handle_client_message(&self, text: &str) {
        match ClientMessage::parse(text) {
            Some(ClientMessage::HotAccept { path }) => {
                let file = request_to_file(&self.config.root, clean_url(&path));
                debug!(path = %path, "module accepts hot updates");
                self.graph.register_hot_accept(&ModuleKey::file(file));
            }
            Some(ClientMessage::Invalidate { path }) => {
                info!(path = %path, "client could not apply update, reloading");
                self.hmr.send(HmrPayload::Reload);
            }
            None => debug!(text, "ignoring unknown client message"),
        }
    }

    /// Log a failed request and show it in the overlay of connected clients.
    pub fn report_error(&self, url: &str, error: &Error) {
        warn!(url, error = %error, "failed to serve module");
        self.hmr.send(HmrPayload::Error {
            message: format!("{url}: {error}"),
        });
    }

    /// Run the prebundler now instead of on the first cold import.
    pub async fn prebundle(&self) -> Result<()> {
        self.optimizer.optimize().await.map(|_| ())
    }

    /// Run close hooks of both pipelines; failures are collected.
    pub async fn close(&self) -> Vec<PluginError> {
        let mut errors = self.pipeline.close().await;
        errors.extend(self.trace.close().await);
        errors
    }
}

/// Turn an error into the body of a failed module response.
#[must_use]
pub fn error_module(error: &Error) -> String {
    format!("console.error({:?});\n", error.to_string())
}
