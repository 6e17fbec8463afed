//! Import rewriting as the last transform of every script module.

use crate::error::{Error, Result};
use crate::graph::{ModuleGraph, ModuleKey};
use crate::hmr::{CLIENT_NAMESPACE, CLIENT_PUBLIC_PATH};
use crate::paths::{file_to_request, NAMESPACE_QUERY};
use crate::plugin::{
    HookResult, Plugin, PluginBuild, PluginError, PluginPipeline, ResolveArgs, TransformArgs,
    TransformHook, TransformResult,
};
use crate::prebundle::DepOptimizer;
use crate::rewrite::{rewrite_imports, ImportResolver, ResolvedImport, RewriteError};
use async_trait::async_trait;
use std::borrow::Cow;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::warn;

/// URL the browser uses to request the module `key`.
#[must_use]
pub fn public_url(root: &Path, key: &ModuleKey) -> String {
    if key.is_file() {
        file_to_request(root, &key.path)
    } else if key.namespace == CLIENT_NAMESPACE {
        CLIENT_PUBLIC_PATH.to_string()
    } else {
        let path = key.path.to_string_lossy();
        format!(
            "/{}?{NAMESPACE_QUERY}={}",
            path.trim_start_matches('/'),
            key.namespace
        )
    }
}

/// [`ImportResolver`] backed by the plugin pipeline.
pub struct PipelineResolver<'a> {
    pipeline: &'a PluginPipeline,
    optimizer: Option<&'a DepOptimizer>,
}

impl<'a> PipelineResolver<'a> {
    pub fn new(pipeline: &'a PluginPipeline, optimizer: Option<&'a DepOptimizer>) -> Self {
        Self {
            pipeline,
            optimizer,
        }
    }
}

#[async_trait]
impl<'a> ImportResolver for PipelineResolver<'a> {
    async fn resolve_import(
        &self,
        specifier: &str,
        importer: &ModuleKey,
    ) -> Result<Option<ResolvedImport>> {
        let mut args = ResolveArgs::new(specifier, &importer.path);
        if !importer.is_file() {
            args.resolve_dir = Some(self.pipeline.root().to_path_buf());
        }
        let Some(resolved) = self.pipeline.resolve(&args).await.map_err(Error::from)? else {
            return Ok(None);
        };

        let key = ModuleKey::new(PathBuf::from(&resolved.path), resolved.namespace.as_deref());
        let url = if resolved.external {
            resolved.path
        } else {
            self.public_url(&key)
        };
        Ok(Some(ResolvedImport { url, key }))
    }

    fn is_optimized_cjs(&self, key: &ModuleKey) -> bool {
        key.is_file() && self.optimizer.is_some_and(|o| o.is_commonjs(&key.path))
    }

    fn public_url(&self, key: &ModuleKey) -> String {
        public_url(self.pipeline.root(), key)
    }
}

/// Rewrites imports of `file` namespace scripts and records graph edges.
pub struct RewritePlugin {
    graph: Arc<ModuleGraph>,
    optimizer: Option<DepOptimizer>,
}

impl RewritePlugin {
    pub fn new(graph: Arc<ModuleGraph>, optimizer: Option<DepOptimizer>) -> Self {
        Self { graph, optimizer }
    }
}

impl Plugin for RewritePlugin {
    fn name(&self) -> &str {
        "rewrite"
    }

    fn setup(self: Arc<Self>, build: &mut PluginBuild<'_>) {
        build.on_transform(super::static_filter(super::SCRIPT_PATTERN), self);
    }
}

#[async_trait]
impl TransformHook for RewritePlugin {
    async fn transform(
        &self,
        args: &TransformArgs,
        pipeline: &PluginPipeline,
    ) -> HookResult<Option<TransformResult>> {
        let importer = ModuleKey::new(PathBuf::from(&args.path), args.namespace.as_deref());
        let resolver = PipelineResolver::new(pipeline, self.optimizer.as_ref());
        let outcome = rewrite_imports(&args.contents, &importer, &resolver, &self.graph).await;

        match outcome.error {
            // Resolution failures (including failed prebundles) fail the request
            Some(RewriteError::Resolve { specifier, source }) => Err(PluginError::msg(format!(
                "cannot resolve '{specifier}': {source}"
            ))),
            Some(e) => {
                warn!(importer = %importer, error = %e, "serving module without rewriting");
                Ok(None)
            }
            None => match outcome.code {
                Cow::Borrowed(_) => Ok(None),
                Cow::Owned(code) => Ok(Some(TransformResult::contents(code))),
            },
        }
    }
}
