//! Maps request URLs back to what they were rewritten from.
//!
//! Rewritten imports are root-absolute URLs (`/src/a.js`,
//! `/fs?namespace=node-builtins`), so resolving them again must land on the
//! same module.

use crate::paths::{clean_url, is_external_url, namespace_of, request_to_file};
use crate::plugin::{
    HookResult, Plugin, PluginBuild, PluginPipeline, ResolveArgs, ResolveHook,
    ResolveResult, DEFAULT_NAMESPACE,
};
use async_trait::async_trait;
use std::sync::Arc;

pub struct UrlResolverPlugin;

impl Plugin for UrlResolverPlugin {
    fn name(&self) -> &str {
        "url-resolver"
    }

    fn setup(self: Arc<Self>, build: &mut PluginBuild<'_>) {
        build.on_resolve(super::static_filter("^/"), self);
    }
}

#[async_trait]
impl ResolveHook for UrlResolverPlugin {
    async fn resolve(
        &self,
        args: &ResolveArgs,
        pipeline: &PluginPipeline,
    ) -> HookResult<Option<ResolveResult>> {
        let url = args.path.as_str();
        if is_external_url(url) {
            return Ok(None);
        }

        match namespace_of(url) {
            Some(ns) if ns != DEFAULT_NAMESPACE => {
                let path = clean_url(url).trim_start_matches('/');
                Ok(Some(ResolveResult::virtual_module(path, ns)))
            }
            _ => {
                // Absolute filesystem paths and reserved URLs fall through
                let file = request_to_file(pipeline.root(), url);
                Ok(file
                    .is_file()
                    .then(|| ResolveResult::file(file.to_string_lossy())))
            }
        }
    }
}
