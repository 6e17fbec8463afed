//! Serves the HMR client runtime as a virtual module.

use crate::hmr::{client_runtime, CLIENT_NAMESPACE, CLIENT_PUBLIC_PATH};
use crate::paths::clean_url;
use crate::plugin::{
    load_fn, resolve_fn, HookFilter, LoadResult, Loader, Plugin, PluginBuild, ResolveResult,
};
use std::sync::Arc;

pub struct HmrClientPlugin;

impl Plugin for HmrClientPlugin {
    fn name(&self) -> &str {
        "hmr-client"
    }

    fn setup(self: Arc<Self>, build: &mut PluginBuild<'_>) {
        build.on_resolve(
            super::static_filter(r"^/_hmr_client\.js"),
            resolve_fn(|args| {
                Ok((clean_url(&args.path) == CLIENT_PUBLIC_PATH)
                    .then(|| ResolveResult::virtual_module(CLIENT_PUBLIC_PATH, CLIENT_NAMESPACE)))
            }),
        );
        build.on_load(
            HookFilter::any().namespace(CLIENT_NAMESPACE),
            load_fn(|_| Ok(Some(LoadResult::contents(client_runtime()).with_loader(Loader::Js)))),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin::{LoadArgs, PluginPipeline, ResolveArgs};

    #[tokio::test]
    async fn test_client_is_virtual() {
        let pipeline = PluginPipeline::new("/p", vec![Arc::new(HmrClientPlugin)]);
        let resolved = pipeline
            .resolve(&ResolveArgs {
                path: CLIENT_PUBLIC_PATH.into(),
                ..Default::default()
            })
            .await
            .unwrap()
            .unwrap();
        assert_eq!(resolved.namespace(), CLIENT_NAMESPACE);

        let loaded = pipeline
            .load(&LoadArgs::new(resolved.path, Some(CLIENT_NAMESPACE)))
            .await
            .unwrap()
            .unwrap();
        assert!(loaded.contents.contains("createHotContext"));

        // Same path in the file namespace is not ours
        assert!(pipeline
            .load(&LoadArgs::new(CLIENT_PUBLIC_PATH, None))
            .await
            .unwrap()
            .is_none());
    }
}
