//! Hook dispatch.
//!
//! Resolve and load use a first-success fold over matching hooks; transform
//! uses a sequential fold where every matching hook sees the previous output.

use super::{
    HookList, HookRegistry, HookResult, LoadArgs, LoadResult, Plugin, PluginBuild, PluginError,
    ResolveArgs, ResolveResult, TransformArgs, TransformResult, DEFAULT_NAMESPACE,
};
use futures::future::{BoxFuture, FutureExt};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

/// Ordered plugin hooks, the single mediation point for resolve/load/transform.
pub struct PluginPipeline {
    root: PathBuf,
    registry: HookRegistry,
}

impl PluginPipeline {
    /// Build a pipeline by running `setup` of every plugin, in order.
    pub fn new(root: impl Into<PathBuf>, plugins: Vec<Arc<dyn Plugin>>) -> Self {
        let mut registry = HookRegistry::default();
        for plugin in plugins {
            let name = plugin.name().to_string();
            let mut build = PluginBuild::new(&name, &mut registry);
            plugin.setup(&mut build);
        }
        debug!(
            resolvers = registry.resolvers.len(),
            loaders = registry.loaders.len(),
            transforms = registry.transforms.len(),
            closers = registry.closers.len(),
            "plugin pipeline ready"
        );
        Self {
            root: root.into(),
            registry,
        }
    }

    /// Project root, used for log output.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Registered hooks.
    #[must_use]
    pub fn registry(&self) -> &HookRegistry {
        &self.registry
    }

    /// Resolve a specifier. The first matching resolver returning a result wins.
    ///
    /// `Ok(None)` means no resolver claimed the path.
    pub async fn resolve(&self, args: &ResolveArgs) -> HookResult<Option<ResolveResult>> {
        let found = first_success(
            &self.registry.resolvers,
            &args.path,
            args.namespace.as_deref(),
            "resolve",
            |hook| hook.resolve(args, self),
        )
        .await?;

        Ok(found.map(|(mut result, plugin)| {
            debug!(
                specifier = %args.path,
                plugin,
                resolved = %self.display(&result.path),
                "resolved"
            );
            result
                .namespace
                .get_or_insert_with(|| DEFAULT_NAMESPACE.to_string());
            result
        }))
    }

    /// Load a module. The first matching loader returning a result wins.
    pub async fn load(&self, args: &LoadArgs) -> HookResult<Option<LoadResult>> {
        let found = first_success(
            &self.registry.loaders,
            &args.path,
            args.namespace.as_deref(),
            "load",
            |hook| hook.load(args, self),
        )
        .await?;

        Ok(found.map(|(mut result, plugin)| {
            debug!(path = %self.display(&args.path), plugin, "loaded");
            result
                .namespace
                .get_or_insert_with(|| DEFAULT_NAMESPACE.to_string());
            result
        }))
    }

    /// Transform a module through every matching transform hook, in order.
    ///
    /// Returns `Ok(None)` when no hook matched. A hook returning no contents
    /// leaves the accumulated result as it was.
    pub async fn transform(&self, args: TransformArgs) -> HookResult<Option<TransformResult>> {
        let path = args.path.clone();
        let namespace = args.namespace.clone();
        let state = Accumulated {
            args,
            map: None,
            matched: false,
        };

        let state = fold_sequential(
            &self.registry.transforms,
            &path,
            namespace.as_deref(),
            "transform",
            state,
            move |hook, plugin, mut state| {
                async move {
                    state.matched = true;
                    debug!(path = %self.display(&state.args.path), plugin, "transforming");
                    if let Some(out) = hook.transform(&state.args, self).await? {
                        if let Some(contents) = out.contents {
                            state.args.contents = contents;
                            if out.loader.is_some() {
                                state.args.loader = out.loader;
                            }
                            if out.map.is_some() {
                                state.map = out.map;
                            }
                        }
                    }
                    Ok(state)
                }
                .boxed()
            },
        )
        .await?;

        if !state.matched {
            return Ok(None);
        }
        Ok(Some(TransformResult {
            contents: Some(state.args.contents),
            map: state.map,
            loader: state.args.loader,
        }))
    }

    /// Run every close hook in order. Failures are collected, never short-circuited.
    pub async fn close(&self) -> Vec<PluginError> {
        let mut errors = Vec::new();
        for reg in self.registry.closers.iter() {
            debug!(plugin = %reg.plugin, "closing");
            if let Err(e) = reg.hook.close().await {
                let e = e.in_plugin(&reg.plugin, "close");
                warn!(error = %e, "close hook failed");
                errors.push(e);
            }
        }
        errors
    }

    fn display(&self, path: &str) -> String {
        let p = Path::new(path);
        match p.strip_prefix(&self.root) {
            Ok(rel) => crate::paths::slash(rel),
            Err(_) => path.to_string(),
        }
    }
}

struct Accumulated {
    args: TransformArgs,
    map: Option<String>,
    matched: bool,
}

/// First-success fold: call matching hooks in order until one returns `Some`.
async fn first_success<'a, H, R, F>(
    hooks: &'a HookList<H>,
    path: &'a str,
    namespace: Option<&'a str>,
    kind: &'static str,
    call: F,
) -> HookResult<Option<(R, &'a str)>>
where
    H: ?Sized + 'a,
    F: Fn(&'a H) -> BoxFuture<'a, HookResult<Option<R>>>,
{
    for reg in hooks.matching(path, namespace) {
        debug!(path, plugin = %reg.plugin, hook = kind, "dispatching");
        let out = call(&*reg.hook)
            .await
            .map_err(|e| e.in_plugin(&reg.plugin, kind))?;
        if let Some(result) = out {
            return Ok(Some((result, reg.plugin.as_str())));
        }
    }
    Ok(None)
}

/// Sequential fold: thread `state` through every matching hook in order.
async fn fold_sequential<'a, H, S, F>(
    hooks: &'a HookList<H>,
    path: &'a str,
    namespace: Option<&'a str>,
    kind: &'static str,
    init: S,
    step: F,
) -> HookResult<S>
where
    H: ?Sized + 'a,
    F: Fn(&'a H, &'a str, S) -> BoxFuture<'a, HookResult<S>>,
{
    let mut state = init;
    for reg in hooks.matching(path, namespace) {
        state = step(&*reg.hook, reg.plugin.as_str(), state)
            .await
            .map_err(|e| e.in_plugin(&reg.plugin, kind))?;
    }
    Ok(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin::{
        close_fn, load_fn, resolve_fn, transform_fn, FnPlugin, HookFilter, LoadResult,
    };
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn resolver(name: &str, target: &'static str) -> Arc<dyn Plugin> {
        FnPlugin::new(name, move |build| {
            build.on_resolve(
                HookFilter::new(r"^pkg$").unwrap(),
                resolve_fn(move |_| Ok(Some(ResolveResult::file(target)))),
            );
        })
    }

    #[tokio::test]
    async fn test_first_resolver_wins() {
        let pipeline = PluginPipeline::new(
            "/p",
            vec![resolver("first", "/p/first.js"), resolver("second", "/p/second.js")],
        );
        let out = pipeline
            .resolve(&ResolveArgs {
                path: "pkg".into(),
                ..Default::default()
            })
            .await
            .unwrap()
            .unwrap();
        assert_eq!(out.path, "/p/first.js");
        assert_eq!(out.namespace.as_deref(), Some("file"));
    }

    #[tokio::test]
    async fn test_resolver_returning_none_falls_through() {
        let skip = FnPlugin::new("skip", |build| {
            build.on_resolve(HookFilter::any(), resolve_fn(|_| Ok(None)));
        });
        let pipeline =
            PluginPipeline::new("/p", vec![skip, resolver("second", "/p/second.js")]);
        let out = pipeline
            .resolve(&ResolveArgs {
                path: "pkg".into(),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(out.unwrap().path, "/p/second.js");
    }

    #[tokio::test]
    async fn test_unclaimed_resolve_is_none() {
        let pipeline = PluginPipeline::new("/p", vec![resolver("only", "/p/x.js")]);
        let out = pipeline
            .resolve(&ResolveArgs {
                path: "other".into(),
                ..Default::default()
            })
            .await
            .unwrap();
        assert!(out.is_none());
    }

    #[tokio::test]
    async fn test_namespace_gate() {
        let virtual_loader = FnPlugin::new("virtual", |build| {
            build.on_load(
                HookFilter::any().namespace("virtual"),
                load_fn(|_| Ok(Some(LoadResult::contents("export default 1")))),
            );
        });
        let pipeline = PluginPipeline::new("/p", vec![virtual_loader]);

        let file = pipeline.load(&LoadArgs::new("x", None)).await.unwrap();
        assert!(file.is_none());

        let virt = pipeline
            .load(&LoadArgs::new("x", Some("virtual")))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(virt.contents, "export default 1");
        assert_eq!(virt.namespace(), "file");
    }

    #[tokio::test]
    async fn test_transforms_chain_in_order() {
        let a = FnPlugin::new("a", |build| {
            build.on_transform(
                HookFilter::new(r"\.js$").unwrap(),
                transform_fn(|args| Ok(Some(TransformResult::contents(format!("{}+a", args.contents))))),
            );
        });
        let noop = FnPlugin::new("noop", |build| {
            build.on_transform(HookFilter::any(), transform_fn(|_| Ok(None)));
        });
        let b = FnPlugin::new("b", |build| {
            build.on_transform(
                HookFilter::new(r"\.js$").unwrap(),
                transform_fn(|args| Ok(Some(TransformResult::contents(format!("{}+b", args.contents))))),
            );
        });
        let pipeline = PluginPipeline::new("/p", vec![a, noop, b]);

        let out = pipeline
            .transform(TransformArgs {
                path: "/p/x.js".into(),
                contents: "src".into(),
                ..Default::default()
            })
            .await
            .unwrap()
            .unwrap();
        assert_eq!(out.contents.as_deref(), Some("src+a+b"));
    }

    #[tokio::test]
    async fn test_transform_without_match_is_none() {
        let pipeline = PluginPipeline::new("/p", vec![]);
        let out = pipeline
            .transform(TransformArgs {
                path: "/p/x.js".into(),
                contents: "src".into(),
                ..Default::default()
            })
            .await
            .unwrap();
        assert!(out.is_none());
    }

    #[tokio::test]
    async fn test_hook_error_is_attributed() {
        let bad = FnPlugin::new("bad", |build| {
            build.on_resolve(
                HookFilter::any(),
                resolve_fn(|_| Err(PluginError::msg("nope"))),
            );
        });
        let pipeline = PluginPipeline::new("/p", vec![bad]);
        let err = pipeline
            .resolve(&ResolveArgs {
                path: "x".into(),
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "[bad] resolve: nope");
    }

    #[tokio::test]
    async fn test_close_runs_all_and_collects_errors() {
        let count = Arc::new(AtomicUsize::new(0));
        let c1 = count.clone();
        let c2 = count.clone();
        let failing = FnPlugin::new("failing", move |build| {
            let c = c1.clone();
            build.on_close(close_fn(move || {
                c.fetch_add(1, Ordering::SeqCst);
                Err(PluginError::msg("cannot close"))
            }));
        });
        let fine = FnPlugin::new("fine", move |build| {
            let c = c2.clone();
            build.on_close(close_fn(move || {
                c.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }));
        });
        let pipeline = PluginPipeline::new("/p", vec![failing, fine]);

        let errors = pipeline.close().await;
        assert_eq!(count.load(Ordering::SeqCst), 2);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].plugin, "failing");
        assert_eq!(errors[0].hook, "close");
    }
}
