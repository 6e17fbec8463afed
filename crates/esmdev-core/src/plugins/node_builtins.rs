//! Empty browser stand-ins for Node built-in modules.

use crate::plugin::{
    load_fn, resolve_fn, HookFilter, LoadResult, Loader, Plugin, PluginBuild, ResolveResult,
};
use std::sync::Arc;

/// Namespace of the stand-in modules.
pub const NODE_BUILTINS_NAMESPACE: &str = "node-builtins";

/// Node built-in module names.
pub const NODE_BUILTINS: &[&str] = &[
    "assert", "buffer", "child_process", "cluster", "console", "constants", "crypto", "dgram",
    "dns", "domain", "events", "fs", "http", "http2", "https", "module", "net", "os", "path",
    "perf_hooks", "process", "punycode", "querystring", "readline", "repl", "stream",
    "string_decoder", "sys", "timers", "tls", "tty", "url", "util", "v8", "vm", "worker_threads",
    "zlib",
];

pub struct NodeBuiltinsPlugin;

impl Plugin for NodeBuiltinsPlugin {
    fn name(&self) -> &str {
        "node-builtins"
    }

    fn setup(self: Arc<Self>, build: &mut PluginBuild<'_>) {
        build.on_resolve(
            HookFilter::any(),
            resolve_fn(|args| {
                Ok(builtin_name(&args.path)
                    .map(|name| ResolveResult::virtual_module(name, NODE_BUILTINS_NAMESPACE)))
            }),
        );
        build.on_load(
            HookFilter::any().namespace(NODE_BUILTINS_NAMESPACE),
            load_fn(|args| {
                Ok(Some(
                    LoadResult::contents(format!(
                        "// browser stand-in for node:{}\nexport default {{}};\n",
                        args.path
                    ))
                    .with_loader(Loader::Js),
                ))
            }),
        );
    }
}

/// Built-in module name of a specifier like `fs`, `node:fs` or `fs/promises`.
fn builtin_name(specifier: &str) -> Option<&str> {
    let bare = specifier.strip_prefix("node:").unwrap_or(specifier);
    let top = bare.split('/').next().unwrap_or(bare);
    (NODE_BUILTINS.contains(&top) || specifier.starts_with("node:")).then_some(bare)
}
