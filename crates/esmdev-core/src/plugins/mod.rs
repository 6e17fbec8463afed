//! Built-in plugins.
//!
//! The dev context registers them in this order:
//!
//! | plugin          | hooks              | purpose                                   |
//! |-----------------|--------------------|-------------------------------------------|
//! | `url-resolver`  | resolve            | request URLs back to files / namespaces   |
//! | `hmr-client`    | resolve, load      | the injected HMR client module            |
//! | `node-resolve`  | resolve            | relative, absolute and bare specifiers    |
//! | `node-builtins` | resolve, load      | empty polyfills for Node built-ins        |
//! | `file-loader`   | load               | files from disk                           |
//! | `json`          | transform          | `.json` as a default export               |
//! | `define`        | transform          | textual `define` replacements             |
//! | `html`          | transform          | HMR client script tag in served HTML      |
//! | `rewrite`       | transform          | import rewriting and graph edges          |
//!
//! User plugins go between `define` and `html`.

mod define;
mod file_loader;
mod hmr_client;
mod html;
mod json;
mod node_builtins;
mod node_resolve;
mod rewrite;
mod url_resolver;

pub use define::DefinePlugin;
pub use file_loader::FileLoaderPlugin;
pub use hmr_client::HmrClientPlugin;
pub use html::HtmlPlugin;
pub use json::JsonPlugin;
pub use node_builtins::{NodeBuiltinsPlugin, NODE_BUILTINS, NODE_BUILTINS_NAMESPACE};
pub use node_resolve::{resolve_specifier, NodeResolvePlugin, ResolvedRedirect, DEFAULT_EXTENSIONS};
pub use rewrite::{public_url, PipelineResolver, RewritePlugin};
pub use url_resolver::UrlResolverPlugin;

use crate::plugin::HookFilter;

/// Paths the `define` and `rewrite` transforms apply to.
pub(crate) const SCRIPT_PATTERN: &str = r"\.(m|c)?[jt]sx?$";

/// Filter for a built-in pattern. A pattern that fails to compile is
/// logged and gets a filter that matches nothing.
pub(crate) fn static_filter(pattern: &str) -> HookFilter {
    HookFilter::new(pattern).unwrap_or_else(|e| {
        tracing::error!(pattern, error = %e, "invalid built-in filter");
        HookFilter::any().namespace("")
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_script_pattern() {
        let filter = static_filter(SCRIPT_PATTERN);
        for path in ["/a.js", "/a.mjs", "/a.cjs", "/a.ts", "/a.tsx", "/a.jsx"] {
            assert!(filter.matches(path, None), "{path}");
        }
        assert!(!filter.matches("/a.json", None));
        assert!(!filter.matches("/a.css", None));
    }
}
