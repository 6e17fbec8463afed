//! End-to-end tests of the dev context over a project on disk.
//!
//! Prebundling uses an in-process bundler that copies each entry into the
//! output directory, so no external binary is needed.

use async_trait::async_trait;
use esmdev_core::prebundle::{BundleOutput, BundleRequest};
use esmdev_core::{DependencyBundler, DevConfig, DevContext, Error, HmrPayload, Result};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::TempDir;

#[derive(Default)]
struct CopyBundler {
    calls: AtomicUsize,
}

#[async_trait]
impl DependencyBundler for CopyBundler {
    async fn bundle(&self, request: &BundleRequest) -> Result<Vec<BundleOutput>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut outputs = Vec::new();
        for entry in &request.entries {
            let source = std::fs::read_to_string(entry)?;
            let rel = entry
                .strip_prefix(&request.root)
                .map_err(|_| Error::Bundler(format!("{} is outside the root", entry.display())))?;
            let output = request.outdir.join(rel);
            if let Some(parent) = output.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(&output, &source)?;
            outputs.push(BundleOutput {
                entry: entry.clone(),
                output,
                is_commonjs: source.contains("module.exports"),
                bytes: source.len() as u64,
            });
        }
        Ok(outputs)
    }
}

struct FailingBundler;

#[async_trait]
impl DependencyBundler for FailingBundler {
    async fn bundle(&self, _request: &BundleRequest) -> Result<Vec<BundleOutput>> {
        Err(Error::Bundler("esbuild exited with status 1".into()))
    }
}

fn write(root: &Path, rel: &str, contents: &str) {
    let path = root.join(rel);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, contents).unwrap();
}

/// index.html → src/main.js → { lodash/foo/bar.js, cjs-pkg, ./util.js }
fn project() -> TempDir {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    write(
        root,
        "index.html",
        r#"<html><head><script type="module" src="/src/main.js"></script></head><body></body></html>"#,
    );
    write(
        root,
        "src/main.js",
        "import get from 'lodash/foo/bar.js';\nimport { a } from 'cjs-pkg';\nimport { helper } from './util.js';\nconsole.log(get, a, helper);\n",
    );
    write(root, "src/util.js", "export const helper = 1;\n");
    write(root, "node_modules/lodash/package.json", r#"{"name":"lodash","main":"index.js"}"#);
    write(root, "node_modules/lodash/index.js", "export default {};\n");
    write(root, "node_modules/lodash/foo/bar.js", "export default function get() {}\n");
    write(root, "node_modules/cjs-pkg/package.json", r#"{"name":"cjs-pkg","main":"index.js"}"#);
    write(root, "node_modules/cjs-pkg/index.js", "module.exports = { a: 1 };\n");
    dir
}

fn context(root: &Path, bundler: Arc<dyn DependencyBundler>) -> DevContext {
    DevContext::with_bundler(DevConfig::new(root.to_path_buf()), bundler, Vec::new()).unwrap()
}

#[tokio::test]
async fn test_cold_dependency_triggers_one_prebundle_and_reload() {
    let dir = project();
    let bundler = Arc::new(CopyBundler::default());
    let ctx = context(dir.path(), bundler.clone());
    let mut client = ctx.hmr().subscribe();

    let main = ctx.serve_module("/src/main.js").await.unwrap().unwrap();

    assert_eq!(bundler.calls.load(Ordering::SeqCst), 1);
    assert_eq!(ctx.optimizer().runs(), 1);
    assert_eq!(client.recv().await.unwrap(), HmrPayload::Reload);

    let state = ctx.optimizer().state();
    assert_eq!(
        state.bundle_map.get("node_modules/lodash/foo/bar.js"),
        Some("web_modules/node_modules/lodash/foo/bar.js")
    );
    assert!(ctx.root().join("web_modules/bundleMap.json").is_file());

    assert!(main
        .contents
        .contains("import get from '/web_modules/node_modules/lodash/foo/bar.js';"));
    assert!(main.contents.contains("import { helper } from '/src/util.js';"));
    // CommonJS bundle gets the interop rewrite, not a plain substitution
    assert!(main
        .contents
        .contains("/web_modules/node_modules/cjs-pkg/index.js"));
    assert!(main.contents.contains(r#"["a"]"#));
    assert!(!main.contents.contains("import { a } from"));
}

#[tokio::test]
async fn test_prebundle_is_stable_and_warm_starts() {
    let dir = project();
    let bundler = Arc::new(CopyBundler::default());
    let ctx = context(dir.path(), bundler.clone());

    ctx.prebundle().await.unwrap();
    let first: Vec<String> = ctx
        .optimizer()
        .state()
        .bundle_map
        .keys()
        .map(str::to_string)
        .collect();
    ctx.prebundle().await.unwrap();
    let second: Vec<String> = ctx
        .optimizer()
        .state()
        .bundle_map
        .keys()
        .map(str::to_string)
        .collect();
    assert_eq!(first, second);
    assert_eq!(
        first,
        vec!["node_modules/cjs-pkg/index.js", "node_modules/lodash/foo/bar.js"]
    );
    assert_eq!(bundler.calls.load(Ordering::SeqCst), 2);

    // A fresh context reads the persisted map and never runs the bundler
    let warm_bundler = Arc::new(CopyBundler::default());
    let warm = context(dir.path(), warm_bundler.clone());
    warm.serve_module("/src/main.js").await.unwrap().unwrap();
    assert_eq!(warm.optimizer().runs(), 0);
    assert_eq!(warm_bundler.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_hot_accept_boundary_through_chain() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    write(root, "src/a.js", "import './b.js';\n");
    write(root, "src/b.js", "import './c.js';\n");
    write(root, "src/c.js", "export const c = 1;\n");
    let ctx = context(root, Arc::new(CopyBundler::default()));

    for url in ["/src/a.js", "/src/b.js", "/src/c.js"] {
        ctx.serve_module(url).await.unwrap().unwrap();
    }
    let c = ctx.root().join("src/c.js");
    assert_eq!(ctx.on_file_change(&c), Some(HmrPayload::Reload));

    ctx.handle_client_message(r#"{"type":"hotAccept","path":"/src/a.js"}"#);
    match ctx.on_file_change(&c) {
        Some(HmrPayload::Update { updates }) => {
            assert_eq!(updates.len(), 1);
            assert_eq!(updates[0].path, "/src/a.js");
        }
        other => panic!("expected an update, got {other:?}"),
    }
}

#[tokio::test]
async fn test_hot_context_is_injected() {
    let dir = tempfile::tempdir().unwrap();
    write(
        dir.path(),
        "src/app.js",
        "export const x = 1;\nimport.meta.hot.accept();\n",
    );
    let ctx = context(dir.path(), Arc::new(CopyBundler::default()));

    let app = ctx.serve_module("/src/app.js").await.unwrap().unwrap();
    assert!(app.contents.starts_with(
        r#"import { createHotContext as __hmrContext } from "/_hmr_client.js"; import.meta.hot = __hmrContext("/src/app.js");"#
    ));
}

#[tokio::test]
async fn test_unresolved_import_is_served_as_is() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "src/a.js", "import x from 'not-installed';\n");
    let ctx = context(dir.path(), Arc::new(CopyBundler::default()));

    let a = ctx.serve_module("/src/a.js").await.unwrap().unwrap();
    assert_eq!(a.contents, "import x from 'not-installed';\n");
}

#[tokio::test]
async fn test_prebundle_failure_fails_request_only() {
    let dir = project();
    let ctx = context(dir.path(), Arc::new(FailingBundler));

    let err = ctx.serve_module("/src/main.js").await.unwrap_err();
    assert!(err.to_string().contains("Cannot prebundle"));
    assert!(ctx.optimizer().state().bundle_map.is_empty());
    assert!(!ctx.root().join("web_modules").exists());

    // Modules without dependencies are still served
    let util = ctx.serve_module("/src/util.js").await.unwrap().unwrap();
    assert_eq!(util.contents, "export const helper = 1;\n");
}
