//! External bundler used to flatten boundary modules.

use crate::error::{Error, Result};
use crate::paths;
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tracing::debug;

/// Main fields probed in `package.json`, in order.
pub const MAIN_FIELDS: &[&str] = &["browser", "module", "main"];

/// One bundler invocation.
#[derive(Debug, Clone)]
pub struct BundleRequest {
    /// Project root; the bundler runs with this as working directory.
    pub root: PathBuf,
    /// Absolute entry points, one output per entry.
    pub entries: Vec<PathBuf>,
    /// Directory outputs are written to.
    pub outdir: PathBuf,
    /// Extra `define` replacements.
    pub define: BTreeMap<String, String>,
}

/// Output produced for one entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BundleOutput {
    /// Absolute entry path.
    pub entry: PathBuf,
    /// Absolute output file, inside the request's `outdir`.
    pub output: PathBuf,
    /// The entry was CommonJS and its bundle needs interop.
    pub is_commonjs: bool,
    /// Output size.
    pub bytes: u64,
}

/// Whole-program bundler collaborator.
#[async_trait]
pub trait DependencyBundler: Send + Sync {
    async fn bundle(&self, request: &BundleRequest) -> Result<Vec<BundleOutput>>;
}

/// Bundler that shells out to the esbuild CLI.
#[derive(Debug, Clone)]
pub struct EsbuildBundler {
    binary: PathBuf,
}

impl EsbuildBundler {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    fn args(request: &BundleRequest, metafile: &Path) -> Vec<String> {
        let mut args: Vec<String> = request
            .entries
            .iter()
            .map(|e| e.to_string_lossy().into_owned())
            .collect();
        args.extend(
            [
                "--bundle",
                "--format=esm",
                "--splitting",
                "--platform=browser",
                "--target=es2020",
                "--log-level=warning",
            ]
            .map(String::from),
        );
        args.push(format!("--main-fields={}", MAIN_FIELDS.join(",")));
        args.push(format!("--outbase={}", request.root.display()));
        args.push(format!("--outdir={}", request.outdir.display()));
        args.push(format!("--metafile={}", metafile.display()));
        args.push(r#"--define:process.env.NODE_ENV="development""#.to_string());
        args.push("--define:global=globalThis".to_string());
        for (key, value) in &request.define {
            args.push(format!("--define:{key}={value}"));
        }
        args
    }
}

impl Default for EsbuildBundler {
    fn default() -> Self {
        Self::new("esbuild")
    }
}

#[async_trait]
impl DependencyBundler for EsbuildBundler {
    async fn bundle(&self, request: &BundleRequest) -> Result<Vec<BundleOutput>> {
        let meta_dir = tempfile::tempdir()?;
        let metafile = meta_dir.path().join("meta.json");
        let args = Self::args(request, &metafile);
        debug!(binary = %self.binary.display(), ?args, "running esbuild");

        let output = Command::new(&self.binary)
            .args(&args)
            .current_dir(&request.root)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| Error::Bundler(format!("cannot run {}: {e}", self.binary.display())))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::Bundler(format!(
                "esbuild exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }

        let meta = tokio::fs::read_to_string(&metafile).await?;
        parse_metafile(&request.root, &request.entries, &meta)
    }
}

#[derive(Debug, Deserialize)]
struct Metafile {
    #[serde(default)]
    inputs: BTreeMap<String, MetaInput>,
    #[serde(default)]
    outputs: BTreeMap<String, MetaOutput>,
}

#[derive(Debug, Deserialize)]
struct MetaInput {
    #[serde(default)]
    format: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MetaOutput {
    #[serde(default)]
    entry_point: Option<String>,
    #[serde(default)]
    bytes: u64,
}

/// Map entries to their outputs using an esbuild metafile.
///
/// Metafile paths are relative to `root`. Every entry must have an output.
pub fn parse_metafile(root: &Path, entries: &[PathBuf], json: &str) -> Result<Vec<BundleOutput>> {
    let meta: Metafile = serde_json::from_str(json)?;

    let mut by_entry = BTreeMap::new();
    for (out, info) in &meta.outputs {
        if let Some(entry) = &info.entry_point {
            by_entry.insert(entry.as_str(), (out.as_str(), info.bytes));
        }
    }

    entries
        .iter()
        .map(|entry| {
            let key = paths::root_relative(root, entry);
            let (out, bytes) = by_entry
                .get(key.as_str())
                .copied()
                .ok_or_else(|| Error::Bundler(format!("no output for entry '{key}'")))?;
            let is_commonjs = meta
                .inputs
                .get(&key)
                .and_then(|i| i.format.as_deref())
                == Some("cjs");
            Ok(BundleOutput {
                entry: entry.clone(),
                output: paths::normalize(&root.join(out)),
                is_commonjs,
                bytes,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const META: &str = r#"{
        "inputs": {
            "node_modules/react/index.js": { "bytes": 190, "imports": [], "format": "cjs" },
            "node_modules/preact/dist/preact.module.js": { "bytes": 11000, "imports": [], "format": "esm" }
        },
        "outputs": {
            "web_modules/.staging/node_modules/react/index.js": {
                "entryPoint": "node_modules/react/index.js", "bytes": 2100, "inputs": {}
            },
            "web_modules/.staging/node_modules/preact/dist/preact.module.js": {
                "entryPoint": "node_modules/preact/dist/preact.module.js", "bytes": 9000, "inputs": {}
            },
            "web_modules/.staging/chunk-ABC123.js": { "bytes": 300, "inputs": {} }
        }
    }"#;

    #[test]
    fn test_parse_metafile() {
        let root = Path::new("/p");
        let entries = vec![
            PathBuf::from("/p/node_modules/react/index.js"),
            PathBuf::from("/p/node_modules/preact/dist/preact.module.js"),
        ];
        let outputs = parse_metafile(root, &entries, META).unwrap();
        assert_eq!(outputs.len(), 2);
        assert_eq!(
            outputs[0].output,
            PathBuf::from("/p/web_modules/.staging/node_modules/react/index.js")
        );
        assert!(outputs[0].is_commonjs);
        assert_eq!(outputs[0].bytes, 2100);
        assert!(!outputs[1].is_commonjs);
    }

    #[test]
    fn test_parse_metafile_missing_entry() {
        let root = Path::new("/p");
        let entries = vec![PathBuf::from("/p/node_modules/vue/index.js")];
        let err = parse_metafile(root, &entries, META).unwrap_err();
        assert!(err.to_string().contains("node_modules/vue/index.js"));
    }

    #[test]
    fn test_esbuild_args() {
        let request = BundleRequest {
            root: PathBuf::from("/p"),
            entries: vec![PathBuf::from("/p/node_modules/react/index.js")],
            outdir: PathBuf::from("/p/out"),
            define: BTreeMap::from([("__DEV__".to_string(), "true".to_string())]),
        };
        let args = EsbuildBundler::args(&request, Path::new("/tmp/meta.json"));
        assert_eq!(args[0], "/p/node_modules/react/index.js");
        assert!(args.contains(&"--bundle".to_string()));
        assert!(args.contains(&"--splitting".to_string()));
        assert!(args.contains(&"--outdir=/p/out".to_string()));
        assert!(args.contains(&"--metafile=/tmp/meta.json".to_string()));
        assert!(args.contains(&"--define:__DEV__=true".to_string()));
        assert!(!args.iter().any(|a| a.starts_with("--minify")));
    }

    #[tokio::test]
    async fn test_missing_binary_is_bundler_error() {
        let dir = tempfile::tempdir().unwrap();
        let bundler = EsbuildBundler::new("/definitely/not/esbuild");
        let err = bundler
            .bundle(&BundleRequest {
                root: dir.path().to_path_buf(),
                entries: vec![],
                outdir: dir.path().join("out"),
                define: BTreeMap::new(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Bundler(_)));
    }
}
