//! Configuration file discovery and parsing for `esmdev`.
//!
//! Loads `esmdev.config.json` from the project root:
//!
//! ```json
//! {
//!   "port": 3000,
//!   "entries": ["index.html"],
//!   "define": { "__APP_VERSION__": "\"1.0.0\"" },
//!   "prebundle": { "outDir": "web_modules", "exclude": ["left-pad"] }
//! }
//! ```

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Config file name looked up in the project root.
pub const CONFIG_FILE: &str = "esmdev.config.json";

/// Dev server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DevConfig {
    /// Project root. Relative roots are resolved against the config file location.
    #[serde(default)]
    pub root: PathBuf,
    /// Port to listen on.
    pub port: u16,
    /// Host to bind to.
    pub host: String,
    /// Entry points (relative to root) used to trace dependencies for prebundling.
    pub entries: Vec<String>,
    /// Whether file changes are pushed to clients.
    pub hmr: bool,
    /// Enable permissive CORS headers.
    pub cors: bool,
    /// Open the browser after startup.
    pub open_browser: bool,
    /// Textual replacements applied to served modules.
    pub define: BTreeMap<String, String>,
    /// Dependency prebundling options.
    pub prebundle: PrebundleConfig,
}

/// Dependency prebundling options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PrebundleConfig {
    /// Output directory (relative to root) for bundles and their metadata.
    pub out_dir: String,
    /// Bare specifiers that are always prebundled, even when no entry imports them.
    pub include: Vec<String>,
    /// Packages that are never prebundled, even inside `node_modules`.
    pub exclude: Vec<String>,
    /// Upper bound for a single external bundler invocation.
    pub timeout_secs: u64,
    /// Path or name of the esbuild binary.
    pub esbuild: String,
}

impl Default for DevConfig {
    fn default() -> Self {
        Self {
            root: std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            port: 3000,
            host: "localhost".to_string(),
            entries: vec!["index.html".to_string()],
            hmr: true,
            cors: false,
            open_browser: false,
            define: BTreeMap::new(),
            prebundle: PrebundleConfig::default(),
        }
    }
}

impl Default for PrebundleConfig {
    fn default() -> Self {
        Self {
            out_dir: "web_modules".to_string(),
            include: Vec::new(),
            exclude: Vec::new(),
            timeout_secs: 120,
            esbuild: "esbuild".to_string(),
        }
    }
}

impl DevConfig {
    /// Create a default config rooted at `root`.
    #[must_use]
    pub fn new(root: PathBuf) -> Self {
        Self {
            root,
            ..Default::default()
        }
    }

    /// Absolute entry points.
    #[must_use]
    pub fn entry_paths(&self) -> Vec<PathBuf> {
        self.entries
            .iter()
            .map(|e| {
                let p = Path::new(e);
                if p.is_absolute() {
                    p.to_path_buf()
                } else {
                    self.root.join(p)
                }
            })
            .collect()
    }

    /// Absolute prebundle output directory.
    #[must_use]
    pub fn out_dir(&self) -> PathBuf {
        self.root.join(&self.prebundle.out_dir)
    }

    /// Whether a resolved file path belongs to the third-party boundary.
    ///
    /// A path is a boundary when it lives inside `node_modules`, has a
    /// JavaScript extension, and its package is not `exclude`d. Prebundle
    /// outputs themselves never are.
    #[must_use]
    pub fn needs_prebundle(&self, resolved: &Path) -> bool {
        if resolved.starts_with(self.out_dir()) {
            return false;
        }
        let Some(ext) = resolved.extension().and_then(|e| e.to_str()) else {
            return false;
        };
        if !matches!(ext, "js" | "mjs" | "cjs" | "jsx" | "ts" | "tsx") {
            return false;
        }
        let slashed = crate::paths::slash(resolved);
        match package_of(&slashed) {
            Some(pkg) => !self.prebundle.exclude.iter().any(|e| e == pkg),
            None => false,
        }
    }
}

/// Package name of a path inside `node_modules` (handles scoped packages).
fn package_of(slashed: &str) -> Option<&str> {
    let idx = slashed.rfind("/node_modules/")?;
    let rest = &slashed[idx + "/node_modules/".len()..];
    if rest.starts_with('@') {
        let second = rest.find('/')?;
        let end = rest[second + 1..]
            .find('/')
            .map_or(rest.len(), |i| second + 1 + i);
        Some(&rest[..end])
    } else {
        Some(rest.split('/').next().unwrap_or(rest))
    }
}

/// Load configuration for `root`.
///
/// If `config_path` is `Some`, that file must exist. Otherwise
/// `esmdev.config.json` is looked up in `root`; its absence yields defaults.
pub fn load_config(root: &Path, config_path: Option<&Path>) -> Result<DevConfig> {
    let path = match config_path {
        Some(p) => {
            let abs = if p.is_absolute() {
                p.to_path_buf()
            } else {
                root.join(p)
            };
            Some(abs)
        }
        None => Some(root.join(CONFIG_FILE)).filter(|p| p.exists()),
    };

    let Some(path) = path else {
        return Ok(DevConfig::new(root.to_path_buf()));
    };

    let source = std::fs::read_to_string(&path).map_err(|source| Error::ConfigRead {
        path: path.clone(),
        source,
    })?;
    let mut config = parse_config(&source).map_err(|source| Error::ConfigParse {
        path: path.clone(),
        source,
    })?;

    // A root given in the file is relative to the file, otherwise it's the caller's root
    config.root = if config.root.as_os_str().is_empty() {
        root.to_path_buf()
    } else {
        path.parent().unwrap_or(root).join(&config.root)
    };
    Ok(config)
}

fn parse_config(source: &str) -> std::result::Result<DevConfig, serde_json::Error> {
    serde_json::from_str(source)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_defaults() {
        let config = DevConfig::new(PathBuf::from("/project"));
        assert_eq!(config.port, 3000);
        assert_eq!(config.entries, vec!["index.html"]);
        assert_eq!(config.out_dir(), PathBuf::from("/project/web_modules"));
        assert!(config.hmr);
    }

    #[test]
    fn test_missing_file_is_default() {
        let dir = tempdir().unwrap();
        let config = load_config(dir.path(), None).unwrap();
        assert_eq!(config.root, dir.path());
        assert_eq!(config.prebundle.timeout_secs, 120);
    }

    #[test]
    fn test_parse_partial_config() {
        let dir = tempdir().unwrap();
        std::fs::write(
            dir.path().join(CONFIG_FILE),
            r#"{ "port": 4000, "prebundle": { "exclude": ["left-pad"] }, "define": { "__DEV__": "true" } }"#,
        )
        .unwrap();

        let config = load_config(dir.path(), None).unwrap();
        assert_eq!(config.port, 4000);
        assert_eq!(config.prebundle.exclude, vec!["left-pad"]);
        assert_eq!(config.prebundle.out_dir, "web_modules");
        assert_eq!(config.define.get("__DEV__").map(String::as_str), Some("true"));
    }

    #[test]
    fn test_explicit_missing_file_errors() {
        let dir = tempdir().unwrap();
        let err = load_config(dir.path(), Some(Path::new("nope.json"))).unwrap_err();
        assert!(matches!(err, Error::ConfigRead { .. }));
    }

    #[test]
    fn test_invalid_json_errors() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join(CONFIG_FILE), "{ port: ").unwrap();
        let err = load_config(dir.path(), None).unwrap_err();
        assert!(matches!(err, Error::ConfigParse { .. }));
    }

    #[test]
    fn test_root_relative_to_config_file() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join(CONFIG_FILE), r#"{ "root": "app" }"#).unwrap();
        let config = load_config(dir.path(), None).unwrap();
        assert_eq!(config.root, dir.path().join("app"));
    }

    #[test]
    fn test_needs_prebundle() {
        let mut config = DevConfig::new(PathBuf::from("/p"));
        assert!(config.needs_prebundle(Path::new("/p/node_modules/react/index.js")));
        assert!(config.needs_prebundle(Path::new(
            "/p/node_modules/@scope/pkg/dist/index.mjs"
        )));
        assert!(!config.needs_prebundle(Path::new("/p/src/main.js")));
        assert!(!config.needs_prebundle(Path::new("/p/node_modules/pkg/style.css")));

        assert!(!config.needs_prebundle(Path::new(
            "/p/web_modules/node_modules/react/index.js"
        )));

        config.prebundle.exclude.push("react".into());
        assert!(!config.needs_prebundle(Path::new("/p/node_modules/react/index.js")));
    }

    #[test]
    fn test_package_of() {
        assert_eq!(package_of("/p/node_modules/react/index.js"), Some("react"));
        assert_eq!(
            package_of("/p/node_modules/@scope/pkg/a/b.js"),
            Some("@scope/pkg")
        );
        assert_eq!(
            package_of("/p/node_modules/a/node_modules/b/x.js"),
            Some("b")
        );
        assert_eq!(package_of("/p/src/x.js"), None);
    }
}
