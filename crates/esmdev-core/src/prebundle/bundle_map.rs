//! Persisted prebundle artifacts: bundle map, CommonJS analysis, metadata.
//!
//! All three live in the prebundle output directory. Missing or unreadable
//! files mean a cold start, never an error.

use crate::error::Result;
use crate::paths;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Bundle map file name.
pub const BUNDLE_MAP_FILE: &str = "bundleMap.json";

/// CommonJS analysis file name.
pub const COMMONJS_FILE: &str = "commonjs.json";

/// Metadata file name.
pub const METADATA_FILE: &str = "_metadata.json";

const LOCKFILES: &[&str] = &["package-lock.json", "yarn.lock", "pnpm-lock.yaml", "package.json"];

/// Root-relative specifier of a boundary module → root-relative bundle file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BundleMap(BTreeMap<String, String>);

impl BundleMap {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Read from `path`; absent or malformed files yield an empty map.
    #[must_use]
    pub fn load_or_empty(path: &Path) -> Self {
        load_json(path).unwrap_or_default()
    }

    /// Write as pretty JSON, atomically.
    pub fn save(&self, path: &Path) -> Result<()> {
        save_json(path, self)
    }

    pub fn insert(&mut self, specifier: impl Into<String>, bundle: impl Into<String>) {
        self.0.insert(specifier.into(), bundle.into());
    }

    /// Bundle for a boundary module, as an absolute path.
    #[must_use]
    pub fn lookup(&self, root: &Path, resolved: &Path) -> Option<PathBuf> {
        let key = paths::root_relative(root, resolved);
        self.0.get(&key).map(|bundle| paths::normalize(&root.join(bundle)))
    }

    #[must_use]
    pub fn get(&self, specifier: &str) -> Option<&str> {
        self.0.get(specifier).map(String::as_str)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Root-relative bundle files whose source was CommonJS.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CommonjsAnalysis(BTreeSet<String>);

impl CommonjsAnalysis {
    #[must_use]
    pub fn load_or_empty(path: &Path) -> Self {
        load_json(path).unwrap_or_default()
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        save_json(path, self)
    }

    pub fn insert(&mut self, bundle: impl Into<String>) {
        self.0.insert(bundle.into());
    }

    /// Whether the bundle at `path` needs the CommonJS interop rewrite.
    #[must_use]
    pub fn is_commonjs(&self, root: &Path, path: &Path) -> bool {
        self.0.contains(&paths::root_relative(root, path))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Fingerprint of the dependency install a bundle map was built against.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrebundleMetadata {
    /// BLAKE3 over the project's lockfiles.
    pub hash: String,
    /// Bundled specifiers, for humans.
    pub dependencies: Vec<String>,
}

impl PrebundleMetadata {
    /// Fingerprint of the lockfiles currently in `root`.
    #[must_use]
    pub fn current(root: &Path) -> String {
        let mut data = Vec::new();
        for name in LOCKFILES {
            if let Ok(bytes) = std::fs::read(root.join(name)) {
                data.extend_from_slice(name.as_bytes());
                data.extend_from_slice(&bytes);
            }
        }
        esmdev_util::hash::blake3_bytes(&data)
    }

    #[must_use]
    pub fn load(path: &Path) -> Option<Self> {
        load_json(path)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        save_json(path, self)
    }
}

fn load_json<T: DeserializeOwned>(path: &Path) -> Option<T> {
    let source = match std::fs::read_to_string(path) {
        Ok(s) => s,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!(path = %path.display(), "no cached prebundle file");
            return None;
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "cannot read prebundle file");
            return None;
        }
    };
    match serde_json::from_str(&source) {
        Ok(value) => Some(value),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "ignoring malformed prebundle file");
            None
        }
    }
}

fn save_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_vec_pretty(value)?;
    esmdev_util::fs::atomic_write(path, &json)?;
    Ok(())
}
