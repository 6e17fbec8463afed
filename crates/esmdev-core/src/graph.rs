//! Live module dependency graph used for HMR invalidation.
//!
//! Nodes are keyed by resolved path plus namespace and created lazily on
//! first reference. Importee and importer sets are only ever changed together,
//! so they stay mutually consistent.

use parking_lot::RwLock;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};

use crate::plugin::DEFAULT_NAMESPACE;

/// Identity of a module: resolved path plus namespace.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ModuleKey {
    pub path: PathBuf,
    pub namespace: String,
}

impl ModuleKey {
    /// A module in the `file` namespace.
    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            namespace: DEFAULT_NAMESPACE.to_string(),
        }
    }

    pub fn new(path: impl Into<PathBuf>, namespace: Option<&str>) -> Self {
        Self {
            path: path.into(),
            namespace: namespace
                .filter(|ns| !ns.is_empty())
                .unwrap_or(DEFAULT_NAMESPACE)
                .to_string(),
        }
    }

    #[must_use]
    pub fn is_file(&self) -> bool {
        self.namespace == DEFAULT_NAMESPACE
    }
}

impl fmt::Display for ModuleKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_file() {
            write!(f, "{}", self.path.display())
        } else {
            write!(f, "{}:{}", self.namespace, self.path.display())
        }
    }
}

/// HMR flags applied when a node is created.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HmrFlags {
    pub is_hmr_enabled: bool,
    pub has_hmr_accept: bool,
}

/// A node in the module graph.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModuleNode {
    pub importees: BTreeSet<ModuleKey>,
    pub importers: BTreeSet<ModuleKey>,
    pub is_hmr_enabled: bool,
    pub has_hmr_accept: bool,
}

/// Outcome of invalidating a changed module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Invalidation {
    /// Modules that accept the update, nearest first.
    Boundaries(Vec<ModuleKey>),
    /// No accepting module on some path to a root, or a cycle without one.
    FullReload,
}

/// Module dependency graph.
#[derive(Debug, Default)]
pub struct ModuleGraph {
    nodes: RwLock<BTreeMap<ModuleKey, ModuleNode>>,
}

impl ModuleGraph {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the node for `key`, creating it with `defaults` if absent.
    ///
    /// Defaults apply only on creation; an existing node is returned as is.
    pub fn ensure_entry(&self, key: &ModuleKey, defaults: HmrFlags) -> ModuleNode {
        let mut nodes = self.nodes.write();
        nodes
            .entry(key.clone())
            .or_insert_with(|| ModuleNode {
                is_hmr_enabled: defaults.is_hmr_enabled,
                has_hmr_accept: defaults.has_hmr_accept,
                ..Default::default()
            })
            .clone()
    }

    /// Mark `key` as accepting hot updates, creating it if needed.
    pub fn register_hot_accept(&self, key: &ModuleKey) {
        let mut nodes = self.nodes.write();
        let node = nodes.entry(key.clone()).or_default();
        node.is_hmr_enabled = true;
        node.has_hmr_accept = true;
    }

    /// Snapshot of a node, if known.
    #[must_use]
    pub fn get(&self, key: &ModuleKey) -> Option<ModuleNode> {
        self.nodes.read().get(key).cloned()
    }

    #[must_use]
    pub fn contains(&self, key: &ModuleKey) -> bool {
        self.nodes.read().contains_key(key)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.read().is_empty()
    }

    /// Add the edge `importer -> importee`, creating both nodes as needed.
    pub fn record_edge(&self, importer: &ModuleKey, importee: &ModuleKey) {
        let mut nodes = self.nodes.write();
        link(&mut nodes, importer, importee);
    }

    /// Replace every outgoing edge of `importer` with `importees`.
    ///
    /// Edges from the previous pass that are not in `importees` are dropped
    /// on both sides.
    pub fn set_importees(&self, importer: &ModuleKey, importees: &BTreeSet<ModuleKey>) {
        let mut nodes = self.nodes.write();
        let previous = nodes
            .get_mut(importer)
            .map(|n| std::mem::take(&mut n.importees))
            .unwrap_or_default();
        for old in &previous {
            if let Some(node) = nodes.get_mut(old) {
                node.importers.remove(importer);
            }
        }
        nodes.entry(importer.clone()).or_default();
        for importee in importees {
            link(&mut nodes, importer, importee);
        }
    }

    /// Compute the HMR boundaries for a changed file.
    ///
    /// Walks importers upward from the changed module. A module with
    /// `has_hmr_accept` stops the walk on that path. Reaching a module with no
    /// importers, or coming back to a module already on the current path,
    /// means the page must reload. Unknown paths get an empty node, and so
    /// reload.
    pub fn invalidate(&self, changed: &Path) -> Invalidation {
        let key = ModuleKey::file(changed);
        self.nodes.write().entry(key.clone()).or_default();

        let nodes = self.nodes.read();
        let mut boundaries = Vec::new();
        let mut seen = HashSet::new();
        let mut on_path = HashSet::new();
        if walk(&nodes, &key, &mut boundaries, &mut seen, &mut on_path) {
            Invalidation::Boundaries(boundaries)
        } else {
            Invalidation::FullReload
        }
    }
}

fn link(nodes: &mut BTreeMap<ModuleKey, ModuleNode>, importer: &ModuleKey, importee: &ModuleKey) {
    nodes
        .entry(importer.clone())
        .or_default()
        .importees
        .insert(importee.clone());
    nodes
        .entry(importee.clone())
        .or_default()
        .importers
        .insert(importer.clone());
}

/// Returns `false` when some upward path ends without an accepting module.
fn walk(
    nodes: &BTreeMap<ModuleKey, ModuleNode>,
    key: &ModuleKey,
    boundaries: &mut Vec<ModuleKey>,
    seen: &mut HashSet<ModuleKey>,
    on_path: &mut HashSet<ModuleKey>,
) -> bool {
    if on_path.contains(key) {
        return false;
    }
    if !seen.insert(key.clone()) {
        return true;
    }

    let Some(node) = nodes.get(key) else {
        return false;
    };
    if node.has_hmr_accept {
        boundaries.push(key.clone());
        return true;
    }
    if node.importers.is_empty() {
        return false;
    }

    on_path.insert(key.clone());
    let ok = node
        .importers
        .iter()
        .all(|importer| walk(nodes, importer, boundaries, seen, on_path));
    on_path.remove(key);
    ok
}

impl fmt::Display for ModuleGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (key, node) in self.nodes.read().iter() {
            let flag = if node.has_hmr_accept { " [accept]" } else { "" };
            writeln!(f, "{key}{flag}")?;
            for importee in &node.importees {
                writeln!(f, "  -> {importee}")?;
            }
        }
        Ok(())
    }
}
