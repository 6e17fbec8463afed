//! Plugin system for the dev server.
//!
//! Plugins register hooks during `setup`; every registration carries a path
//! filter and a namespace. The [`PluginPipeline`] is the single mediation
//! point for resolve, load, transform and close.
//!
//! ## Example
//!
//! ```ignore
//! use esmdev_core::plugin::{transform_fn, HookFilter, Plugin, PluginBuild, TransformResult};
//! use std::sync::Arc;
//!
//! struct TxtPlugin;
//!
//! impl Plugin for TxtPlugin {
//!     fn name(&self) -> &str { "txt" }
//!
//!     fn setup(self: Arc<Self>, build: &mut PluginBuild<'_>) {
//!         build.on_transform(
//!             HookFilter::new(r"\.txt$").unwrap(),
//!             transform_fn(|args| {
//!                 Ok(Some(TransformResult::contents(format!("export default {:?};", args.contents))))
//!             }),
//!         );
//!     }
//! }
//! ```

mod pipeline;

pub use pipeline::PluginPipeline;

use async_trait::async_trait;
use regex_lite::Regex;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Namespace of real files; the default on both sides of every match.
pub const DEFAULT_NAMESPACE: &str = "file";

/// Result type for plugin hooks.
pub type HookResult<T> = Result<T, PluginError>;

/// Error from a plugin.
#[derive(Debug, Clone)]
pub struct PluginError {
    /// Plugin name that caused the error.
    pub plugin: String,
    /// Hook that failed.
    pub hook: &'static str,
    /// Error message.
    pub message: String,
}

impl PluginError {
    /// Create a plugin error.
    pub fn new(plugin: impl Into<String>, hook: &'static str, message: impl Into<String>) -> Self {
        Self {
            plugin: plugin.into(),
            hook,
            message: message.into(),
        }
    }

    /// Error raised from inside a hook; the pipeline fills in plugin and hook.
    pub fn msg(message: impl Into<String>) -> Self {
        Self::new("", "", message)
    }

    /// Attribute this error to a plugin and hook unless already attributed.
    #[must_use]
    pub fn in_plugin(mut self, plugin: &str, hook: &'static str) -> Self {
        if self.plugin.is_empty() {
            self.plugin = plugin.to_string();
        }
        if self.hook.is_empty() {
            self.hook = hook;
        }
        self
    }
}

impl std::fmt::Display for PluginError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}: {}", self.plugin, self.hook, self.message)
    }
}

impl std::error::Error for PluginError {}

/// How a module's contents should be interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Loader {
    Js,
    Jsx,
    Ts,
    Tsx,
    Json,
    Css,
    Html,
    Text,
}

impl Loader {
    /// Guess the loader from a file extension.
    #[must_use]
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()).unwrap_or("") {
            "js" | "mjs" | "cjs" => Self::Js,
            "jsx" => Self::Jsx,
            "ts" | "mts" | "cts" => Self::Ts,
            "tsx" => Self::Tsx,
            "json" => Self::Json,
            "css" => Self::Css,
            "html" | "htm" => Self::Html,
            _ => Self::Text,
        }
    }

    /// Whether contents of this kind are JavaScript modules after transformation.
    #[must_use]
    pub fn is_script(self) -> bool {
        matches!(self, Self::Js | Self::Jsx | Self::Ts | Self::Tsx | Self::Json)
    }
}

/// Arguments of a resolve hook.
#[derive(Debug, Clone, Default)]
pub struct ResolveArgs {
    /// Specifier to resolve.
    pub path: String,
    /// Resolved path of the importing module.
    pub importer: Option<String>,
    /// Namespace of the specifier; `None` means `file`.
    pub namespace: Option<String>,
    /// Directory relative specifiers are resolved against.
    pub resolve_dir: Option<PathBuf>,
}

impl ResolveArgs {
    /// Resolve `path` as imported from the module `importer`.
    pub fn new(path: impl Into<String>, importer: &Path) -> Self {
        Self {
            path: path.into(),
            importer: Some(importer.to_string_lossy().into_owned()),
            namespace: None,
            resolve_dir: importer.parent().map(Path::to_path_buf),
        }
    }
}

/// Result of a resolve hook.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolveResult {
    /// Resolved path (absolute for the `file` namespace).
    pub path: String,
    /// Namespace of the resolved module; `None` means `file`.
    pub namespace: Option<String>,
    /// Whether the module is left to the browser.
    pub external: bool,
}

impl ResolveResult {
    /// A module in the `file` namespace.
    pub fn file(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            namespace: None,
            external: false,
        }
    }

    /// A module in a virtual namespace.
    pub fn virtual_module(path: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            namespace: Some(namespace.into()),
            external: false,
        }
    }

    /// Namespace, defaulted to `file`.
    #[must_use]
    pub fn namespace(&self) -> &str {
        self.namespace.as_deref().unwrap_or(DEFAULT_NAMESPACE)
    }
}

/// Arguments of a load hook.
#[derive(Debug, Clone, Default)]
pub struct LoadArgs {
    /// Resolved path.
    pub path: String,
    /// Namespace; `None` means `file`.
    pub namespace: Option<String>,
}

impl LoadArgs {
    pub fn new(path: impl Into<String>, namespace: Option<&str>) -> Self {
        Self {
            path: path.into(),
            namespace: namespace.map(str::to_string),
        }
    }
}

/// Result of a load hook.
#[derive(Debug, Clone)]
pub struct LoadResult {
    /// Module source.
    pub contents: String,
    /// How to interpret the contents.
    pub loader: Option<Loader>,
    /// Namespace; `None` means `file`.
    pub namespace: Option<String>,
}

impl LoadResult {
    /// Create a load result with contents only.
    pub fn contents(contents: impl Into<String>) -> Self {
        Self {
            contents: contents.into(),
            loader: None,
            namespace: None,
        }
    }

    #[must_use]
    pub fn with_loader(mut self, loader: Loader) -> Self {
        self.loader = Some(loader);
        self
    }

    /// Namespace, defaulted to `file`.
    #[must_use]
    pub fn namespace(&self) -> &str {
        self.namespace.as_deref().unwrap_or(DEFAULT_NAMESPACE)
    }
}

/// Arguments of a transform hook.
#[derive(Debug, Clone, Default)]
pub struct TransformArgs {
    /// Resolved path.
    pub path: String,
    /// Namespace; `None` means `file`.
    pub namespace: Option<String>,
    /// Current contents (output of the previous transform).
    pub contents: String,
    /// How to interpret the contents.
    pub loader: Option<Loader>,
}

/// Result of a transform hook.
#[derive(Debug, Clone, Default)]
pub struct TransformResult {
    /// New contents; `None` leaves the module untouched.
    pub contents: Option<String>,
    /// Optional source map.
    pub map: Option<String>,
    /// Loader of the new contents.
    pub loader: Option<Loader>,
}

impl TransformResult {
    /// Create a transform result with contents only.
    pub fn contents(contents: impl Into<String>) -> Self {
        Self {
            contents: Some(contents.into()),
            ..Default::default()
        }
    }
}

/// Path pattern plus namespace guarding a hook.
#[derive(Debug, Clone)]
pub struct HookFilter {
    pattern: Option<Regex>,
    namespace: Option<String>,
}

impl HookFilter {
    /// Filter on a path regex in the `file` namespace.
    pub fn new(pattern: &str) -> Result<Self, regex_lite::Error> {
        Ok(Self {
            pattern: Some(Regex::new(pattern)?),
            namespace: None,
        })
    }

    /// Filter matching every path in the `file` namespace.
    #[must_use]
    pub fn any() -> Self {
        Self {
            pattern: None,
            namespace: None,
        }
    }

    /// Restrict the filter to a namespace.
    #[must_use]
    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    /// Whether a hook with this filter applies to `path` in `namespace`.
    ///
    /// Both namespaces default to `file`, so file plugins and virtual-module
    /// plugins never cross-match.
    #[must_use]
    pub fn matches(&self, path: &str, namespace: Option<&str>) -> bool {
        if path.is_empty() || self.pattern.as_ref().is_some_and(|re| !re.is_match(path)) {
            return false;
        }
        let ours = self.namespace.as_deref().unwrap_or(DEFAULT_NAMESPACE);
        let theirs = namespace
            .filter(|ns| !ns.is_empty())
            .unwrap_or(DEFAULT_NAMESPACE);
        ours == theirs
    }
}

/// Resolve hook callback.
#[async_trait]
pub trait ResolveHook: Send + Sync {
    async fn resolve(
        &self,
        args: &ResolveArgs,
        pipeline: &PluginPipeline,
    ) -> HookResult<Option<ResolveResult>>;
}

/// Load hook callback.
#[async_trait]
pub trait LoadHook: Send + Sync {
    async fn load(&self, args: &LoadArgs, pipeline: &PluginPipeline)
        -> HookResult<Option<LoadResult>>;
}

/// Transform hook callback.
#[async_trait]
pub trait TransformHook: Send + Sync {
    async fn transform(
        &self,
        args: &TransformArgs,
        pipeline: &PluginPipeline,
    ) -> HookResult<Option<TransformResult>>;
}

/// Close hook callback, run once on shutdown.
#[async_trait]
pub trait CloseHook: Send + Sync {
    async fn close(&self) -> HookResult<()>;
}

/// Adapter turning a plain closure into a hook.
pub struct FnHook<F>(pub F);

#[async_trait]
impl<F> ResolveHook for FnHook<F>
where
    F: Fn(&ResolveArgs) -> HookResult<Option<ResolveResult>> + Send + Sync,
{
    async fn resolve(
        &self,
        args: &ResolveArgs,
        _pipeline: &PluginPipeline,
    ) -> HookResult<Option<ResolveResult>> {
        (self.0)(args)
    }
}

#[async_trait]
impl<F> LoadHook for FnHook<F>
where
    F: Fn(&LoadArgs) -> HookResult<Option<LoadResult>> + Send + Sync,
{
    async fn load(
        &self,
        args: &LoadArgs,
        _pipeline: &PluginPipeline,
    ) -> HookResult<Option<LoadResult>> {
        (self.0)(args)
    }
}

#[async_trait]
impl<F> TransformHook for FnHook<F>
where
    F: Fn(&TransformArgs) -> HookResult<Option<TransformResult>> + Send + Sync,
{
    async fn transform(
        &self,
        args: &TransformArgs,
        _pipeline: &PluginPipeline,
    ) -> HookResult<Option<TransformResult>> {
        (self.0)(args)
    }
}

#[async_trait]
impl<F> CloseHook for FnHook<F>
where
    F: Fn() -> HookResult<()> + Send + Sync,
{
    async fn close(&self) -> HookResult<()> {
        (self.0)()
    }
}

pub fn resolve_fn<F>(f: F) -> Arc<dyn ResolveHook>
where
    F: Fn(&ResolveArgs) -> HookResult<Option<ResolveResult>> + Send + Sync + 'static,
{
    Arc::new(FnHook(f))
}

pub fn load_fn<F>(f: F) -> Arc<dyn LoadHook>
where
    F: Fn(&LoadArgs) -> HookResult<Option<LoadResult>> + Send + Sync + 'static,
{
    Arc::new(FnHook(f))
}

pub fn transform_fn<F>(f: F) -> Arc<dyn TransformHook>
where
    F: Fn(&TransformArgs) -> HookResult<Option<TransformResult>> + Send + Sync + 'static,
{
    Arc::new(FnHook(f))
}

pub fn close_fn<F>(f: F) -> Arc<dyn CloseHook>
where
    F: Fn() -> HookResult<()> + Send + Sync + 'static,
{
    Arc::new(FnHook(f))
}

/// One hook registration: owning plugin, filter, callback.
pub struct Registration<H: ?Sized> {
    pub plugin: String,
    pub filter: HookFilter,
    pub hook: Arc<H>,
}

/// Ordered registrations of one hook kind.
pub struct HookList<H: ?Sized> {
    entries: Vec<Registration<H>>,
}

impl<H: ?Sized> Default for HookList<H> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
        }
    }
}

impl<H: ?Sized> HookList<H> {
    fn push(&mut self, plugin: &str, filter: HookFilter, hook: Arc<H>) {
        self.entries.push(Registration {
            plugin: plugin.to_string(),
            filter,
            hook,
        });
    }

    /// Registrations matching `path` in `namespace`, in registration order.
    pub fn matching<'a>(
        &'a self,
        path: &'a str,
        namespace: Option<&'a str>,
    ) -> impl Iterator<Item = &'a Registration<H>> + 'a {
        self.entries
            .iter()
            .filter(move |r| r.filter.matches(path, namespace))
    }

    /// All registrations, in registration order.
    pub fn iter(&self) -> impl Iterator<Item = &Registration<H>> {
        self.entries.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// The four ordered hook lists, filled at setup time.
#[derive(Default)]
pub struct HookRegistry {
    pub resolvers: HookList<dyn ResolveHook>,
    pub loaders: HookList<dyn LoadHook>,
    pub transforms: HookList<dyn TransformHook>,
    pub closers: HookList<dyn CloseHook>,
}

/// Handle given to [`Plugin::setup`] for registering hooks.
pub struct PluginBuild<'a> {
    plugin: String,
    registry: &'a mut HookRegistry,
}

impl<'a> PluginBuild<'a> {
    pub(crate) fn new(plugin: &str, registry: &'a mut HookRegistry) -> Self {
        Self {
            plugin: plugin.to_string(),
            registry,
        }
    }

    pub fn on_resolve(&mut self, filter: HookFilter, hook: Arc<dyn ResolveHook>) {
        self.registry.resolvers.push(&self.plugin, filter, hook);
    }

    pub fn on_load(&mut self, filter: HookFilter, hook: Arc<dyn LoadHook>) {
        self.registry.loaders.push(&self.plugin, filter, hook);
    }

    pub fn on_transform(&mut self, filter: HookFilter, hook: Arc<dyn TransformHook>) {
        self.registry.transforms.push(&self.plugin, filter, hook);
    }

    pub fn on_close(&mut self, hook: Arc<dyn CloseHook>) {
        self.registry.closers.push(&self.plugin, HookFilter::any(), hook);
    }
}

/// A dev server plugin.
///
/// `setup` runs once when the pipeline is built; everything a plugin does
/// afterwards happens through the hooks it registered.
pub trait Plugin: Send + Sync {
    /// Plugin name for debugging and error messages.
    fn name(&self) -> &str;

    /// Register hooks.
    fn setup(self: Arc<Self>, build: &mut PluginBuild<'_>);
}

/// Plugin assembled from a setup closure.
pub struct FnPlugin {
    name: String,
    setup: Box<dyn Fn(&mut PluginBuild<'_>) + Send + Sync>,
}

impl FnPlugin {
    pub fn new(
        name: impl Into<String>,
        setup: impl Fn(&mut PluginBuild<'_>) + Send + Sync + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            setup: Box::new(setup),
        })
    }
}

impl Plugin for FnPlugin {
    fn name(&self) -> &str {
        &self.name
    }

    fn setup(self: Arc<Self>, build: &mut PluginBuild<'_>) {
        (self.setup)(build);
    }
}
