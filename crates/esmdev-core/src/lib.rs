#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::too_many_lines)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::needless_pass_by_value)]
#![allow(clippy::return_self_not_must_use)]

pub mod config;
pub mod context;
pub mod error;
pub mod graph;
pub mod hmr;
pub mod imports;
pub mod paths;
pub mod plugin;
pub mod plugins;
pub mod prebundle;
pub mod rewrite;

pub use config::{load_config, DevConfig, PrebundleConfig, CONFIG_FILE};
pub use context::{error_module, DevContext, ServedModule};
pub use error::{Error, Result};
pub use graph::{HmrFlags, Invalidation, ModuleGraph, ModuleKey, ModuleNode};
pub use hmr::{ClientMessage, HmrBroadcaster, HmrPayload, HMR_SOCKET_PATH};
pub use imports::{scan_imports, ImportKind, ImportSpan};
pub use plugin::{Plugin, PluginBuild, PluginError, PluginPipeline};
pub use prebundle::{DepOptimizer, DependencyBundler, EsbuildBundler};
pub use rewrite::{rewrite_imports, ImportResolver, RewriteOutcome};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
