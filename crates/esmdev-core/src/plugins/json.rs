//! JSON modules.

use crate::plugin::{transform_fn, Loader, Plugin, PluginBuild, TransformResult};
use std::sync::Arc;

/// Turns `.json` files into `export default <json>;`.
pub struct JsonPlugin;

impl Plugin for JsonPlugin {
    fn name(&self) -> &str {
        "json"
    }

    fn setup(self: Arc<Self>, build: &mut PluginBuild<'_>) {
        build.on_transform(
            super::static_filter(r"\.json$"),
            transform_fn(|args| {
                Ok(Some(TransformResult {
                    contents: Some(format!("export default {};\n", args.contents.trim())),
                    map: None,
                    loader: Some(Loader::Js),
                }))
            }),
        );
    }
}
