//! Injects the HMR client into served HTML pages.

use crate::hmr::{client_script_tag, CLIENT_PUBLIC_PATH};
use crate::plugin::{transform_fn, Plugin, PluginBuild, TransformResult};
use std::sync::Arc;

pub struct HtmlPlugin;

impl Plugin for HtmlPlugin {
    fn name(&self) -> &str {
        "html"
    }

    fn setup(self: Arc<Self>, build: &mut PluginBuild<'_>) {
        build.on_transform(
            super::static_filter(r"\.html?$"),
            transform_fn(|args| Ok(inject_client(&args.contents).map(TransformResult::contents))),
        );
    }
}

/// Insert the client script before `</head>`, else `</body>`, else at the end.
///
/// Returns `None` when the page already loads the client.
fn inject_client(html: &str) -> Option<String> {
    if html.contains(CLIENT_PUBLIC_PATH) {
        return None;
    }
    let tag = client_script_tag();
    let mut out = html.to_string();
    match html.find("</head>").or_else(|| html.find("</body>")) {
        Some(pos) => out.insert_str(pos, &format!("  {tag}\n  ")),
        None => {
            out.push('\n');
            out.push_str(&tag);
        }
    }
    Some(out)
}
