//! Textual `define` replacements.

use crate::plugin::{transform_fn, Plugin, PluginBuild, TransformResult};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Replacement for `import.meta.env`.
const IMPORT_META_ENV: &str = r#"{"MODE":"development","DEV":true,"PROD":false}"#;

/// Replaces identifiers and member chains with configured source text.
pub struct DefinePlugin {
    /// Longest key first, so `a.b.c` wins over `a.b`.
    replacements: Vec<(String, String)>,
}

impl DefinePlugin {
    /// Plugin for the configured `define` map plus `import.meta.env`.
    #[must_use]
    pub fn new(define: &BTreeMap<String, String>) -> Self {
        let mut replacements: Vec<(String, String)> = define
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        if !define.contains_key("import.meta.env") {
            replacements.push(("import.meta.env".to_string(), IMPORT_META_ENV.to_string()));
        }
        replacements.sort_by(|a, b| b.0.len().cmp(&a.0.len()).then_with(|| a.0.cmp(&b.0)));
        Self { replacements }
    }

    /// Apply every replacement; `None` when nothing matched.
    fn apply(&self, code: &str) -> Option<String> {
        let mut result = code.to_string();
        let mut changed = false;
        for (from, to) in &self.replacements {
            if let Some(replaced) = replace_word(&result, from, to) {
                result = replaced;
                changed = true;
            }
        }
        changed.then_some(result)
    }
}

impl Plugin for DefinePlugin {
    fn name(&self) -> &str {
        "define"
    }

    fn setup(self: Arc<Self>, build: &mut PluginBuild<'_>) {
        build.on_transform(
            super::static_filter(super::SCRIPT_PATTERN),
            transform_fn(move |args| Ok(self.apply(&args.contents).map(TransformResult::contents))),
        );
    }
}

/// Replace `from` where it is not part of a longer identifier or member chain.
fn replace_word(code: &str, from: &str, to: &str) -> Option<String> {
    if from.is_empty() || !code.contains(from) {
        return None;
    }
    let is_ident = |c: char| c.is_alphanumeric() || c == '_' || c == '$';

    let mut out = String::with_capacity(code.len());
    let mut last = 0;
    let mut changed = false;
    for (start, _) in code.match_indices(from) {
        if start < last {
            continue;
        }
        let end = start + from.len();
        let before = code[..start].chars().next_back();
        let after = code[end..].chars().next();
        let bounded = !before.is_some_and(|c| is_ident(c) || c == '.')
            && !after.is_some_and(is_ident);
        if bounded {
            out.push_str(&code[last..start]);
            out.push_str(to);
            last = end;
            changed = true;
        }
    }
    if !changed {
        return None;
    }
    out.push_str(&code[last..]);
    Some(out)
}
