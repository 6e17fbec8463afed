//! Rewrites ESM imports of CommonJS-shaped bundles.
//!
//! A prebundled CommonJS module only has a default export (its
//! `module.exports`). Named bindings are rebound to properties of it:
//!
//! ```text
//! import React, { useState as s } from "react"
//! // becomes
//! import __cjsImport0_react from "/web_modules/react.js"; const React = __cjsImport0_react; const s = __cjsImport0_react["useState"]
//! ```

use crate::imports::{ImportKind, ImportSpan};

/// Binding named by an import or re-export clause.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Binding {
    /// Exported name, or `*` for a namespace.
    imported: String,
    local: String,
}

/// Interop replacement for `span`, or `None` when a plain specifier
/// replacement is enough (side-effect imports, `export *`).
///
/// `index` makes the synthetic binding unique within the module.
pub fn cjs_import_statement(
    source: &str,
    span: &ImportSpan,
    specifier: &str,
    url: &str,
    index: usize,
) -> Result<Option<String>, String> {
    let Some(clause) = span.clause(source) else {
        return Ok(None);
    };
    let bindings = parse_clause(clause, span.kind)?;
    if bindings.is_empty() {
        return Ok(None);
    }
    if span.kind == ImportKind::ExportFrom && bindings.iter().any(|b| b.imported == "*") {
        return Ok(None);
    }

    let name = format!("__cjsImport{index}_{}", legal_identifier(specifier));
    let mut out = format!("import {name} from {url:?}");
    for binding in &bindings {
        let value = match binding.imported.as_str() {
            "*" | "default" => name.clone(),
            imported => format!("{name}[{imported:?}]"),
        };
        match span.kind {
            ImportKind::ExportFrom if binding.local == "default" => {
                out.push_str(&format!("; export default {value}"));
            }
            ImportKind::ExportFrom => {
                out.push_str(&format!("; export const {} = {value}", binding.local));
            }
            _ => out.push_str(&format!("; const {} = {value}", binding.local)),
        }
    }
    Ok(Some(out))
}

/// Parse `def, { a, b as c }`, `* as ns`, or `{ a as b }` into bindings.
fn parse_clause(clause: &str, kind: ImportKind) -> Result<Vec<Binding>, String> {
    let clause = clause.trim();
    if clause.starts_with("type ") || clause.starts_with("type{") {
        return Ok(Vec::new());
    }

    let (head, named) = match clause.find('{') {
        Some(open) => {
            let close = clause
                .rfind('}')
                .filter(|&c| c > open)
                .ok_or_else(|| format!("unbalanced braces in `{clause}`"))?;
            if !clause[close + 1..].trim().is_empty() {
                return Err(format!("unexpected text after bindings in `{clause}`"));
            }
            (&clause[..open], Some(&clause[open + 1..close]))
        }
        None => (clause, None),
    };

    let mut bindings = Vec::new();
    for part in head.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        if let Some(rest) = part.strip_prefix('*') {
            let local = rest
                .trim()
                .strip_prefix("as")
                .map(str::trim)
                .filter(|l| is_identifier(l));
            match (local, kind) {
                (Some(local), _) => bindings.push(Binding {
                    imported: "*".into(),
                    local: local.into(),
                }),
                (None, ImportKind::ExportFrom) => bindings.push(Binding {
                    imported: "*".into(),
                    local: String::new(),
                }),
                (None, _) => return Err(format!("malformed namespace binding `{part}`")),
            }
        } else if is_identifier(part) && kind == ImportKind::Static {
            bindings.push(Binding {
                imported: "default".into(),
                local: part.into(),
            });
        } else {
            return Err(format!("malformed binding `{part}`"));
        }
    }

    for item in named.into_iter().flat_map(|n| n.split(',')) {
        let item = item.trim();
        if item.is_empty() || item.starts_with("type ") {
            continue;
        }
        let (imported, local) = match item.split_once(" as ") {
            Some((imported, local)) => (unquote(imported.trim()), local.trim()),
            None => (unquote(item), item),
        };
        if !is_identifier(local) && !(kind == ImportKind::ExportFrom && local == "default") {
            return Err(format!("malformed binding `{item}`"));
        }
        bindings.push(Binding {
            imported: imported.into(),
            local: local.into(),
        });
    }

    Ok(bindings)
}

fn unquote(s: &str) -> &str {
    s.strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
        .or_else(|| s.strip_prefix('\'').and_then(|s| s.strip_suffix('\'')))
        .unwrap_or(s)
}

fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    chars
        .next()
        .is_some_and(|c| c.is_alphabetic() || c == '_' || c == '$')
        && chars.all(|c| c.is_alphanumeric() || c == '_' || c == '$')
}

/// Specifier squeezed into identifier characters.
fn legal_identifier(specifier: &str) -> String {
    specifier
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}
