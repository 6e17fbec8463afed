//! Import rewriting for served modules.
//!
//! Every import specifier is resolved and replaced in place with the URL
//! the browser should request. Edits are collected against the original
//! text and applied in one pass, so offsets never shift under each other.
//! Discovered imports replace the importer's edges in the module graph.

mod edits;
mod interop;

pub use edits::{OverlapError, TextEdit, TextEdits};
pub use interop::cjs_import_statement;

use crate::error::{Error, Result};
use crate::graph::{ModuleGraph, ModuleKey};
use crate::hmr::CLIENT_PUBLIC_PATH;
use crate::imports::{scan_imports, ImportKind, ImportSpan};
use crate::paths::{clean_url, is_external_url};
use async_trait::async_trait;
use regex_lite::Regex;
use std::borrow::Cow;
use std::collections::BTreeSet;
use std::sync::OnceLock;
use tracing::{debug, warn};

/// Comment that silences the warning for a non-literal `import()`.
pub const IGNORE_MARKER: &str = "@esmdev-ignore";

/// Where an import points after resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedImport {
    /// Text to put in place of the specifier.
    pub url: String,
    /// Graph identity of the imported module.
    pub key: ModuleKey,
}

/// Resolution services the rewriter needs.
#[async_trait]
pub trait ImportResolver: Send + Sync {
    /// Resolve `specifier` as imported from `importer`. `Ok(None)` is a miss.
    async fn resolve_import(
        &self,
        specifier: &str,
        importer: &ModuleKey,
    ) -> Result<Option<ResolvedImport>>;

    /// Whether `resolved` is a prebundled module with CommonJS shape.
    fn is_optimized_cjs(&self, resolved: &ModuleKey) -> bool;

    /// URL the browser uses for `key`.
    fn public_url(&self, key: &ModuleKey) -> String;
}

/// Why a module was served without rewriting.
#[derive(Debug, thiserror::Error)]
pub enum RewriteError {
    #[error("failed to resolve '{specifier}': {source}")]
    Resolve {
        specifier: String,
        #[source]
        source: Error,
    },

    #[error(transparent)]
    OverlappingEdit(#[from] OverlapError),

    #[error("cannot rewrite `{statement}`: {reason}")]
    MalformedStatement { statement: String, reason: String },
}

/// Non-fatal finding about one import.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub line: usize,
    pub message: String,
}

/// Result of rewriting one module.
#[derive(Debug)]
pub struct RewriteOutcome<'a> {
    /// Rewritten code; borrowed when nothing changed.
    pub code: Cow<'a, str>,
    /// Modules imported by this one.
    pub importees: BTreeSet<ModuleKey>,
    pub diagnostics: Vec<Diagnostic>,
    /// Set when rewriting was abandoned; `code` is then the original source.
    pub error: Option<RewriteError>,
}

impl RewriteOutcome<'_> {
    #[must_use]
    pub fn is_unchanged(&self) -> bool {
        matches!(self.code, Cow::Borrowed(_))
    }
}

/// Rewrite the imports of `source`, the module `importer`.
///
/// On success the importer's edges in `graph` are replaced by the imports
/// found. When a specifier fails to resolve, or an edit cannot be built,
/// the original source is returned with the error and the graph is left
/// untouched.
pub async fn rewrite_imports<'a>(
    source: &'a str,
    importer: &ModuleKey,
    resolver: &dyn ImportResolver,
    graph: &ModuleGraph,
) -> RewriteOutcome<'a> {
    let source = source.strip_prefix('\u{feff}').unwrap_or(source);
    let mut outcome = RewriteOutcome {
        code: Cow::Borrowed(source),
        importees: BTreeSet::new(),
        diagnostics: Vec::new(),
        error: None,
    };

    // A module that cannot be scanned is treated as importing nothing
    let imports = scan_imports(source).unwrap_or_else(|e| {
        warn!(
            importer = %importer,
            error = %e,
            "failed to scan imports, serving as is (is this JSX in a .js file?)"
        );
        Vec::new()
    });

    let has_hot = source.contains("import.meta.hot");
    let has_env = source.contains("import.meta.env");
    if imports.is_empty() && !has_hot && !has_env {
        debug!(importer = %importer, "no imports found");
        graph.set_importees(importer, &outcome.importees);
        return outcome;
    }

    let mut edits = TextEdits::new();
    if let Err(e) =
        collect_edits(source, importer, &imports, resolver, &mut edits, &mut outcome).await
    {
        warn!(importer = %importer, error = %e, "import rewrite failed, serving original source");
        outcome.importees.clear();
        outcome.error = Some(e);
        return outcome;
    }

    if has_hot {
        let url = resolver.public_url(importer);
        if let Err(e) = edits.push(
            0..0,
            format!(
                "import {{ createHotContext as __hmrContext }} from {CLIENT_PUBLIC_PATH:?}; \
                 import.meta.hot = __hmrContext({url:?});\n"
            ),
        ) {
            outcome.importees.clear();
            outcome.error = Some(e.into());
            return outcome;
        }
    }

    graph.set_importees(importer, &outcome.importees);
    if edits.is_empty() {
        debug!(importer = %importer, "nothing needs rewriting");
    } else {
        outcome.code = Cow::Owned(edits.apply(source));
    }
    outcome
}

async fn collect_edits(
    source: &str,
    importer: &ModuleKey,
    imports: &[ImportSpan],
    resolver: &dyn ImportResolver,
    edits: &mut TextEdits,
    outcome: &mut RewriteOutcome<'_>,
) -> std::result::Result<(), RewriteError> {
    for (index, span) in imports.iter().enumerate() {
        let raw = span.specifier(source);
        let specifier = if span.is_dynamic() {
            match literal_dynamic_specifier(raw) {
                Some(literal) => literal,
                None => {
                    if !raw.contains(IGNORE_MARKER) {
                        let message = format!(
                            "ignored dynamic import({}) in {importer}; add /* {IGNORE_MARKER} */ to silence",
                            raw.trim()
                        );
                        warn!("{message}");
                        outcome.diagnostics.push(Diagnostic {
                            line: span.line(source),
                            message,
                        });
                    }
                    continue;
                }
            }
        } else {
            raw.to_string()
        };

        if is_external_url(&specifier) {
            continue;
        }

        let resolved = resolver
            .resolve_import(&specifier, importer)
            .await
            .map_err(|source| RewriteError::Resolve {
                specifier: specifier.clone(),
                source,
            })?;
        let Some(resolved) = resolved else {
            let message = format!("could not resolve '{specifier}' from {importer}");
            warn!("{message}");
            outcome.diagnostics.push(Diagnostic {
                line: span.line(source),
                message,
            });
            continue;
        };

        if resolved.url != specifier {
            debug!(from = %specifier, to = %resolved.url, "rewriting import");
            push_edit(source, span, &specifier, &resolved, index, resolver, edits)?;
        }

        if resolved.key != *importer && clean_url(&resolved.url) != CLIENT_PUBLIC_PATH {
            outcome.importees.insert(resolved.key);
        }
    }
    Ok(())
}

fn push_edit(
    source: &str,
    span: &ImportSpan,
    specifier: &str,
    resolved: &ResolvedImport,
    index: usize,
    resolver: &dyn ImportResolver,
    edits: &mut TextEdits,
) -> std::result::Result<(), RewriteError> {
    let url = &resolved.url;
    if resolver.is_optimized_cjs(&resolved.key) {
        match span.kind {
            ImportKind::Dynamic => {
                edits.push(
                    span.statement.clone(),
                    format!("import({url:?}).then(m=>m.default)"),
                )?;
                return Ok(());
            }
            ImportKind::Static | ImportKind::ExportFrom => {
                let replacement = cjs_import_statement(source, span, specifier, url, index)
                    .map_err(|reason| RewriteError::MalformedStatement {
                        statement: span.statement(source).to_string(),
                        reason,
                    })?;
                if let Some(replacement) = replacement {
                    edits.push(span.statement.clone(), replacement)?;
                    return Ok(());
                }
            }
        }
    }

    if span.is_dynamic() {
        edits.push(span.specifier.clone(), format!("{url:?}"))?;
    } else {
        edits.push(span.specifier.clone(), url.as_str())?;
    }
    Ok(())
}

/// The string inside `import('x')`, after dropping comments from the argument.
pub(crate) fn literal_dynamic_specifier(argument: &str) -> Option<String> {
    static COMMENTS: OnceLock<Option<Regex>> = OnceLock::new();
    static LITERAL: OnceLock<Option<Regex>> = OnceLock::new();

    let comments = COMMENTS.get_or_init(|| Regex::new(r"(?m)/\*[\s\S]*?\*/|(^|[^\\:])//.*$").ok());
    let literal = LITERAL
        .get_or_init(|| Regex::new(r#"^\s*(?:'([^']+)'|"([^"]+)")\s*$"#).ok())
        .as_ref()?;

    let stripped = match comments {
        Some(re) => re.replace_all(argument, "${1}"),
        None => Cow::Borrowed(argument),
    };
    let caps = literal.captures(&stripped)?;
    caps.get(1)
        .or_else(|| caps.get(2))
        .map(|m| m.as_str().to_string())
}
